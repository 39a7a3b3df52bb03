use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::llm::{control_point_tool_schema, step_analysis_tool_schema};
use crate::models::Usage;

/// Which structured output a request expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    StepAnalysis,
    ControlPoint,
}

impl OutputKind {
    fn tool_name(self) -> &'static str {
        match self {
            Self::StepAnalysis => "submit_step_analysis",
            Self::ControlPoint => "submit_control_point",
        }
    }
}

/// A single analysis request
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub system: String,
    pub prompt: String,
    pub output: OutputKind,
}

/// Raw model output, before repair and parsing
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub text: String,
    pub usage: Usage,
}

/// External AI analysis capability
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<RawCompletion, AnalysisError>;
}

/// Configuration for the Anthropic API client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key (from ANTHROPIC_API_KEY env var)
    pub api_key: String,
    /// Model to use (CALLAUDIT_MODEL overrides)
    pub model: String,
    /// Temperature (0-1, lower = more deterministic)
    pub temperature: f64,
    /// Maximum tokens in response
    pub max_tokens: u32,
    pub base_url: String,
}

impl AnthropicConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;
        let mut config = Self::new(api_key, "claude-sonnet-4-20250514".to_string());

        if let Ok(model) = std::env::var("CALLAUDIT_MODEL") {
            config.model = model;
        }
        if let Ok(max_tokens) = std::env::var("CALLAUDIT_MAX_TOKENS") {
            config.max_tokens = max_tokens
                .parse()
                .context("CALLAUDIT_MAX_TOKENS must be an integer")?;
        }

        Ok(config)
    }

    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            temperature: 0.0,
            max_tokens: 8192,
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

/// Anthropic Messages API client with forced tool use
pub struct AnthropicClient {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn tool_for(output: OutputKind) -> Tool {
        let (description, input_schema) = match output {
            OutputKind::StepAnalysis => (
                "Submit the compliance analysis of one audit step",
                step_analysis_tool_schema(),
            ),
            OutputKind::ControlPoint => (
                "Submit the verdict for a single control point",
                control_point_tool_schema(),
            ),
        };

        Tool {
            name: output.tool_name().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

#[async_trait]
impl AnalysisClient for AnthropicClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<RawCompletion, AnalysisError> {
        let tool_name = request.output.tool_name();
        let body = AnthropicToolRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            system: Some(request.system.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            tools: vec![Self::tool_for(request.output)],
            tool_choice: Some(ToolChoice {
                choice_type: "tool".to_string(),
                name: tool_name.to_string(),
            }),
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api { status, body });
        }

        let response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Request(format!("unreadable response body: {}", e)))?;

        let usage = Usage::new(response.usage.input_tokens, response.usage.output_tokens);
        let text = extract_output(&response.content, tool_name).ok_or(AnalysisError::EmptyResponse)?;

        Ok(RawCompletion { text, usage })
    }
}

/// Pull the structured output out of the content blocks
///
/// Tool input is re-serialized so that tool and text answers share the same
/// repair path.
fn extract_output(content: &[ContentBlock], tool_name: &str) -> Option<String> {
    let tool_input = content
        .iter()
        .find(|c| c.content_type == "tool_use" && c.name.as_deref() == Some(tool_name))
        .and_then(|c| c.input.as_ref())
        .and_then(|input| serde_json::to_string(input).ok());

    tool_input.or_else(|| {
        content
            .iter()
            .find(|c| c.content_type == "text" && !c.text.trim().is_empty())
            .map(|c| c.text.clone())
    })
}

#[derive(Debug, Serialize)]
struct AnthropicToolRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}
