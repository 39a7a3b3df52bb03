use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::AnalysisError;
use crate::llm::{
    build_control_point_prompt, build_step_prompt, repair_json, validate_control_point,
    validate_step_payload, AnalysisClient, AnalysisRequest, OutputKind, ValidationConfig,
};
use crate::models::{
    AuditStepDefinition, Conforme, ControlPointResult, RunStatistics, StepAnalysisPayload,
    StepAnalysisResult, StepFailure, StepMetadata, StepOutcome, Timeline, Usage,
};
use crate::stages::{ProgressEmitter, ProgressEvent};

/// Configuration for step analysis
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Attempts per analysis call, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_delay_ms: u64,
    /// Upper bound on concurrent analysis calls
    pub max_concurrent_steps: usize,
    /// Deadline for a single attempt
    pub attempt_timeout_secs: Option<u64>,
    /// Deadline for a whole fan-out run
    pub run_timeout_secs: Option<u64>,
    pub validation: ValidationConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1_000,
            max_concurrent_steps: 4,
            attempt_timeout_secs: Some(180),
            run_timeout_secs: Some(900),
            validation: ValidationConfig::default(),
        }
    }
}

/// Read-only inputs shared by every step of a run
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub system_prompt: String,
    pub timeline: Timeline,
    /// Product reference text for steps that verify product info
    pub product_context: Option<String>,
}

/// Settled outcomes of a fan-out run, ordered by step position
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub outcomes: Vec<StepOutcome>,
    pub statistics: RunStatistics,
}

/// Drives one analysis call per step with retry, repair and validation
#[derive(Clone)]
pub struct StepAnalysisOrchestrator {
    client: Arc<dyn AnalysisClient>,
    config: AnalysisConfig,
    progress: Option<ProgressEmitter>,
}

impl StepAnalysisOrchestrator {
    pub fn new(client: Arc<dyn AnalysisClient>, config: AnalysisConfig) -> Self {
        Self {
            client,
            config,
            progress: None,
        }
    }

    /// Attach a progress emitter; without one the orchestrator emits nothing
    pub fn with_progress(mut self, emitter: ProgressEmitter) -> Self {
        self.progress = Some(emitter);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze a single step
    pub async fn analyze_step(
        &self,
        step: &AuditStepDefinition,
        context: &AnalysisContext,
        extra_instructions: Option<&str>,
    ) -> Result<StepAnalysisResult, AnalysisError> {
        let request = AnalysisRequest {
            system: context.system_prompt.clone(),
            prompt: build_step_prompt(
                step,
                &context.timeline.text,
                context.product_context.as_deref(),
                extra_instructions,
            ),
            output: OutputKind::StepAnalysis,
        };

        let label = format!("step {}", step.position);
        let (mut payload, usage) = self
            .request_with_retry(&label, &request, |text| {
                let payload: StepAnalysisPayload =
                    serde_json::from_str(text).map_err(|e| AnalysisError::Malformed(e.to_string()))?;
                let validation = validate_step_payload(
                    &payload,
                    step,
                    &context.timeline,
                    &self.config.validation,
                );
                if validation.is_valid {
                    Ok(payload)
                } else {
                    Err(AnalysisError::Invalid(validation.errors))
                }
            })
            .await?;

        stamp_citations(&mut payload.points_controle, &context.timeline);
        let result = StepAnalysisResult::from_payload(payload, step, usage);
        debug!(
            position = step.position,
            score = result.score,
            citations = result.total_citations,
            "Step analyzed"
        );
        Ok(result)
    }

    /// Re-evaluate a single control point of a step, given its previous verdict
    pub async fn analyze_control_point(
        &self,
        step: &AuditStepDefinition,
        point: &str,
        previous: &ControlPointResult,
        context: &AnalysisContext,
        extra_instructions: Option<&str>,
    ) -> Result<(ControlPointResult, Usage), AnalysisError> {
        let request = AnalysisRequest {
            system: context.system_prompt.clone(),
            prompt: build_control_point_prompt(
                step,
                point,
                previous,
                &context.timeline.text,
                context.product_context.as_deref(),
                extra_instructions,
            ),
            output: OutputKind::ControlPoint,
        };

        let label = format!("step {} / point '{}'", step.position, point);
        let (mut result, usage) = self.request_with_retry(&label, &request, |text| {
            let result: ControlPointResult =
                serde_json::from_str(text).map_err(|e| AnalysisError::Malformed(e.to_string()))?;
            let validation = validate_control_point(&result, &context.timeline, &self.config.validation);
            if validation.is_valid {
                Ok(result)
            } else {
                Err(AnalysisError::Invalid(validation.errors))
            }
        })
        .await?;

        stamp_citations(std::slice::from_mut(&mut result), &context.timeline);
        Ok((result, usage))
    }

    /// Call the client up to `max_attempts` times, repairing output before each parse
    async fn request_with_retry<T, F>(
        &self,
        label: &str,
        request: &AnalysisRequest,
        parse: F,
    ) -> Result<(T, Usage), AnalysisError>
    where
        F: Fn(&str) -> Result<T, AnalysisError>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                info!("{}: retry {} of {}", label, attempt - 1, max_attempts - 1);
                if self.config.retry_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }

            let response = match self.config.attempt_timeout_secs {
                Some(secs) => {
                    match tokio::time::timeout(Duration::from_secs(secs), self.client.analyze(request)).await {
                        Ok(response) => response,
                        Err(_) => Err(AnalysisError::TimedOut),
                    }
                }
                None => self.client.analyze(request).await,
            };

            match response.and_then(|raw| {
                let repaired = repair_json(&raw.text);
                parse(&repaired).map(|value| (value, raw.usage))
            }) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    warn!(attempt, "{} attempt failed: {}", label, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(AnalysisError::EmptyResponse))
    }

    /// Analyze every step in parallel and wait for all of them to settle
    ///
    /// Concurrency is bounded by `max_concurrent_steps`. A failing step is
    /// recorded as [`StepOutcome::Failed`] and never cancels its siblings.
    /// Steps still running when the run deadline passes are recorded as failed.
    pub async fn analyze_all(
        &self,
        steps: &[AuditStepDefinition],
        context: Arc<AnalysisContext>,
    ) -> OrchestrationResult {
        let started = Instant::now();
        let total = steps.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_steps.max(1)));
        let mut tasks = JoinSet::new();

        info!(
            "Analyzing {} steps (max {} concurrent)",
            total, self.config.max_concurrent_steps
        );

        for step in steps {
            let this = self.clone();
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            let step = step.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                match this.analyze_step(&step, &context, None).await {
                    Ok(result) => StepOutcome::Succeeded(result),
                    Err(e) => {
                        warn!(position = step.position, "Step {} failed: {}", step.name, e);
                        StepOutcome::Failed(StepFailure {
                            step_metadata: StepMetadata::from(&step),
                            error: e.to_string(),
                        })
                    }
                }
            });
        }

        let deadline = self
            .config
            .run_timeout_secs
            .map(|secs| started + Duration::from_secs(secs));
        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(total);
        let mut failed = 0;

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Run deadline reached, aborting {} pending steps", tasks.len());
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            let Some(joined) = next else { break };
            match joined {
                Ok(outcome) => {
                    if !outcome.is_success() {
                        failed += 1;
                    }
                    self.emit_settled(&outcome);
                    outcomes.push(outcome);
                    self.emit_progress(outcomes.len(), total, failed);
                }
                Err(e) => warn!("Step task ended abnormally: {}", e),
            }
        }

        // Steps that never settled (panic or deadline) still get a result
        let settled: HashSet<u32> = outcomes.iter().map(StepOutcome::position).collect();
        for step in steps.iter().filter(|s| !settled.contains(&s.position)) {
            let outcome = StepOutcome::Failed(StepFailure {
                step_metadata: StepMetadata::from(step),
                error: AnalysisError::TimedOut.to_string(),
            });
            failed += 1;
            self.emit_settled(&outcome);
            outcomes.push(outcome);
            self.emit_progress(outcomes.len(), total, failed);
        }

        outcomes.sort_by_key(StepOutcome::position);

        let statistics = RunStatistics {
            total,
            successful: outcomes.len() - failed,
            failed,
            total_time_seconds: started.elapsed().as_secs_f64(),
            total_tokens: outcomes
                .iter()
                .filter_map(StepOutcome::as_success)
                .map(|r| r.usage.total_tokens)
                .sum(),
        };

        info!(
            "Analysis complete: {} successful, {} failed, {} tokens in {:.1}s",
            statistics.successful,
            statistics.failed,
            statistics.total_tokens,
            statistics.total_time_seconds
        );

        OrchestrationResult {
            outcomes,
            statistics,
        }
    }

    fn emit_settled(&self, outcome: &StepOutcome) {
        let Some(progress) = &self.progress else { return };

        let event = match outcome {
            StepOutcome::Succeeded(r) => ProgressEvent::StepCompleted {
                position: r.step_metadata.position,
                name: r.step_metadata.name.clone(),
                score: r.score,
                weight: r.step_metadata.weight,
                compliant: r.conforme == Conforme::Conforme,
                citation_count: r.total_citations,
                tokens: r.usage.total_tokens,
            },
            StepOutcome::Failed(f) => ProgressEvent::StepFailed {
                position: f.step_metadata.position,
                name: f.step_metadata.name.clone(),
                error: f.error.clone(),
            },
        };
        progress.emit(event);
    }

    fn emit_progress(&self, completed: usize, total: usize, failed: usize) {
        if let Some(progress) = &self.progress {
            progress.emit(ProgressEvent::Progress {
                completed,
                total,
                failed,
                phase: "analysis".to_string(),
            });
        }
    }
}

/// Copy the cited recording's date and time into each citation
fn stamp_citations(points: &mut [ControlPointResult], timeline: &Timeline) {
    for citation in points.iter_mut().flat_map(|p| p.citations.iter_mut()) {
        let (date, time) = timeline.citation_date_time(citation.recording_index, citation.chunk_index);
        citation.recording_date = date;
        citation.recording_time = time;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::llm::RawCompletion;
    use crate::models::{ControlPointStatus, RecordingMetadata, TranscriptWord};
    use crate::stages::{assemble_transcript, build_timeline, AssemblerConfig, RecordingChunks};

    /// Scripted client: replies are keyed by the "# ÉTAPE n" marker in the prompt
    pub(crate) struct ScriptedClient {
        replies: Mutex<HashMap<u32, Vec<Result<String, AnalysisError>>>>,
        pub calls: AtomicUsize,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl ScriptedClient {
        pub(crate) fn new() -> Self {
            Self {
                replies: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        /// Queue replies for a step; the last one repeats once the queue is drained
        pub(crate) fn script(self, position: u32, replies: Vec<Result<String, AnalysisError>>) -> Self {
            self.replies.lock().unwrap().insert(position, replies);
            self
        }

        fn position_of(prompt: &str) -> u32 {
            prompt
                .split("# ÉTAPE ")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|n| n.parse().ok())
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl AnalysisClient for ScriptedClient {
        async fn analyze(&self, request: &AnalysisRequest) -> Result<RawCompletion, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let position = Self::position_of(&request.prompt);
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                let queue = replies.get_mut(&position).ok_or(AnalysisError::EmptyResponse)?;
                if queue.len() > 1 { queue.remove(0) } else { queue[0].clone() }
            };

            reply.map(|text| RawCompletion {
                text,
                usage: Usage::new(100, 20),
            })
        }
    }

    pub(crate) fn step(position: u32, weight: u32, is_critical: bool) -> AuditStepDefinition {
        AuditStepDefinition {
            position,
            name: format!("Étape {}", position),
            description: String::new(),
            prompt: "Analyser".to_string(),
            control_points: vec!["Point".to_string()],
            keywords: vec![],
            severity_level: "MEDIUM".to_string(),
            is_critical,
            weight,
            chronological_important: false,
            verify_product_info: false,
            custom_instructions: None,
        }
    }

    pub(crate) fn conforming_reply(score: f64) -> String {
        format!(
            r#"{{"score": {}, "conforme": "CONFORME", "niveau_conformite": "BON",
                "points_controle": [{{"point": "Point", "statut": "PRESENT", "commentaire": "",
                  "citations": [{{"texte": "Bonjour", "minutage": "00:00", "minutage_secondes": 0.0,
                                  "speaker": "s0", "recording_index": 0, "chunk_index": 0}}]}}]}}"#,
            score
        )
    }

    pub(crate) fn context() -> Arc<AnalysisContext> {
        let words = vec![
            TranscriptWord::word("Bonjour", 0.0, 0.5, "s0"),
            TranscriptWord::word("Oui", 0.6, 0.9, "s1"),
        ];
        let timeline = build_timeline(vec![RecordingChunks {
            metadata: Default::default(),
            chunks: assemble_transcript(&words, &AssemblerConfig::default()),
        }]);
        Arc::new(AnalysisContext {
            system_prompt: "Auditeur".to_string(),
            timeline,
            product_context: None,
        })
    }

    pub(crate) fn fast_config() -> AnalysisConfig {
        AnalysisConfig {
            retry_delay_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let client = Arc::new(ScriptedClient::new().script(
            1,
            vec![
                Err(AnalysisError::Request("connection reset".to_string())),
                Ok("not json at all".to_string()),
                Ok(conforming_reply(4.0)),
            ],
        ));
        let orchestrator = StepAnalysisOrchestrator::new(client.clone(), fast_config());

        let result = orchestrator.analyze_step(&step(1, 5, false), &context(), None).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.score, 4.0);
        assert_eq!(result.total_citations, 1);
        assert_eq!(result.usage.total_tokens, 120);
        assert_eq!(result.step_metadata.weight, 5);
    }

    #[tokio::test]
    async fn test_citations_carry_recording_date_time() {
        let words = vec![TranscriptWord::word("Bonjour", 0.0, 0.5, "s0")];
        let timeline = build_timeline(vec![RecordingChunks {
            metadata: RecordingMetadata {
                call_id: "c1".to_string(),
                recording_date: Some("2024-03-12".to_string()),
                recording_time: Some("10:15".to_string()),
                ..Default::default()
            },
            chunks: assemble_transcript(&words, &AssemblerConfig::default()),
        }]);
        let context = AnalysisContext {
            system_prompt: String::new(),
            timeline,
            product_context: None,
        };
        let point_reply = r#"{"point": "Point", "statut": "PRESENT",
            "citations": [{"texte": "Bonjour", "minutage": "00:00", "minutage_secondes": 0,
                           "speaker": "s0", "recording_index": 0, "chunk_index": 0}]}"#;
        let client = Arc::new(
            ScriptedClient::new()
                .script(1, vec![Ok(conforming_reply(4.0))])
                .script(2, vec![Ok(point_reply.to_string())]),
        );
        let orchestrator = StepAnalysisOrchestrator::new(client, fast_config());

        let result = orchestrator.analyze_step(&step(1, 5, false), &context, None).await.unwrap();
        let previous = result.points_controle[0].clone();
        let (point, _) = orchestrator
            .analyze_control_point(&step(2, 5, false), "Point", &previous, &context, None)
            .await
            .unwrap();

        let citation = &result.points_controle[0].citations[0];
        assert_eq!(citation.recording_date, "2024-03-12");
        assert_eq!(citation.recording_time, "10:15");
        assert_eq!(point.citations[0].recording_date, "2024-03-12");
        assert_eq!(point.citations[0].recording_time, "10:15");
    }

    #[tokio::test]
    async fn test_repair_applied_before_parse() {
        let truncated = r#"{"score": 2, "conforme": "PARTIELLEMENT_CONFORME", "niveau_conformite": "ACCEPTABLE", "points_controle": [{"point": "Point", "statut": "N/A""#;
        let client = Arc::new(ScriptedClient::new().script(1, vec![Ok(truncated.to_string())]));
        let orchestrator = StepAnalysisOrchestrator::new(client.clone(), fast_config());

        let result = orchestrator.analyze_step(&step(1, 5, false), &context(), None).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.conforme, Conforme::Partiel);
        assert_eq!(result.points_controle[0].statut, ControlPointStatus::NonApplicable);
    }

    #[tokio::test]
    async fn test_invalid_citations_exhaust_retries() {
        let bad = r#"{"score": 0, "conforme": "NON_CONFORME", "niveau_conformite": "INSUFFISANT",
            "points_controle": [{"point": "Point", "statut": "ABSENT",
              "citations": [{"texte": "x", "minutage": "00:00", "minutage_secondes": 0,
                             "speaker": "s0", "recording_index": 0, "chunk_index": 0}]}]}"#;
        let client = Arc::new(ScriptedClient::new().script(1, vec![Ok(bad.to_string())]));
        let orchestrator = StepAnalysisOrchestrator::new(client.clone(), fast_config());

        let err = orchestrator.analyze_step(&step(1, 5, false), &context(), None).await.unwrap_err();

        assert!(matches!(err, AnalysisError::Invalid(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_step_is_isolated() {
        let mut client = ScriptedClient::new();
        for position in [1, 2, 4, 5] {
            client = client.script(position, vec![Ok(conforming_reply(3.0))]);
        }
        client = client.script(3, vec![Err(AnalysisError::Api { status: 529, body: "overloaded".to_string() })]);
        let client = Arc::new(client);

        let (emitter, mut receiver) = ProgressEmitter::channel(64);
        let orchestrator = StepAnalysisOrchestrator::new(client.clone(), fast_config()).with_progress(emitter);
        let steps: Vec<_> = (1..=5).map(|p| step(p, 5, false)).collect();

        let result = orchestrator.analyze_all(&steps, context()).await;

        assert_eq!(result.statistics.successful, 4);
        assert_eq!(result.statistics.failed, 1);
        assert_eq!(result.statistics.total_tokens, 4 * 120);
        assert_eq!(
            result.outcomes.iter().map(StepOutcome::position).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        match &result.outcomes[2] {
            StepOutcome::Failed(f) => assert!(f.error.contains("529")),
            other => panic!("expected failure, got {:?}", other),
        }

        let mut completed = 0;
        let mut failed = 0;
        let mut last_progress = None;
        while let Ok(event) = receiver.try_recv() {
            match event {
                ProgressEvent::StepCompleted { .. } => completed += 1,
                ProgressEvent::StepFailed { position, .. } => {
                    assert_eq!(position, 3);
                    failed += 1;
                }
                ProgressEvent::Progress { completed, total, failed, .. } => {
                    last_progress = Some((completed, total, failed))
                }
            }
        }
        assert_eq!((completed, failed), (4, 1));
        assert_eq!(last_progress, Some((5, 5, 1)));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut client = ScriptedClient::new();
        for position in 1..=8 {
            client = client.script(position, vec![Ok(conforming_reply(1.0))]);
        }
        let client = Arc::new(client);
        let config = AnalysisConfig {
            max_concurrent_steps: 2,
            ..fast_config()
        };
        let orchestrator = StepAnalysisOrchestrator::new(client.clone(), config);
        let steps: Vec<_> = (1..=8).map(|p| step(p, 1, false)).collect();

        let result = orchestrator.analyze_all(&steps, context()).await;

        assert_eq!(result.statistics.successful, 8);
        assert!(client.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    struct StalledClient;

    #[async_trait]
    impl AnalysisClient for StalledClient {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<RawCompletion, AnalysisError> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Err(AnalysisError::EmptyResponse)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_marks_pending_steps_failed() {
        let config = AnalysisConfig {
            attempt_timeout_secs: None,
            run_timeout_secs: Some(5),
            ..fast_config()
        };
        let orchestrator = StepAnalysisOrchestrator::new(Arc::new(StalledClient), config);
        let steps: Vec<_> = (1..=3).map(|p| step(p, 1, false)).collect();

        let result = orchestrator.analyze_all(&steps, context()).await;

        assert_eq!(result.statistics.failed, 3);
        assert_eq!(result.outcomes.len(), 3);
        assert!(result.outcomes.iter().all(|o| !o.is_success()));
    }
}
