use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::io::{recording_words, render_product_context, ProductContextProvider, TranscriptFallback};
use crate::llm::{build_system_prompt, AnalysisClient};
use crate::models::{AuditConfig, AuditReport, StoredRecording, Timeline};
use crate::stages::{
    assemble_transcript, build_timeline, compute_compliance, AnalysisConfig, AnalysisContext,
    AssemblerConfig, ProgressEmitter, RecordingChunks, ScoringConfig, StepAnalysisOrchestrator,
};

/// Configuration for a full audit run
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub assembler: AssemblerConfig,
    pub analysis: AnalysisConfig,
    pub scoring: ScoringConfig,
    pub fallback: TranscriptFallback,
}

/// Assemble stored recordings into a timeline
///
/// Always works from the stored transcripts themselves, never from a
/// previously rendered timeline.
pub fn timeline_from_recordings(
    recordings: &[StoredRecording],
    assembler: &AssemblerConfig,
    fallback: &TranscriptFallback,
) -> Timeline {
    let per_recording = recordings
        .iter()
        .map(|rec| RecordingChunks {
            metadata: rec.metadata.clone(),
            chunks: assemble_transcript(&recording_words(rec, fallback), assembler),
        })
        .collect();

    build_timeline(per_recording)
}

/// Fetch and render product context; failures are logged and ignored
pub async fn fetch_product_context(
    provider: Option<&dyn ProductContextProvider>,
    fiche_id: &str,
) -> Option<String> {
    let provider = provider?;

    match provider.product_documents(fiche_id).await {
        Ok(documents) => {
            let context = render_product_context(&documents);
            if context.is_none() {
                info!("No product documents for fiche {}", fiche_id);
            }
            context
        }
        Err(e) => {
            warn!("Product context unavailable for fiche {}: {:#}", fiche_id, e);
            None
        }
    }
}

/// End-to-end audit: timeline, analysis of every step, scoring
pub struct AuditPipeline {
    orchestrator: StepAnalysisOrchestrator,
    products: Option<Arc<dyn ProductContextProvider>>,
    config: PipelineConfig,
}

impl AuditPipeline {
    pub fn new(client: Arc<dyn AnalysisClient>, config: PipelineConfig) -> Self {
        Self {
            orchestrator: StepAnalysisOrchestrator::new(client, config.analysis.clone()),
            products: None,
            config,
        }
    }

    pub fn with_products(mut self, provider: Arc<dyn ProductContextProvider>) -> Self {
        self.products = Some(provider);
        self
    }

    pub fn with_progress(mut self, emitter: ProgressEmitter) -> Self {
        self.orchestrator = self.orchestrator.with_progress(emitter);
        self
    }

    pub async fn run(
        &self,
        fiche_id: &str,
        config: &AuditConfig,
        recordings: &[StoredRecording],
    ) -> AuditReport {
        info!(
            "Auditing fiche {} with config {} ({} steps, {} recordings)",
            fiche_id,
            config.id,
            config.steps.len(),
            recordings.len()
        );

        let timeline = timeline_from_recordings(recordings, &self.config.assembler, &self.config.fallback);
        info!(
            "Timeline: {} recordings, {} chunks, {} warnings",
            timeline.recordings.len(),
            timeline.total_chunks(),
            timeline.warnings.len()
        );

        let product_context = if config.requires_product_info() {
            fetch_product_context(self.products.as_deref(), fiche_id).await
        } else {
            None
        };

        let timeline_warnings = timeline.warnings.clone();
        let context = Arc::new(AnalysisContext {
            system_prompt: build_system_prompt(&config.system_prompt),
            timeline,
            product_context,
        });

        let orchestration = self.orchestrator.analyze_all(&config.steps, context).await;
        let compliance = compute_compliance(&config.steps, &orchestration.outcomes, &self.config.scoring);

        info!(
            "Compliance: {:.2} -> {} (critical {})",
            compliance.score,
            compliance.niveau.as_str(),
            compliance.points_critiques
        );

        AuditReport {
            run_id: Uuid::new_v4(),
            fiche_id: fiche_id.to_string(),
            config_id: config.id.clone(),
            generated_at: Utc::now(),
            chunk_size: self.config.assembler.chunk_size,
            timeline_warnings,
            steps: orchestration.outcomes,
            compliance,
            statistics: orchestration.statistics,
        }
    }
}
