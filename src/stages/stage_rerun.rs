use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::RerunError;
use crate::io::{AuditStore, ProductContextProvider, TranscriptFallback};
use crate::llm::build_system_prompt;
use crate::models::{
    AuditStepDefinition, ControlPointComparison, ControlPointRerunOutcome, RerunComparison,
    StepAnalysisResult, StepOutcome, StepRerunOutcome,
};
use crate::stages::pipeline::{fetch_product_context, timeline_from_recordings};
use crate::stages::{AnalysisConfig, AnalysisContext, AssemblerConfig, StepAnalysisOrchestrator};

/// Configuration for reruns
#[derive(Debug, Clone, Default)]
pub struct RerunConfig {
    /// Used only for audits stored without their chunk size
    pub assembler: AssemblerConfig,
    pub analysis: AnalysisConfig,
    pub fallback: TranscriptFallback,
}

/// Everything loaded before a rerun starts analyzing
struct RerunTarget {
    step: AuditStepDefinition,
    original: StepAnalysisResult,
    context: Arc<AnalysisContext>,
}

/// Re-executes one step or control point of a stored audit and diffs the result
pub struct RerunCoordinator {
    store: Arc<dyn AuditStore>,
    orchestrator: StepAnalysisOrchestrator,
    products: Option<Arc<dyn ProductContextProvider>>,
    config: RerunConfig,
}

impl RerunCoordinator {
    pub fn new(
        store: Arc<dyn AuditStore>,
        orchestrator: StepAnalysisOrchestrator,
        config: RerunConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            products: None,
            config,
        }
    }

    pub fn with_products(mut self, provider: Arc<dyn ProductContextProvider>) -> Self {
        self.products = Some(provider);
        self
    }

    /// Load the original result and rebuild the analysis context from stored transcripts
    async fn prepare(&self, audit_id: &str, position: u32) -> Result<RerunTarget, RerunError> {
        let audit = self.store.load_audit(audit_id).await?;

        let original = match audit.step(position) {
            Some(StepOutcome::Succeeded(result)) => result.clone(),
            Some(StepOutcome::Failed(_)) => {
                return Err(RerunError::NotFound(format!(
                    "successful result for step {} in audit {}",
                    position, audit_id
                )));
            }
            None => {
                return Err(RerunError::NotFound(format!(
                    "step {} in audit {}",
                    position, audit_id
                )));
            }
        };

        let config = self.store.load_config(&audit.config_id).await?;
        let step = config.step(position).cloned().ok_or_else(|| {
            RerunError::NotFound(format!("step {} in config {}", position, config.id))
        })?;

        // Stored chunk indices only resolve against the original chunk size
        let assembler = match audit.chunk_size {
            Some(chunk_size) => AssemblerConfig { chunk_size },
            None => {
                warn!(
                    "Audit {} has no stored chunk size, using {}",
                    audit_id, self.config.assembler.chunk_size
                );
                self.config.assembler.clone()
            }
        };

        let recordings = self.store.load_recordings(&audit.fiche_id).await?;
        let timeline = timeline_from_recordings(&recordings, &assembler, &self.config.fallback);
        debug!(
            "Rebuilt timeline for fiche {}: {} recordings, {} chunks of {} messages",
            audit.fiche_id,
            timeline.recordings.len(),
            timeline.total_chunks(),
            assembler.chunk_size
        );

        let product_context = if step.verify_product_info {
            fetch_product_context(self.products.as_deref(), &audit.fiche_id).await
        } else {
            None
        };

        Ok(RerunTarget {
            step,
            original,
            context: Arc::new(AnalysisContext {
                system_prompt: build_system_prompt(&config.system_prompt),
                timeline,
                product_context,
            }),
        })
    }

    /// Rerun a whole step
    pub async fn rerun_step(
        &self,
        audit_id: &str,
        position: u32,
        instructions: Option<&str>,
    ) -> Result<StepRerunOutcome, RerunError> {
        info!("Rerunning step {} of audit {}", position, audit_id);
        let target = self.prepare(audit_id, position).await?;

        let rerun = self
            .orchestrator
            .analyze_step(&target.step, &target.context, instructions)
            .await?;
        let comparison = RerunComparison::between(&target.original, &rerun);

        info!(
            "Step {} rerun: score {} -> {}, conforme {:?} -> {:?}",
            position, comparison.original_score, comparison.new_score,
            comparison.original_conforme, comparison.new_conforme
        );

        Ok(StepRerunOutcome {
            audit_id: audit_id.to_string(),
            position,
            original: target.original,
            rerun,
            comparison,
            rerun_at: Utc::now(),
        })
    }

    /// Rerun a single control point of a step
    pub async fn rerun_control_point(
        &self,
        audit_id: &str,
        position: u32,
        point_index: usize,
        instructions: Option<&str>,
    ) -> Result<ControlPointRerunOutcome, RerunError> {
        let mut outcomes = self
            .rerun_control_points(audit_id, position, &[point_index], instructions)
            .await?;

        outcomes
            .pop()
            .unwrap_or_else(|| Err(RerunError::NotFound(format!("control point {}", point_index))))
    }

    /// Rerun several control points of a step in parallel
    ///
    /// Loading failures abort the whole request. Once analysis starts, each
    /// point settles independently and the returned list follows the order
    /// of `point_indices`.
    pub async fn rerun_control_points(
        &self,
        audit_id: &str,
        position: u32,
        point_indices: &[usize],
        instructions: Option<&str>,
    ) -> Result<Vec<Result<ControlPointRerunOutcome, RerunError>>, RerunError> {
        info!(
            "Rerunning {} control points of step {} in audit {}",
            point_indices.len(),
            position,
            audit_id
        );
        let target = Arc::new(self.prepare(audit_id, position).await?);
        let semaphore = Arc::new(Semaphore::new(self.config.analysis.max_concurrent_steps.max(1)));
        let instructions = instructions.map(str::to_string);
        let mut tasks = JoinSet::new();

        for (slot, &point_index) in point_indices.iter().enumerate() {
            let target = Arc::clone(&target);
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = self.orchestrator.clone();
            let instructions = instructions.clone();
            let audit_id = audit_id.to_string();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result =
                    rerun_point(&orchestrator, &target, &audit_id, position, point_index, instructions.as_deref())
                        .await;
                (slot, result)
            });
        }

        let mut results: Vec<Option<Result<ControlPointRerunOutcome, RerunError>>> =
            (0..point_indices.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(e) => warn!("Control point task failed to complete: {}", e),
            }
        }

        Ok(results
            .into_iter()
            .zip(point_indices)
            .map(|(result, index)| {
                result.unwrap_or_else(|| {
                    Err(RerunError::NotFound(format!("result for control point {}", index)))
                })
            })
            .collect())
    }
}

async fn rerun_point(
    orchestrator: &StepAnalysisOrchestrator,
    target: &RerunTarget,
    audit_id: &str,
    position: u32,
    point_index: usize,
    instructions: Option<&str>,
) -> Result<ControlPointRerunOutcome, RerunError> {
    let point = target.step.control_point(point_index).ok_or_else(|| {
        RerunError::NotFound(format!("control point {} of step {}", point_index, position))
    })?;

    // Prefer matching by text; fall back to the same slot in the stored list
    let original = target
        .original
        .points_controle
        .iter()
        .find(|p| p.point == point)
        .or_else(|| target.original.points_controle.get(point_index))
        .cloned()
        .ok_or_else(|| {
            RerunError::NotFound(format!(
                "stored result for control point {} of step {}",
                point_index, position
            ))
        })?;

    let (rerun, usage) = orchestrator
        .analyze_control_point(&target.step, point, &original, &target.context, instructions)
        .await?;
    let comparison = ControlPointComparison::between(&original, &rerun);

    debug!(
        "Control point {} of step {}: {:?} -> {:?}",
        point_index, position, comparison.original_statut, comparison.new_statut
    );

    Ok(ControlPointRerunOutcome {
        audit_id: audit_id.to_string(),
        position,
        point_index,
        original,
        rerun,
        comparison,
        usage,
        rerun_at: Utc::now(),
    })
}
