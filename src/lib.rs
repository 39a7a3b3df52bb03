pub mod error;
pub mod io;
pub mod llm;
pub mod models;
pub mod stages;

pub use error::{AnalysisError, RerunError, StoreError};
pub use io::{
    parse_config_file, parse_outcomes_file, parse_recordings_file, AuditStore, AuditSummary,
    JsonFileStore, JsonProductCatalog, ProductContextProvider, TranscriptFallback,
};
pub use llm::{AnalysisClient, AnthropicClient, AnthropicConfig};
pub use models::{AuditConfig, AuditReport, ComplianceScore, StepOutcome, StoredRecording, Timeline};
pub use stages::{
    assemble_transcript, build_timeline, compute_compliance, timeline_from_recordings,
    AnalysisConfig, AssemblerConfig, AuditPipeline, PipelineConfig, RerunConfig, RerunCoordinator,
    ScoringConfig, StepAnalysisOrchestrator,
};
