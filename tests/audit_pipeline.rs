// Integration tests for a full audit run and the rerun round trip
//
// The run is saved into a JsonFileStore, then one step is rerun from the
// stored config and transcripts and compared with the stored result.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use callaudit::llm::{AnalysisRequest, RawCompletion};
use callaudit::models::{AuditStepDefinition, Usage};
use callaudit::{
    AnalysisClient, AnalysisConfig, AnalysisError, AssemblerConfig, AuditConfig, AuditPipeline,
    JsonFileStore, PipelineConfig, RerunConfig, RerunCoordinator, RerunError,
    StepAnalysisOrchestrator, StoredRecording,
};
use tempfile::TempDir;

/// Fixed reply per step, keyed by the step heading in the prompt
struct FixedReplies(HashMap<u32, String>);

#[async_trait]
impl AnalysisClient for FixedReplies {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<RawCompletion, AnalysisError> {
        let position: u32 = request
            .prompt
            .split("# ÉTAPE ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        let text = self.0.get(&position).cloned().ok_or(AnalysisError::EmptyResponse)?;
        Ok(RawCompletion {
            text,
            usage: Usage::new(200, 50),
        })
    }
}

fn step(position: u32, name: &str, is_critical: bool) -> AuditStepDefinition {
    AuditStepDefinition {
        position,
        name: name.to_string(),
        description: String::new(),
        prompt: format!("Vérifier : {}", name),
        control_points: vec![name.to_string()],
        keywords: vec![],
        severity_level: "HIGH".to_string(),
        is_critical,
        weight: 5,
        chronological_important: false,
        verify_product_info: false,
        custom_instructions: None,
    }
}

fn step_reply(score: u32, conforme: &str, statut: &str, chunk_index: usize) -> String {
    format!(
        r#"```json
{{"score": {score}, "conforme": "{conforme}", "niveau_conformite": "BON",
  "points_controle": [{{"point": "Présentation", "statut": "{statut}", "commentaire": "",
    "citations": [{{"texte": "Bonjour", "minutage": "00:00", "minutage_secondes": 0.0,
                    "speaker": "speaker_0", "recording_index": 0, "chunk_index": {chunk_index}}}]}}]}}
```"#
    )
}

fn config() -> AuditConfig {
    AuditConfig {
        id: "cfg_vente".to_string(),
        name: "Vente à distance".to_string(),
        system_prompt: String::new(),
        steps: vec![step(1, "Présentation", true), step(2, "Garanties", false)],
    }
}

fn recordings() -> Result<Vec<StoredRecording>> {
    Ok(serde_json::from_str(
        r#"[{"call_id": "c1", "recording_url": "https://records/c1.mp3",
             "recording_date": "2024-03-12", "recording_time": "10:15",
             "duration_seconds": 12.0,
             "transcript_text": "Bonjour madame je suis conseiller\nOui bonjour"}]"#,
    )?)
}

fn fast_analysis() -> AnalysisConfig {
    AnalysisConfig {
        retry_delay_ms: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_run_then_rerun_from_store() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = JsonFileStore::new(temp_dir.path());
    let config = config();
    let recordings = recordings()?;

    // Step 2 never returns usable JSON
    let client = FixedReplies(HashMap::from([
        (1, step_reply(5, "CONFORME", "PRESENT", 0)),
        (2, "Je ne peux pas répondre.".to_string()),
    ]));
    // One message per chunk, so each transcript line gets its own chunk index
    let pipeline = AuditPipeline::new(
        Arc::new(client),
        PipelineConfig {
            assembler: AssemblerConfig { chunk_size: 1 },
            analysis: fast_analysis(),
            ..Default::default()
        },
    );

    let report = pipeline.run("f_42", &config, &recordings).await;

    assert!(report.timeline_warnings.is_empty());
    assert_eq!(report.statistics.successful, 1);
    assert_eq!(report.statistics.failed, 1);
    assert_eq!(report.statistics.total_tokens, 250);
    assert_eq!(report.compliance.score, 50.0);
    assert_eq!(report.compliance.poids_total, 10);
    assert_eq!(report.compliance.points_critiques, "1/1");
    assert_eq!(report.compliance.niveau.as_str(), "INSUFFISANT");
    assert_eq!(report.chunk_size, 1);

    let citation = &report.steps[0].as_success().unwrap().points_controle[0].citations[0];
    assert_eq!(citation.recording_date, "2024-03-12");
    assert_eq!(citation.recording_time, "10:15");

    // Persist everything a rerun needs
    store.save_config(&config).await?;
    store.save_recordings("f_42", &recordings).await?;
    store.save_audit(&report.to_stored("a_1")).await?;

    // The second line only exists as its own chunk at the stored chunk size
    let rerun_client = FixedReplies(HashMap::from([(1, step_reply(3, "PARTIEL", "PARTIEL", 1))]));
    let rerun_config = RerunConfig {
        analysis: fast_analysis(),
        ..Default::default()
    };
    let coordinator = RerunCoordinator::new(
        Arc::new(JsonFileStore::new(temp_dir.path())),
        StepAnalysisOrchestrator::new(Arc::new(rerun_client), rerun_config.analysis.clone()),
        rerun_config,
    );

    let outcome = coordinator
        .rerun_step("a_1", 1, Some("Le conseiller s'est présenté en fin d'appel"))
        .await?;

    assert!(outcome.comparison.score_changed);
    assert!(outcome.comparison.conforme_changed);
    assert!(!outcome.comparison.citations_changed);
    assert_eq!(outcome.original.score, 5.0);
    assert_eq!(outcome.rerun.score, 3.0);
    assert_eq!(outcome.rerun.points_controle[0].citations[0].chunk_index, 1);

    // The stored audit is left untouched
    let stored = std::fs::read_to_string(temp_dir.path().join("audits/a_1.json"))?;
    assert!(stored.contains("\"score\": 5.0"));

    // Failed steps have no result to compare against
    let err = coordinator.rerun_step("a_1", 2, None).await.unwrap_err();
    assert!(matches!(err, RerunError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_rerun_unknown_audit_fails_before_analysis() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let coordinator = RerunCoordinator::new(
        Arc::new(JsonFileStore::new(temp_dir.path())),
        StepAnalysisOrchestrator::new(Arc::new(FixedReplies(HashMap::new())), fast_analysis()),
        RerunConfig::default(),
    );

    let err = coordinator.rerun_control_point("missing", 1, 0, None).await.unwrap_err();

    assert!(matches!(err, RerunError::NotFound(_)));
    Ok(())
}
