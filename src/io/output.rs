use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::{AuditReport, StepOutcome};

/// Write any serializable result as pretty JSON
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    serde_json::to_writer_pretty(file, value).context("Failed to write JSON")?;
    Ok(())
}

/// Human-readable audit summary
pub struct AuditSummary<'a> {
    report: &'a AuditReport,
}

impl<'a> AuditSummary<'a> {
    pub fn new(report: &'a AuditReport) -> Self {
        Self { report }
    }

    pub fn format(&self) -> String {
        let report = self.report;
        let compliance = &report.compliance;
        let mut out = String::new();

        let _ = writeln!(out, "Audit {} (fiche {})", report.run_id, report.fiche_id);
        let _ = writeln!(out, "Config: {}", report.config_id);
        let _ = writeln!(out, "Generated: {}", report.generated_at.to_rfc3339());
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Score: {:.2}/100 -> {} (critical points {})",
            compliance.score,
            compliance.niveau.as_str(),
            compliance.points_critiques
        );
        let _ = writeln!(
            out,
            "Weight: {}/{}",
            compliance.poids_obtenu, compliance.poids_total
        );
        let _ = writeln!(
            out,
            "Steps: {} ok, {} failed, {} tokens, {:.1}s",
            report.statistics.successful,
            report.statistics.failed,
            report.statistics.total_tokens,
            report.statistics.total_time_seconds
        );

        if !report.timeline_warnings.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Warnings:");
            for warning in &report.timeline_warnings {
                let _ = writeln!(out, "  - {}", warning);
            }
        }

        let _ = writeln!(out);
        for outcome in &report.steps {
            let meta = outcome.metadata();
            let critical = if meta.is_critical { " [critique]" } else { "" };
            match outcome {
                StepOutcome::Succeeded(r) => {
                    let _ = writeln!(
                        out,
                        "{:>2}. {}{}: {}/{} {:?} ({} citations)",
                        meta.position, meta.name, critical, r.score, meta.weight, r.conforme, r.total_citations
                    );
                    for point in &r.points_controle {
                        let _ = writeln!(out, "      - {:?} {}", point.statut, point.point);
                    }
                }
                StepOutcome::Failed(f) => {
                    let _ = writeln!(
                        out,
                        "{:>2}. {}{}: FAILED ({})",
                        meta.position, meta.name, critical, f.error
                    );
                }
            }
        }

        out
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        write!(file, "{}", self.format())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::{
        ComplianceScore, NiveauConformite, RunStatistics, StepFailure, StepMetadata,
        TimelineWarning,
    };

    #[test]
    fn test_summary_lists_failures_and_warnings() {
        let report = AuditReport {
            run_id: Uuid::new_v4(),
            fiche_id: "f_1".to_string(),
            config_id: "cfg_1".to_string(),
            generated_at: Utc::now(),
            chunk_size: 10,
            timeline_warnings: vec![TimelineWarning::MissingRecordingUrl {
                recording_index: 0,
                call_id: "c1".to_string(),
            }],
            steps: vec![StepOutcome::Failed(StepFailure {
                step_metadata: StepMetadata {
                    position: 1,
                    name: "Présentation".to_string(),
                    severity: "HIGH".to_string(),
                    is_critical: true,
                    weight: 5,
                },
                error: "analysis timed out".to_string(),
            })],
            compliance: ComplianceScore {
                score: 0.0,
                niveau: NiveauConformite::Rejet,
                points_critiques: "0/1".to_string(),
                poids_obtenu: 0.0,
                poids_total: 5,
            },
            statistics: RunStatistics::default(),
        };

        let text = AuditSummary::new(&report).format();

        assert!(text.contains("-> REJET (critical points 0/1)"));
        assert!(text.contains(" 1. Présentation [critique]: FAILED (analysis timed out)"));
        assert!(text.contains("recording 0 (c1): no recording URL"));
    }
}
