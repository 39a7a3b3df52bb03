use serde::{Deserialize, Serialize};

/// One configured audit step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStepDefinition {
    /// 1-based position within the audit config
    pub position: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub control_points: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub severity_level: String,
    #[serde(default)]
    pub is_critical: bool,
    /// Maximum score for the step, always > 0
    pub weight: u32,
    #[serde(default)]
    pub chronological_important: bool,
    #[serde(default)]
    pub verify_product_info: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

impl AuditStepDefinition {
    pub fn control_point(&self, index: usize) -> Option<&str> {
        self.control_points.get(index).map(String::as_str)
    }
}

/// A complete audit configuration: system prompt plus ordered steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    pub steps: Vec<AuditStepDefinition>,
}

impl AuditConfig {
    pub fn step(&self, position: u32) -> Option<&AuditStepDefinition> {
        self.steps.iter().find(|s| s.position == position)
    }

    pub fn total_weight(&self) -> u32 {
        self.steps.iter().map(|s| s.weight).sum()
    }

    pub fn requires_product_info(&self) -> bool {
        self.steps.iter().any(|s| s.verify_product_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_audit_config() {
        let json = r#"{
            "id": "cfg_1",
            "name": "Vente mutuelle",
            "systemPrompt": "Tu es un auditeur qualité.",
            "steps": [{
                "position": 1,
                "name": "Présentation",
                "prompt": "Le conseiller se présente-t-il ?",
                "controlPoints": ["Nom du conseiller", "Nom de la société"],
                "severityLevel": "HIGH",
                "isCritical": true,
                "weight": 5,
                "verifyProductInfo": false
            }]
        }"#;

        let config: AuditConfig = serde_json::from_str(json).unwrap();
        let step = config.step(1).unwrap();

        assert_eq!(step.control_points.len(), 2);
        assert!(step.is_critical);
        assert!(!step.chronological_important);
        assert_eq!(step.control_point(1), Some("Nom de la société"));
        assert_eq!(config.total_weight(), 5);
        assert!(!config.requires_product_info());
    }
}
