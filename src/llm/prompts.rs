use std::fmt::Write;

use crate::models::{AuditStepDefinition, ControlPointResult};

/// Fixed rules appended to every analysis prompt
pub const ANALYSIS_RULES: &str = r#"## RÈGLES D'ANALYSE

1. Base-toi UNIQUEMENT sur la transcription fournie. N'invente aucun échange.
2. La transcription est automatique : tolère les variations phonétiques et les erreurs
   de reconnaissance (noms propres, marques, montants). Si tu t'appuies sur une variation,
   indique-la dans "variation_phonetique_utilisee" et mets "erreur_transcription_notee" à true.
3. Chaque citation reprend le texte exact, le minutage (MM:SS), le minutage en secondes,
   le locuteur, le recording_index et le chunk_index du segment cité, ainsi que la date
   et l'heure de l'enregistrement.
4. Un point ABSENT ou NON_APPLICABLE n'a AUCUNE citation. Un point PRESENT a au moins
   une citation.
5. Champs obligatoires, valeurs par défaut si rien à signaler : "commentaire": "",
   "citations": [], "minutages": [], "erreur_transcription_notee": false,
   "variation_phonetique_utilisee": null.

VALEURS AUTORISÉES (exactement ces chaînes) :
- conforme : CONFORME, NON_CONFORME, PARTIEL
- niveau_conformite : EXCELLENT, BON, ACCEPTABLE, INSUFFISANT, REJET
- statut : PRESENT, ABSENT, PARTIEL, NON_APPLICABLE"#;

/// Default system prompt when the audit config has none
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "Tu es un auditeur qualité spécialisé dans la conformité réglementaire des appels de vente.";

pub fn build_system_prompt(config_prompt: &str) -> String {
    if config_prompt.trim().is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        config_prompt.to_string()
    }
}

/// Build the user prompt for one step
///
/// Product context is only included for steps that verify product info.
pub fn build_step_prompt(
    step: &AuditStepDefinition,
    timeline_text: &str,
    product_context: Option<&str>,
    extra_instructions: Option<&str>,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(timeline_text);
    prompt.push_str("\n\n");

    let _ = writeln!(prompt, "# ÉTAPE {} : {}", step.position, step.name);
    if !step.description.is_empty() {
        let _ = writeln!(prompt, "{}", step.description);
    }
    let _ = writeln!(
        prompt,
        "Poids : {} (score entre 0 et {}) | Sévérité : {} | Critique : {}",
        step.weight,
        step.weight,
        step.severity_level,
        if step.is_critical { "oui" } else { "non" }
    );
    prompt.push('\n');

    prompt.push_str("## Consigne\n");
    prompt.push_str(&step.prompt);
    prompt.push_str("\n\n");

    if !step.control_points.is_empty() {
        prompt.push_str("## Points de contrôle\n");
        for (i, point) in step.control_points.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", i + 1, point);
        }
        prompt.push('\n');
    }

    if !step.keywords.is_empty() {
        let _ = writeln!(prompt, "## Mots-clés\n{}\n", step.keywords.join(", "));
    }

    if step.chronological_important {
        prompt.push_str(
            "## Chronologie\nL'ordre des enregistrements compte : vérifie que les éléments \
             apparaissent au bon moment de la relation.\n\n",
        );
    }

    if step.verify_product_info {
        if let Some(context) = product_context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str("## Informations produit de référence\n");
            prompt.push_str(context);
            prompt.push_str("\n\n");
        }
    }

    push_instructions(&mut prompt, step.custom_instructions.as_deref());
    push_instructions(&mut prompt, extra_instructions);

    prompt.push_str(ANALYSIS_RULES);
    prompt.push_str("\n\nRéponds avec l'outil submit_step_analysis.\n");

    prompt
}

/// Build a prompt scoped to a single control point, with the previous verdict as context
pub fn build_control_point_prompt(
    step: &AuditStepDefinition,
    point: &str,
    previous: &ControlPointResult,
    timeline_text: &str,
    product_context: Option<&str>,
    extra_instructions: Option<&str>,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(timeline_text);
    prompt.push_str("\n\n");

    let _ = writeln!(prompt, "# ÉTAPE {} : {}", step.position, step.name);
    prompt.push_str("## Consigne de l'étape\n");
    prompt.push_str(&step.prompt);
    prompt.push_str("\n\n");

    let _ = writeln!(prompt, "## Point de contrôle à réévaluer\n{}\n", point);

    prompt.push_str("## Résultat précédent (pour référence)\n```json\n");
    prompt.push_str(&serde_json::to_string_pretty(previous).unwrap_or_else(|_| "{}".to_string()));
    prompt.push_str("\n```\n\n");

    if step.verify_product_info {
        if let Some(context) = product_context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str("## Informations produit de référence\n");
            prompt.push_str(context);
            prompt.push_str("\n\n");
        }
    }

    push_instructions(&mut prompt, step.custom_instructions.as_deref());
    push_instructions(&mut prompt, extra_instructions);

    prompt.push_str(ANALYSIS_RULES);
    prompt.push_str("\n\nRéponds avec l'outil submit_control_point, pour ce seul point.\n");

    prompt
}

fn push_instructions(prompt: &mut String, instructions: Option<&str>) {
    if let Some(text) = instructions.filter(|t| !t.trim().is_empty()) {
        prompt.push_str("## Instructions complémentaires\n");
        prompt.push_str(text.trim());
        prompt.push_str("\n\n");
    }
}

fn citation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "texte": {"type": "string"},
            "minutage": {"type": "string", "description": "MM:SS"},
            "minutage_secondes": {"type": "number"},
            "speaker": {"type": "string"},
            "recording_index": {"type": "integer"},
            "chunk_index": {"type": "integer"},
            "recording_date": {"type": "string"},
            "recording_time": {"type": "string"}
        },
        "required": ["texte", "minutage", "minutage_secondes", "speaker", "recording_index", "chunk_index"]
    })
}

/// Tool schema for a single control point verdict
pub fn control_point_tool_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "point": {"type": "string"},
            "statut": {"type": "string", "enum": ["PRESENT", "ABSENT", "PARTIEL", "NON_APPLICABLE"]},
            "commentaire": {"type": "string"},
            "citations": {"type": "array", "items": citation_schema()},
            "minutages": {"type": "array", "items": {"type": "string"}},
            "erreur_transcription_notee": {"type": "boolean"},
            "variation_phonetique_utilisee": {"type": ["string", "null"]}
        },
        "required": ["point", "statut", "commentaire", "citations", "minutages",
                     "erreur_transcription_notee", "variation_phonetique_utilisee"]
    })
}

/// Tool schema for a whole step analysis
pub fn step_analysis_tool_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "score": {"type": "number", "minimum": 0},
            "conforme": {"type": "string", "enum": ["CONFORME", "NON_CONFORME", "PARTIEL"]},
            "niveau_conformite": {
                "type": "string",
                "enum": ["EXCELLENT", "BON", "ACCEPTABLE", "INSUFFISANT", "REJET"]
            },
            "points_controle": {"type": "array", "items": control_point_tool_schema()}
        },
        "required": ["score", "conforme", "niveau_conformite", "points_controle"]
    })
}
