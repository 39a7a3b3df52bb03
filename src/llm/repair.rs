use serde_json::Value;
use tracing::debug;

const CONFORME_VALUES: &[&str] = &["CONFORME", "NON_CONFORME", "PARTIEL"];
const STATUT_VALUES: &[&str] = &["PRESENT", "ABSENT", "PARTIEL", "NON_APPLICABLE"];
const NIVEAU_VALUES: &[&str] = &["EXCELLENT", "BON", "ACCEPTABLE", "INSUFFISANT", "REJET"];

/// Known bad literals per field, matched after trimming and uppercasing
const CONFORME_FIXES: &[(&str, &str)] = &[
    ("PARTIELLEMENT_CONFORME", "PARTIEL"),
    ("PARTIELLEMENT CONFORME", "PARTIEL"),
    ("NON CONFORME", "NON_CONFORME"),
    ("NON-CONFORME", "NON_CONFORME"),
];

const STATUT_FIXES: &[(&str, &str)] = &[
    ("PARTIELLEMENT_PRESENT", "PARTIEL"),
    ("PARTIELLEMENT PRÉSENT", "PARTIEL"),
    ("PARTIELLEMENT_PRÉSENT", "PARTIEL"),
    ("PRÉSENT", "PRESENT"),
    ("NON APPLICABLE", "NON_APPLICABLE"),
    ("NON-APPLICABLE", "NON_APPLICABLE"),
    ("N/A", "NON_APPLICABLE"),
    ("NA", "NON_APPLICABLE"),
];

const NIVEAU_FIXES: &[(&str, &str)] = &[
    ("INSUFFISANTE", "INSUFFISANT"),
    ("REJETE", "REJET"),
    ("REJETÉ", "REJET"),
];

/// Best-effort normalization of model output before parsing
///
/// Applies, in order: code-fence and prose stripping, closing of truncated
/// strings and brackets, then field-scoped enum substitutions from a fixed
/// table. Anything not covered is left as is for the parser to reject.
pub fn repair_json(raw: &str) -> String {
    let body = strip_fences(raw);
    let closed = close_structure(body);

    match serde_json::from_str::<Value>(&closed) {
        Ok(mut value) => {
            let fixes = normalize_enums(&mut value);
            if fixes > 0 {
                debug!(fixes, "Normalized enum literals in model output");
            }
            serde_json::to_string(&value).unwrap_or(closed)
        }
        Err(_) => closed,
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after = &trimmed[open + 3..];
    // Skip the language tag line, if any
    let after = match after.find('\n') {
        Some(nl) if !after[..nl].contains('{') => &after[nl + 1..],
        _ => after,
    };

    match after.find("```") {
        Some(close) => after[..close].trim(),
        None => after.trim(),
    }
}

/// Cut prose around the first top-level object and close whatever was left open
fn close_structure(text: &str) -> String {
    let Some(start) = text.find('{') else {
        return text.to_string();
    };
    let text = &text[start..];

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut end = text.len();

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
                if stack.is_empty() {
                    end = i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    let mut out = text[..end].to_string();
    if stack.is_empty() {
        return out;
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str(" null");
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }

    out
}

fn normalize_enums(value: &mut Value) -> usize {
    let mut fixes = 0;

    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                let table = match key.as_str() {
                    "conforme" => Some((CONFORME_VALUES, CONFORME_FIXES)),
                    "statut" => Some((STATUT_VALUES, STATUT_FIXES)),
                    "niveau_conformite" => Some((NIVEAU_VALUES, NIVEAU_FIXES)),
                    _ => None,
                };

                match table {
                    Some((allowed, substitutions)) if field.is_string() => {
                        let fixed = field
                            .as_str()
                            .and_then(|s| normalize_literal(s, allowed, substitutions));
                        if let Some(fixed) = fixed {
                            *field = Value::String(fixed.to_string());
                            fixes += 1;
                        }
                    }
                    _ => fixes += normalize_enums(field),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                fixes += normalize_enums(item);
            }
        }
        _ => {}
    }

    fixes
}

/// Replacement for a literal, or None when it is already valid or unknown
fn normalize_literal(
    literal: &str,
    allowed: &[&'static str],
    substitutions: &[(&str, &'static str)],
) -> Option<&'static str> {
    if allowed.iter().any(|v| *v == literal) {
        return None;
    }

    let key = literal.trim().to_uppercase();
    if let Some(valid) = allowed.iter().copied().find(|v| *v == key) {
        return Some(valid);
    }

    substitutions
        .iter()
        .find(|(bad, _)| *bad == key)
        .map(|(_, good)| *good)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ControlPointStatus, Conforme, StepAnalysisPayload};

    #[test]
    fn test_valid_json_is_unchanged_semantically() {
        let raw = r#"{"score": 5, "conforme": "CONFORME", "niveau_conformite": "EXCELLENT", "points_controle": []}"#;
        let repaired = repair_json(raw);

        let a: Value = serde_json::from_str(raw).unwrap();
        let b: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_enum_substitutions() {
        let raw = r#"{
            "score": 2,
            "conforme": "PARTIELLEMENT_CONFORME",
            "niveau_conformite": "Insuffisante",
            "points_controle": [
                {"point": "a", "statut": "N/A"},
                {"point": "b", "statut": "présent", "citations": []},
                {"point": "c", "statut": "partiel"}
            ]
        }"#;

        let payload: StepAnalysisPayload = serde_json::from_str(&repair_json(raw)).unwrap();

        assert_eq!(payload.conforme, Conforme::Partiel);
        assert_eq!(payload.points_controle[0].statut, ControlPointStatus::NonApplicable);
        assert_eq!(payload.points_controle[1].statut, ControlPointStatus::Present);
        assert_eq!(payload.points_controle[2].statut, ControlPointStatus::Partiel);
    }

    #[test]
    fn test_unknown_literal_is_left_for_the_parser() {
        let raw = r#"{"score": 2, "conforme": "PEUT-ETRE", "niveau_conformite": "BON"}"#;
        let repaired = repair_json(raw);

        assert!(repaired.contains("PEUT-ETRE"));
        assert!(serde_json::from_str::<StepAnalysisPayload>(&repaired).is_err());
    }

    #[test]
    fn test_substitution_is_field_scoped() {
        // "NA" in a comment is not a statut and must survive
        let raw = r#"{"point": "x", "statut": "ABSENT", "commentaire": "NA"}"#;
        let value: Value = serde_json::from_str(&repair_json(raw)).unwrap();

        assert_eq!(value["commentaire"], "NA");
    }

    #[test]
    fn test_closes_truncated_output() {
        let raw = r#"{"score": 3, "conforme": "PARTIEL", "niveau_conformite": "BON", "points_controle": [{"point": "Nom", "statut": "ABSENT", "commentaire": "pas entend"#;

        let payload: StepAnalysisPayload = serde_json::from_str(&repair_json(raw)).unwrap();

        assert_eq!(payload.points_controle.len(), 1);
        assert_eq!(payload.points_controle[0].commentaire, "pas entend");
    }

    #[test]
    fn test_trailing_comma_before_truncation() {
        let raw = r#"{"score": 1, "conforme": "NON CONFORME", "niveau_conformite": "REJET", "points_controle": [],"#;

        let payload: StepAnalysisPayload = serde_json::from_str(&repair_json(raw)).unwrap();

        assert_eq!(payload.conforme, Conforme::NonConforme);
    }

    #[test]
    fn test_strips_fences_and_prose() {
        let raw = "Voici mon analyse :\n```json\n{\"score\": 4, \"conforme\": \"CONFORME\", \"niveau_conformite\": \"BON\"}\n```\nBonne journée";

        let payload: StepAnalysisPayload = serde_json::from_str(&repair_json(raw)).unwrap();

        assert_eq!(payload.score, 4.0);
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let raw = r#"{"point": "a", "statut": "ABSENT", "commentaire": "accolade } dans le texte"} suite"#;
        let value: Value = serde_json::from_str(&repair_json(raw)).unwrap();

        assert_eq!(value["commentaire"], "accolade } dans le texte");
    }
}
