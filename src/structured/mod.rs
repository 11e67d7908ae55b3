//! 结构化输出：从模型自由文本中得到经过校验的 JSON
//!
//! 流程：extract_json 定位载荷 → 直接解析（成功则绝不修复）→ 失败才走 repair →
//! 选项形状纠正 → 必填字段校验。

pub mod coerce;
pub mod extractor;
pub mod repair;
pub mod schema;

use serde_json::Value;

pub use coerce::{coerce_choices, difficulty_for};
pub use extractor::{extract_json, Expect};
pub use repair::{repair, repair_value, RepairError};
pub use schema::{validate, ArtifactKind};

use crate::core::StoryError;

/// 解析一次模型输出；错误类型对应 Extraction / Repair / Validation
pub fn parse_structured(raw: &str, kind: ArtifactKind) -> Result<Value, StoryError> {
    let candidate = extract_json(raw, kind.expect());
    if !candidate.contains(['{', '[']) {
        return Err(StoryError::Extraction);
    }

    let mut value = match serde_json::from_str::<Value>(&candidate) {
        Ok(v) => v,
        Err(parse_err) => {
            tracing::debug!(
                "direct parse failed for {} ({}), attempting repair",
                kind.name(),
                parse_err
            );
            repair_value(&candidate).map_err(|e| match e {
                RepairError::NoStructure => StoryError::Extraction,
                other => StoryError::Repair(other.to_string()),
            })?
        }
    };

    if kind.coerces_choices() {
        coerce_choices(&mut value);
    }
    validate(&value, kind)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_scene() {
        let raw = "Sure! Here's the JSON:\n```json\n{\"scene\":\"A\"}\n```\nEnjoy.";
        assert_eq!(
            parse_structured(raw, ArtifactKind::Scene).unwrap(),
            json!({"scene": "A"})
        );
    }

    #[test]
    fn test_repairs_and_coerces() {
        let raw = r#"Here: {"scene": "A...", "choices": ["Run away", "Fight",]}"#;
        let v = parse_structured(raw, ArtifactKind::Scene).unwrap();
        assert_eq!(v["scene"], "A");
        assert_eq!(v["choices"][1]["difficulty"], "hard");
        assert_eq!(v["choices"][1]["id"], 2);
    }

    #[test]
    fn test_prose_only_is_extraction_failure() {
        assert_eq!(
            parse_structured("I cannot do that.", ArtifactKind::Scene),
            Err(StoryError::Extraction)
        );
    }

    #[test]
    fn test_missing_field_is_validation_failure() {
        assert_eq!(
            parse_structured(r#"{"text": "A"}"#, ArtifactKind::Scene),
            Err(StoryError::Validation("scene".into()))
        );
    }

    #[test]
    fn test_choices_array_expected() {
        let raw = "Options:\n```json\n[\"Wait\", \"Steal the key\"]\n```";
        let v = parse_structured(raw, ArtifactKind::Choices).unwrap();
        assert_eq!(v[1]["difficulty"], "hard");
    }
}
