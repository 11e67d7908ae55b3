//! 产物类型与必填字段校验

use serde_json::Value;

use crate::core::StoryError;
use crate::structured::Expect;

/// 调用点：决定期望的顶层结构、必填字段以及是否纠正选项形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// 开场 / 下一幕：必须带 scene
    Scene,
    /// 单独的选项列表
    Choices,
    /// 新角色
    Character,
    /// 摘要（局部 Digest）
    Digest,
}

impl ArtifactKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Scene => "scene",
            ArtifactKind::Choices => "choices",
            ArtifactKind::Character => "character",
            ArtifactKind::Digest => "digest",
        }
    }

    pub fn expect(&self) -> Expect {
        match self {
            ArtifactKind::Choices => Expect::Array,
            _ => Expect::Object,
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Scene => &["scene"],
            ArtifactKind::Choices => &[],
            ArtifactKind::Character => &["name"],
            ArtifactKind::Digest => &[],
        }
    }

    pub fn coerces_choices(&self) -> bool {
        matches!(self, ArtifactKind::Scene | ArtifactKind::Choices)
    }
}

/// 必填字段必须是非空文本（数字也可转成文本）
fn is_present(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

/// 校验必填字段；Choices 接受顶层数组或带非空 choices 数组的对象
pub fn validate(value: &Value, kind: ArtifactKind) -> Result<(), StoryError> {
    if kind == ArtifactKind::Choices {
        let non_empty = match value {
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => matches!(map.get("choices"), Some(Value::Array(items)) if !items.is_empty()),
            _ => false,
        };
        return if non_empty {
            Ok(())
        } else {
            Err(StoryError::Validation("choices".to_string()))
        };
    }

    let Value::Object(map) = value else {
        return Err(StoryError::Validation(format!("{} object", kind.name())));
    };
    for field in kind.required_fields() {
        if !is_present(map.get(*field)) {
            return Err(StoryError::Validation((*field).to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scene_requires_non_empty_scene() {
        assert!(validate(&json!({"scene": "A"}), ArtifactKind::Scene).is_ok());
        assert_eq!(
            validate(&json!({"scene": "  "}), ArtifactKind::Scene),
            Err(StoryError::Validation("scene".into()))
        );
        assert!(validate(&json!({"text": "A"}), ArtifactKind::Scene).is_err());
        assert!(validate(&json!(["A"]), ArtifactKind::Scene).is_err());
    }

    #[test]
    fn test_required_fields_must_be_text() {
        for bad in [
            json!({"scene": {"text": "A lighthouse."}}),
            json!({"scene": true}),
            json!({"scene": ["A"]}),
            json!({"scene": null}),
        ] {
            assert_eq!(
                validate(&bad, ArtifactKind::Scene),
                Err(StoryError::Validation("scene".into())),
                "{}",
                bad
            );
        }
        assert!(validate(&json!({"name": ["Oren"]}), ArtifactKind::Character).is_err());
        assert!(validate(&json!({"name": 7}), ArtifactKind::Character).is_ok());
    }

    #[test]
    fn test_choices_accepts_array_or_object() {
        assert!(validate(&json!(["a"]), ArtifactKind::Choices).is_ok());
        assert!(validate(&json!({"choices": ["a"]}), ArtifactKind::Choices).is_ok());
        assert!(validate(&json!([]), ArtifactKind::Choices).is_err());
    }

    #[test]
    fn test_digest_only_needs_object() {
        assert!(validate(&json!({}), ArtifactKind::Digest).is_ok());
        assert!(validate(&json!("x"), ArtifactKind::Digest).is_err());
    }
}
