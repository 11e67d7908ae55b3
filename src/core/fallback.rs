//! 确定性回退产物
//!
//! 重试耗尽后按调用点返回模板内容，绝不再调用模型；同样的上下文得到同样的产物。

use serde_json::{json, Value};

use crate::memory::SummaryDigest;
use crate::structured::{coerce_choices, ArtifactKind};

const FALLBACK_CHOICES: &[&str] = &[
    "Take a moment to observe your surroundings",
    "Press forward along the path",
    "Talk to whoever is nearby",
    "Search for another way",
    "Rest and gather your strength",
];

/// 生成回退产物时可用的上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackContext {
    /// 玩家最近一次的选择
    pub last_choice: Option<String>,
    /// 当前是第几幕（从 1 开始）
    pub scene_number: usize,
    /// 需要的选项数量
    pub choice_count: usize,
}

fn template_choices(count: usize) -> Value {
    let count = count.clamp(1, FALLBACK_CHOICES.len());
    let mut choices = Value::Array(
        FALLBACK_CHOICES[..count]
            .iter()
            .map(|c| Value::String(c.to_string()))
            .collect(),
    );
    coerce_choices(&mut choices);
    choices
}

/// 某调用点的模板产物；满足该调用点的必填字段
pub fn fallback_for(kind: ArtifactKind, ctx: &FallbackContext) -> Value {
    match kind {
        ArtifactKind::Scene => {
            let scene = match ctx.last_choice.as_deref() {
                Some(choice) if !choice.trim().is_empty() => format!(
                    "Scene {}: You decide to {}. The world holds its breath as the consequences \
                     begin to unfold around you.",
                    ctx.scene_number.max(1),
                    choice.trim().trim_end_matches('.')
                ),
                _ => format!(
                    "Scene {}: A quiet moment settles over the story. Paths stretch out before \
                     you, each promising something different.",
                    ctx.scene_number.max(1)
                ),
            };
            json!({
                "scene": scene,
                "choices": template_choices(ctx.choice_count),
                "characterUpdates": [],
                "isEnding": false,
            })
        }
        ArtifactKind::Choices => template_choices(ctx.choice_count),
        ArtifactKind::Character => json!({
            "name": "The Wanderer",
            "role": "traveler",
            "description": "A quiet traveler whose past is still a mystery.",
            "traits": ["observant", "cautious"],
        }),
        ArtifactKind::Digest => serde_json::to_value(SummaryDigest::placeholder())
            .unwrap_or_else(|_| json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured::validate;

    #[test]
    fn test_fallbacks_pass_validation() {
        let ctx = FallbackContext {
            last_choice: Some("open the door".into()),
            scene_number: 3,
            choice_count: 3,
        };
        for kind in [
            ArtifactKind::Scene,
            ArtifactKind::Choices,
            ArtifactKind::Character,
            ArtifactKind::Digest,
        ] {
            assert!(validate(&fallback_for(kind, &ctx), kind).is_ok(), "{:?}", kind);
        }
    }

    #[test]
    fn test_scene_fallback_is_deterministic() {
        let ctx = FallbackContext {
            last_choice: Some("open the door.".into()),
            scene_number: 2,
            choice_count: 2,
        };
        let a = fallback_for(ArtifactKind::Scene, &ctx);
        assert_eq!(a, fallback_for(ArtifactKind::Scene, &ctx));
        assert!(a["scene"].as_str().unwrap().contains("You decide to open the door."));
        assert_eq!(a["choices"].as_array().unwrap().len(), 2);
        assert_eq!(a["choices"][0]["id"], 1);
    }

    #[test]
    fn test_choice_count_clamped() {
        let v = fallback_for(ArtifactKind::Choices, &FallbackContext::default());
        assert_eq!(v.as_array().unwrap().len(), 1);
    }
}
