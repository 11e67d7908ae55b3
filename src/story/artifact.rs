//! 故事产物：场景、选项、角色
//!
//! 结构经过 parse_structured 校验后再宽松地转为这里的类型：缺失字段取默认值，
//! 类型不符的字段忽略。JSON Schema 由 schemars 生成并拼入 system prompt。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{fallback_for, FallbackContext};
use crate::structured::{difficulty_for, ArtifactKind};

/// 玩家可选的一个分支
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Choice {
    /// 从 1 开始的序号
    pub id: u32,
    pub text: String,
    /// easy / medium / hard
    pub difficulty: String,
    pub description: String,
}

/// 本幕中某个角色的变化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CharacterUpdate {
    pub name: String,
    pub change: String,
}

/// 一幕场景
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SceneArtifact {
    /// 第二人称叙述正文
    pub scene: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub character_updates: Vec<CharacterUpdate>,
    /// 故事在本幕结束时为 true，此时 choices 为空
    #[serde(default)]
    pub is_ending: bool,
}

/// 新登场的角色
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn choice_from_value(index: usize, value: &Value) -> Option<Choice> {
    let (id, text, difficulty, description) = match value {
        Value::String(s) => (None, s.trim().to_string(), String::new(), String::new()),
        Value::Object(map) => {
            let id = match map.get("id") {
                Some(Value::Number(n)) => n.as_u64().map(|n| n as u32),
                Some(Value::String(s)) => s.trim().parse().ok(),
                _ => None,
            };
            let text = match text_of(map.get("text")) {
                t if t.is_empty() => text_of(map.get("label")),
                t => t,
            };
            (
                id,
                text,
                text_of(map.get("difficulty")),
                text_of(map.get("description")),
            )
        }
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Some(Choice {
        id: id.unwrap_or(index as u32 + 1),
        difficulty: if difficulty.is_empty() {
            difficulty_for(&text).to_string()
        } else {
            difficulty
        },
        text,
        description,
    })
}

/// characterUpdates 既接受 [{name, change}] 也接受 {name: change}
fn updates_from_value(value: Option<&Value>) -> Vec<CharacterUpdate> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let map = item.as_object()?;
                let name = text_of(map.get("name"));
                if name.is_empty() {
                    return None;
                }
                let change = match text_of(map.get("change")) {
                    c if c.is_empty() => text_of(map.get("description")),
                    c => c,
                };
                Some(CharacterUpdate { name, change })
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, change)| CharacterUpdate {
                name: name.clone(),
                change: text_of(Some(change)),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn bool_of(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

impl SceneArtifact {
    /// 宽松转换；没有 scene 文本时返回 None
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let scene = text_of(map.get("scene"));
        if scene.is_empty() {
            return None;
        }
        let choices = match map.get("choices") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, v)| choice_from_value(i, v))
                .collect(),
            _ => Vec::new(),
        };
        Some(Self {
            scene,
            choices,
            character_updates: updates_from_value(
                map.get("characterUpdates").or_else(|| map.get("character_updates")),
            ),
            is_ending: bool_of(map.get("isEnding").or_else(|| map.get("is_ending"))),
        })
    }

    /// 模板场景（不调用模型）
    pub fn fallback(ctx: &FallbackContext) -> Self {
        let value = fallback_for(ArtifactKind::Scene, ctx);
        Self::from_value(&value).unwrap_or_else(|| Self {
            scene: text_of(value.get("scene")),
            choices: Vec::new(),
            character_updates: Vec::new(),
            is_ending: false,
        })
    }

    /// 规范化后的 JSON（写回对话历史用）
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// 按序号或文本找到玩家输入对应的选项
    pub fn resolve_choice(&self, input: &str) -> Option<&Choice> {
        let input = input.trim();
        if let Ok(n) = input.parse::<u32>() {
            return self.choices.iter().find(|c| c.id == n);
        }
        self.choices
            .iter()
            .find(|c| c.text.eq_ignore_ascii_case(input))
    }

    pub fn schema_json() -> String {
        serde_json::to_string_pretty(&schema_for!(SceneArtifact)).unwrap_or_default()
    }
}

impl Character {
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let name = text_of(map.get("name"));
        if name.is_empty() {
            return None;
        }
        let traits = match map.get("traits") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|t| text_of(Some(t)))
                .filter(|t| !t.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            _ => Vec::new(),
        };
        Some(Self {
            name,
            role: text_of(map.get("role")),
            description: text_of(map.get("description")),
            traits,
        })
    }

    pub fn fallback() -> Self {
        let value = fallback_for(ArtifactKind::Character, &FallbackContext::default());
        Self::from_value(&value).unwrap_or_else(|| Self {
            name: "The Wanderer".to_string(),
            role: String::new(),
            description: String::new(),
            traits: Vec::new(),
        })
    }

    pub fn schema_json() -> String {
        serde_json::to_string_pretty(&schema_for!(Character)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scene_from_coerced_value() {
        let v = json!({
            "scene": "  Rain hammers the tin roof. ",
            "choices": [
                {"id": 1, "text": "Wait it out", "difficulty": "easy", "description": "Patience."},
                {"id": "2", "text": "Run for the barn"},
                {"text": ""}
            ],
            "characterUpdates": {"Mara": "soaked and angry"},
            "isEnding": "false"
        });
        let scene = SceneArtifact::from_value(&v).unwrap();
        assert_eq!(scene.scene, "Rain hammers the tin roof.");
        assert_eq!(scene.choices.len(), 2);
        assert_eq!(scene.choices[1].id, 2);
        assert_eq!(scene.choices[1].difficulty, "medium");
        assert_eq!(
            scene.character_updates,
            vec![CharacterUpdate {
                name: "Mara".into(),
                change: "soaked and angry".into()
            }]
        );
        assert!(!scene.is_ending);
    }

    #[test]
    fn test_scene_requires_text() {
        assert!(SceneArtifact::from_value(&json!({"choices": []})).is_none());
        assert!(SceneArtifact::from_value(&json!(["a"])).is_none());
    }

    #[test]
    fn test_resolve_choice() {
        let scene = SceneArtifact::from_value(&json!({
            "scene": "s",
            "choices": ["Open the door", "Leave"],
        }))
        .unwrap();
        assert_eq!(scene.resolve_choice("2").unwrap().text, "Leave");
        assert_eq!(scene.resolve_choice("open the door").unwrap().id, 1);
        assert!(scene.resolve_choice("9").is_none());
    }

    #[test]
    fn test_character_traits_from_string() {
        let c = Character::from_value(&json!({"name": "Oren", "traits": "gruff, loyal"})).unwrap();
        assert_eq!(c.traits, vec!["gruff", "loyal"]);
        assert!(c.role.is_empty());
    }

    #[test]
    fn test_scene_json_round_trip_keeps_ending() {
        let mut scene = SceneArtifact::fallback(&FallbackContext {
            last_choice: Some("jump".into()),
            scene_number: 3,
            choice_count: 2,
        });
        assert_eq!(scene.choices.len(), 2);
        scene.is_ending = true;
        scene.choices.clear();
        let back: Value = serde_json::from_str(&scene.to_json()).unwrap();
        assert_eq!(back["isEnding"], true);
        assert_eq!(SceneArtifact::from_value(&back).unwrap(), scene);
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = SceneArtifact::schema_json();
        assert!(schema.contains("characterUpdates"));
        assert!(schema.contains("isEnding"));
        assert!(Character::schema_json().contains("traits"));
    }
}
