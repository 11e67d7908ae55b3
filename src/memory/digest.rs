//! 摘要（Digest）：较早对话回合的结构化压缩
//!
//! 合并规则：列表拼接后去重、按上限保留最近项；角色变化按名字覆盖（后写优先）；
//! 氛围取最新的非空值；每次合并 version + 1。序列化后超过字节预算时压缩列表长度。

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};

pub const MAX_PLOT_DEVELOPMENTS: usize = 5;
pub const MAX_CHARACTER_CHANGES: usize = 8;
pub const MAX_KEY_DECISIONS: usize = 6;
pub const MAX_IMPORTANT_CLUES: usize = 10;

/// 压缩后的上限：剧情 3、角色 4、决策 3、线索 5
pub const COMPRESSED_LIMITS: (usize, usize, usize, usize) = (3, 4, 3, 5);

const DEFAULT_TENSION: u8 = 5;

/// 关键决策及其后果
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyDecision {
    pub decision: String,
    pub consequence: String,
}

/// 整体氛围；tension_level 取值 1-10，未知时为 None
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Atmosphere {
    pub mood: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tension_level: Option<u8>,
}

/// 角色名 -> 最近一次变化；保持插入顺序，越靠后越新
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CharacterChanges(Vec<(String, String)>);

impl CharacterChanges {
    /// 同名覆盖并移到末尾
    pub fn upsert(&mut self, name: impl Into<String>, change: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(n, _)| *n != name);
        self.0.push((name, change.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, c)| (n.as_str(), c.as_str()))
    }

    fn keep_recent(&mut self, cap: usize) {
        keep_last(&mut self.0, cap);
    }
}

impl Serialize for CharacterChanges {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, change) in &self.0 {
            map.serialize_entry(name, change)?;
        }
        map.end()
    }
}

/// 摘要的结构化形态（持久化为 camelCase JSON）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDigest {
    pub plot_developments: Vec<String>,
    pub character_changes: CharacterChanges,
    pub key_decisions: Vec<KeyDecision>,
    pub atmosphere: Atmosphere,
    pub important_clues: Vec<String>,
    pub timestamp: String,
    pub version: u32,
}

impl Default for SummaryDigest {
    fn default() -> Self {
        Self {
            plot_developments: Vec::new(),
            character_changes: CharacterChanges::default(),
            key_decisions: Vec::new(),
            atmosphere: Atmosphere::default(),
            important_clues: Vec::new(),
            timestamp: String::new(),
            version: 1,
        }
    }
}

impl SummaryDigest {
    /// 摘要生成失败时使用的最小占位摘要
    pub fn placeholder() -> Self {
        Self {
            plot_developments: vec!["story continues".to_string()],
            atmosphere: Atmosphere {
                mood: "unknown".to_string(),
                tension_level: Some(DEFAULT_TENSION),
            },
            ..Self::default()
        }
    }

    /// 宽松地从 JSON 值构造：缺失或类型不符的字段按空处理，不报错。
    /// 非对象输入返回 None
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = |camel, snake| lookup(obj, camel, snake);

        let mut digest = Self {
            plot_developments: string_list(field("plotDevelopments", "plot_developments")),
            important_clues: string_list(field("importantClues", "important_clues")),
            ..Self::default()
        };

        match field("characterChanges", "character_changes") {
            Some(Value::Object(map)) => {
                for (name, change) in map {
                    if let Some(text) = value_text(change) {
                        digest.character_changes.upsert(name.clone(), text);
                    }
                }
            }
            Some(Value::Array(items)) => {
                for item in items {
                    let name = item.get("name").and_then(value_text);
                    let change = item.get("change").and_then(value_text);
                    if let (Some(name), Some(change)) = (name, change) {
                        digest.character_changes.upsert(name, change);
                    }
                }
            }
            _ => {}
        }

        if let Some(Value::Array(items)) = field("keyDecisions", "key_decisions") {
            for item in items {
                let decision = match item {
                    Value::Object(_) => item.get("decision").and_then(value_text).map(|d| {
                        let consequence = item
                            .get("consequence")
                            .and_then(value_text)
                            .unwrap_or_default();
                        KeyDecision {
                            decision: d,
                            consequence,
                        }
                    }),
                    other => value_text(other).map(|d| KeyDecision {
                        decision: d,
                        consequence: String::new(),
                    }),
                };
                if let Some(d) = decision {
                    push_decision(&mut digest.key_decisions, d);
                }
            }
        }

        if let Some(Value::Object(atmo)) = field("atmosphere", "atmosphere") {
            digest.atmosphere.mood = atmo.get("mood").and_then(value_text).unwrap_or_default();
            digest.atmosphere.tension_level = atmo
                .get("tensionLevel")
                .or_else(|| atmo.get("tension_level"))
                .and_then(tension_from_value);
        }

        digest.timestamp = obj
            .get("timestamp")
            .and_then(value_text)
            .unwrap_or_default();
        digest.version = obj
            .get("version")
            .and_then(Value::as_u64)
            .map(|v| v.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(1);
        Some(digest)
    }

    /// 解析已持久化的摘要文本；解析失败返回 None
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| Self::from_value(&v))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn serialized_len(&self) -> usize {
        self.to_json().len()
    }

    pub fn tension_level(&self) -> u8 {
        self.atmosphere.tension_level.unwrap_or(DEFAULT_TENSION)
    }

    /// 合并旧摘要与新的局部摘要；version 为旧版本 + 1（无旧摘要时为 1）
    pub fn merge(prior: Option<&SummaryDigest>, partial: &SummaryDigest, timestamp: String) -> Self {
        let Some(prior) = prior else {
            let mut merged = partial.clone();
            merged.apply_caps();
            merged.version = 1;
            merged.timestamp = timestamp;
            return merged;
        };

        let mut merged = prior.clone();
        for p in &partial.plot_developments {
            push_unique(&mut merged.plot_developments, p);
        }
        for (name, change) in partial.character_changes.iter() {
            merged.character_changes.upsert(name, change);
        }
        for d in &partial.key_decisions {
            push_decision(&mut merged.key_decisions, d.clone());
        }
        for c in &partial.important_clues {
            push_unique(&mut merged.important_clues, c);
        }
        if !partial.atmosphere.mood.trim().is_empty() {
            merged.atmosphere.mood = partial.atmosphere.mood.clone();
        }
        if partial.atmosphere.tension_level.is_some() {
            merged.atmosphere.tension_level = partial.atmosphere.tension_level;
        }
        merged.apply_caps();
        merged.version = prior.version.saturating_add(1);
        merged.timestamp = timestamp;
        merged
    }

    fn apply_caps(&mut self) {
        keep_last(&mut self.plot_developments, MAX_PLOT_DEVELOPMENTS);
        self.character_changes.keep_recent(MAX_CHARACTER_CHANGES);
        keep_last(&mut self.key_decisions, MAX_KEY_DECISIONS);
        keep_last(&mut self.important_clues, MAX_IMPORTANT_CLUES);
    }

    /// 只缩短列表，不动 version / timestamp / atmosphere
    pub fn compress(&mut self) {
        let (plots, characters, decisions, clues) = COMPRESSED_LIMITS;
        keep_last(&mut self.plot_developments, plots);
        self.character_changes.keep_recent(characters);
        keep_last(&mut self.key_decisions, decisions);
        keep_last(&mut self.important_clues, clues);
    }

    /// 序列化长度超过预算时压缩；返回是否发生了压缩
    pub fn enforce_budget(&mut self, byte_budget: usize) -> bool {
        if self.serialized_len() <= byte_budget {
            return false;
        }
        self.compress();
        true
    }

    /// 渲染为提示词段落（供故事生成时作为「前情提要」注入）
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::from("## Story so far (summary of earlier turns)\n");
        if !self.plot_developments.is_empty() {
            s.push_str("### Plot\n");
            for p in &self.plot_developments {
                s.push_str(&format!("- {}\n", p));
            }
        }
        if !self.character_changes.is_empty() {
            s.push_str("### Characters\n");
            for (name, change) in self.character_changes.iter() {
                s.push_str(&format!("- {}: {}\n", name, change));
            }
        }
        if !self.key_decisions.is_empty() {
            s.push_str("### Decisions\n");
            for d in &self.key_decisions {
                if d.consequence.is_empty() {
                    s.push_str(&format!("- {}\n", d.decision));
                } else {
                    s.push_str(&format!("- {} -> {}\n", d.decision, d.consequence));
                }
            }
        }
        if !self.important_clues.is_empty() {
            s.push_str("### Clues\n");
            for c in &self.important_clues {
                s.push_str(&format!("- {}\n", c));
            }
        }
        if !self.atmosphere.mood.is_empty() {
            s.push_str(&format!(
                "### Atmosphere\n{} (tension {}/10)\n",
                self.atmosphere.mood,
                self.tension_level()
            ));
        }
        s
    }
}

fn keep_last<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        items.drain(..items.len() - cap);
    }
}

/// 去重追加：已存在的同文本项移到末尾（视为最近一次提及）
fn push_unique(items: &mut Vec<String>, item: &str) {
    let item = item.trim();
    if item.is_empty() {
        return;
    }
    items.retain(|existing| existing != item);
    items.push(item.to_string());
}

fn push_decision(items: &mut Vec<KeyDecision>, decision: KeyDecision) {
    if decision.decision.trim().is_empty() {
        return;
    }
    items.retain(|d| d.decision != decision.decision);
    items.push(decision);
}

fn lookup<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let mut out = Vec::new();
    match value {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(text) = value_text(item) {
                    push_unique(&mut out, &text);
                }
            }
        }
        Some(other) => {
            if let Some(text) = value_text(other) {
                out.push(text);
            }
        }
        None => {}
    }
    out
}

fn tension_from_value(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(n.round().clamp(1.0, 10.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partial(plots: &[&str]) -> SummaryDigest {
        SummaryDigest {
            plot_developments: plots.iter().map(|s| s.to_string()).collect(),
            ..SummaryDigest::default()
        }
    }

    #[test]
    fn test_from_value_lenient() {
        let v = json!({
            "plotDevelopments": ["met the witch", 42, null, ""],
            "characterChanges": {"Ada": "lost her sword"},
            "keyDecisions": [{"decision": "spare the wolf", "consequence": "wolf follows"}, "open the door"],
            "atmosphere": {"mood": "tense", "tensionLevel": "14"},
            "importantClues": "a silver key"
        });
        let d = SummaryDigest::from_value(&v).unwrap();
        assert_eq!(d.plot_developments, vec!["met the witch", "42"]);
        assert_eq!(d.character_changes.get("Ada"), Some("lost her sword"));
        assert_eq!(d.key_decisions.len(), 2);
        assert_eq!(d.key_decisions[1].consequence, "");
        assert_eq!(d.atmosphere.tension_level, Some(10));
        assert_eq!(d.important_clues, vec!["a silver key"]);
        assert_eq!(d.version, 1);
    }

    #[test]
    fn test_merge_without_prior_starts_at_version_one() {
        let mut p = partial(&["a"]);
        p.version = 7;
        let merged = SummaryDigest::merge(None, &p, "t1".into());
        assert_eq!(merged.version, 1);
        assert_eq!(merged.timestamp, "t1");
    }

    #[test]
    fn test_merge_increments_version_and_keeps_items() {
        let mut prior = partial(&["p1", "p2"]);
        prior.version = 3;
        prior.important_clues = vec!["clue a".into()];
        prior.character_changes.upsert("Bram", "joined the party");
        let mut new = partial(&["p2", "p3"]);
        new.character_changes.upsert("Bram", "betrayed the party");
        new.character_changes.upsert("Cid", "appeared");

        let merged = SummaryDigest::merge(Some(&prior), &new, "t".into());
        assert_eq!(merged.version, 4);
        assert_eq!(merged.plot_developments, vec!["p1", "p2", "p3"]);
        assert_eq!(merged.important_clues, vec!["clue a"]);
        assert_eq!(merged.character_changes.get("Bram"), Some("betrayed the party"));
        assert_eq!(merged.character_changes.len(), 2);
    }

    #[test]
    fn test_merge_caps_keep_most_recent() {
        let prior = partial(&["1", "2", "3", "4", "5"]);
        let new = partial(&["6", "7"]);
        let merged = SummaryDigest::merge(Some(&prior), &new, String::new());
        assert_eq!(merged.plot_developments, vec!["3", "4", "5", "6", "7"]);
    }

    #[test]
    fn test_merge_decisions_dedup_by_text() {
        let mut prior = SummaryDigest::default();
        prior.key_decisions.push(KeyDecision {
            decision: "take the map".into(),
            consequence: "unknown".into(),
        });
        let mut new = SummaryDigest::default();
        new.key_decisions.push(KeyDecision {
            decision: "take the map".into(),
            consequence: "guards alerted".into(),
        });
        let merged = SummaryDigest::merge(Some(&prior), &new, String::new());
        assert_eq!(merged.key_decisions.len(), 1);
        assert_eq!(merged.key_decisions[0].consequence, "guards alerted");
    }

    #[test]
    fn test_merge_atmosphere_newest_non_empty() {
        let mut prior = SummaryDigest::default();
        prior.atmosphere = Atmosphere {
            mood: "calm".into(),
            tension_level: Some(2),
        };
        let mut new = SummaryDigest::default();
        new.atmosphere.tension_level = Some(8);
        let merged = SummaryDigest::merge(Some(&prior), &new, String::new());
        assert_eq!(merged.atmosphere.mood, "calm");
        assert_eq!(merged.atmosphere.tension_level, Some(8));
    }

    #[test]
    fn test_compress_shrinks_lists_only() {
        let mut d = SummaryDigest {
            plot_developments: (0..5).map(|i| format!("plot {i}")).collect(),
            important_clues: (0..10).map(|i| format!("clue {i}")).collect(),
            timestamp: "ts".into(),
            version: 9,
            ..SummaryDigest::default()
        };
        for i in 0..8 {
            d.character_changes.upsert(format!("c{i}"), "x");
        }
        for i in 0..6 {
            d.key_decisions.push(KeyDecision {
                decision: format!("d{i}"),
                consequence: String::new(),
            });
        }
        assert!(d.enforce_budget(64));
        assert_eq!(d.plot_developments, vec!["plot 2", "plot 3", "plot 4"]);
        assert_eq!(d.character_changes.len(), 4);
        assert_eq!(d.character_changes.get("c7"), Some("x"));
        assert_eq!(d.key_decisions.len(), 3);
        assert_eq!(d.important_clues.len(), 5);
        assert_eq!(d.version, 9);
        assert_eq!(d.timestamp, "ts");
    }

    #[test]
    fn test_enforce_budget_noop_when_small() {
        let mut d = SummaryDigest::placeholder();
        assert!(!d.enforce_budget(4096));
    }

    #[test]
    fn test_json_roundtrip_preserves_character_order() {
        let mut d = SummaryDigest::placeholder();
        d.character_changes.upsert("Zed", "z");
        d.character_changes.upsert("Amy", "a");
        let parsed = SummaryDigest::parse(&d.to_json()).unwrap();
        let names: Vec<&str> = parsed.character_changes.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Zed", "Amy"]);
        assert_eq!(parsed.plot_developments, vec!["story continues"]);
    }
}
