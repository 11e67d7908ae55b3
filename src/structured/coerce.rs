//! 选项列表的形状纠正（在解析成功之后运行，不是语法修复）
//!
//! 模型有时把 choices 写成纯字符串数组；这里补成结构化条目：顺序 id、
//! 基于关键词的难度、通用描述。

use serde_json::{json, Value};

const HARD_KEYWORDS: &[&str] = &[
    "attack", "fight", "charge", "steal", "climb", "jump", "confront", "sneak", "break",
    "battle", "risk", "攻击", "战斗", "偷", "冒险", "潜入", "闯",
];

const EASY_KEYWORDS: &[&str] = &[
    "ask", "talk", "rest", "wait", "look", "listen", "observe", "leave", "retreat", "hide",
    "询问", "交谈", "休息", "等待", "观察", "离开",
];

/// 根据文本关键词推断难度：hard / easy / medium
pub fn difficulty_for(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if HARD_KEYWORDS.iter().any(|k| lower.contains(k)) {
        "hard"
    } else if EASY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        "easy"
    } else {
        "medium"
    }
}

fn structured_choice(index: usize, text: &str) -> Value {
    json!({
        "id": index + 1,
        "text": text,
        "difficulty": difficulty_for(text),
        "description": "See where this path leads.",
    })
}

/// 将字符串元素转换为结构化条目；已是对象的元素保持不变
fn coerce_items(items: &mut [Value]) {
    for (i, item) in items.iter_mut().enumerate() {
        if let Value::String(text) = item {
            let text = text.trim().to_string();
            *item = structured_choice(i, &text);
        }
    }
}

/// 对象里的 choices 数组，或顶层就是选项数组，都会被纠正
pub fn coerce_choices(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get_mut("choices") {
                coerce_items(items);
            }
        }
        Value::Array(items) => coerce_items(items),
        _ => {}
    }
}
