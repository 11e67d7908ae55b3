//! 从模型原始输出中定位 JSON 载荷
//!
//! 模型常把合法 JSON 包在说明文字或 Markdown 代码块里。按顺序匹配，先中先得：
//! 代码块中的对象 → 代码块中的数组 → 无围栏的最外层 {...} → 最外层 [...] → 原文（trim）。
//! 调用方期望数组（如选项列表）时，数组优先于对象。

use std::sync::OnceLock;

use regex::Regex;

/// 调用方期望的顶层结构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expect {
    #[default]
    Object,
    Array,
}

static FENCE_RE: OnceLock<Regex> = OnceLock::new();

fn fence_re() -> &'static Regex {
    FENCE_RE.get_or_init(|| {
        Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?([\s\S]*?)```").expect("fence regex is valid")
    })
}

/// 纯文本变换，不做解析；找不到任何结构时原样返回 trim 后的文本，由下游校验失败
pub fn extract_json(raw: &str, expect: Expect) -> String {
    let fenced: Vec<&str> = fence_re()
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .collect();
    let fenced_object = fenced.iter().find(|b| b.starts_with('{'));
    let fenced_array = fenced.iter().find(|b| b.starts_with('['));

    let fenced_pick = match expect {
        Expect::Object => fenced_object.or(fenced_array),
        Expect::Array => fenced_array.or(fenced_object),
    };
    if let Some(block) = fenced_pick {
        return block.to_string();
    }

    let (first, second) = match expect {
        Expect::Object => (('{', '}'), ('[', ']')),
        Expect::Array => (('[', ']'), ('{', '}')),
    };
    if let Some(span) = outermost_span(raw, first.0, first.1) {
        return span.to_string();
    }
    if let Some(span) = outermost_span(raw, second.0, second.1) {
        return span.to_string();
    }
    raw.trim().to_string()
}

/// 第一个 open 到最后一个 close 的片段（含两端）
fn outermost_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}
