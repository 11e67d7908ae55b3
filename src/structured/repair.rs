//! 容错 JSON 修复
//!
//! 只在直接解析失败后调用（能解析的文本绝不修复）。先做文本预处理：
//! 1. 截取第一个 `{` / `[` 到与之匹配的结构结尾，丢弃前后说明文字
//! 2. 去掉控制字符，把弯引号换成直引号
//! 3. 删除省略号（`...` / `…`），这是模型截断字符串或列表的常见方式
//!
//! 然后用一个宽容的递归下降解析器读取，解析器对每种失败模式有明确的恢复规则：
//! - 容器内多余 / 结尾逗号直接跳过
//! - 未加引号的对象键按裸词读取
//! - 数值前的 `+` 忽略
//! - 文本提前结束时补齐缺失的 `}` / `]`（只补不删）
//! - 未闭合的字符串在最后一个结构闭合符之前闭合
//!
//! 仍然失败时，退而求其次：在文本中找最长的可直接解析的 JSON 子串。
//! 所有步骤都是确定性的：同样的输入得到同样的输出。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

const MAX_DEPTH: usize = 128;
/// 兜底子串搜索时最多尝试的起点 / 终点数量
const MAX_SUBSTRING_CANDIDATES: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepairError {
    #[error("no JSON object or array in text")]
    NoStructure,

    #[error("unexpected character '{0}' at offset {1}")]
    Unexpected(char, usize),

    #[error("nesting deeper than {MAX_DEPTH}")]
    TooDeep,

    #[error("no valid JSON could be recovered")]
    Unrepairable,
}

/// 修复后的 JSON 文本（紧凑格式）
pub fn repair(candidate: &str) -> Result<String, RepairError> {
    let value = repair_value(candidate)?;
    serde_json::to_string(&value).map_err(|_| RepairError::Unrepairable)
}

/// 修复并直接返回解析结果
pub fn repair_value(candidate: &str) -> Result<Value, RepairError> {
    let trimmed = trim_to_structure(candidate).ok_or(RepairError::NoStructure)?;
    let cleaned = remove_ellipses(&normalize_quotes(&strip_control_chars(trimmed)));

    match TolerantParser::new(&cleaned).parse_document() {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::debug!("tolerant parse failed ({}), searching for valid substring", e);
            largest_valid_substring(&cleaned).ok_or(RepairError::Unrepairable)
        }
    }
}

/// 第一个 `{`/`[` 到匹配的结构结尾；未闭合时取到文本末尾
pub(crate) fn trim_to_structure(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let body = &text[start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&body[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(body.trim_end())
}

/// 去掉除 \n \r \t 之外的控制字符
pub(crate) fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

pub(crate) fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{FF02}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
            other => other,
        })
        .collect()
}

static ELLIPSIS_RE: OnceLock<Regex> = OnceLock::new();

pub(crate) fn remove_ellipses(text: &str) -> String {
    let re = ELLIPSIS_RE.get_or_init(|| Regex::new(r"\.{3,}|…+").expect("ellipsis regex is valid"));
    re.replace_all(text, "").into_owned()
}

/// 兜底：所有 `{`/`[` 起点 × 所有 `}`/`]` 终点中，能直接解析的最长片段
fn largest_valid_substring(text: &str) -> Option<Value> {
    let starts: Vec<usize> = text
        .char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .map(|(i, _)| i)
        .take(MAX_SUBSTRING_CANDIDATES)
        .collect();
    let ends: Vec<usize> = text
        .char_indices()
        .filter(|(_, c)| matches!(c, '}' | ']'))
        .map(|(i, _)| i + 1)
        .collect();
    let ends: Vec<usize> = ends
        .into_iter()
        .rev()
        .take(MAX_SUBSTRING_CANDIDATES)
        .collect();

    let mut best: Option<(usize, Value)> = None;
    for &start in &starts {
        for &end in &ends {
            if end <= start {
                continue;
            }
            let len = end - start;
            if best.as_ref().map(|(l, _)| len <= *l).unwrap_or(false) {
                // ends 按降序排列，后面的只会更短
                break;
            }
            if let Ok(v) = serde_json::from_str::<Value>(&text[start..end]) {
                best = Some((len, v));
                break;
            }
        }
    }
    best.map(|(_, v)| v)
}

/// 宽容的递归下降解析器
struct TolerantParser {
    chars: Vec<char>,
    pos: usize,
}

impl TolerantParser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// 容器内：跳过空白与任意个逗号（处理结尾逗号 / 重复逗号）
    fn skip_ws_and_commas(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace() || c == ',') {
            self.pos += 1;
        }
    }

    fn parse_document(&mut self) -> Result<Value, RepairError> {
        self.skip_ws();
        match self.peek() {
            Some('{') | Some('[') => self.parse_value(0),
            _ => Err(RepairError::NoStructure),
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value, RepairError> {
        if depth > MAX_DEPTH {
            return Err(RepairError::TooDeep);
        }
        self.skip_ws();
        match self.peek() {
            None => Ok(Value::Null),
            Some('{') => self.parse_object(depth),
            Some('[') => self.parse_array(depth),
            Some(q @ ('"' | '\'')) => self.parse_string(q).map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => {
                Ok(self.parse_number())
            }
            Some(c) => {
                let word = self.read_bare_word();
                if word.is_empty() {
                    return Err(RepairError::Unexpected(c, self.pos));
                }
                Ok(match word.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => Value::String(word),
                })
            }
        }
    }

    fn parse_object(&mut self, depth: usize) -> Result<Value, RepairError> {
        self.pos += 1; // '{'
        let mut map = Map::new();
        loop {
            self.skip_ws_and_commas();
            let key = match self.peek() {
                None => break,
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                // 错配的闭合符：结束当前对象但不消费，交给外层
                Some(']') => break,
                Some(q @ ('"' | '\'')) => self.parse_string(q)?,
                Some(c) => {
                    let key = self.read_bare_key();
                    if key.is_empty() {
                        return Err(RepairError::Unexpected(c, self.pos));
                    }
                    key
                }
            };
            self.skip_ws();
            if self.peek() == Some(':') {
                self.pos += 1;
                self.skip_ws();
            }
            let value = match self.peek() {
                None | Some('}') | Some(',') | Some(']') => Value::Null,
                _ => self.parse_value(depth + 1)?,
            };
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    }

    fn parse_array(&mut self, depth: usize) -> Result<Value, RepairError> {
        self.pos += 1; // '['
        let mut items = Vec::new();
        loop {
            self.skip_ws_and_commas();
            match self.peek() {
                None => break,
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                Some('}') => break,
                _ => items.push(self.parse_value(depth + 1)?),
            }
        }
        Ok(Value::Array(items))
    }

    /// 读取字符串。引号后紧跟结构字符（或文本结束）才视为闭合，否则当作未转义的内部引号。
    /// 文本结束仍未闭合时，把末尾的闭合符与空白退还给外层，相当于在最后一个闭合符前补引号
    fn parse_string(&mut self, quote: char) -> Result<String, RepairError> {
        self.pos += 1;
        let mut buf = String::new();
        // buf 末尾按原样读入的空白 / 闭合符个数，每个恰好占一个输入字符
        let mut returnable = 0usize;
        loop {
            let Some(c) = self.peek() else {
                for _ in 0..returnable {
                    buf.pop();
                }
                self.pos -= returnable;
                buf.truncate(buf.trim_end().len());
                return Ok(buf);
            };
            self.pos += 1;
            match c {
                '\\' => {
                    self.read_escape(&mut buf);
                    returnable = 0;
                }
                _ if c == quote && self.closes_string() => return Ok(buf),
                _ => {
                    buf.push(c);
                    if c.is_whitespace() || c == '}' || c == ']' {
                        returnable += 1;
                    } else {
                        returnable = 0;
                    }
                }
            }
        }
    }

    fn closes_string(&self) -> bool {
        let mut i = self.pos;
        let mut saw_newline = false;
        while let Some(&c) = self.chars.get(i) {
            if !c.is_whitespace() {
                return matches!(c, ',' | '}' | ']' | ':') || (saw_newline && c == '"');
            }
            saw_newline |= c == '\n';
            i += 1;
        }
        true
    }

    fn read_escape(&mut self, buf: &mut String) {
        let Some(c) = self.peek() else {
            return;
        };
        self.pos += 1;
        match c {
            'n' => buf.push('\n'),
            't' => buf.push('\t'),
            'r' => buf.push('\r'),
            'b' => buf.push('\u{8}'),
            'f' => buf.push('\u{c}'),
            'u' => {
                let hex: String = self.chars.iter().skip(self.pos).take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) if hex.len() == 4 => {
                        buf.push(ch);
                        self.pos += 4;
                    }
                    _ => buf.push('u'),
                }
            }
            other => buf.push(other),
        }
    }

    fn parse_number(&mut self) -> Value {
        if self.peek() == Some('+') {
            self.pos += 1;
        }
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let normalized = if text.starts_with('.') {
            format!("0{}", text)
        } else if text.starts_with("-.") {
            format!("-0{}", &text[1..])
        } else {
            text.clone()
        };
        let trimmed = normalized.trim_end_matches(['.', 'e', 'E', '+', '-']);
        match trimmed.parse::<Number>() {
            Ok(n) => Value::Number(n),
            Err(_) => {
                let rest = self.read_bare_word();
                Value::String(format!("{}{}", text, rest))
            }
        }
    }

    /// 裸值：读到结构字符或换行为止
    fn read_bare_word(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if !matches!(c, ',' | '}' | ']' | ':' | '\n' | '{' | '[' | '"'))
        {
            self.pos += 1;
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// 未加引号的键：字母数字、下划线、$、-
    fn read_bare_key(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || matches!(c, '_' | '$' | '-')) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repaired(input: &str) -> Value {
        serde_json::from_str(&repair(input).unwrap()).unwrap()
    }

    #[test]
    fn test_ellipsis_and_trailing_comma() {
        let v = repaired(r#"{"scene": "A...", "choices": [1,2,]}"#);
        assert_eq!(v, json!({"scene": "A", "choices": [1, 2]}));
    }

    #[test]
    fn test_unquoted_keys() {
        let v = repaired(r#"{scene: "dark", next_step: 2}"#);
        assert_eq!(v, json!({"scene": "dark", "next_step": 2}));
    }

    #[test]
    fn test_leading_plus() {
        let v = repaired(r#"{"hp": +2, "gold": -3}"#);
        assert_eq!(v, json!({"hp": 2, "gold": -3}));
    }

    #[test]
    fn test_missing_closers_appended() {
        let v = repaired(r#"{"scene": "A", "choices": [{"text": "run"}, {"text": "hide"}"#);
        assert_eq!(
            v,
            json!({"scene": "A", "choices": [{"text": "run"}, {"text": "hide"}]})
        );
    }

    #[test]
    fn test_unterminated_string_closed_before_closer() {
        let v = repaired(r#"{"scene": "The door creaks}"#);
        assert_eq!(v, json!({"scene": "The door creaks"}));
    }

    #[test]
    fn test_truncated_mid_string() {
        let v = repaired(r#"{"scene": "The door creaks open and"#);
        assert_eq!(v, json!({"scene": "The door creaks open and"}));
    }

    #[test]
    fn test_truncated_string_ending_in_escape() {
        let v = repaired(r#"{"scene": "The door opens\n"#);
        assert_eq!(v, json!({"scene": "The door opens"}));

        let v = repaired(r#"{"a": {"b": "xé\n}"#);
        assert_eq!(v, json!({"a": {"b": "x\u{e9}"}}));

        let v = repaired(r#"{"scene": "Stop\"  ]"#);
        assert_eq!(v, json!({"scene": "Stop\""}));
    }

    #[test]
    fn test_prose_around_and_smart_quotes() {
        let v = repaired("Here you go: {\u{201C}scene\u{201D}: \u{201C}rain\u{201D},} hope it helps");
        assert_eq!(v, json!({"scene": "rain"}));
    }

    #[test]
    fn test_control_chars_stripped() {
        let v = repaired("{\"scene\": \"a\u{0007}b\",}");
        assert_eq!(v, json!({"scene": "ab"}));
    }

    #[test]
    fn test_raw_newline_inside_string_kept() {
        let v = repaired("{\"scene\": \"line one\nline two\",}");
        assert_eq!(v, json!({"scene": "line one\nline two"}));
    }

    #[test]
    fn test_unescaped_inner_quotes() {
        let v = repaired(r#"{"scene": "She said "run" and fled", }"#);
        assert_eq!(v, json!({"scene": "She said \"run\" and fled"}));
    }

    #[test]
    fn test_list_truncated_with_ellipsis() {
        let v = repaired(r#"{"clues": ["key", "map", ...]}"#);
        assert_eq!(v, json!({"clues": ["key", "map"]}));
    }

    #[test]
    fn test_single_quoted_strings_and_literals() {
        let v = repaired("{'ok': true, 'none': null, 'mood': tense,}");
        assert_eq!(v, json!({"ok": true, "none": null, "mood": "tense"}));
    }

    #[test]
    fn test_no_structure_fails() {
        assert_eq!(repair("no json here"), Err(RepairError::NoStructure));
    }

    #[test]
    fn test_deterministic_and_idempotent() {
        let input = r#"{scene: "A...", choices: ["x", "y",], tension: +3"#;
        let first = repair(input).unwrap();
        assert_eq!(repair(input).unwrap(), first);
        assert_eq!(repair(&first).unwrap(), first);
    }

    #[test]
    fn test_trim_to_structure() {
        assert_eq!(
            trim_to_structure("prefix {\"a\": \"}\"} suffix {\"b\": 1}"),
            Some("{\"a\": \"}\"}")
        );
        assert_eq!(trim_to_structure("x [1, [2"), Some("[1, [2"));
        assert_eq!(trim_to_structure("none"), None);
    }

    #[test]
    fn test_largest_valid_substring_fallback() {
        let v = largest_valid_substring(r#"{"a": : } junk {"b": [1, 2]} tail"#).unwrap();
        assert_eq!(v, json!({"b": [1, 2]}));
    }

    #[test]
    fn test_parser_error_uses_substring_fallback() {
        let v = repair_value(r#"{"a": :, "inner": {"b": 1}}"#).unwrap();
        assert_eq!(v, json!({"b": 1}));
    }
}
