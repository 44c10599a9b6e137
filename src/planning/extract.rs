//! 从模型回复中提取 JSON
//!
//! 按顺序尝试三种策略：直接解析（含首尾括号切片）、围栏代码块、有限的语法修复
//! （去除注释、去除收尾前的多余逗号、补全相邻对象之间的逗号）。修复只作用于字符串字面量之外。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::ExtractError;

/// 期望的顶层形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Array,
    Object,
}

impl JsonShape {
    fn open(self) -> char {
        match self {
            Self::Array => '[',
            Self::Object => '{',
        }
    }

    fn close(self) -> char {
        match self {
            Self::Array => ']',
            Self::Object => '}',
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// 数组必须非空；对象只检查类型
    pub fn check(self, value: &Value) -> Result<(), ExtractError> {
        let ok = match self {
            Self::Array => value.as_array().is_some_and(|a| !a.is_empty()),
            Self::Object => value.is_object(),
        };
        if ok {
            Ok(())
        } else {
            Err(ExtractError::UnexpectedShape(self.name()))
        }
    }
}

/// 提取策略，按偏好顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    Direct,
    FencedBlock,
    Repaired,
}

impl ExtractionStrategy {
    pub const ALL: [ExtractionStrategy; 3] = [Self::Direct, Self::FencedBlock, Self::Repaired];

    /// 应用单个策略；返回值已通过形状检查
    pub fn apply(self, text: &str, shape: JsonShape) -> Result<Value, ExtractError> {
        let value = match self {
            Self::Direct => parse_direct(text, shape)?,
            Self::FencedBlock => parse_fenced(text, shape)?,
            Self::Repaired => {
                let slice = bracket_slice(text, shape)?;
                parse(&repair(slice))?
            }
        };
        shape.check(&value)?;
        Ok(value)
    }
}

/// 依次尝试全部策略，返回第一个形状正确的结果
pub fn extract(text: &str, shape: JsonShape) -> Result<Value, ExtractError> {
    let mut last = ExtractError::NotFound(shape.name());
    for strategy in ExtractionStrategy::ALL {
        match strategy.apply(text, shape) {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(?strategy, error = %e, "extraction strategy failed");
                last = e;
            }
        }
    }
    Err(last)
}

fn parse(s: &str) -> Result<Value, ExtractError> {
    serde_json::from_str(s).map_err(|e| ExtractError::Parse(e.to_string()))
}

fn parse_direct(text: &str, shape: JsonShape) -> Result<Value, ExtractError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if shape.check(&value).is_ok() {
            return Ok(value);
        }
    }
    parse(bracket_slice(text, shape)?)
}

/// 第一个开括号到最后一个闭括号
fn bracket_slice(text: &str, shape: JsonShape) -> Result<&str, ExtractError> {
    let start = text.find(shape.open());
    let end = text.rfind(shape.close());
    match (start, end) {
        (Some(s), Some(e)) if s < e => Ok(&text[s..=e]),
        _ => Err(ExtractError::NotFound(shape.name())),
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)\s*```").expect("valid fence regex"))
}

fn parse_fenced(text: &str, shape: JsonShape) -> Result<Value, ExtractError> {
    let mut last = ExtractError::NotFound("fenced block");
    for caps in fence_re().captures_iter(text) {
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !body.starts_with(shape.open()) {
            continue;
        }
        match parse(body) {
            Ok(value) => return Ok(value),
            Err(e) => last = e,
        }
    }
    Err(last)
}

/// 有限的语法修复；只改动字符串字面量之外的文本
pub(crate) fn repair(s: &str) -> String {
    fix_separators(&strip_comments(s)).trim().to_string()
}

/// 去掉收尾括号前的多余逗号，并在相邻对象 `} {` 之间补逗号
fn fix_separators(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 8);
    let mut in_string = false;
    let mut escaped = false;

    let next_significant = |from: usize| chars[from..].iter().copied().find(|c| !c.is_whitespace());

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
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
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' if matches!(next_significant(i + 1), Some('}' | ']')) => {}
            '}' => {
                out.push(c);
                if next_significant(i + 1) == Some('{') {
                    out.push(',');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// 去掉 `//` 行注释与 `/* */` 块注释，字符串字面量内部保持不变
fn strip_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}
