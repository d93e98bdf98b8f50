//! Structured extraction from free-form model output.
//!
//! Models answer with prose around a fenced block such as
//!
//! ```text
//! results = {"Dakwerken": {"category_id": "04. Dakwerken", "confidence": 0.9}}
//! ```
//!
//! The block is never executed. It is parsed as a restricted literal language
//! (JSON plus the Python spellings models like to emit) and anything outside
//! that grammar is rejected. On rejection the caller gets the raw text back.

use regex::Regex;
use serde_json::{Map, Number, Value};
use specsplit_core::Extracted;
use std::sync::OnceLock;

/// Variable names a result mapping is usually bound to, in preference order.
pub const RESULT_NAMES: &[&str] = &["results", "chapters", "secties", "response", "data", "result"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LiteralError {
    #[error("unexpected end of input")]
    Eof,
    #[error("unexpected {found:?} at offset {at}")]
    Unexpected { found: char, at: usize },
    #[error("invalid number {0:?}")]
    Number(String),
    #[error("invalid escape at offset {0}")]
    Escape(usize),
    #[error("unknown identifier {0:?}")]
    Identifier(String),
    #[error("mapping key at offset {0} is not a string or number")]
    Key(usize),
    #[error("nesting deeper than {MAX_DEPTH}")]
    TooDeep,
}

const MAX_DEPTH: usize = 64;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+.\-]*[ \t]*\r?\n?(.*?)```").expect("fence regex is valid")
    })
}

/// Contents of every fenced code block, in order of appearance.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    fence_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

pub fn extract_structured(text: &str) -> Extracted {
    for block in fenced_blocks(text) {
        if let Some(m) = mapping_from_block(block) {
            return Extracted::Structured(m);
        }
    }

    if let Some(m) = bare_mapping(text) {
        return Extracted::Structured(m);
    }

    tracing::debug!(
        len = text.len(),
        "no structured mapping found in model output; returning raw text"
    );
    Extracted::Raw(text.to_string())
}

fn mapping_from_block(block: &str) -> Option<Map<String, Value>> {
    match parse_assignments(block) {
        Ok(locals) if !locals.is_empty() => {
            if let Some(m) = pick_result(locals) {
                return Some(m);
            }
        }
        Ok(_) => {}
        Err(e) => {
            tracing::debug!(error = %e, "fenced block is not a literal assignment list");
        }
    }
    bare_mapping(block)
}

fn bare_mapping(text: &str) -> Option<Map<String, Value>> {
    let t = text.trim();
    if !(t.starts_with('{') && t.ends_with('}')) {
        return None;
    }
    match parse_literal(t) {
        Ok(Value::Object(m)) => Some(m),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "text looks like a mapping but does not parse");
            None
        }
    }
}

fn pick_result(locals: Vec<(String, Value)>) -> Option<Map<String, Value>> {
    let idx = RESULT_NAMES
        .iter()
        .find_map(|name| locals.iter().position(|(n, v)| n == name && v.is_object()))
        .or_else(|| locals.iter().position(|(_, v)| v.is_object()))?;
    match locals.into_iter().nth(idx) {
        Some((_, Value::Object(m))) => Some(m),
        _ => None,
    }
}

/// Parses a single literal; trailing input other than whitespace/comments is an error.
pub fn parse_literal(src: &str) -> Result<Value, LiteralError> {
    let mut p = Parser::new(src);
    let v = p.value()?;
    p.skip_trivia();
    match p.peek() {
        None => Ok(v),
        Some(found) => Err(LiteralError::Unexpected { found, at: p.pos }),
    }
}

/// Parses `name = literal` statements. Reassignment keeps the first position and
/// the last value.
pub fn parse_assignments(src: &str) -> Result<Vec<(String, Value)>, LiteralError> {
    let mut p = Parser::new(src);
    let mut out: Vec<(String, Value)> = Vec::new();
    loop {
        p.skip_trivia_and_semicolons();
        if p.peek().is_none() {
            break;
        }
        let mut name = p.identifier()?;
        if matches!(name.as_str(), "let" | "const" | "var") {
            p.skip_trivia();
            name = p.identifier()?;
        }
        p.skip_trivia();
        p.expect('=')?;
        if p.peek() == Some('=') {
            return Err(LiteralError::Unexpected { found: '=', at: p.pos });
        }
        let value = p.value()?;
        match out.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => out.push((name, value)),
        }
    }
    Ok(out)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn expect(&mut self, want: char) -> Result<(), LiteralError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(found) => Err(LiteralError::Unexpected {
                found,
                at: self.pos - 1,
            }),
            None => Err(LiteralError::Eof),
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' || (c == '/' && self.peek_at(1) == Some('/')) {
                self.skip_line();
            } else {
                break;
            }
        }
    }

    fn skip_trivia_and_semicolons(&mut self) {
        loop {
            self.skip_trivia();
            if self.peek() == Some(';') {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn identifier(&mut self) -> Result<String, LiteralError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c == '_' || c.is_alphabetic() => {}
            Some(found) => return Err(LiteralError::Unexpected { found, at: start }),
            None => return Err(LiteralError::Eof),
        }
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        if self.depth >= MAX_DEPTH {
            return Err(LiteralError::TooDeep);
        }
        self.depth += 1;
        let v = self.value_inner();
        self.depth -= 1;
        v
    }

    fn value_inner(&mut self) -> Result<Value, LiteralError> {
        self.skip_trivia();
        match self.peek() {
            None => Err(LiteralError::Eof),
            Some('{') => self.mapping(),
            Some('[') => self.sequence(']'),
            Some('(') => self.sequence(')'),
            Some('"') | Some('\'') => self.strings(),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.number(),
            Some(c) if c == '_' || c.is_alphabetic() => {
                let ident = self.identifier()?;
                match ident.as_str() {
                    "true" | "True" => Ok(Value::Bool(true)),
                    "false" | "False" => Ok(Value::Bool(false)),
                    "null" | "None" => Ok(Value::Null),
                    _ => Err(LiteralError::Identifier(ident)),
                }
            }
            Some(found) => Err(LiteralError::Unexpected {
                found,
                at: self.pos,
            }),
        }
    }

    fn mapping(&mut self) -> Result<Value, LiteralError> {
        self.expect('{')?;
        let mut out = Map::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(out));
            }
            let at = self.pos;
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => return Err(LiteralError::Key(at)),
            };
            self.skip_trivia();
            self.expect(':')?;
            let v = self.value()?;
            out.insert(key, v);
            self.skip_trivia();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(out)),
                Some(found) => {
                    return Err(LiteralError::Unexpected {
                        found,
                        at: self.pos - 1,
                    })
                }
                None => return Err(LiteralError::Eof),
            }
        }
    }

    fn sequence(&mut self, close: char) -> Result<Value, LiteralError> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(out));
            }
            out.push(self.value()?);
            self.skip_trivia();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Value::Array(out)),
                Some(found) => {
                    return Err(LiteralError::Unexpected {
                        found,
                        at: self.pos - 1,
                    })
                }
                None => return Err(LiteralError::Eof),
            }
        }
    }

    /// One or more adjacent string literals, concatenated.
    fn strings(&mut self) -> Result<Value, LiteralError> {
        let mut s = self.string()?;
        loop {
            let save = self.pos;
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some('"') | Some('\'')) {
                s.push_str(&self.string()?);
            } else {
                self.pos = save;
                return Ok(Value::String(s));
            }
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let quote = self.bump().ok_or(LiteralError::Eof)?;
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or(LiteralError::Eof)?;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let at = self.pos - 1;
            let e = self.bump().ok_or(LiteralError::Eof)?;
            match e {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' | '/' => out.push(e),
                '\n' => {}
                'x' => {
                    let code = self.hex(2).ok_or(LiteralError::Escape(at))?;
                    out.push(char::from_u32(code).ok_or(LiteralError::Escape(at))?);
                }
                'u' => {
                    let hi = self.hex(4).ok_or(LiteralError::Escape(at))?;
                    let code = if (0xD800..0xDC00).contains(&hi) {
                        if self.peek() != Some('\\') || self.peek_at(1) != Some('u') {
                            return Err(LiteralError::Escape(at));
                        }
                        self.pos += 2;
                        let lo = self.hex(4).ok_or(LiteralError::Escape(at))?;
                        if !(0xDC00..0xE000).contains(&lo) {
                            return Err(LiteralError::Escape(at));
                        }
                        0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00)
                    } else {
                        hi
                    };
                    out.push(char::from_u32(code).ok_or(LiteralError::Escape(at))?);
                }
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn hex(&mut self, n: usize) -> Option<u32> {
        let end = self.pos.checked_add(n)?;
        if end > self.chars.len() {
            return None;
        }
        let s: String = self.chars[self.pos..end].iter().collect();
        let v = u32::from_str_radix(&s, 16).ok()?;
        self.pos = end;
        Some(v)
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let sign_ok = matches!(c, '-' | '+')
                && (self.pos == start || matches!(self.chars[self.pos - 1], 'e' | 'E'));
            if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '_') || sign_ok {
                self.pos += 1;
            } else {
                break;
            }
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let cleaned: String = raw
            .trim_start_matches('+')
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if !cleaned.contains(['.', 'e', 'E']) {
            if let Ok(i) = cleaned.parse::<i64>() {
                return Ok(Value::Number(i.into()));
            }
        }
        cleaned
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(LiteralError::Number(raw))
    }
}
