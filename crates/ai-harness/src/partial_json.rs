//! Best-effort decoding of tool-call argument text that is still streaming.
//!
//! A strict `serde_json` parse is tried first. If that fails and partial input
//! is allowed, a tolerant scanner rebuilds the deepest well-formed prefix of
//! the document: unterminated containers are closed, a trailing key without a
//! value is dropped and an unterminated string keeps what arrived so far
//! (`{"a":` gives `{}`, `{"a":1,"b"` gives `{"a":1}`). Nothing here panics or
//! returns an error; failures fall back to a caller-supplied value.

use serde_json::{Map, Value};

/// Containers nested deeper than this are rejected (same limit as
/// `serde_json`) so hostile input cannot exhaust the stack.
const MAX_DEPTH: usize = 128;

/// Result of a parse attempt plus how it was obtained.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseOutcome {
    pub value: Value,
    /// `false` when `value` is the fallback.
    pub parsed: bool,
    pub used_partial_parser: bool,
    /// Why the strict (and, if tried, the tolerant) parse failed.
    pub error: Option<String>,
}

/// Parses `text`, falling back to `fallback` when nothing usable is found.
pub fn parse(text: &str, allow_partial: bool, fallback: Value) -> ParseOutcome {
    let strict_error = match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            return ParseOutcome {
                value,
                parsed: true,
                used_partial_parser: false,
                error: None,
            };
        }
        Err(e) => e.to_string(),
    };
    if !allow_partial {
        return ParseOutcome {
            value: fallback,
            parsed: false,
            used_partial_parser: false,
            error: Some(strict_error),
        };
    }
    match parse_partial(text) {
        Ok(value) => ParseOutcome {
            value,
            parsed: true,
            used_partial_parser: true,
            error: None,
        },
        Err(partial_error) => ParseOutcome {
            value: fallback,
            parsed: false,
            used_partial_parser: true,
            error: Some(format!("{strict_error}; partial parse: {partial_error}")),
        },
    }
}

/// Parse used on every tool-call delta: partial input allowed, `{}` fallback.
pub fn parse_streaming_arguments(text: &str) -> Value {
    parse(text, true, empty_object()).value
}

/// Definitive parse of the complete argument text when a tool-call block
/// closes. Unparseable text still yields an object (possibly empty).
pub fn parse_final_arguments(text: &str) -> ParseOutcome {
    if text.trim().is_empty() {
        return ParseOutcome {
            value: empty_object(),
            parsed: true,
            used_partial_parser: false,
            error: None,
        };
    }
    parse(text, true, empty_object())
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Tolerant parse: `Ok` with the recovered value, `Err` when the text is
/// invalid (not merely truncated) or contains no value at all.
pub fn parse_partial(text: &str) -> Result<Value, String> {
    let mut scanner = Scanner {
        src: text,
        pos: 0,
        depth: 0,
    };
    match scanner.value()? {
        Scan::Complete(value) => {
            scanner.skip_ws();
            if scanner.pos < scanner.src.len() {
                Err(format!("unexpected trailing input at byte {}", scanner.pos))
            } else {
                Ok(value)
            }
        }
        Scan::Truncated(Some(value)) => Ok(value),
        Scan::Truncated(None) => Err("no complete value".to_string()),
    }
}

enum Scan {
    Complete(Value),
    /// Input ended inside this value; carries what could be recovered.
    Truncated(Option<Value>),
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl Scanner<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b' ' | b'\n' | b'\r' | b'\t') = self.peek() {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Scan, String> {
        self.skip_ws();
        match self.peek() {
            None => Ok(Scan::Truncated(None)),
            Some(b'{') => self.nested(Self::object),
            Some(b'[') => self.nested(Self::array),
            Some(b'"') => Ok(match self.string()? {
                (text, true) => Scan::Complete(Value::String(text)),
                (text, false) => Scan::Truncated(Some(Value::String(text))),
            }),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(other) => Err(format!(
                "unexpected character `{}` at byte {}",
                other as char, self.pos
            )),
        }
    }

    fn nested(
        &mut self,
        container: fn(&mut Self) -> Result<Scan, String>,
    ) -> Result<Scan, String> {
        if self.depth >= MAX_DEPTH {
            return Err(format!("nesting deeper than {MAX_DEPTH} at byte {}", self.pos));
        }
        self.depth += 1;
        let scan = container(self);
        self.depth -= 1;
        scan
    }

    fn object(&mut self) -> Result<Scan, String> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Scan::Truncated(Some(Value::Object(map)))),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Scan::Complete(Value::Object(map)));
                }
                Some(b'"') => {}
                Some(other) => {
                    return Err(format!(
                        "expected object key at byte {}, found `{}`",
                        self.pos, other as char
                    ));
                }
            }
            let (key, key_done) = self.string()?;
            if !key_done {
                return Ok(Scan::Truncated(Some(Value::Object(map))));
            }
            self.skip_ws();
            match self.peek() {
                None => return Ok(Scan::Truncated(Some(Value::Object(map)))),
                Some(b':') => self.pos += 1,
                Some(other) => {
                    return Err(format!(
                        "expected `:` at byte {}, found `{}`",
                        self.pos, other as char
                    ));
                }
            }
            match self.value()? {
                Scan::Complete(value) => {
                    map.insert(key, value);
                }
                Scan::Truncated(Some(value)) => {
                    map.insert(key, value);
                    return Ok(Scan::Truncated(Some(Value::Object(map))));
                }
                Scan::Truncated(None) => return Ok(Scan::Truncated(Some(Value::Object(map)))),
            }
            self.skip_ws();
            match self.peek() {
                None => return Ok(Scan::Truncated(Some(Value::Object(map)))),
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Scan::Complete(Value::Object(map)));
                }
                Some(other) => {
                    return Err(format!(
                        "expected `,` or `}}` at byte {}, found `{}`",
                        self.pos, other as char
                    ));
                }
            }
        }
    }

    fn array(&mut self) -> Result<Scan, String> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Scan::Truncated(Some(Value::Array(items)))),
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Scan::Complete(Value::Array(items)));
                }
                Some(_) => {}
            }
            match self.value()? {
                Scan::Complete(value) => items.push(value),
                Scan::Truncated(Some(value)) => {
                    items.push(value);
                    return Ok(Scan::Truncated(Some(Value::Array(items))));
                }
                Scan::Truncated(None) => return Ok(Scan::Truncated(Some(Value::Array(items)))),
            }
            self.skip_ws();
            match self.peek() {
                None => return Ok(Scan::Truncated(Some(Value::Array(items)))),
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Scan::Complete(Value::Array(items)));
                }
                Some(other) => {
                    return Err(format!(
                        "expected `,` or `]` at byte {}, found `{}`",
                        self.pos, other as char
                    ));
                }
            }
        }
    }

    /// Reads a string starting at the opening quote. The flag is `false` when
    /// the input ended before the closing quote.
    fn string(&mut self) -> Result<(String, bool), String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let rest = &self.src[self.pos..];
            let Some(offset) = rest.find(['"', '\\']) else {
                out.push_str(rest);
                self.pos = self.src.len();
                return Ok((out, false));
            };
            out.push_str(&rest[..offset]);
            self.pos += offset;
            if self.peek() == Some(b'"') {
                self.pos += 1;
                return Ok((out, true));
            }
            self.pos += 1;
            let Some(escape) = self.peek() else {
                return Ok((out, false));
            };
            self.pos += 1;
            match escape {
                b'"' => out.push('"'),
                b'\\' => out.push('\\'),
                b'/' => out.push('/'),
                b'b' => out.push('\u{0008}'),
                b'f' => out.push('\u{000C}'),
                b'n' => out.push('\n'),
                b'r' => out.push('\r'),
                b't' => out.push('\t'),
                b'u' => match self.unicode_escape()? {
                    Some(ch) => out.push(ch),
                    None => return Ok((out, false)),
                },
                other => {
                    return Err(format!(
                        "invalid escape `\\{}` at byte {}",
                        other as char, self.pos
                    ));
                }
            }
        }
    }

    /// Decodes the hex digits after `\u`, pairing surrogates. `None` when the
    /// input ends inside the escape.
    fn unicode_escape(&mut self) -> Result<Option<char>, String> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(Some(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER)));
        }
        if self.src.len() - self.pos < 2 {
            return Ok(None);
        }
        if !self.src[self.pos..].starts_with("\\u") {
            return Ok(Some(char::REPLACEMENT_CHARACTER));
        }
        self.pos += 2;
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        let decoded = char::decode_utf16([high as u16, low as u16])
            .next()
            .and_then(Result::ok)
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        Ok(Some(decoded))
    }

    fn hex4(&mut self) -> Result<Option<u32>, String> {
        let rest = self.src.as_bytes().get(self.pos..).unwrap_or_default();
        let window = &rest[..rest.len().min(4)];
        if !window.iter().all(u8::is_ascii_hexdigit) {
            return Err(format!("invalid unicode escape at byte {}", self.pos));
        }
        if window.len() < 4 {
            self.pos = self.src.len();
            return Ok(None);
        }
        let code = window
            .iter()
            .filter_map(|b| char::from(*b).to_digit(16))
            .fold(0, |acc, digit| acc * 16 + digit);
        self.pos += 4;
        Ok(Some(code))
    }

    fn literal(&mut self, word: &str, value: Value) -> Result<Scan, String> {
        let rest = &self.src[self.pos..];
        if rest.starts_with(word) {
            self.pos += word.len();
            return Ok(Scan::Complete(value));
        }
        if word.starts_with(rest) {
            self.pos = self.src.len();
            return Ok(Scan::Truncated(None));
        }
        Err(format!("invalid literal at byte {}", self.pos))
    }

    fn number(&mut self) -> Result<Scan, String> {
        let start = self.pos;
        while let Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') = self.peek() {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        let at_end = self.pos == self.src.len();
        match serde_json::from_str::<serde_json::Number>(text) {
            Ok(number) if at_end => Ok(Scan::Truncated(Some(Value::Number(number)))),
            Ok(number) => Ok(Scan::Complete(Value::Number(number))),
            Err(_) if at_end => Ok(Scan::Truncated(None)),
            Err(_) => Err(format!("invalid number `{text}` at byte {start}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_parse_wins_when_valid() {
        let outcome = parse(r#"{"a":1}"#, true, json!(null));
        assert!(outcome.parsed);
        assert!(!outcome.used_partial_parser);
        assert_eq!(outcome.value, json!({"a": 1}));
    }

    #[test]
    fn dangling_key_colon_yields_empty_object() {
        let outcome = parse(r#"{"a":"#, true, json!(null));
        assert!(outcome.parsed);
        assert!(outcome.used_partial_parser);
        assert_eq!(outcome.value, json!({}));
    }

    #[test]
    fn dangling_key_is_dropped() {
        assert_eq!(parse_partial(r#"{"a":1,"b""#), Ok(json!({"a": 1})));
        assert_eq!(parse_partial(r#"{"a":1,"b"#), Ok(json!({"a": 1})));
        assert_eq!(parse_partial(r#"{"a":1,"#), Ok(json!({"a": 1})));
    }

    #[test]
    fn unterminated_strings_keep_received_text() {
        assert_eq!(
            parse_partial(r#"{"path":"src/ma"#),
            Ok(json!({"path": "src/ma"}))
        );
        assert_eq!(parse_partial(r#"{"s":"a\"#), Ok(json!({"s": "a"})));
        assert_eq!(parse_partial(r#"{"s":"\u00e"#), Ok(json!({"s": ""})));
    }

    #[test]
    fn nested_containers_are_closed() {
        assert_eq!(
            parse_partial(r#"{"edits":[{"old":"x","new":"y"},{"old":"#),
            Ok(json!({"edits": [{"old": "x", "new": "y"}, {}]}))
        );
        assert_eq!(parse_partial("[1, 2, tr"), Ok(json!([1, 2])));
    }

    #[test]
    fn trailing_number_is_kept() {
        assert_eq!(parse_partial(r#"{"n":12"#), Ok(json!({"n": 12})));
        assert_eq!(parse_partial(r#"{"n":-"#), Ok(json!({})));
    }

    #[test]
    fn invalid_text_falls_back() {
        let outcome = parse("not json", false, json!({"fallback": true}));
        assert!(!outcome.parsed);
        assert_eq!(outcome.value, json!({"fallback": true}));
        assert!(outcome.error.is_some());

        let outcome = parse("not json", true, json!({}));
        assert!(!outcome.parsed);
        assert!(outcome.used_partial_parser);
        assert_eq!(outcome.value, json!({}));
    }

    #[test]
    fn surrogate_pairs_decode() {
        assert_eq!(
            parse_partial(r#"{"e":"😀"#),
            Ok(json!({"e": "\u{1F600}"}))
        );
    }

    #[test]
    fn final_arguments_of_empty_text_is_empty_object() {
        let outcome = parse_final_arguments("");
        assert_eq!(outcome.value, json!({}));
        assert!(outcome.parsed);
    }

    #[test]
    fn unicode_escape_cut_by_multibyte_text_is_rejected_without_panicking() {
        let outcome = parse("{\"a\":\"\\u00\u{20ac}\"}", true, json!({}));
        assert!(!outcome.parsed);
        assert_eq!(outcome.value, json!({}));
        assert!(parse_partial("\"\\u+123\"").is_err());
        assert_eq!(parse_partial("{\"a\":\"x\\u00"), Ok(json!({"a": "x"})));
    }

    #[test]
    fn excessive_nesting_falls_back_instead_of_recursing() {
        let deep = "[".repeat(50_000);
        let outcome = parse(&deep, true, json!({}));
        assert!(!outcome.parsed);
        assert_eq!(outcome.value, json!({}));

        let shallow = format!("{}1", "[".repeat(100));
        assert!(parse(&shallow, true, json!({})).parsed);
    }
}
