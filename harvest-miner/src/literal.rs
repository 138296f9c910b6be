//! Parser for Python literal expressions found in legacy bundles.
//!
//! Run parameters are stored as the `repr` of a Python dict, e.g.
//! `{u'TESTS': u'all', 'ITERATIONS': 5}`. Supported: dicts, lists,
//! tuples, strings with `u`/`b`/`r` prefixes, integers, floats, `True`,
//! `False` and `None`.

use serde_json::{Map, Number, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for LiteralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid literal at offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for LiteralError {}

pub fn parse(input: &str) -> Result<Value, LiteralError> {
    let mut parser = Parser {
        chars: input.char_indices().collect(),
        pos: 0,
        len: input.len(),
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or(self.len, |(i, _)| *i)
    }

    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<(), LiteralError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => {
                self.pos -= 1;
                Err(self.error(format!("expected '{want}', found '{c}'")))
            }
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.dict(),
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some('\'' | '"') => self.string(false),
            Some('u' | 'U' | 'b' | 'B') if matches!(self.peek_at(1), Some('\'' | '"')) => {
                self.pos += 1;
                self.string(false)
            }
            Some('r' | 'R') if matches!(self.peek_at(1), Some('\'' | '"')) => {
                self.pos += 1;
                self.string(true)
            }
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() => self.keyword(),
            Some(c) => Err(self.error(format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn dict(&mut self) -> Result<Value, LiteralError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Value, LiteralError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Value::Array(items)),
                _ => return Err(self.error(format!("expected ',' or '{close}'"))),
            }
        }
    }

    fn string(&mut self, raw: bool) -> Result<Value, LiteralError> {
        let quote = self
            .bump()
            .ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(Value::String(out)),
                Some('\\') if !raw => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().map(|(_, c)| c).collect();
        // Python 2 long suffix
        let digits = text.strip_suffix(['L', 'l']).unwrap_or(&text);
        if let Ok(n) = digits.parse::<i64>() {
            return Ok(Value::from(n));
        }
        digits
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| LiteralError {
                offset: self.chars[start].0,
                message: format!("invalid number '{text}'"),
            })
    }

    fn keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().map(|(_, c)| c).collect();
        match word.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            _ => Err(LiteralError {
                offset: self.chars[start].0,
                message: format!("unknown name '{word}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_python_dict_repr() {
        let value = parse("{u'TESTS': u'all', 'ITERATIONS': 5, 'RATIO': 0.5, 'ON': True, 'X': None}")
            .unwrap();
        assert_eq!(
            value,
            json!({"TESTS": "all", "ITERATIONS": 5, "RATIO": 0.5, "ON": true, "X": null})
        );
    }

    #[test]
    fn test_nested_sequences() {
        let value = parse("{'list': [1, 2,], 'tuple': (u'a', b\"b\"), 'empty': {}}").unwrap();
        assert_eq!(
            value,
            json!({"list": [1, 2], "tuple": ["a", "b"], "empty": {}})
        );
    }

    #[test]
    fn test_escapes_and_raw() {
        assert_eq!(parse(r"'it\'s'").unwrap(), json!("it's"));
        assert_eq!(parse(r"'a\nb'").unwrap(), json!("a\nb"));
        assert_eq!(parse(r"r'a\nb'").unwrap(), json!("a\\nb"));
    }

    #[test]
    fn test_negative_and_long() {
        assert_eq!(parse("-3").unwrap(), json!(-3));
        assert_eq!(parse("10L").unwrap(), json!(10));
    }

    #[test]
    fn test_errors() {
        assert!(parse("{'a': }").is_err());
        assert!(parse("{'a' 1}").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("{} extra").is_err());
        assert_eq!(parse("nothing").unwrap_err().message, "unknown name 'nothing'");
    }

    proptest! {
        #[test]
        fn prop_string_dicts_parse(
            entries in prop::collection::btree_map("[A-Z_]{1,10}", "[a-z0-9 ._-]{0,12}", 0..8)
        ) {
            let repr = format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(k, v)| format!("u'{k}': u'{v}'"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let parsed = parse(&repr).unwrap();
            let obj = parsed.as_object().unwrap();
            prop_assert_eq!(obj.len(), entries.len());
            for (k, v) in &entries {
                prop_assert_eq!(obj[k].as_str(), Some(v.as_str()));
            }
        }

        #[test]
        fn prop_never_panics(input in ".{0,64}") {
            let _ = parse(&input);
        }
    }
}
