//! `@metadata(...)` blocks embedded in description strings
//!
//! ```graphql
//! """
//! A registered user
//! @metadata(db_table: "users", cache: true, weight: 1.5)
//! """
//! type User { ... }
//! ```
//!
//! Keys are identifiers; values are quoted strings, lists, or bare tokens
//! coerced to bool, int or float when they look like one. A block that does
//! not parse is ignored and the description is returned untouched.

use crate::ir::{Literal, Metadata};

const MARKER: &str = "@metadata";

/// Description with metadata blocks removed, plus the parsed metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedDescription {
    pub description: Option<String>,
    pub metadata: Metadata,
}

/// Split a raw description into clean text and metadata
pub fn parse_description(raw: Option<&str>) -> ParsedDescription {
    let Some(raw) = raw else {
        return ParsedDescription::default();
    };

    let mut metadata = Metadata::new();
    let mut cleaned = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find(MARKER) {
        let after_marker = &rest[start + MARKER.len()..];
        match Parser::new(after_marker).block() {
            Some((entries, consumed)) => {
                cleaned.push_str(&rest[..start]);
                metadata.extend(entries);
                rest = &after_marker[consumed..];
            }
            None => {
                return ParsedDescription {
                    description: clean(raw),
                    metadata: Metadata::new(),
                };
            }
        }
    }
    cleaned.push_str(rest);

    ParsedDescription {
        description: clean(&cleaned),
        metadata,
    }
}

fn clean(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Recursive descent over the text following the marker
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: char) -> Option<()> {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.bump();
            Some(())
        } else {
            None
        }
    }

    /// `( pair (, pair)* ,? )`, returning the pairs and bytes consumed
    fn block(mut self) -> Option<(Vec<(String, Literal)>, usize)> {
        self.eat('(')?;
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.bump();
                return Some((entries, self.pos));
            }
            entries.push(self.pair()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(')') => {}
                _ => return None,
            }
        }
    }

    fn pair(&mut self) -> Option<(String, Literal)> {
        let key = self.key()?;
        self.eat(':')?;
        let value = self.value(&[',', ')'])?;
        Some((key, value))
    }

    fn key(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                self.bump();
            }
            _ => return None,
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        Some(self.input[start..self.pos].to_string())
    }

    fn value(&mut self, terminators: &[char]) -> Option<Literal> {
        self.skip_ws();
        match self.peek()? {
            quote @ ('"' | '\'') => self.quoted(quote).map(Literal::String),
            '[' => self.list(),
            _ => self.bare(terminators),
        }
    }

    fn quoted(&mut self, quote: char) -> Option<String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump()? {
                '\\' => out.push(self.bump()?),
                c if c == quote => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn list(&mut self) -> Option<Literal> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                return Some(Literal::List(items));
            }
            items.push(self.value(&[',', ']'])?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {}
                _ => return None,
            }
        }
    }

    fn bare(&mut self, terminators: &[char]) -> Option<Literal> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if terminators.contains(&c) || c == '\n' || c == '(' {
                break;
            }
            self.bump();
        }
        let token = self.input[start..self.pos].trim();
        if token.is_empty() {
            return None;
        }
        Some(coerce(token))
    }
}

/// Coerce a bare token into the most specific literal
pub fn coerce(token: &str) -> Literal {
    match token {
        "true" => return Literal::Bool(true),
        "false" => return Literal::Bool(false),
        "null" => return Literal::Null,
        _ => {}
    }
    if let Ok(int) = token.parse::<i64>() {
        return Literal::Int(int);
    }
    let numeric = token
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if numeric {
        if let Ok(float) = token.parse::<f64>() {
            return Literal::Float(float);
        }
    }
    Literal::String(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn meta(pairs: &[(&str, Literal)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_no_description() {
        assert_eq!(parse_description(None), ParsedDescription::default());
    }

    #[test]
    fn test_plain_description_is_kept() {
        let parsed = parse_description(Some("  A user  "));
        assert_eq!(parsed.description.as_deref(), Some("A user"));
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn test_coerces_values() {
        let parsed = parse_description(Some(
            "User model\n@metadata(db_table: \"users\", cache: true, ttl: 30, weight: 1.5, price: $100, column: email_address)",
        ));
        assert_eq!(parsed.description.as_deref(), Some("User model"));
        assert_eq!(
            parsed.metadata,
            meta(&[
                ("db_table", Literal::String("users".into())),
                ("cache", Literal::Bool(true)),
                ("ttl", Literal::Int(30)),
                ("weight", Literal::Float(1.5)),
                ("price", Literal::String("$100".into())),
                ("column", Literal::String("email_address".into())),
            ])
        );
    }

    #[test]
    fn test_quoted_values_keep_delimiters() {
        let parsed = parse_description(Some(
            r#"@metadata(where: "author_id = :id, (nested)", note: 'it\'s')"#,
        ));
        assert_eq!(parsed.description, None);
        assert_eq!(
            parsed.metadata.get("where"),
            Some(&Literal::String("author_id = :id, (nested)".into()))
        );
        assert_eq!(parsed.metadata.get("note"), Some(&Literal::String("it's".into())));
    }

    #[test]
    fn test_list_values() {
        let parsed = parse_description(Some(r#"@metadata(args: ["id", "name"])"#));
        assert_eq!(
            parsed.metadata.get("args"),
            Some(&Literal::List(vec![
                Literal::String("id".into()),
                Literal::String("name".into())
            ]))
        );
    }

    #[test]
    fn test_empty_block() {
        let parsed = parse_description(Some("Just text @metadata()"));
        assert_eq!(parsed.description.as_deref(), Some("Just text"));
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn test_malformed_block_is_ignored() {
        let raw = "Broken @metadata(primary_key true";
        let parsed = parse_description(Some(raw));
        assert_eq!(parsed.description.as_deref(), Some(raw));
        assert!(parsed.metadata.is_empty());

        let raw = "Unterminated @metadata(name: \"abc)";
        let parsed = parse_description(Some(raw));
        assert_eq!(parsed.description.as_deref(), Some(raw));
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn test_trailing_comma_and_multiline() {
        let parsed = parse_description(Some(
            "Post\n@metadata(\n  primary_key: true,\n  index: false,\n)\nmore text",
        ));
        assert_eq!(parsed.description.as_deref(), Some("Post\n\nmore text"));
        assert_eq!(parsed.metadata.get("primary_key"), Some(&Literal::Bool(true)));
        assert_eq!(parsed.metadata.get("index"), Some(&Literal::Bool(false)));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce("42"), Literal::Int(42));
        assert_eq!(coerce("-3.5"), Literal::Float(-3.5));
        assert_eq!(coerce("1e3"), Literal::Float(1000.0));
        assert_eq!(coerce("e"), Literal::String("e".into()));
        assert_eq!(coerce("false"), Literal::Bool(false));
    }
}
