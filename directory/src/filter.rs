//! Search filters over entry attributes.
//!
//! Filters use the textual LDAP syntax (`(&(objectClass=groupOfNames)(cn=a.*))`) so that
//! they can be written in configuration files and stored inside remote query descriptors.
//! The pseudo attribute `entryDN` matches the entry DN itself.

use std::fmt;

use crate::error::{DirectoryError, Result};

/// Attribute name matching the DN of the entry instead of one of its attributes
pub const ENTRY_DN: &str = "entryDN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality { attr: String, value: String },
    Present { attr: String },
    /// `parts` are the literal chunks between `*` wildcards. An empty first (resp. last)
    /// chunk means the value may start (resp. end) with anything.
    Substring { attr: String, parts: Vec<String> },
}

impl Filter {
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equality {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn present(attr: impl Into<String>) -> Self {
        Filter::Present { attr: attr.into() }
    }

    /// Values starting with `prefix`
    pub fn prefix(attr: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::Substring {
            attr: attr.into(),
            parts: vec![prefix.into(), String::new()],
        }
    }

    /// Collapses single element lists, the way one would write the filter by hand
    pub fn and(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::And(filters)
        }
    }

    pub fn or(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::Or(filters)
        }
    }

    pub fn and2(a: Filter, b: Filter) -> Self {
        Filter::And(vec![a, b])
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Parse a textual filter. A bare `attr=value` without parentheses is accepted.
    pub fn parse(s: &str) -> Result<Filter> {
        let s = s.trim();
        let owned;
        let input = if s.starts_with('(') {
            s
        } else {
            owned = format!("({})", s);
            &owned
        };
        let mut parser = Parser {
            chars: input.chars().collect(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.chars.len() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(filter)
    }
}

/// Escape a value so it can be inserted in a textual filter
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) => {
                write!(f, "(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            Filter::Or(filters) => {
                write!(f, "(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            Filter::Not(filter) => write!(f, "(!{})", filter),
            Filter::Equality { attr, value } => write!(f, "({}={})", attr, escape_value(value)),
            Filter::Present { attr } => write!(f, "({}=*)", attr),
            Filter::Substring { attr, parts } => {
                let parts: Vec<String> = parts.iter().map(|p| escape_value(p)).collect();
                write!(f, "({}={})", attr, parts.join("*"))
            }
        }
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn error(&self, msg: &str) -> DirectoryError {
        let input: String = self.chars.iter().collect();
        DirectoryError::InvalidFilter(format!("{} at position {} in {}", msg, self.pos, input))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect('(')?;
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.filter_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.filter_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        while self.peek() == Some('(') {
            filters.push(self.filter()?);
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '=' {
                break;
            }
            if c == '(' || c == ')' {
                return Err(self.error("expected '='"));
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect::<String>();
        let attr = attr.trim().to_string();
        if attr.is_empty() {
            return Err(self.error("empty attribute name"));
        }
        self.expect('=')?;

        // raw chunks split on unescaped '*'
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.error("unexpected end of filter")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '('")),
                Some('*') => {
                    self.pos += 1;
                    parts.push(String::new());
                }
                Some('\\') => {
                    let hex: String = self.chars.iter().skip(self.pos + 1).take(2).collect();
                    let byte = u8::from_str_radix(&hex, 16)
                        .map_err(|_| self.error("invalid escape sequence"))?;
                    if let Some(last) = parts.last_mut() {
                        last.push(char::from(byte));
                    }
                    self.pos += 3;
                }
                Some(c) => {
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                    self.pos += 1;
                }
            }
        }

        Ok(match parts.len() {
            1 => Filter::Equality {
                attr,
                value: parts.remove(0),
            },
            2 if parts.iter().all(|p| p.is_empty()) => Filter::Present { attr },
            _ => Filter::Substring { attr, parts },
        })
    }
}
