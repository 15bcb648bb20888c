//! Schema descriptions and their parser
//!
//! Schemas are written in the message-type language used by the columnar
//! format:
//!
//! ```text
//! message customer {
//!   required int32 c_custkey;
//!   optional binary c_name (UTF8);
//!   optional double c_acctbal = 6;
//! }
//! ```
//!
//! Only flat messages of primitive columns are supported; nested groups and
//! primitives without a text form are rejected.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CompatError, Result};

/// Primitive type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Boolean,
    Int32,
    Int64,
    Float,
    Double,
    /// Raw bytes, written as text in the row representation
    Binary,
}

impl PrimitiveKind {
    /// Keyword used in schema descriptions
    pub fn keyword(&self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::Binary => "binary",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "boolean" => Some(PrimitiveKind::Boolean),
            "int32" => Some(PrimitiveKind::Int32),
            "int64" => Some(PrimitiveKind::Int64),
            "float" => Some(PrimitiveKind::Float),
            "double" => Some(PrimitiveKind::Double),
            "binary" => Some(PrimitiveKind::Binary),
            _ => None,
        }
    }

    /// Whether values get the trailing ".0" stripped in text form
    pub fn is_floating(&self) -> bool {
        matches!(self, PrimitiveKind::Float | PrimitiveKind::Double)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keyword().to_ascii_uppercase())
    }
}

/// Field repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repetition {
    Required,
    Optional,
    /// Parsed for completeness; the row representation carries one value.
    Repeated,
}

impl Repetition {
    fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "required" => Some(Repetition::Required),
            "optional" => Some(Repetition::Optional),
            "repeated" => Some(Repetition::Repeated),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Repetition::Required => "required",
            Repetition::Optional => "optional",
            Repetition::Repeated => "repeated",
        }
    }
}

/// One column of a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: PrimitiveKind,
    pub repetition: Repetition,
    /// Position in the schema; equals the index in [`Schema::columns`]
    pub ordinal: usize,
    /// Logical annotation such as `UTF8` or `DECIMAL(9,2)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

/// An ordered list of uniquely named columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    columns: Vec<ColumnDescriptor>,
}

impl Schema {
    /// Build a schema from columns, reassigning ordinals by position.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        let mut columns = columns;
        for (ordinal, column) in columns.iter_mut().enumerate() {
            if !seen.insert(column.name.clone()) {
                return Err(CompatError::SchemaParse {
                    line: 0,
                    message: format!("duplicate column '{}'", column.name),
                });
            }
            column.ordinal = ordinal;
        }
        Ok(Self {
            name: name.into(),
            columns,
        })
    }

    /// Convenience constructor: every column optional, no annotations.
    pub fn from_fields(name: impl Into<String>, fields: &[(&str, PrimitiveKind)]) -> Result<Self> {
        let columns = fields
            .iter()
            .enumerate()
            .map(|(ordinal, (field, kind))| ColumnDescriptor {
                name: field.to_string(),
                kind: *kind,
                repetition: Repetition::Optional,
                ordinal,
                annotation: None,
            })
            .collect();
        Self::new(name, columns)
    }

    /// Parse a schema description
    pub fn parse(text: &str) -> Result<Self> {
        Parser::new(text).parse_message()
    }

    /// Read and parse a schema file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "message {} {{", self.name)?;
        for column in &self.columns {
            write!(
                f,
                "  {} {} {}",
                column.repetition.keyword(),
                column.kind.keyword(),
                column.name
            )?;
            if let Some(annotation) = &column.annotation {
                write!(f, " ({})", annotation)?;
            }
            writeln!(f, ";")?;
        }
        write!(f, "}}")
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z0-9_.]*|[0-9]+|\S").expect("token pattern is valid")
    })
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    line: usize,
}

/// Recursive-descent parser over regex-produced tokens.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    last_line: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        let mut tokens = Vec::new();
        let mut last_line = 1;
        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            last_line = line;
            // `//` and `#` start a comment
            let content = raw_line
                .split("//")
                .next()
                .unwrap_or("")
                .split('#')
                .next()
                .unwrap_or("");
            for m in token_pattern().find_iter(content) {
                tokens.push(Token {
                    text: m.as_str().to_string(),
                    line,
                });
            }
        }
        Self {
            tokens,
            pos: 0,
            last_line,
        }
    }

    fn error(&self, line: usize, message: impl Into<String>) -> CompatError {
        CompatError::SchemaParse {
            line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token.clone())
            }
            None => Err(self.error(self.last_line, "unexpected end of schema")),
        }
    }

    fn expect(&mut self, text: &str) -> Result<Token> {
        let token = self.next()?;
        if token.text != text {
            return Err(self.error(
                token.line,
                format!("expected '{}', found '{}'", text, token.text),
            ));
        }
        Ok(token)
    }

    fn identifier(&mut self, what: &str) -> Result<Token> {
        let token = self.next()?;
        let valid = token
            .text
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid {
            return Err(self.error(
                token.line,
                format!("expected {}, found '{}'", what, token.text),
            ));
        }
        Ok(token)
    }

    fn parse_message(mut self) -> Result<Schema> {
        let keyword = self.identifier("'message'")?;
        if !keyword.text.eq_ignore_ascii_case("message") {
            return Err(self.error(
                keyword.line,
                format!("expected 'message', found '{}'", keyword.text),
            ));
        }
        let name = self.identifier("message name")?;
        self.expect("{")?;

        let mut columns = Vec::new();
        loop {
            match self.peek() {
                Some(token) if token.text == "}" => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let ordinal = columns.len();
                    columns.push(self.parse_field(ordinal)?);
                }
                None => return Err(self.error(self.last_line, "missing closing '}'")),
            }
        }

        if let Some(extra) = self.peek() {
            return Err(self.error(
                extra.line,
                format!("unexpected '{}' after message", extra.text),
            ));
        }

        let line = name.line;
        Schema::new(name.text, columns).map_err(|e| match e {
            CompatError::SchemaParse { message, .. } => CompatError::SchemaParse { line, message },
            other => other,
        })
    }

    fn parse_field(&mut self, ordinal: usize) -> Result<ColumnDescriptor> {
        let rep_token = self.identifier("repetition")?;
        let repetition = Repetition::from_keyword(&rep_token.text).ok_or_else(|| {
            self.error(
                rep_token.line,
                format!("unknown repetition '{}'", rep_token.text),
            )
        })?;

        let type_token = self.identifier("type")?;
        // Width of fixed_len_byte_array(N)
        if self.peek().map(|t| t.text == "(").unwrap_or(false) {
            self.parenthesized()?;
        }
        let name = self.identifier("field name")?;

        let kind = match PrimitiveKind::from_keyword(&type_token.text) {
            Some(kind) => kind,
            None => {
                let lowered = type_token.text.to_ascii_lowercase();
                if matches!(lowered.as_str(), "group" | "int96" | "fixed_len_byte_array") {
                    return Err(CompatError::UnsupportedType {
                        column: name.text,
                        type_name: type_token.text,
                    });
                }
                return Err(self.error(
                    type_token.line,
                    format!("unknown type '{}'", type_token.text),
                ));
            }
        };

        let annotation = if self.peek().map(|t| t.text == "(").unwrap_or(false) {
            Some(self.parenthesized()?)
        } else {
            None
        };

        if self.peek().map(|t| t.text == "=").unwrap_or(false) {
            self.pos += 1;
            let id = self.next()?;
            if !id.text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(self.error(id.line, format!("invalid field id '{}'", id.text)));
            }
        }
        self.expect(";")?;

        Ok(ColumnDescriptor {
            name: name.text,
            kind,
            repetition,
            ordinal,
            annotation,
        })
    }

    /// Consume `( ... )` with nesting and return the inner text.
    fn parenthesized(&mut self) -> Result<String> {
        let open = self.expect("(")?;
        let mut depth = 1;
        let mut inner = String::new();
        loop {
            let token = self
                .next()
                .map_err(|_| self.error(open.line, "unbalanced '('"))?;
            match token.text.as_str() {
                "(" => depth += 1,
                ")" => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            inner.push_str(&token.text);
        }
        if inner.is_empty() {
            return Err(self.error(open.line, "empty parentheses"));
        }
        Ok(inner)
    }
}
