//! Conversion between delimited text rows and typed records
//!
//! Both directions are pure functions of `(row, schema)`; the row index is
//! tracked by the caller and only used for diagnostics. [`RecordStream`] and
//! [`TextRowWriter`] wrap them for constant-memory streaming over files.

use std::fmt;
use std::io::{BufRead, Lines, Write};

use crate::error::{CompatError, Result};
use crate::schema::{ColumnDescriptor, PrimitiveKind, Schema};

/// Default column delimiter of the text representation
pub const DEFAULT_DELIMITER: char = '|';

/// A typed, present value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Binary(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Value::Boolean(_) => PrimitiveKind::Boolean,
            Value::Int32(_) => PrimitiveKind::Int32,
            Value::Int64(_) => PrimitiveKind::Int64,
            Value::Float(_) => PrimitiveKind::Float,
            Value::Double(_) => PrimitiveKind::Double,
            Value::Binary(_) => PrimitiveKind::Binary,
        }
    }

    /// Parse a non-empty text field as `kind`.
    ///
    /// Returns `None` when the text is not a valid value of that kind.
    pub fn parse(kind: PrimitiveKind, text: &str) -> Option<Self> {
        match kind {
            PrimitiveKind::Boolean => {
                if text.eq_ignore_ascii_case("true") {
                    Some(Value::Boolean(true))
                } else if text.eq_ignore_ascii_case("false") {
                    Some(Value::Boolean(false))
                } else {
                    None
                }
            }
            PrimitiveKind::Int32 => text.parse().ok().map(Value::Int32),
            PrimitiveKind::Int64 => text.parse().ok().map(Value::Int64),
            PrimitiveKind::Float => text.parse().ok().map(Value::Float),
            PrimitiveKind::Double => text.parse().ok().map(Value::Double),
            PrimitiveKind::Binary => Some(Value::Binary(text.as_bytes().to_vec())),
        }
    }

    /// Text form written to the row representation.
    ///
    /// Floating values drop a trailing ".0" (`12.0` becomes `12`) so output
    /// matches producers that never emit it.
    pub fn to_text(&self) -> String {
        let canonical = self.to_string();
        if self.kind().is_floating() {
            if let Some(stripped) = canonical.strip_suffix(".0") {
                return stripped.to_string();
            }
        }
        canonical
    }
}

impl fmt::Display for Value {
    /// Canonical form: floats always carry a fractional part or exponent.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Double(x) => write!(f, "{:?}", x),
            Value::Binary(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

/// One row: an optional value per column, aligned by ordinal
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: Vec<Option<Value>>,
}

impl Record {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Converts rows to records and back using a fixed delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTranscoder {
    delimiter: char,
}

impl Default for RecordTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}

impl RecordTranscoder {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Decode one text row.
    ///
    /// The delimiter is matched literally. An empty field is an absent value.
    /// Errors carry row index 0; streaming callers rewrite it with
    /// [`CompatError::at_row`].
    pub fn decode_row(&self, line: &str, schema: &Schema) -> Result<Record> {
        let fields: Vec<&str> = line.split(self.delimiter).collect();
        if fields.len() != schema.len() {
            return Err(CompatError::FieldCountMismatch {
                row_index: 0,
                expected: schema.len(),
                actual: fields.len(),
            });
        }

        let values = fields
            .into_iter()
            .zip(schema.columns())
            .map(|(field, column)| decode_field(field, column))
            .collect::<Result<Vec<_>>>()?;
        Ok(Record::new(values))
    }

    /// Encode one record as a text row (no line terminator).
    pub fn encode_row(&self, record: &Record, schema: &Schema) -> Result<String> {
        if record.len() != schema.len() {
            return Err(CompatError::FieldCountMismatch {
                row_index: 0,
                expected: schema.len(),
                actual: record.len(),
            });
        }

        let mut line = String::new();
        for (ordinal, (value, column)) in record.values().iter().zip(schema.columns()).enumerate() {
            if ordinal > 0 {
                line.push(self.delimiter);
            }
            let Some(value) = value else { continue };
            if value.kind() != column.kind {
                return Err(CompatError::FieldTypeMismatch {
                    row_index: 0,
                    column: column.name.clone(),
                    value: value.to_string(),
                    kind: column.kind.to_string(),
                });
            }
            line.push_str(&value.to_text());
        }
        Ok(line)
    }

    /// Lazily decode every line of `reader`.
    pub fn records<'s, R: BufRead>(&self, reader: R, schema: &'s Schema) -> RecordStream<'s, R> {
        RecordStream {
            lines: reader.lines(),
            schema,
            transcoder: *self,
            next_row: 0,
            done: false,
        }
    }
}

fn decode_field(field: &str, column: &ColumnDescriptor) -> Result<Option<Value>> {
    if field.is_empty() {
        return Ok(None);
    }
    Value::parse(column.kind, field)
        .map(Some)
        .ok_or_else(|| CompatError::FieldTypeMismatch {
            row_index: 0,
            column: column.name.clone(),
            value: field.to_string(),
            kind: column.kind.to_string(),
        })
}

/// Iterator of decoded records over a line source.
///
/// Stops after the first error: a partially converted dataset is never
/// trusted.
pub struct RecordStream<'s, R> {
    lines: Lines<R>,
    schema: &'s Schema,
    transcoder: RecordTranscoder,
    next_row: u64,
    done: bool,
}

impl<R: BufRead> Iterator for RecordStream<'_, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        let row = self.next_row;
        self.next_row += 1;
        match self.transcoder.decode_row(&line, self.schema) {
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                self.done = true;
                Some(Err(e.at_row(row)))
            }
        }
    }
}

/// Writes encoded records, one `\n`-terminated line each.
pub struct TextRowWriter<W: Write> {
    out: W,
    transcoder: RecordTranscoder,
    rows_written: u64,
}

impl<W: Write> TextRowWriter<W> {
    pub fn new(out: W, transcoder: RecordTranscoder) -> Self {
        Self {
            out,
            transcoder,
            rows_written: 0,
        }
    }

    pub fn write(&mut self, record: &Record, schema: &Schema) -> Result<()> {
        let line = self
            .transcoder
            .encode_row(record, schema)
            .map_err(|e| e.at_row(self.rows_written))?;
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
