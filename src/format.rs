//! The columnar format capability
//!
//! The engine treats the storage format as an opaque pair of operations,
//! [`ColumnarFormat::encode`] and [`ColumnarFormat::decode`]. Any format
//! library can be plugged in behind the trait.
//!
//! [`RowGroupFormat`] is the bundled reference implementation. Its blob is
//! newline-delimited JSON:
//!
//! ```text
//! {"section":"header","magic":"RGCOL","format_version":1,"schema":{..},"encoding":"plain"}
//! {"section":"row_group","rows":10000,"columns":[{"encoding":"plain","values":{"type":"int32","values":[..]}}, ..]}
//! ...
//! {"section":"footer","row_count":123456,"row_groups":13,"checksum":"<sha256 of row group lines>"}
//! ```
//!
//! Values are stored column by column within each row group. Floating values
//! are stored as IEEE-754 bit patterns so NaN and signed zero survive.

use std::collections::HashMap;
use std::hash::Hash;
use std::io::{BufRead, Lines, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checksum::{Checksum, ChecksumBuilder};
use crate::error::{CompatError, Result};
use crate::schema::{PrimitiveKind, Schema};
use crate::transcode::{Record, Value};

const MAGIC: &str = "RGCOL";
const FORMAT_VERSION: u32 = 1;

/// Default number of rows buffered per row group
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10_000;

/// Column encoding selected by an artifact variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Plain,
    Dictionary,
}

impl Encoding {
    /// Map a variant tag to an encoding; unknown tags use plain encoding.
    pub fn from_variant(variant: &str) -> Self {
        match variant.to_ascii_lowercase().as_str() {
            "dict" | "dictionary" => Encoding::Dictionary,
            _ => Encoding::Plain,
        }
    }
}

/// Options for writing a columnar artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub encoding: Encoding,
    pub row_group_size: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Plain,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }
}

impl EncodeOptions {
    pub fn for_variant(variant: &str, row_group_size: usize) -> Self {
        Self {
            encoding: Encoding::from_variant(variant),
            row_group_size,
        }
    }
}

/// A decoded artifact: its embedded schema and a lazy row stream
pub struct DecodedArtifact<'r> {
    pub schema: Schema,
    pub rows: Box<dyn Iterator<Item = Result<Record>> + 'r>,
}

/// Encode/decode capability of a columnar format library.
pub trait ColumnarFormat: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    /// File extension of artifacts, without the dot
    fn extension(&self) -> &str;

    /// Write `rows` to `out`, returning the number of rows written.
    fn encode(
        &self,
        schema: &Schema,
        rows: &mut dyn Iterator<Item = Result<Record>>,
        options: &EncodeOptions,
        out: &mut dyn Write,
    ) -> Result<u64>;

    /// Read the schema and open a lazy row stream.
    fn decode<'r>(&self, input: Box<dyn BufRead + 'r>) -> Result<DecodedArtifact<'r>>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "section", rename_all = "snake_case")]
enum Section {
    Header {
        magic: String,
        format_version: u32,
        schema: Schema,
        encoding: Encoding,
    },
    RowGroup {
        rows: usize,
        columns: Vec<ColumnChunk>,
    },
    Footer {
        row_count: u64,
        row_groups: u64,
        checksum: Checksum,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
enum ColumnValues {
    Boolean(Vec<Option<bool>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float(Vec<Option<u32>>),
    Double(Vec<Option<u64>>),
    Binary(Vec<Option<Vec<u8>>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
enum ColumnChunk {
    Plain {
        values: ColumnValues,
    },
    Dictionary {
        dictionary: ColumnValues,
        indices: Vec<Option<u32>>,
    },
}

impl ColumnValues {
    fn empty(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Boolean => ColumnValues::Boolean(Vec::new()),
            PrimitiveKind::Int32 => ColumnValues::Int32(Vec::new()),
            PrimitiveKind::Int64 => ColumnValues::Int64(Vec::new()),
            PrimitiveKind::Float => ColumnValues::Float(Vec::new()),
            PrimitiveKind::Double => ColumnValues::Double(Vec::new()),
            PrimitiveKind::Binary => ColumnValues::Binary(Vec::new()),
        }
    }

    fn kind(&self) -> PrimitiveKind {
        match self {
            ColumnValues::Boolean(_) => PrimitiveKind::Boolean,
            ColumnValues::Int32(_) => PrimitiveKind::Int32,
            ColumnValues::Int64(_) => PrimitiveKind::Int64,
            ColumnValues::Float(_) => PrimitiveKind::Float,
            ColumnValues::Double(_) => PrimitiveKind::Double,
            ColumnValues::Binary(_) => PrimitiveKind::Binary,
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnValues::Boolean(v) => v.len(),
            ColumnValues::Int32(v) => v.len(),
            ColumnValues::Int64(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Double(v) => v.len(),
            ColumnValues::Binary(v) => v.len(),
        }
    }

    /// Append a value; returns false when its kind does not match the column.
    fn push(&mut self, value: Option<&Value>) -> bool {
        match (self, value) {
            (ColumnValues::Boolean(v), None) => v.push(None),
            (ColumnValues::Int32(v), None) => v.push(None),
            (ColumnValues::Int64(v), None) => v.push(None),
            (ColumnValues::Float(v), None) => v.push(None),
            (ColumnValues::Double(v), None) => v.push(None),
            (ColumnValues::Binary(v), None) => v.push(None),
            (ColumnValues::Boolean(v), Some(Value::Boolean(b))) => v.push(Some(*b)),
            (ColumnValues::Int32(v), Some(Value::Int32(i))) => v.push(Some(*i)),
            (ColumnValues::Int64(v), Some(Value::Int64(i))) => v.push(Some(*i)),
            (ColumnValues::Float(v), Some(Value::Float(x))) => v.push(Some(x.to_bits())),
            (ColumnValues::Double(v), Some(Value::Double(x))) => v.push(Some(x.to_bits())),
            (ColumnValues::Binary(v), Some(Value::Binary(b))) => v.push(Some(b.clone())),
            _ => return false,
        }
        true
    }

    fn into_values(self) -> Vec<Option<Value>> {
        match self {
            ColumnValues::Boolean(v) => v.into_iter().map(|x| x.map(Value::Boolean)).collect(),
            ColumnValues::Int32(v) => v.into_iter().map(|x| x.map(Value::Int32)).collect(),
            ColumnValues::Int64(v) => v.into_iter().map(|x| x.map(Value::Int64)).collect(),
            ColumnValues::Float(v) => v
                .into_iter()
                .map(|x| x.map(|bits| Value::Float(f32::from_bits(bits))))
                .collect(),
            ColumnValues::Double(v) => v
                .into_iter()
                .map(|x| x.map(|bits| Value::Double(f64::from_bits(bits))))
                .collect(),
            ColumnValues::Binary(v) => v.into_iter().map(|x| x.map(Value::Binary)).collect(),
        }
    }

    fn into_chunk(self, encoding: Encoding) -> ColumnChunk {
        if encoding == Encoding::Plain {
            return ColumnChunk::Plain { values: self };
        }
        let (dictionary, indices) = match self {
            ColumnValues::Boolean(v) => wrap(dictionary_encode(v), ColumnValues::Boolean),
            ColumnValues::Int32(v) => wrap(dictionary_encode(v), ColumnValues::Int32),
            ColumnValues::Int64(v) => wrap(dictionary_encode(v), ColumnValues::Int64),
            ColumnValues::Float(v) => wrap(dictionary_encode(v), ColumnValues::Float),
            ColumnValues::Double(v) => wrap(dictionary_encode(v), ColumnValues::Double),
            ColumnValues::Binary(v) => wrap(dictionary_encode(v), ColumnValues::Binary),
        };
        ColumnChunk::Dictionary {
            dictionary,
            indices,
        }
    }
}

fn wrap<T>(
    (dictionary, indices): (Vec<Option<T>>, Vec<Option<u32>>),
    ctor: fn(Vec<Option<T>>) -> ColumnValues,
) -> (ColumnValues, Vec<Option<u32>>) {
    (ctor(dictionary), indices)
}

/// Distinct values in first-seen order, plus one index per input slot.
fn dictionary_encode<T: Eq + Hash + Clone>(values: Vec<Option<T>>) -> (Vec<Option<T>>, Vec<Option<u32>>) {
    let mut positions: HashMap<T, u32> = HashMap::new();
    let mut dictionary = Vec::new();
    let indices = values
        .into_iter()
        .map(|value| {
            value.map(|v| {
                *positions.entry(v.clone()).or_insert_with(|| {
                    dictionary.push(Some(v));
                    (dictionary.len() - 1) as u32
                })
            })
        })
        .collect();
    (dictionary, indices)
}

impl ColumnChunk {
    fn kind(&self) -> PrimitiveKind {
        match self {
            ColumnChunk::Plain { values } => values.kind(),
            ColumnChunk::Dictionary { dictionary, .. } => dictionary.kind(),
        }
    }

    fn into_values(self) -> Result<Vec<Option<Value>>> {
        match self {
            ColumnChunk::Plain { values } => Ok(values.into_values()),
            ColumnChunk::Dictionary {
                dictionary,
                indices,
            } => {
                let dictionary = dictionary.into_values();
                indices
                    .into_iter()
                    .map(|index| match index {
                        None => Ok(None),
                        Some(i) => dictionary
                            .get(i as usize)
                            .cloned()
                            .ok_or_else(|| {
                                CompatError::corrupt(format!("dictionary index {} out of range", i))
                            }),
                    })
                    .collect()
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnChunk::Plain { values } => values.len(),
            ColumnChunk::Dictionary { indices, .. } => indices.len(),
        }
    }
}

/// The bundled row-group columnar format.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowGroupFormat;

impl RowGroupFormat {
    pub fn new() -> Self {
        Self
    }
}

fn write_section(
    out: &mut dyn Write,
    section: &Section,
    checksum: Option<&mut ChecksumBuilder>,
) -> Result<()> {
    let line = serde_json::to_string(section)?;
    if let Some(builder) = checksum {
        builder.update(line.as_bytes());
    }
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    Ok(())
}

impl ColumnarFormat for RowGroupFormat {
    fn name(&self) -> &str {
        "row-group"
    }

    fn extension(&self) -> &str {
        "col"
    }

    fn encode(
        &self,
        schema: &Schema,
        rows: &mut dyn Iterator<Item = Result<Record>>,
        options: &EncodeOptions,
        out: &mut dyn Write,
    ) -> Result<u64> {
        let group_size = options.row_group_size.max(1);
        write_section(
            out,
            &Section::Header {
                magic: MAGIC.to_string(),
                format_version: FORMAT_VERSION,
                schema: schema.clone(),
                encoding: options.encoding,
            },
            None,
        )?;

        let fresh_columns = || -> Vec<ColumnValues> {
            schema
                .columns()
                .iter()
                .map(|c| ColumnValues::empty(c.kind))
                .collect()
        };

        let mut checksum = ChecksumBuilder::new();
        let mut columns = fresh_columns();
        let mut buffered = 0usize;
        let mut row_count = 0u64;
        let mut row_groups = 0u64;

        let mut flush = |columns: Vec<ColumnValues>, rows: usize, checksum: &mut ChecksumBuilder| -> Result<()> {
            let chunks = columns
                .into_iter()
                .map(|c| c.into_chunk(options.encoding))
                .collect();
            write_section(out, &Section::RowGroup { rows, columns: chunks }, Some(checksum))?;
            row_groups += 1;
            debug!(rows, "wrote row group");
            Ok(())
        };

        for row in rows {
            let record = row.map_err(|e| e.at_row(row_count))?;
            if record.len() != schema.len() {
                return Err(CompatError::FieldCountMismatch {
                    row_index: row_count,
                    expected: schema.len(),
                    actual: record.len(),
                });
            }
            for ((column, value), descriptor) in columns
                .iter_mut()
                .zip(record.values())
                .zip(schema.columns())
            {
                if !column.push(value.as_ref()) {
                    return Err(CompatError::FieldTypeMismatch {
                        row_index: row_count,
                        column: descriptor.name.clone(),
                        value: value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                        kind: descriptor.kind.to_string(),
                    });
                }
            }
            buffered += 1;
            row_count += 1;

            if buffered >= group_size {
                flush(std::mem::replace(&mut columns, fresh_columns()), buffered, &mut checksum)?;
                buffered = 0;
            }
        }
        if buffered > 0 {
            flush(columns, buffered, &mut checksum)?;
        }
        drop(flush);

        write_section(
            out,
            &Section::Footer {
                row_count,
                row_groups,
                checksum: checksum.finish(),
            },
            None,
        )?;
        out.flush()?;
        Ok(row_count)
    }

    fn decode<'r>(&self, input: Box<dyn BufRead + 'r>) -> Result<DecodedArtifact<'r>> {
        let mut lines = input.lines();
        let first = lines
            .next()
            .ok_or_else(|| CompatError::corrupt("empty artifact"))??;
        let header: Section = serde_json::from_str(&first)
            .map_err(|e| CompatError::corrupt(format!("unreadable header: {}", e)))?;

        let (schema, encoding) = match header {
            Section::Header {
                magic,
                format_version,
                schema,
                encoding,
            } => {
                if magic != MAGIC {
                    return Err(CompatError::corrupt(format!("bad magic '{}'", magic)));
                }
                if format_version != FORMAT_VERSION {
                    return Err(CompatError::corrupt(format!(
                        "unsupported format version {}",
                        format_version
                    )));
                }
                (schema, encoding)
            }
            _ => return Err(CompatError::corrupt("artifact does not start with a header")),
        };
        // Re-validate: deserialisation bypasses the uniqueness check.
        let schema = Schema::new(schema.name.clone(), schema.columns().to_vec())?;
        debug!(schema = %schema.name, ?encoding, "opened columnar artifact");

        let reader = RowGroupReader {
            lines,
            schema: schema.clone(),
            current: Vec::new(),
            remaining: 0,
            checksum: Some(ChecksumBuilder::new()),
            rows_seen: 0,
            groups_seen: 0,
            done: false,
        };
        Ok(DecodedArtifact {
            schema,
            rows: Box::new(reader),
        })
    }
}

/// Streams rows one row group at a time.
struct RowGroupReader<'r> {
    lines: Lines<Box<dyn BufRead + 'r>>,
    schema: Schema,
    current: Vec<std::vec::IntoIter<Option<Value>>>,
    remaining: usize,
    checksum: Option<ChecksumBuilder>,
    rows_seen: u64,
    groups_seen: u64,
    done: bool,
}

impl RowGroupReader<'_> {
    /// Load the next row group; `Ok(false)` once the footer has been verified.
    fn load_next_group(&mut self) -> Result<bool> {
        loop {
            let line = match self.lines.next() {
                Some(line) => line?,
                None => return Err(CompatError::corrupt("truncated artifact: missing footer")),
            };
            let section: Section = serde_json::from_str(&line)
                .map_err(|e| CompatError::corrupt(format!("unreadable section: {}", e)))?;

            match section {
                Section::RowGroup { rows, columns } => {
                    if let Some(builder) = self.checksum.as_mut() {
                        builder.update(line.as_bytes());
                    }
                    self.groups_seen += 1;
                    if rows == 0 {
                        continue;
                    }
                    self.install_group(rows, columns)?;
                    return Ok(true);
                }
                Section::Footer {
                    row_count,
                    row_groups,
                    checksum,
                } => {
                    if row_count != self.rows_seen || row_groups != self.groups_seen {
                        return Err(CompatError::corrupt(format!(
                            "footer declares {} rows in {} groups, read {} rows in {} groups",
                            row_count, row_groups, self.rows_seen, self.groups_seen
                        )));
                    }
                    let computed = self
                        .checksum
                        .take()
                        .map(ChecksumBuilder::finish)
                        .ok_or_else(|| CompatError::corrupt("footer read twice"))?;
                    if computed != checksum {
                        return Err(CompatError::corrupt(format!(
                            "checksum mismatch: expected {}, got {}",
                            checksum, computed
                        )));
                    }
                    return Ok(false);
                }
                Section::Header { .. } => {
                    return Err(CompatError::corrupt("unexpected second header"));
                }
            }
        }
    }

    fn install_group(&mut self, rows: usize, columns: Vec<ColumnChunk>) -> Result<()> {
        if columns.len() != self.schema.len() {
            return Err(CompatError::corrupt(format!(
                "row group has {} columns, schema has {}",
                columns.len(),
                self.schema.len()
            )));
        }
        let mut current = Vec::with_capacity(columns.len());
        for (chunk, descriptor) in columns.into_iter().zip(self.schema.columns()) {
            if chunk.kind() != descriptor.kind {
                return Err(CompatError::corrupt(format!(
                    "column '{}' stored as {}, schema says {}",
                    descriptor.name,
                    chunk.kind(),
                    descriptor.kind
                )));
            }
            if chunk.len() != rows {
                return Err(CompatError::corrupt(format!(
                    "column '{}' has {} values in a row group of {}",
                    descriptor.name,
                    chunk.len(),
                    rows
                )));
            }
            current.push(chunk.into_values()?.into_iter());
        }
        self.current = current;
        self.remaining = rows;
        Ok(())
    }
}

impl Iterator for RowGroupReader<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.remaining == 0 {
            match self.load_next_group() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        let values = self
            .current
            .iter_mut()
            .map(|column| column.next().flatten())
            .collect();
        self.remaining -= 1;
        self.rows_seen += 1;
        Some(Ok(Record::new(values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::RecordTranscoder;
    use std::io::Cursor;

    fn schema() -> Schema {
        Schema::from_fields(
            "mixed",
            &[
                ("id", PrimitiveKind::Int64),
                ("ok", PrimitiveKind::Boolean),
                ("ratio", PrimitiveKind::Float),
                ("price", PrimitiveKind::Double),
                ("name", PrimitiveKind::Binary),
                ("n", PrimitiveKind::Int32),
            ],
        )
        .unwrap()
    }

    fn rows(schema: &Schema) -> Vec<Record> {
        let transcoder = RecordTranscoder::default();
        [
            "1|true|0.5|12.0|alpha|3",
            "2||1.25|-0.0|beta|",
            "3|false||NaN||7",
            "4|TRUE|2|3.5|alpha|3",
            "5|false|0.5|12.0|alpha|3",
        ]
        .iter()
        .map(|line| transcoder.decode_row(line, schema).unwrap())
        .collect()
    }

    fn encode(schema: &Schema, records: &[Record], options: EncodeOptions) -> Vec<u8> {
        let mut out = Vec::new();
        let mut iter = records.iter().cloned().map(Ok);
        let written = RowGroupFormat
            .encode(schema, &mut iter, &options, &mut out)
            .unwrap();
        assert_eq!(written, records.len() as u64);
        out
    }

    fn decode_all(bytes: Vec<u8>) -> Result<(Schema, Vec<Record>)> {
        let decoded = RowGroupFormat.decode(Box::new(Cursor::new(bytes)))?;
        let rows = decoded.rows.collect::<Result<Vec<_>>>()?;
        Ok((decoded.schema, rows))
    }

    fn same_bits(a: &[Record], b: &[Record]) -> bool {
        // NaN != NaN under PartialEq; compare text forms instead.
        let s = schema();
        let t = RecordTranscoder::default();
        a.iter()
            .map(|r| t.encode_row(r, &s).unwrap())
            .eq(b.iter().map(|r| t.encode_row(r, &s).unwrap()))
    }

    #[test]
    fn test_plain_and_dictionary_preserve_rows() {
        let schema = schema();
        let records = rows(&schema);
        for encoding in [Encoding::Plain, Encoding::Dictionary] {
            let options = EncodeOptions {
                encoding,
                row_group_size: 2,
            };
            let (decoded_schema, decoded) = decode_all(encode(&schema, &records, options)).unwrap();
            assert_eq!(decoded_schema, schema);
            assert!(same_bits(&records, &decoded), "{:?}", encoding);
        }
    }

    #[test]
    fn test_signed_zero_survives() {
        let schema = schema();
        let records = rows(&schema);
        let (_, decoded) = decode_all(encode(&schema, &records, EncodeOptions::default())).unwrap();
        match decoded[1].get(3) {
            Some(Value::Double(x)) => assert!(x.is_sign_negative()),
            other => panic!("expected double, got {:?}", other),
        }
    }

    #[test]
    fn test_dictionary_encode_dedups() {
        let (dict, idx) = dictionary_encode(vec![Some(3), None, Some(3), Some(7)]);
        assert_eq!(dict, vec![Some(3), Some(7)]);
        assert_eq!(idx, vec![Some(0), None, Some(0), Some(1)]);
    }

    #[test]
    fn test_empty_dataset() {
        let schema = schema();
        let (_, decoded) = decode_all(encode(&schema, &[], EncodeOptions::default())).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_truncated_artifact_is_corrupt() {
        let schema = schema();
        let records = rows(&schema);
        let bytes = encode(&schema, &records, EncodeOptions::default());
        let text = String::from_utf8(bytes).unwrap();
        let without_footer: String = text.lines().take(2).map(|l| format!("{}\n", l)).collect();
        assert!(matches!(
            decode_all(without_footer.into_bytes()),
            Err(CompatError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_tampered_row_group_fails_checksum() {
        let schema = schema();
        let records = rows(&schema);
        let text = String::from_utf8(encode(&schema, &records, EncodeOptions::default())).unwrap();
        assert!(text.contains("[1,2,3,4,5]"));
        let tampered = text.replacen("[1,2,3,4,5]", "[9,2,3,4,5]", 1);
        let err = decode_all(tampered.into_bytes()).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_bad_magic() {
        let bytes = br#"{"section":"footer","row_count":0,"row_groups":0,"checksum":"x"}"#.to_vec();
        assert!(matches!(
            RowGroupFormat.decode(Box::new(Cursor::new(bytes))),
            Err(CompatError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_variant_mapping() {
        assert_eq!(Encoding::from_variant("dict"), Encoding::Dictionary);
        assert_eq!(Encoding::from_variant("plain"), Encoding::Plain);
        assert_eq!(Encoding::from_variant("snappy"), Encoding::Plain);
    }
}
