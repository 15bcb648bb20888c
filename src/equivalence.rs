//! Row-sequence equivalence
//!
//! [`compare_ordered`] walks two row streams in lockstep and stops at the
//! first divergence. [`compare_unordered`] first sorts both streams with an
//! [`ExternalSorter`], which spills memory-bounded sorted runs to a scoped
//! scratch directory and k-way merges them, so input size is bounded by disk
//! rather than RAM.
//!
//! Run files hold length-prefixed records (`u64` little-endian byte length,
//! then the UTF-8 bytes), so rows containing line breaks survive a spill.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use tempfile::TempDir;
use tracing::debug;

use crate::error::{CompatError, Result};
use crate::ordering::{lexicographic, Comparator};

/// Default number of rows held in memory per sorted run
pub const DEFAULT_MAX_ROWS_IN_MEMORY: usize = 100_000;

/// Most runs merged at once; more runs are merged in several passes.
const MAX_FAN_IN: usize = 64;

/// The first row where two sequences differ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMismatch {
    /// Zero-based row index
    pub row_index: u64,
    pub expected: String,
    pub actual: String,
}

impl RowMismatch {
    /// Character diff, `[-removed-]` and `{+added+}` around changed runs.
    pub fn diff(&self) -> String {
        let diff = TextDiff::from_chars(self.expected.as_str(), self.actual.as_str());
        let mut out = String::new();
        let mut open: Option<ChangeTag> = None;
        for change in diff.iter_all_changes() {
            let tag = change.tag();
            if open != Some(tag) {
                close_run(&mut out, open);
                match tag {
                    ChangeTag::Delete => out.push_str("[-"),
                    ChangeTag::Insert => out.push_str("{+"),
                    ChangeTag::Equal => {}
                }
                open = Some(tag);
            }
            out.push_str(change.value());
        }
        close_run(&mut out, open);
        out
    }
}

fn close_run(out: &mut String, tag: Option<ChangeTag>) {
    match tag {
        Some(ChangeTag::Delete) => out.push_str("-]"),
        Some(ChangeTag::Insert) => out.push_str("+}"),
        _ => {}
    }
}

/// The two sequences have different lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountMismatch {
    pub expected_count: u64,
    pub actual_count: u64,
}

/// Outcome of one comparison
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub matched_rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_mismatch: Option<RowMismatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count_mismatch: Option<RowCountMismatch>,
}

impl ComparisonResult {
    pub fn is_match(&self) -> bool {
        self.first_mismatch.is_none() && self.row_count_mismatch.is_none()
    }

    /// One-line description for reports
    pub fn summary(&self) -> String {
        if let Some(m) = &self.first_mismatch {
            format!("row {} differs: {}", m.row_index, m.diff())
        } else if let Some(c) = &self.row_count_mismatch {
            format!(
                "row count differs: expected {}, actual {}",
                c.expected_count, c.actual_count
            )
        } else {
            format!("{} rows match", self.matched_rows)
        }
    }
}

/// Wrap infallible rows for the comparison functions.
pub fn ok_rows<I, S>(rows: I) -> impl Iterator<Item = Result<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    rows.into_iter().map(|row| Ok(row.into()))
}

/// Lazily read the lines of a text artifact.
pub fn file_rows(path: &Path) -> Result<impl Iterator<Item = Result<String>>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(reader.lines().map(|line| line.map_err(Into::into)))
}

fn count_rest<I: Iterator<Item = Result<String>>>(rows: I) -> Result<u64> {
    let mut count = 0;
    for row in rows {
        row?;
        count += 1;
    }
    Ok(count)
}

/// Compare two sequences row by row, stopping at the first difference.
pub fn compare_ordered<E, A>(expected: E, actual: A) -> Result<ComparisonResult>
where
    E: IntoIterator<Item = Result<String>>,
    A: IntoIterator<Item = Result<String>>,
{
    let mut expected = expected.into_iter();
    let mut actual = actual.into_iter();
    let mut matched_rows = 0u64;

    loop {
        let e = expected.next().transpose()?;
        let a = actual.next().transpose()?;
        match (e, a) {
            (Some(e), Some(a)) => {
                if e != a {
                    return Ok(ComparisonResult {
                        matched_rows,
                        first_mismatch: Some(RowMismatch {
                            row_index: matched_rows,
                            expected: e,
                            actual: a,
                        }),
                        row_count_mismatch: None,
                    });
                }
                matched_rows += 1;
            }
            (None, None) => {
                return Ok(ComparisonResult {
                    matched_rows,
                    ..Default::default()
                });
            }
            (Some(_), None) => {
                let expected_count = matched_rows + 1 + count_rest(expected)?;
                return Ok(ComparisonResult {
                    matched_rows,
                    first_mismatch: None,
                    row_count_mismatch: Some(RowCountMismatch {
                        expected_count,
                        actual_count: matched_rows,
                    }),
                });
            }
            (None, Some(_)) => {
                let actual_count = matched_rows + 1 + count_rest(actual)?;
                return Ok(ComparisonResult {
                    matched_rows,
                    first_mismatch: None,
                    row_count_mismatch: Some(RowCountMismatch {
                        expected_count: matched_rows,
                        actual_count,
                    }),
                });
            }
        }
    }
}

/// Compare two sequences as multisets by sorting both first.
pub fn compare_unordered<E, A>(expected: E, actual: A, sorter: &ExternalSorter) -> Result<ComparisonResult>
where
    E: IntoIterator<Item = Result<String>>,
    A: IntoIterator<Item = Result<String>>,
{
    let expected = sorter.sort(expected)?;
    let actual = sorter.sort(actual)?;
    compare_ordered(expected, actual)
}

/// External sort settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfig {
    /// Rows buffered before a sorted run is spilled to disk
    pub max_rows_in_memory: usize,
    /// Parent directory for scratch files; the system temp dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            max_rows_in_memory: DEFAULT_MAX_ROWS_IN_MEMORY,
            scratch_dir: None,
        }
    }
}

/// Disk-backed merge sort over text rows.
#[derive(Debug, Clone, Default)]
pub struct ExternalSorter {
    config: SortConfig,
}

impl ExternalSorter {
    pub fn new(config: SortConfig) -> Self {
        Self { config }
    }

    fn scratch(&self) -> Result<TempDir> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("compat-sort-");
            b
        };
        let dir = match &self.config.scratch_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Sort `rows` ascending by byte-wise string order.
    ///
    /// Inputs that fit in one run never touch disk. Scratch files live in a
    /// temporary directory owned by the returned iterator and are removed
    /// when it is dropped, including on error.
    pub fn sort<I>(&self, rows: I) -> Result<SortedRows>
    where
        I: IntoIterator<Item = Result<String>>,
    {
        let limit = self.config.max_rows_in_memory.max(1);
        let mut buffer: Vec<String> = Vec::new();
        let mut scratch: Option<TempDir> = None;
        let mut runs: Vec<PathBuf> = Vec::new();

        for row in rows {
            buffer.push(row?);
            if buffer.len() >= limit {
                if scratch.is_none() {
                    scratch = Some(self.scratch()?);
                }
                if let Some(dir) = &scratch {
                    runs.push(spill(dir.path(), runs.len(), &mut buffer)?);
                }
            }
        }

        let Some(dir) = scratch else {
            buffer.sort_unstable();
            return Ok(SortedRows {
                inner: SortedInner::Memory(buffer.into_iter()),
            });
        };
        if !buffer.is_empty() {
            runs.push(spill(dir.path(), runs.len(), &mut buffer)?);
        }

        let mut next_id = runs.len();
        while runs.len() > MAX_FAN_IN {
            debug!(runs = runs.len(), "intermediate merge pass");
            let mut merged = Vec::with_capacity(runs.len() / MAX_FAN_IN + 1);
            for group in runs.chunks(MAX_FAN_IN) {
                let path = dir.path().join(format!("run-{}", next_id));
                next_id += 1;
                let mut out = BufWriter::new(File::create(&path)?);
                let mut merge = MergeRuns::open(group)?;
                while let Some(line) = merge.next_line()? {
                    write_record(&mut out, &line)?;
                }
                out.flush()?;
                for run in group {
                    std::fs::remove_file(run)?;
                }
                merged.push(path);
            }
            runs = merged;
        }

        debug!(runs = runs.len(), "final merge");
        let merge = MergeRuns::open(&runs)?;
        Ok(SortedRows {
            inner: SortedInner::Merge { merge, _scratch: dir },
        })
    }
}

fn spill(dir: &Path, id: usize, buffer: &mut Vec<String>) -> Result<PathBuf> {
    buffer.sort_unstable();
    let path = dir.join(format!("run-{}", id));
    let mut out = BufWriter::new(File::create(&path)?);
    for line in buffer.drain(..) {
        write_record(&mut out, &line)?;
    }
    out.flush()?;
    debug!(run = id, path = %path.display(), "spilled sorted run");
    Ok(path)
}

fn write_record(out: &mut impl Write, row: &str) -> Result<()> {
    out.write_all(&(row.len() as u64).to_le_bytes())?;
    out.write_all(row.as_bytes())?;
    Ok(())
}

/// Reads back the records written by [`write_record`].
struct RunReader {
    reader: BufReader<File>,
}

impl RunReader {
    fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    fn next_record(&mut self) -> Result<Option<String>> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let mut len = [0u8; 8];
        self.reader.read_exact(&mut len).map_err(truncated)?;
        let len = usize::try_from(u64::from_le_bytes(len))
            .map_err(|_| CompatError::corrupt("sort run record length overflows usize"))?;
        let mut bytes = vec![0u8; len];
        self.reader.read_exact(&mut bytes).map_err(truncated)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| CompatError::corrupt(format!("sort run record is not UTF-8: {}", e)))
    }
}

fn truncated(e: io::Error) -> CompatError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CompatError::corrupt("sort run ends inside a record")
    } else {
        e.into()
    }
}

/// Head line of one sorted run.
struct HeapEntry {
    line: String,
    source: usize,
}

const HEAP_KEYS: [Comparator<HeapEntry>; 2] = [
    // BinaryHeap is a max-heap; reverse both keys to pop the smallest line,
    // lower run index first on ties.
    |a, b| b.line.cmp(&a.line),
    |a, b| b.source.cmp(&a.source),
];

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        lexicographic(self, other, &HEAP_KEYS)
    }
}

/// K-way merge over sorted run files.
struct MergeRuns {
    readers: Vec<RunReader>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeRuns {
    fn open(runs: &[PathBuf]) -> Result<Self> {
        let mut readers = Vec::with_capacity(runs.len());
        let mut heap = BinaryHeap::with_capacity(runs.len());
        for (source, path) in runs.iter().enumerate() {
            let mut reader = RunReader::open(path)?;
            if let Some(line) = reader.next_record()? {
                heap.push(HeapEntry { line, source });
            }
            readers.push(reader);
        }
        Ok(Self { readers, heap })
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(line) = self.readers[top.source].next_record()? {
            self.heap.push(HeapEntry {
                line,
                source: top.source,
            });
        }
        Ok(Some(top.line))
    }
}

enum SortedInner {
    Memory(std::vec::IntoIter<String>),
    Merge {
        merge: MergeRuns,
        // Dropped last; removes every run file.
        _scratch: TempDir,
    },
}

/// Sorted row stream produced by [`ExternalSorter::sort`].
pub struct SortedRows {
    inner: SortedInner,
}

impl SortedRows {
    /// Scratch directory backing this stream, if the input spilled
    pub fn scratch_path(&self) -> Option<&Path> {
        match &self.inner {
            SortedInner::Memory(_) => None,
            SortedInner::Merge { _scratch, .. } => Some(_scratch.path()),
        }
    }
}

impl Iterator for SortedRows {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            SortedInner::Memory(rows) => rows.next().map(Ok),
            SortedInner::Merge { merge, .. } => merge.next_line().transpose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_sorter(rows: usize) -> ExternalSorter {
        ExternalSorter::new(SortConfig {
            max_rows_in_memory: rows,
            scratch_dir: None,
        })
    }

    #[test]
    fn test_ordered_match() {
        let result = compare_ordered(ok_rows(["a", "b"]), ok_rows(["a", "b"])).unwrap();
        assert!(result.is_match());
        assert_eq!(result.matched_rows, 2);
    }

    #[test]
    fn test_ordered_first_mismatch_only() {
        let result = compare_ordered(ok_rows(["a", "b", "c"]), ok_rows(["a", "x", "y"])).unwrap();
        let mismatch = result.first_mismatch.unwrap();
        assert_eq!(mismatch.row_index, 1);
        assert_eq!(mismatch.expected, "b");
        assert_eq!(mismatch.actual, "x");
        assert_eq!(result.matched_rows, 1);
    }

    #[test]
    fn test_ordered_row_count_mismatch_counts_both_sides() {
        let result = compare_ordered(ok_rows(["a"]), ok_rows(["a", "b", "c"])).unwrap();
        assert_eq!(
            result.row_count_mismatch,
            Some(RowCountMismatch {
                expected_count: 1,
                actual_count: 3
            })
        );

        let result = compare_ordered(ok_rows(["a", "b"]), ok_rows(Vec::<String>::new())).unwrap();
        assert_eq!(
            result.row_count_mismatch,
            Some(RowCountMismatch {
                expected_count: 2,
                actual_count: 0
            })
        );
    }

    #[test]
    fn test_unordered_is_multiset_equality() {
        let sorter = ExternalSorter::default();
        let result = compare_unordered(ok_rows(["a", "b", "c"]), ok_rows(["c", "a", "b"]), &sorter).unwrap();
        assert!(result.is_match());

        let result = compare_unordered(ok_rows(["a", "b"]), ok_rows(["a", "b", "b"]), &sorter).unwrap();
        assert!(result.row_count_mismatch.is_some());
    }

    #[test]
    fn test_external_sort_spills_and_merges() {
        let sorter = small_sorter(3);
        let input: Vec<String> = (0..50).rev().map(|i| format!("row-{:03}", i)).collect();
        let sorted = sorter.sort(ok_rows(input.clone())).unwrap();
        let scratch = sorted.scratch_path().map(Path::to_path_buf).unwrap();
        assert!(scratch.exists());

        let out: Vec<String> = sorted.collect::<Result<_>>().unwrap();
        let mut expected = input;
        expected.sort();
        assert_eq!(out, expected);
        assert!(!scratch.exists(), "scratch removed once the stream is dropped");
    }

    #[test]
    fn test_multi_pass_merge_keeps_duplicates() {
        // 2 rows per run and 300 rows: more runs than the merge fan-in.
        let sorter = small_sorter(2);
        let input: Vec<String> = (0..300).map(|i| format!("{}", (i * 7) % 100)).collect();
        let out: Vec<String> = sorter.sort(ok_rows(input.clone())).unwrap().collect::<Result<_>>().unwrap();
        let mut expected = input;
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_spilled_row_count_mismatch() {
        let sorter = small_sorter(1);
        let result = compare_unordered(ok_rows(["a", "b"]), ok_rows(["b", "a", "b"]), &sorter).unwrap();
        assert_eq!(
            result.row_count_mismatch,
            Some(RowCountMismatch {
                expected_count: 2,
                actual_count: 3
            })
        );
        assert!(!result.is_match());
    }

    #[test]
    fn test_spilled_rows_keep_line_breaks() {
        let input = ["b\r", "x\ny", "", "a\r\n", "\n", "z"];
        let mut expected: Vec<String> = input.iter().map(|s| s.to_string()).collect();
        expected.sort();

        for limit in [1, 2, 100] {
            let out: Vec<String> = small_sorter(limit)
                .sort(ok_rows(input))
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            assert_eq!(out, expected, "max_rows_in_memory = {}", limit);
        }
    }

    #[test]
    fn test_embedded_newline_is_one_row() {
        for limit in [1, 2, 100] {
            let sorter = small_sorter(limit);
            let result = compare_unordered(ok_rows(["x\ny", "z"]), ok_rows(["x", "y", "z"]), &sorter).unwrap();
            assert!(!result.is_match(), "max_rows_in_memory = {}", limit);

            let result = compare_unordered(ok_rows(["a\r", "b"]), ok_rows(["b", "a"]), &sorter).unwrap();
            assert!(!result.is_match(), "max_rows_in_memory = {}", limit);
        }
    }

    #[test]
    fn test_truncated_run_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = vec!["alpha".to_string(), "beta".to_string()];
        let path = spill(dir.path(), 0, &mut buffer).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let mut reader = RunReader::open(&path).unwrap();
        assert_eq!(reader.next_record().unwrap().as_deref(), Some("alpha"));
        assert!(matches!(
            reader.next_record(),
            Err(CompatError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_scratch_removed_on_input_error() {
        let parent = tempfile::tempdir().unwrap();
        let sorter = ExternalSorter::new(SortConfig {
            max_rows_in_memory: 1,
            scratch_dir: Some(parent.path().to_path_buf()),
        });
        let rows: Vec<Result<String>> = vec![
            Ok("b".to_string()),
            Ok("a".to_string()),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom").into()),
        ];
        assert!(sorter.sort(rows).is_err());
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_mismatch_diff() {
        let mismatch = RowMismatch {
            row_index: 0,
            expected: "7|12|widget".to_string(),
            actual: "7|12.0|widget".to_string(),
        };
        assert_eq!(mismatch.diff(), "7|12{+.0+}|widget");
    }
}
