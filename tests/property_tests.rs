//! Property Tests
//!
//! Ordering laws for release identifiers and null/value preservation through
//! the text transcoder and the bundled columnar format.

use std::cmp::Ordering;
use std::io::Cursor;

use columnar_compat::equivalence::{compare_unordered, ok_rows, ExternalSorter, SortConfig};
use columnar_compat::{
    ColumnarFormat, CompatError, EncodeOptions, Encoding, PrimitiveKind, Record, RecordTranscoder, RowGroupFormat, Schema, Value,
    VersionId,
};
use proptest::prelude::*;

fn version_string() -> impl Strategy<Value = String> {
    let tag = prop::option::of(prop::sample::select(vec!["SNAPSHOT", "alpha", "alpha.1", "beta", "rc.1", "rc.2"]));
    (0u64..4, 0u64..4, 0u64..4, tag).prop_map(|(major, minor, patch, tag)| match tag {
        Some(tag) => format!("{}.{}.{}-{}", major, minor, patch, tag),
        None => format!("{}.{}.{}", major, minor, patch),
    })
}

/// Short rows over a small alphabet that includes line breaks.
fn awkward_row() -> impl Strategy<Value = String> {
    "[ab|\\r\\n]{0,4}"
}

fn rotate_reverse(rows: &[String], seed: u64) -> Vec<String> {
    let mut shuffled = rows.to_vec();
    if !shuffled.is_empty() {
        let k = (seed as usize) % shuffled.len();
        shuffled.rotate_left(k);
    }
    shuffled.reverse();
    shuffled
}

fn schema() -> Schema {
    Schema::from_fields(
        "row",
        &[
            ("id", PrimitiveKind::Int64),
            ("count", PrimitiveKind::Int32),
            ("flag", PrimitiveKind::Boolean),
            ("ratio", PrimitiveKind::Float),
            ("amount", PrimitiveKind::Double),
            ("label", PrimitiveKind::Binary),
        ],
    )
    .unwrap()
}

fn record() -> impl Strategy<Value = Record> {
    (
        prop::option::of(any::<i64>()),
        prop::option::of(any::<i32>()),
        prop::option::of(any::<bool>()),
        prop::option::of(-1.0e6f32..1.0e6),
        prop::option::of(-1.0e12f64..1.0e12),
        prop::option::of("[a-zA-Z0-9 ,.]{1,12}"),
    )
        .prop_map(|(id, count, flag, ratio, amount, label)| {
            Record::new(vec![
                id.map(Value::Int64),
                count.map(Value::Int32),
                flag.map(Value::Boolean),
                ratio.map(Value::Float),
                amount.map(Value::Double),
                label.map(|s| Value::Binary(s.into_bytes())),
            ])
        })
}

proptest! {
    #[test]
    fn compare_full_is_antisymmetric(a in version_string(), b in version_string()) {
        let a = VersionId::parse(&a).unwrap();
        let b = VersionId::parse(&b).unwrap();
        prop_assert_eq!(a.compare_full(&b), b.compare_full(&a).reverse());
        prop_assert_eq!(a.compare_full(&b) == Ordering::Equal, a == b);
    }

    #[test]
    fn compare_full_is_transitive(a in version_string(), b in version_string(), c in version_string()) {
        let a = VersionId::parse(&a).unwrap();
        let b = VersionId::parse(&b).unwrap();
        let c = VersionId::parse(&c).unwrap();
        if a.compare_full(&b).is_le() && b.compare_full(&c).is_le() {
            prop_assert!(a.compare_full(&c).is_le());
        }
        if a.compare_full(&b).is_lt() && b.compare_full(&c).is_lt() {
            prop_assert!(a.compare_full(&c).is_lt());
        }
    }

    #[test]
    fn major_minor_ignores_patch_and_tag(a in version_string(), b in version_string()) {
        let a = VersionId::parse(&a).unwrap();
        let b = VersionId::parse(&b).unwrap();
        let expected = (a.major(), a.minor()).cmp(&(b.major(), b.minor()));
        prop_assert_eq!(a.compare_major_minor(&b), expected);
    }

    #[test]
    fn display_parses_back(s in version_string()) {
        let v = VersionId::parse(&s).unwrap();
        prop_assert_eq!(VersionId::parse(&v.to_string()).unwrap(), v);
    }

    #[test]
    fn text_row_preserves_values_and_nulls(record in record()) {
        let schema = schema();
        let transcoder = RecordTranscoder::default();
        let line = transcoder.encode_row(&record, &schema).unwrap();
        let decoded = transcoder.decode_row(&line, &schema).unwrap();
        prop_assert_eq!(decoded, record);
    }

    #[test]
    fn columnar_round_trip_preserves_rows(
        records in prop::collection::vec(record(), 0..40),
        dictionary in any::<bool>(),
        group in 1usize..8,
    ) {
        let schema = schema();
        let format = RowGroupFormat::new();
        let options = EncodeOptions {
            encoding: if dictionary { Encoding::Dictionary } else { Encoding::Plain },
            row_group_size: group,
        };
        let mut blob = Vec::new();
        let mut rows = records.clone().into_iter().map(Ok::<Record, CompatError>);
        let written = format.encode(&schema, &mut rows, &options, &mut blob).unwrap();
        prop_assert_eq!(written, records.len() as u64);

        let decoded = format.decode(Box::new(Cursor::new(blob))).unwrap();
        prop_assert_eq!(&decoded.schema, &schema);
        let back: Vec<Record> = decoded.rows.collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(back, records);
    }

    #[test]
    fn unordered_comparison_ignores_permutation(
        rows in prop::collection::vec(awkward_row(), 0..30),
        seed in any::<u64>(),
        chunk in 1usize..5,
    ) {
        let shuffled = rotate_reverse(&rows, seed);
        let sorter = ExternalSorter::new(SortConfig { max_rows_in_memory: chunk, scratch_dir: None });
        let result = compare_unordered(ok_rows(rows), ok_rows(shuffled), &sorter).unwrap();
        prop_assert!(result.is_match());
    }

    #[test]
    fn unordered_comparison_rejects_changed_multiset(
        rows in prop::collection::vec(awkward_row(), 0..30),
        seed in any::<u64>(),
        chunk in 1usize..5,
        change in 0u8..3,
        extra in awkward_row(),
    ) {
        let mut changed = rotate_reverse(&rows, seed);
        match change {
            // Drop a row, or add one when there is nothing to drop
            0 if !changed.is_empty() => {
                changed.pop();
            }
            // Append a line break to one row
            1 if !changed.is_empty() => {
                let i = (seed as usize) % changed.len();
                changed[i].push('\n');
            }
            _ => changed.push(extra),
        }
        let sorter = ExternalSorter::new(SortConfig { max_rows_in_memory: chunk, scratch_dir: None });
        let result = compare_unordered(ok_rows(rows), ok_rows(changed), &sorter).unwrap();
        prop_assert!(!result.is_match());
    }
}
