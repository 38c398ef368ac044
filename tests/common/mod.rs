#![allow(dead_code)]

use lightning_columnar::{
    ColumnDesc, ColumnType, Datum, Decimal128, FileSystem, MicroPartitionReader,
    MicroPartitionWriter, Schema, StorageFormat, WriteSummary, WriterOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// One column of every kind of physical layout.
pub fn mixed_schema() -> Schema {
    Schema::new(vec![
        ColumnDesc::new("id", ColumnType::Int32),
        ColumnDesc::new("flag", ColumnType::Bool),
        ColumnDesc::new("small", ColumnType::Int16),
        ColumnDesc::new("big", ColumnType::Int64),
        ColumnDesc::new("ratio", ColumnType::Float64),
        ColumnDesc::new("amount", ColumnType::Decimal { precision: 18, scale: 2 }),
        ColumnDesc::new("name", ColumnType::Bytes),
    ])
}

/// Row `i` of the mixed schema; every fifth row is entirely NULL.
pub fn mixed_tuple(i: usize) -> Vec<Datum> {
    if i % 5 == 0 {
        return vec![Datum::Null; 7];
    }
    vec![
        Datum::Int32(i as i32),
        Datum::Bool(i % 3 == 0),
        Datum::Int16((i % 1000) as i16 - 500),
        Datum::Int64(i as i64 * 1_000_003),
        Datum::Float64(i as f64 / 7.0),
        Datum::Decimal(Decimal128::new(i as i128 * 101, 2)),
        Datum::Bytes(format!("row-{:05}", i).into_bytes()),
    ]
}

/// Writes `rows` mixed tuples to `name` and returns the close summary.
pub fn write_mixed(
    fs: Arc<dyn FileSystem>,
    name: &str,
    format: StorageFormat,
    rows: usize,
    group_limit: usize,
) -> WriteSummary {
    let options = WriterOptions::new(name, mixed_schema())
        .with_storage_format(format)
        .with_group_limit(group_limit);
    write_rows(fs, options, (0..rows).map(mixed_tuple))
}

pub fn write_rows(
    fs: Arc<dyn FileSystem>,
    options: WriterOptions,
    rows: impl IntoIterator<Item = Vec<Datum>>,
) -> WriteSummary {
    let summary = Arc::new(Mutex::new(None));
    let sink = summary.clone();
    let mut writer = MicroPartitionWriter::open(fs, options).unwrap();
    writer.set_summary_callback(move |s| *sink.lock() = Some(s));
    for row in rows {
        writer.write_tuple(&row).unwrap();
    }
    writer.close().unwrap();
    let summary = summary.lock().take().unwrap();
    summary
}

/// Every row of the file, stripe by stripe.
pub fn read_all(reader: &mut MicroPartitionReader) -> Vec<Vec<Datum>> {
    let mut rows = Vec::new();
    for index in 0..reader.group_count() {
        let group = reader.read_group(index).unwrap();
        for row in 0..group.rows() {
            rows.push(group.get_tuple(row).unwrap());
        }
    }
    rows
}
