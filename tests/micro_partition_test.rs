mod common;

use common::{mixed_schema, mixed_tuple, read_all, write_mixed, write_rows};
use lightning_columnar::format::StreamKind;
use lightning_columnar::{
    ColumnDesc, ColumnType, Datum, EncodingOption, Error, FileSystem, Filter, LocalFileSystem,
    MemoryFileSystem, MicroPartitionReader, ReaderOptions, Schema, StorageFormat, WriterOptions,
};
use rand::Rng;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_rows_split_at_group_limit() {
    let fs = MemoryFileSystem::new();
    let rows = 16_385;
    let summary = write_mixed(Arc::new(fs.clone()), "p", StorageFormat::RowMajor, rows, 16_384);
    assert_eq!(summary.num_tuples, rows as u64);

    let mut reader = MicroPartitionReader::open(&fs, "p", ReaderOptions::default()).unwrap();
    assert_eq!(reader.group_count(), 2);
    assert_eq!(reader.group_rows(0).unwrap(), 16_384);
    assert_eq!(reader.group_rows(1).unwrap(), 1);
    assert_eq!(reader.group_offset(1).unwrap(), 16_384);

    let all = read_all(&mut reader);
    assert_eq!(all.len(), rows);
    for (i, row) in all.iter().enumerate() {
        assert_eq!(row, &mixed_tuple(i), "row {}", i);
    }

    let first = &reader.footer().stripes[0].col_stats;
    assert!(first.iter().all(|c| c.has_null && !c.all_null));
    // row 16384 is not a multiple of five
    let second = &reader.footer().stripes[1].col_stats;
    assert!(second.iter().all(|c| !c.has_null && !c.all_null));

    let stats = summary.statistics().unwrap();
    assert_eq!(stats.column_stats.len(), 7);
    assert!(stats.column_stats[0].has_null);
}

#[test]
fn test_columnar_round_trip_with_random_access() {
    let fs = MemoryFileSystem::new();
    write_mixed(Arc::new(fs.clone()), "c", StorageFormat::Columnar, 1000, 300);
    let mut reader = MicroPartitionReader::open(&fs, "c", ReaderOptions::default()).unwrap();
    assert_eq!(reader.storage_format(), StorageFormat::Columnar);
    assert_eq!(reader.group_count(), 4);

    let mut rng = rand::rng();
    for _ in 0..200 {
        let row = rng.random_range(0..1000);
        assert_eq!(reader.get_tuple(row as u64).unwrap(), mixed_tuple(row));
    }
    assert!(matches!(reader.get_tuple(1000), Err(Error::OutOfRange(_))));
}

#[test]
fn test_local_file_system() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFileSystem::with_root(dir.path());
    let summary = write_mixed(Arc::new(fs.clone()), "local.pax", StorageFormat::RowMajor, 50, 16);
    assert!(fs.exists("local.pax"));
    let on_disk = std::fs::metadata(dir.path().join("local.pax")).unwrap().len();
    assert_eq!(on_disk, summary.file_size);

    let mut reader = MicroPartitionReader::open(&fs, "local.pax", ReaderOptions::default()).unwrap();
    assert_eq!(read_all(&mut reader), (0..50).map(mixed_tuple).collect::<Vec<_>>());
}

#[test]
fn test_projection_matches_full_read() {
    for format in [StorageFormat::RowMajor, StorageFormat::Columnar] {
        let fs = MemoryFileSystem::new();
        write_mixed(Arc::new(fs.clone()), "p", format, 200, 64);
        let mut full = MicroPartitionReader::open(&fs, "p", ReaderOptions::default()).unwrap();
        let expected = read_all(&mut full);

        for mask in [0b0000001u32, 0b1000000, 0b0101010, 0b1110001, 0b0011100] {
            let projection: Vec<bool> = (0..7).map(|i| mask & (1 << i) != 0).collect();
            let mut filter = Filter::default();
            filter.set_column_projection(projection.clone());
            let mut reader =
                MicroPartitionReader::open(&fs, "p", ReaderOptions::default().with_filter(filter)).unwrap();
            let projected = read_all(&mut reader);
            assert_eq!(projected.len(), expected.len());
            for (got, want) in projected.iter().zip(&expected) {
                for (i, wanted) in projection.iter().enumerate() {
                    if *wanted {
                        assert_eq!(got[i], want[i], "{:?} mask {:b} column {}", format, mask, i);
                    } else {
                        assert_eq!(got[i], Datum::Null);
                    }
                }
            }
        }
    }
}

fn toast_values() -> Vec<Vec<u8>> {
    let mut rng = rand::rng();
    let noise: Vec<u8> = (0..20_000).map(|_| rng.random()).collect();
    vec![
        b"short".to_vec(),
        vec![b'a'; 3_000],
        noise,
        b"tail".to_vec(),
        "x".repeat(12_000).into_bytes(),
    ]
}

#[test]
fn test_large_values_are_toasted() {
    let values = toast_values();
    let schema = Schema::new(vec![
        ColumnDesc::new("k", ColumnType::Int32),
        ColumnDesc::new("doc", ColumnType::Bytes),
    ]);
    for format in [StorageFormat::RowMajor, StorageFormat::Columnar] {
        for encoding in [EncodingOption::default(), EncodingOption::no_encoded()] {
            let fs = MemoryFileSystem::new();
            let options = WriterOptions::new("t", schema.clone())
                .with_storage_format(format)
                .with_encoding(encoding);
            let rows = values.iter().enumerate().flat_map(|(i, v)| {
                [
                    vec![Datum::Int32(i as i32), Datum::Bytes(v.clone())],
                    vec![Datum::Int32(-1), Datum::Null],
                ]
            });
            write_rows(Arc::new(fs.clone()), options, rows);

            let mut reader = MicroPartitionReader::open(&fs, "t", ReaderOptions::default()).unwrap();
            let all = read_all(&mut reader);
            assert_eq!(all.len(), values.len() * 2);
            for (i, value) in values.iter().enumerate() {
                assert_eq!(all[i * 2][1], Datum::Bytes(value.clone()), "{:?} value {}", format, i);
                assert_eq!(all[i * 2 + 1][1], Datum::Null);
            }
        }
    }
}

#[test]
fn test_toast_stream_recorded_in_stripe_footer() {
    use lightning_columnar::format::StripeFooter;
    use prost::Message;

    let schema = Schema::new(vec![ColumnDesc::new("doc", ColumnType::Bytes)]);
    let fs = MemoryFileSystem::new();
    let options = WriterOptions::new("t", schema).with_encoding(EncodingOption::no_encoded());
    write_rows(
        Arc::new(fs.clone()),
        options,
        vec![vec![Datum::Bytes(vec![b'z'; 5_000])], vec![Datum::Bytes(b"ok".to_vec())]],
    );

    let reader = MicroPartitionReader::open(&fs, "t", ReaderOptions::default()).unwrap();
    let stripe = reader.footer().stripes[0].clone();
    let raw = fs.contents("t").unwrap();
    let start = (stripe.offset + stripe.data_length) as usize;
    let end = (stripe.offset + stripe.footer_length) as usize;
    let footer = StripeFooter::decode(&raw[start..end]).unwrap();
    let kinds: Vec<i32> = footer.streams.iter().map(|s| s.kind).collect();
    assert!(kinds.contains(&(StreamKind::Toast as i32)));
    assert_eq!(kinds.last(), Some(&(StreamKind::Data as i32)));
    let covered: u64 = footer.streams.iter().map(|s| s.length).sum();
    assert_eq!(covered, stripe.data_length);
}

#[test]
fn test_trailing_columns_read_as_null() {
    let fs = MemoryFileSystem::new();
    write_mixed(Arc::new(fs.clone()), "old", StorageFormat::RowMajor, 10, 100);

    let mut schema = mixed_schema();
    schema.push(ColumnDesc::new("added", ColumnType::Float32));
    let mut reader =
        MicroPartitionReader::open(&fs, "old", ReaderOptions::default().with_schema(schema)).unwrap();
    for (i, row) in read_all(&mut reader).into_iter().enumerate() {
        assert_eq!(row.len(), 8);
        assert_eq!(row[..7], mixed_tuple(i)[..]);
        assert_eq!(row[7], Datum::Null);
    }
}

#[test]
fn test_dropped_column_stays_null() {
    let schema = Schema::new(vec![
        ColumnDesc::new("a", ColumnType::Int64),
        ColumnDesc::new("gone", ColumnType::Bytes).dropped(),
        ColumnDesc::new("b", ColumnType::Int64),
    ]);
    let fs = MemoryFileSystem::new();
    let rows = (0..20).map(|i| vec![Datum::Int64(i), Datum::Null, Datum::Int64(-i)]);
    write_rows(Arc::new(fs.clone()), WriterOptions::new("d", schema.clone()), rows);

    let mut reader =
        MicroPartitionReader::open(&fs, "d", ReaderOptions::default().with_schema(schema)).unwrap();
    let all = read_all(&mut reader);
    assert_eq!(all[7], vec![Datum::Int64(7), Datum::Null, Datum::Int64(-7)]);
    assert!(reader.footer().stripes[0].col_stats[1].all_null);
}

#[test]
fn test_empty_partition() {
    let fs = MemoryFileSystem::new();
    let summary = write_mixed(Arc::new(fs.clone()), "empty", StorageFormat::Columnar, 0, 10);
    assert_eq!(summary.num_tuples, 0);
    let mut reader = MicroPartitionReader::open(&fs, "empty", ReaderOptions::default()).unwrap();
    assert_eq!(reader.group_count(), 0);
    assert_eq!(reader.total_rows(), 0);
    assert!(reader.next_group().unwrap().is_none());
    assert!(reader.get_tuple(0).is_err());
}
