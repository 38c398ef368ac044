mod common;

use common::{mixed_schema, mixed_tuple, read_all, write_mixed};
use lightning_columnar::{
    ColumnarConfig, FileSystem, LocalFileSystem, MergePolicy, MicroPartitionReader,
    MicroPartitionWriter, PartitionedWriter, ReaderOptions, StorageFormat, TombstoneSet,
    WriterOptions,
};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_delete_then_rewrite() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFileSystem::with_root(dir.path());
    write_mixed(Arc::new(fs.clone()), "blk-1", StorageFormat::Columnar, 120, 50);

    let mut tombstones = TombstoneSet::new();
    let deleted: Vec<u64> = (0..120).filter(|r| r % 7 == 3).collect();
    for row in &deleted {
        assert!(tombstones.mark_deleted("blk-1", *row).unwrap());
    }
    assert_eq!(tombstones.deleted_count("blk-1"), deleted.len());

    let mut reader = MicroPartitionReader::open(&fs, "blk-1", ReaderOptions::default()).unwrap();
    let target = fs.clone();
    let summary = tombstones
        .execute("blk-1", &mut reader, move || {
            let options = WriterOptions::new("blk-2", mixed_schema())
                .with_storage_format(StorageFormat::Columnar)
                .with_group_limit(50);
            MicroPartitionWriter::open(Arc::new(target), options)
        })
        .unwrap()
        .unwrap();
    assert_eq!(summary.num_tuples, (120 - deleted.len()) as u64);
    assert!(fs.exists("blk-1"));

    let expected: Vec<_> = (0..120usize)
        .filter(|r| !deleted.contains(&(*r as u64)))
        .map(mixed_tuple)
        .collect();
    let mut rewritten = MicroPartitionReader::open(&fs, "blk-2", ReaderOptions::default()).unwrap();
    assert_eq!(read_all(&mut rewritten), expected);
}

#[test]
fn test_partitioned_writes_merge_on_close() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFileSystem::with_root(dir.path());
    let config = ColumnarConfig {
        split_threshold: 100,
        group_limit: 32,
        ..Default::default()
    };

    let factory_fs = fs.clone();
    let factory_config = config.clone();
    let mut writer = PartitionedWriter::new(
        MergePolicy::from_config(&config),
        move |partition| {
            let options =
                WriterOptions::from_config(&factory_config, format!("part-{}", partition), mixed_schema());
            MicroPartitionWriter::open(Arc::new(factory_fs.clone()), options)
        },
        |a, b| b == a + 1,
    );

    // partitions 0..=2 hold 40 rows each, 5 is far away
    let mut next = 0usize;
    for partition in [0usize, 1, 2, 5] {
        for _ in 0..40 {
            writer.write_tuple(partition, &mixed_tuple(next)).unwrap();
            next += 1;
        }
    }

    let summaries = writer.close().unwrap();
    let layout: Vec<(String, u64)> = summaries
        .iter()
        .map(|s| (s.file_name.clone(), s.num_tuples))
        .collect();
    assert_eq!(
        layout,
        vec![
            ("part-0".to_string(), 80),
            ("part-2".to_string(), 40),
            ("part-5".to_string(), 40),
        ]
    );
    assert!(!fs.exists("part-1"));

    let mut merged = MicroPartitionReader::open(&fs, "part-0", ReaderOptions::default()).unwrap();
    assert_eq!(read_all(&mut merged), (0..80).map(mixed_tuple).collect::<Vec<_>>());
    let stats = summaries[0].statistics().unwrap();
    assert!(stats.column_stats.iter().all(|c| c.has_null && !c.all_null));
}
