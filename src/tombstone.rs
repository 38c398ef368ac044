//! Row deletion through per-partition tombstone bitmaps.
//!
//! Deletes only mark rows. `execute` later rewrites the surviving rows of a
//! partition into a new file; the old file is left for the caller to drop.

use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::reader::MicroPartitionReader;
use crate::writer::{MicroPartitionWriter, WriteSummary};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct TombstoneSet {
    bitmaps: HashMap<String, Bitmap>,
}

impl TombstoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `row` of `block_id` deleted. Returns false when it already was.
    pub fn mark_deleted(&mut self, block_id: &str, row: u64) -> Result<bool> {
        let row = row as usize;
        let bitmap = self.bitmaps.entry(block_id.to_string()).or_insert_with(|| {
            debug!(block = block_id, "Tombstone bitmap created");
            Bitmap::new()
        });
        if bitmap.test(row) {
            return Ok(false);
        }
        bitmap.set(row)?;
        Ok(true)
    }

    pub fn is_deleted(&self, block_id: &str, row: u64) -> bool {
        self.bitmaps
            .get(block_id)
            .is_some_and(|bitmap| bitmap.test(row as usize))
    }

    pub fn deleted_count(&self, block_id: &str) -> usize {
        self.bitmaps.get(block_id).map_or(0, Bitmap::count_ones)
    }

    /// Partitions with pending deletes, in no particular order.
    pub fn block_ids(&self) -> impl Iterator<Item = &str> {
        self.bitmaps.keys().map(String::as_str)
    }

    pub fn take(&mut self, block_id: &str) -> Option<Bitmap> {
        self.bitmaps.remove(block_id)
    }

    /// Consumes the tombstones of `block_id` and copies every row of
    /// `reader` not marked deleted into a writer obtained from
    /// `open_writer`. The writer is only opened once a row survives; `None`
    /// means the whole partition was deleted.
    pub fn execute<F>(
        &mut self,
        block_id: &str,
        reader: &mut MicroPartitionReader,
        open_writer: F,
    ) -> Result<Option<WriteSummary>>
    where
        F: FnOnce() -> Result<MicroPartitionWriter>,
    {
        if reader.projection().is_some() {
            return Err(Error::Logic(format!(
                "rewriting {} needs every column, the reader is projected",
                block_id
            )));
        }
        let deleted = self
            .take(block_id)
            .ok_or_else(|| Error::Logic(format!("no tombstones recorded for {}", block_id)))?;

        let mut open_writer = Some(open_writer);
        let mut writer: Option<MicroPartitionWriter> = None;
        let mut survived = 0u64;
        for index in 0..reader.group_count() {
            let group = reader.read_group(index)?;
            for row in 0..group.rows() {
                if deleted.test(group.row_offset() as usize + row) {
                    continue;
                }
                let tuple = group.get_tuple(row)?;
                if let Some(open) = open_writer.take() {
                    writer = Some(open()?);
                }
                if let Some(target) = writer.as_mut() {
                    target.write_tuple(&tuple)?;
                }
                survived += 1;
            }
        }

        info!(
            block = block_id,
            deleted = reader.total_rows() - survived,
            survived,
            "Tombstones applied"
        );
        let Some(mut writer) = writer else {
            return Ok(None);
        };
        writer.close()?;
        Ok(writer.summary().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::fs::{FileSystem, MemoryFileSystem};
    use crate::reader::ReaderOptions;
    use crate::types::{ColumnDesc, ColumnType, Datum, Schema};
    use crate::writer::WriterOptions;
    use std::sync::Arc;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDesc::new("k", ColumnType::Int64),
            ColumnDesc::new("v", ColumnType::Bytes),
        ])
    }

    fn source(fs: &MemoryFileSystem, rows: i64) {
        let options = WriterOptions::new("src", schema()).with_group_limit(4);
        let mut writer = MicroPartitionWriter::open(Arc::new(fs.clone()), options).unwrap();
        for i in 0..rows {
            writer
                .write_tuple(&[Datum::Int64(i), Datum::Bytes(vec![b'a' + i as u8])])
                .unwrap();
        }
        writer.close().unwrap();
    }

    fn target(fs: &MemoryFileSystem) -> impl FnOnce() -> Result<MicroPartitionWriter> {
        let fs = fs.clone();
        move || MicroPartitionWriter::open(Arc::new(fs), WriterOptions::new("dst", schema()))
    }

    #[test]
    fn test_marking() {
        let mut set = TombstoneSet::new();
        assert!(!set.is_deleted("b", 3));
        assert!(set.mark_deleted("b", 3).unwrap());
        assert!(!set.mark_deleted("b", 3).unwrap());
        assert!(set.mark_deleted("b", 100).unwrap());
        assert!(set.is_deleted("b", 3));
        assert!(!set.is_deleted("b", 4));
        assert!(!set.is_deleted("c", 3));
        assert_eq!(set.deleted_count("b"), 2);
        assert_eq!(set.block_ids().collect::<Vec<_>>(), vec!["b"]);

        let bitmap = set.take("b").unwrap();
        assert!(bitmap.test(100));
        assert_eq!(set.deleted_count("b"), 0);
        assert!(set.take("b").is_none());
    }

    #[test]
    fn test_execute_keeps_survivors() {
        let fs = MemoryFileSystem::new();
        source(&fs, 10);
        let mut set = TombstoneSet::new();
        for row in [0, 4, 5, 9] {
            set.mark_deleted("src", row).unwrap();
        }
        let mut reader = MicroPartitionReader::open(&fs, "src", ReaderOptions::default()).unwrap();
        let summary = set.execute("src", &mut reader, target(&fs)).unwrap().unwrap();
        assert_eq!(summary.num_tuples, 6);
        assert_eq!(summary.file_name, "dst");
        assert_eq!(set.deleted_count("src"), 0);

        let mut rewritten = MicroPartitionReader::open(&fs, "dst", ReaderOptions::default()).unwrap();
        let keys: Vec<Datum> = (0..6).map(|i| rewritten.get_tuple(i).unwrap()[0].clone()).collect();
        let expected: Vec<Datum> = [1, 2, 3, 6, 7, 8].into_iter().map(Datum::Int64).collect();
        assert_eq!(keys, expected);
        assert_eq!(rewritten.get_tuple(3).unwrap()[1], Datum::Bytes(b"g".to_vec()));
    }

    #[test]
    fn test_execute_everything_deleted() {
        let fs = MemoryFileSystem::new();
        source(&fs, 3);
        let mut set = TombstoneSet::new();
        for row in 0..3 {
            set.mark_deleted("src", row).unwrap();
        }
        let mut reader = MicroPartitionReader::open(&fs, "src", ReaderOptions::default()).unwrap();
        assert!(set.execute("src", &mut reader, target(&fs)).unwrap().is_none());
        assert!(!fs.exists("dst"));
    }

    #[test]
    fn test_execute_requires_tombstones_and_full_reader() {
        let fs = MemoryFileSystem::new();
        source(&fs, 3);
        let mut set = TombstoneSet::new();
        let mut reader = MicroPartitionReader::open(&fs, "src", ReaderOptions::default()).unwrap();
        assert!(matches!(
            set.execute("src", &mut reader, target(&fs)),
            Err(Error::Logic(_))
        ));

        set.mark_deleted("src", 1).unwrap();
        let mut filter = Filter::default();
        filter.set_column_projection(vec![true, false]);
        let mut projected =
            MicroPartitionReader::open(&fs, "src", ReaderOptions::default().with_filter(filter)).unwrap();
        assert!(set.execute("src", &mut projected, target(&fs)).is_err());
        assert_eq!(set.deleted_count("src"), 1);
    }
}
