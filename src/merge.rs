//! Folding small micro-partitions of neighbouring partitions together.

use crate::config::ColumnarConfig;
use crate::error::{Error, Result};
use crate::types::Datum;
use crate::writer::{MicroPartitionWriter, WriteSummary};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    /// Rows a merged micro-partition may hold.
    pub split_threshold: u64,
}

impl MergePolicy {
    pub fn new(split_threshold: u64) -> Self {
        Self { split_threshold }
    }

    pub fn from_config(config: &ColumnarConfig) -> Self {
        Self::new(config.split_threshold as u64)
    }

    /// Groups `(partition, rows)` pairs, given in ascending partition order,
    /// into runs to merge. A run grows while the next partition is adjacent
    /// to its last one and the run stays within the threshold. A partition
    /// larger than the threshold always stands alone.
    pub fn plan<A>(&self, partitions: &[(usize, u64)], adjacent: A) -> Vec<Vec<usize>>
    where
        A: Fn(usize, usize) -> bool,
    {
        let mut runs = Vec::new();
        let mut run: Vec<usize> = Vec::new();
        let mut total = 0u64;
        for &(index, rows) in partitions {
            if let Some(&last) = run.last() {
                if adjacent(last, index) && total.saturating_add(rows) <= self.split_threshold {
                    run.push(index);
                    total += rows;
                    continue;
                }
                runs.push(std::mem::take(&mut run));
            }
            run.push(index);
            total = rows;
        }
        if !run.is_empty() {
            runs.push(run);
        }
        runs
    }
}

pub type WriterFactory = Box<dyn FnMut(usize) -> Result<MicroPartitionWriter> + Send>;
pub type Adjacency = Box<dyn Fn(usize, usize) -> bool + Send>;

/// One micro-partition writer per partition, opened on first write.
pub struct PartitionedWriter {
    writers: BTreeMap<usize, MicroPartitionWriter>,
    open_writer: WriterFactory,
    adjacent: Adjacency,
    policy: MergePolicy,
}

impl fmt::Debug for PartitionedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedWriter")
            .field("partitions", &self.writers.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}

impl PartitionedWriter {
    pub fn new(
        policy: MergePolicy,
        open_writer: impl FnMut(usize) -> Result<MicroPartitionWriter> + Send + 'static,
        adjacent: impl Fn(usize, usize) -> bool + Send + 'static,
    ) -> Self {
        Self {
            writers: BTreeMap::new(),
            open_writer: Box::new(open_writer),
            adjacent: Box::new(adjacent),
            policy,
        }
    }

    /// Partitions with an open writer.
    pub fn partitions(&self) -> Vec<usize> {
        self.writers.keys().copied().collect()
    }

    pub fn writer(&mut self, partition: usize) -> Result<&mut MicroPartitionWriter> {
        if !self.writers.contains_key(&partition) {
            let writer = (self.open_writer)(partition)?;
            self.writers.insert(partition, writer);
        }
        self.writers
            .get_mut(&partition)
            .ok_or_else(|| Error::Logic(format!("writer of partition {} vanished", partition)))
    }

    pub fn write_tuple(&mut self, partition: usize, tuple: &[Datum]) -> Result<()> {
        self.writer(partition)?.write_tuple(tuple)
    }

    /// Merges every planned run into its first writer and closes all
    /// writers, returning their summaries in partition order.
    pub fn close(mut self) -> Result<Vec<WriteSummary>> {
        let sizes: Vec<(usize, u64)> = self
            .writers
            .iter()
            .map(|(index, writer)| (*index, writer.num_tuples()))
            .collect();
        let runs = self.policy.plan(&sizes, &self.adjacent);

        let mut summaries = Vec::with_capacity(runs.len());
        for run in runs {
            let mut indexes = run.into_iter();
            let Some(first) = indexes.next() else {
                continue;
            };
            let mut target = self.take_writer(first)?;
            for index in indexes {
                let source = self.take_writer(index)?;
                target.merge_to(source)?;
            }
            target.close()?;
            let summary = target
                .summary()
                .cloned()
                .ok_or_else(|| Error::Logic(format!("{} closed without summary", target.file_name())))?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    fn take_writer(&mut self, partition: usize) -> Result<MicroPartitionWriter> {
        self.writers
            .remove(&partition)
            .ok_or_else(|| Error::Logic(format!("no writer for partition {}", partition)))
    }
}
