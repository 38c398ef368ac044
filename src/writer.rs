//! Micro-partition file writer.
//!
//! Rows are buffered column by column and flushed as a stripe once the row
//! or byte limit of a group is reached. Closing the writer appends the file
//! footer, the postscript and the postscript length, then reports a
//! [`WriteSummary`] to the registered callback.

use crate::column::{new_column, ColumnSet};
use crate::config::ColumnarConfig;
use crate::encoding::EncodingOption;
use crate::error::{Error, Result};
use crate::format::{
    encode_message, ColumnBasicInfo, Footer, MicroPartitionStatisticsInfo, PostScript,
    StorageFormat, StripeInformation, MAGIC, MAJOR_VERSION, MINOR_VERSION, WRITER_ID,
};
use crate::fs::{File, FileSystem};
use crate::statistics::{BuiltinComparators, ComparatorProvider, MicroPartitionStats};
use crate::toast::ToastOptions;
use crate::types::{Datum, Schema};
use prost::Message;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What the owner of a closed micro-partition needs to persist about it.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSummary {
    pub file_name: String,
    pub block_id: String,
    pub num_tuples: u64,
    pub file_size: u64,
    /// Encoded `MicroPartitionStatisticsInfo` of the whole file.
    pub stats: Vec<u8>,
}

impl WriteSummary {
    pub fn statistics(&self) -> Result<MicroPartitionStatisticsInfo> {
        Ok(MicroPartitionStatisticsInfo::decode(self.stats.as_slice())?)
    }
}

pub type SummaryCallback = Box<dyn FnMut(WriteSummary) + Send>;

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub file_name: String,
    pub block_id: String,
    pub schema: Schema,
    pub storage_format: StorageFormat,
    pub encoding: EncodingOption,
    /// Per-column overrides of `encoding`.
    pub column_encodings: Vec<Option<EncodingOption>>,
    pub toast: ToastOptions,
    pub group_limit: usize,
    pub group_size_limit: usize,
    /// Columns that keep min/max statistics.
    pub minmax_columns: Vec<usize>,
    pub comparators: Arc<dyn ComparatorProvider>,
}

impl WriterOptions {
    pub fn new(file_name: impl Into<String>, schema: Schema) -> Self {
        Self::from_config(&ColumnarConfig::default(), file_name, schema)
    }

    pub fn from_config(config: &ColumnarConfig, file_name: impl Into<String>, schema: Schema) -> Self {
        let file_name = file_name.into();
        let minmax_columns = (0..schema.len()).collect();
        Self {
            block_id: file_name.clone(),
            file_name,
            schema,
            storage_format: config.storage_format,
            encoding: config.default_encoding,
            column_encodings: Vec::new(),
            toast: config.toast.clone(),
            group_limit: config.group_limit,
            group_size_limit: config.group_size_limit,
            minmax_columns,
            comparators: Arc::new(BuiltinComparators),
        }
    }

    pub fn with_block_id(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = block_id.into();
        self
    }

    pub fn with_storage_format(mut self, format: StorageFormat) -> Self {
        self.storage_format = format;
        self
    }

    pub fn with_group_limit(mut self, group_limit: usize) -> Self {
        self.group_limit = group_limit;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingOption) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_column_encoding(mut self, column: usize, encoding: EncodingOption) -> Self {
        if self.column_encodings.len() <= column {
            self.column_encodings.resize(column + 1, None);
        }
        self.column_encodings[column] = Some(encoding);
        self
    }

    pub fn with_toast(mut self, toast: ToastOptions) -> Self {
        self.toast = toast;
        self
    }

    pub fn with_minmax_columns(mut self, columns: Vec<usize>) -> Self {
        self.minmax_columns = columns;
        self
    }

    pub fn with_comparators(mut self, comparators: Arc<dyn ComparatorProvider>) -> Self {
        self.comparators = comparators;
        self
    }

    fn encoding_for(&self, column: usize) -> EncodingOption {
        self.column_encodings
            .get(column)
            .copied()
            .flatten()
            .unwrap_or(self.encoding)
    }

    fn validate(&self) -> Result<()> {
        if self.group_limit == 0 || self.group_size_limit == 0 {
            return Err(Error::Config("group limits must be positive".into()));
        }
        if self.column_encodings.len() > self.schema.len() {
            return Err(Error::Config(format!(
                "{} column encodings for {} columns",
                self.column_encodings.len(),
                self.schema.len()
            )));
        }
        if let Some(bad) = self.minmax_columns.iter().find(|c| **c >= self.schema.len()) {
            return Err(Error::Config(format!("min/max column {} out of schema", bad)));
        }
        Ok(())
    }
}

pub struct MicroPartitionWriter {
    fs: Arc<dyn FileSystem>,
    file: Box<dyn File>,
    options: WriterOptions,
    columns: ColumnSet,
    /// Statistics of the rows still buffered in `columns`.
    stripe_stats: MicroPartitionStats,
    /// Statistics of every flushed stripe.
    file_stats: MicroPartitionStats,
    stripes: Vec<StripeInformation>,
    current_offset: u64,
    num_tuples: u64,
    summary_callback: Option<SummaryCallback>,
    summary: Option<WriteSummary>,
    /// Set when an append failed after part of a row was buffered.
    poisoned: bool,
    closed: bool,
}

impl fmt::Debug for MicroPartitionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroPartitionWriter")
            .field("file", &self.options.file_name)
            .field("stripes", &self.stripes.len())
            .field("current_offset", &self.current_offset)
            .field("num_tuples", &self.num_tuples)
            .field("buffered_rows", &self.columns.rows())
            .field("poisoned", &self.poisoned)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MicroPartitionWriter {
    pub fn open(fs: Arc<dyn FileSystem>, options: WriterOptions) -> Result<Self> {
        options.validate()?;
        let file = fs.create(&options.file_name)?;

        let mut stripe_stats =
            MicroPartitionStats::new(options.schema.clone(), options.comparators.clone());
        stripe_stats.initialize(&options.minmax_columns);
        let file_stats = stripe_stats.clone();

        let mut writer = Self {
            fs,
            file,
            columns: ColumnSet::new(options.storage_format),
            options,
            stripe_stats,
            file_stats,
            stripes: Vec::new(),
            current_offset: 0,
            num_tuples: 0,
            summary_callback: None,
            summary: None,
            poisoned: false,
            closed: false,
        };
        writer.columns = writer.new_column_set();
        debug!(file = %writer.options.file_name, format = ?writer.options.storage_format, "Writer opened");
        Ok(writer)
    }

    pub fn set_summary_callback(&mut self, callback: impl FnMut(WriteSummary) + Send + 'static) {
        self.summary_callback = Some(Box::new(callback));
    }

    pub fn file_name(&self) -> &str {
        &self.options.file_name
    }

    pub fn schema(&self) -> &Schema {
        &self.options.schema
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Summary of the closed file.
    pub fn summary(&self) -> Option<&WriteSummary> {
        self.summary.as_ref()
    }

    /// Rows written so far, buffered ones included.
    pub fn num_tuples(&self) -> u64 {
        self.num_tuples + self.columns.rows() as u64
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Bytes buffered for the next stripe.
    pub fn physical_size(&self) -> usize {
        self.columns.physical_size()
    }

    fn new_column_set(&self) -> ColumnSet {
        let options = &self.options;
        let columns = options
            .schema
            .columns()
            .iter()
            .enumerate()
            .map(|(i, desc)| {
                Some(new_column(
                    desc,
                    options.storage_format,
                    &options.encoding_for(i),
                    &options.toast,
                ))
            })
            .collect();
        ColumnSet::with_columns(options.storage_format, columns)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Logic(format!(
                "writer of {} is closed",
                self.options.file_name
            )));
        }
        if self.poisoned {
            return Err(Error::Logic(format!(
                "writer of {} holds a partially written row",
                self.options.file_name
            )));
        }
        Ok(())
    }

    pub fn write_tuple(&mut self, tuple: &[Datum]) -> Result<()> {
        self.ensure_open()?;
        let schema = &self.options.schema;
        if tuple.len() != schema.len() {
            return Err(Error::SchemaNotMatch(format!(
                "tuple of {} values for {} columns",
                tuple.len(),
                schema.len()
            )));
        }
        for (i, (desc, value)) in schema.columns().iter().zip(tuple).enumerate() {
            if desc.dropped && !value.is_null() {
                return Err(Error::SchemaNotMatch(format!(
                    "value for dropped column {}",
                    desc.name
                )));
            }
            if !desc.ty.accepts(value) {
                return Err(Error::SchemaNotMatch(format!(
                    "{} value for column {} of type {:?}",
                    value.type_name(),
                    desc.name,
                    desc.ty
                )));
            }
            self.columns
                .column(i)
                .ok_or_else(|| Error::Logic(format!("column {} missing from writer", i)))?
                .check(value)?;
        }

        for (i, value) in tuple.iter().enumerate() {
            let appended = match self.columns.column_mut(i) {
                Some(column) => column.append(value),
                None => Err(Error::Logic(format!("column {} missing from writer", i))),
            };
            if let Err(e) = appended {
                if i > 0 {
                    self.poisoned = true;
                    error!(file = %self.options.file_name, column = i, error = %e, "Row partially appended");
                }
                return Err(e);
            }
        }
        self.stripe_stats.add_row(tuple)?;

        if self.columns.rows() >= self.options.group_limit
            || self.columns.physical_size() >= self.options.group_size_limit
        {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the buffered rows as a stripe. No-op without buffered rows.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.columns.rows() == 0 {
            return Ok(());
        }
        let stripe = write_stripe(
            self.file.as_mut(),
            self.current_offset,
            &self.columns,
            &self.stripe_stats,
        )?;
        crate::log_stripe!(
            "flush",
            self.options.file_name,
            self.stripes.len(),
            stripe.number_of_rows,
            stripe.footer_length
        );
        self.push_stripe(stripe);
        self.file_stats.merge_to(&self.stripe_stats)?;
        self.stripe_stats.reset();
        self.columns = self.new_column_set();
        Ok(())
    }

    fn push_stripe(&mut self, stripe: StripeInformation) {
        self.current_offset += stripe.footer_length;
        self.num_tuples += stripe.number_of_rows;
        self.stripes.push(stripe);
    }

    /// Moves everything written to `other` into this file, after the rows
    /// written here so far: its stripes are copied byte for byte, its
    /// buffered rows become a new stripe, and its file is deleted.
    pub fn merge_to(&mut self, mut other: MicroPartitionWriter) -> Result<()> {
        self.ensure_open()?;
        other.ensure_open()?;
        if other.options.schema != self.options.schema
            || other.options.storage_format != self.options.storage_format
        {
            return Err(Error::SchemaNotMatch(format!(
                "cannot merge {} into {}",
                other.options.file_name, self.options.file_name
            )));
        }
        self.flush()?;

        let copied = other.stripes.len();
        for stripe in std::mem::take(&mut other.stripes) {
            let mut buf = vec![0u8; stripe.footer_length as usize];
            other.file.read_at(&mut buf, stripe.offset)?;
            self.file.write_at(&buf, self.current_offset)?;
            self.push_stripe(StripeInformation {
                offset: self.current_offset,
                ..stripe
            });
        }
        other.closed = true;
        other.fs.delete(&other.options.file_name)?;

        if other.columns.rows() > 0 {
            let stripe = write_stripe(
                self.file.as_mut(),
                self.current_offset,
                &other.columns,
                &other.stripe_stats,
            )?;
            self.push_stripe(stripe);
        }

        self.file_stats.merge_to(&other.file_stats)?;
        self.file_stats.merge_to(&other.stripe_stats)?;
        crate::log_merge!(
            self.options.file_name,
            other.options.file_name,
            copied,
            other.num_tuples + other.columns.rows() as u64
        );
        Ok(())
    }

    /// Finishes the file. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;

        let schema = &self.options.schema;
        let footer = Footer {
            content_length: self.current_offset,
            number_of_rows: self.num_tuples,
            types: schema.to_format_types(),
            stripes: self.stripes.clone(),
            col_info: schema
                .columns()
                .iter()
                .map(|desc| ColumnBasicInfo {
                    typid: desc.type_oid,
                    collation: desc.collation,
                    opfamily: desc.opfamily,
                })
                .collect(),
            storage_format: self.options.storage_format as i32,
        };
        let footer = encode_message(&footer);
        let post_script = encode_message(&PostScript {
            footer_length: footer.len() as u64,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            writer: WRITER_ID,
            magic: MAGIC.to_string(),
        });

        let mut tail = footer;
        tail.extend_from_slice(&post_script);
        tail.extend_from_slice(&(post_script.len() as u64).to_le_bytes());
        self.file.write_at(&tail, self.current_offset)?;
        self.file.flush()?;
        self.closed = true;

        let summary = WriteSummary {
            file_name: self.options.file_name.clone(),
            block_id: self.options.block_id.clone(),
            num_tuples: self.num_tuples,
            file_size: self.current_offset + tail.len() as u64,
            stats: encode_message(&self.file_stats.stats_data()),
        };
        info!(
            file = %summary.file_name,
            rows = summary.num_tuples,
            bytes = summary.file_size,
            stripes = self.stripes.len(),
            "Micro-partition closed"
        );
        if let Some(callback) = self.summary_callback.as_mut() {
            callback(summary.clone());
        }
        self.summary = Some(summary);
        Ok(())
    }
}

/// Packs `columns` and writes the stripe data followed by its footer at
/// `offset`.
fn write_stripe(
    file: &mut dyn File,
    offset: u64,
    columns: &ColumnSet,
    stats: &MicroPartitionStats,
) -> Result<StripeInformation> {
    let packed = columns.pack()?;
    let data_length = packed.data.len() as u64;
    let mut buf = packed.data;
    buf.extend_from_slice(&encode_message(&packed.footer));
    file.write_at(&buf, offset)?;
    Ok(StripeInformation {
        offset,
        data_length,
        footer_length: buf.len() as u64,
        number_of_rows: columns.rows() as u64,
        col_stats: stats.stats_data().column_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{StripeFooter, POST_SCRIPT_SIZE};
    use crate::fs::MemoryFileSystem;
    use crate::types::{ColumnDesc, ColumnType};
    use parking_lot::Mutex;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDesc::new("id", ColumnType::Int64),
            ColumnDesc::new("name", ColumnType::Bytes),
        ])
    }

    fn tuple(i: i64) -> Vec<Datum> {
        vec![Datum::Int64(i), Datum::Bytes(format!("row-{}", i).into_bytes())]
    }

    fn open(fs: &MemoryFileSystem, name: &str, group_limit: usize) -> MicroPartitionWriter {
        let options = WriterOptions::new(name, schema()).with_group_limit(group_limit);
        MicroPartitionWriter::open(Arc::new(fs.clone()), options).unwrap()
    }

    fn read_tail(raw: &[u8]) -> (PostScript, Footer) {
        let ps_len = u64::from_le_bytes(raw[raw.len() - POST_SCRIPT_SIZE..].try_into().unwrap()) as usize;
        let ps_start = raw.len() - POST_SCRIPT_SIZE - ps_len;
        let ps = PostScript::decode(&raw[ps_start..raw.len() - POST_SCRIPT_SIZE]).unwrap();
        let footer_start = ps_start - ps.footer_length as usize;
        let footer = Footer::decode(&raw[footer_start..ps_start]).unwrap();
        (ps, footer)
    }

    #[test]
    fn test_flushes_at_group_limit() {
        let fs = MemoryFileSystem::new();
        let mut writer = open(&fs, "p1", 3);
        for i in 0..7 {
            writer.write_tuple(&tuple(i)).unwrap();
        }
        assert_eq!(writer.stripe_count(), 2);
        assert_eq!(writer.num_tuples(), 7);
        writer.flush().unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.stripe_count(), 3);

        let summaries = Arc::new(Mutex::new(Vec::new()));
        let sink = summaries.clone();
        writer.set_summary_callback(move |s| sink.lock().push(s));
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(matches!(writer.write_tuple(&tuple(9)), Err(Error::Logic(_))));

        let summaries = summaries.lock();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.num_tuples, 7);
        assert_eq!(summary.block_id, "p1");
        let raw = fs.contents("p1").unwrap();
        assert_eq!(summary.file_size, raw.len() as u64);
        let stats = summary.statistics().unwrap();
        assert_eq!(
            stats.column_stats[0].min_max(),
            Some((&0i64.to_le_bytes()[..], &6i64.to_le_bytes()[..]))
        );

        let (ps, footer) = read_tail(&raw);
        assert_eq!(ps.magic, MAGIC);
        assert_eq!(footer.number_of_rows, 7);
        assert_eq!(footer.types.len(), 3);
        let rows: Vec<u64> = footer.stripes.iter().map(|s| s.number_of_rows).collect();
        assert_eq!(rows, vec![3, 3, 1]);
        let mut offset = 0;
        for stripe in &footer.stripes {
            assert_eq!(stripe.offset, offset);
            let sf = &raw[(stripe.offset + stripe.data_length) as usize
                ..(stripe.offset + stripe.footer_length) as usize];
            let sf = StripeFooter::decode(sf).unwrap();
            let total: u64 = sf.streams.iter().map(|s| s.length).sum();
            assert_eq!(total, stripe.data_length);
            offset += stripe.footer_length;
        }
        assert_eq!(footer.content_length, offset);
    }

    #[test]
    fn test_rejects_bad_tuples() {
        let fs = MemoryFileSystem::new();
        let mut schema = schema();
        schema.push(ColumnDesc::new("old", ColumnType::Int32).dropped());
        let options = WriterOptions::new("p", schema);
        let mut writer = MicroPartitionWriter::open(Arc::new(fs.clone()), options).unwrap();

        assert!(matches!(
            writer.write_tuple(&[Datum::Int64(1)]),
            Err(Error::SchemaNotMatch(_))
        ));
        assert!(matches!(
            writer.write_tuple(&[Datum::Int64(1), Datum::Null, Datum::Int32(3)]),
            Err(Error::SchemaNotMatch(_))
        ));
        assert!(matches!(
            writer.write_tuple(&[Datum::Int32(1), Datum::Null, Datum::Null]),
            Err(Error::SchemaNotMatch(_))
        ));
        writer
            .write_tuple(&[Datum::Int64(1), Datum::Null, Datum::Null])
            .unwrap();
        assert_eq!(writer.num_tuples(), 1);
        assert!(writer.physical_size() > 0);
    }

    #[test]
    fn test_rejected_value_leaves_no_partial_row() {
        use crate::reader::{MicroPartitionReader, ReaderOptions};
        use crate::types::Decimal128;

        let fs = MemoryFileSystem::new();
        let schema = Schema::new(vec![
            ColumnDesc::new("id", ColumnType::Int32),
            ColumnDesc::new("price", ColumnType::Decimal { precision: 4, scale: 2 }),
        ]);
        let options = WriterOptions::new("d", schema);
        let mut writer = MicroPartitionWriter::open(Arc::new(fs.clone()), options).unwrap();

        let too_wide = [Datum::Int32(1), Datum::Decimal(Decimal128::new(999_999, 2))];
        assert!(matches!(writer.write_tuple(&too_wide), Err(Error::OutOfRange(_))));
        let good = vec![Datum::Int32(2), Datum::Decimal(Decimal128::new(1, 2))];
        writer.write_tuple(&good).unwrap();
        writer.close().unwrap();
        assert_eq!(writer.summary().unwrap().num_tuples, 1);

        let mut reader = MicroPartitionReader::open(&fs, "d", ReaderOptions::default()).unwrap();
        assert_eq!(reader.total_rows(), 1);
        assert_eq!(reader.get_tuple(0).unwrap(), good);
    }

    #[test]
    fn test_zstd_request_writes_in_every_build() {
        use crate::encoding::{EncodingKind, DEFAULT_COMPRESS_LEVEL};
        use crate::reader::{MicroPartitionReader, ReaderOptions};

        let fs = MemoryFileSystem::new();
        let encoding = EncodingOption::new(EncodingKind::CompressZstd)
            .with_lengths(EncodingKind::CompressZstd, DEFAULT_COMPRESS_LEVEL);
        let options = WriterOptions::new("z", schema()).with_encoding(encoding);
        let mut writer = MicroPartitionWriter::open(Arc::new(fs.clone()), options).unwrap();
        for i in 0..50 {
            writer.write_tuple(&tuple(i)).unwrap();
        }
        writer.close().unwrap();

        let mut reader = MicroPartitionReader::open(&fs, "z", ReaderOptions::default()).unwrap();
        for i in [0u64, 17, 49] {
            assert_eq!(reader.get_tuple(i).unwrap(), tuple(i as i64));
        }
    }

    #[test]
    fn test_merge_to_moves_stripes_and_buffer() {
        let fs = MemoryFileSystem::new();
        let mut target = open(&fs, "target", 4);
        let mut source = open(&fs, "source", 4);
        for i in 0..5 {
            target.write_tuple(&tuple(i)).unwrap();
        }
        for i in 100..106 {
            source.write_tuple(&tuple(i)).unwrap();
        }
        assert_eq!(source.stripe_count(), 1);

        target.merge_to(source).unwrap();
        assert!(!fs.exists("source"));
        assert_eq!(target.stripe_count(), 4);
        assert_eq!(target.num_tuples(), 11);

        let summary = Arc::new(Mutex::new(None));
        let sink = summary.clone();
        target.set_summary_callback(move |s| *sink.lock() = Some(s));
        target.close().unwrap();
        let summary = summary.lock().take().unwrap();
        assert_eq!(summary.num_tuples, 11);
        let stats = summary.statistics().unwrap();
        assert_eq!(
            stats.column_stats[0].min_max(),
            Some((&0i64.to_le_bytes()[..], &105i64.to_le_bytes()[..]))
        );

        let (_, footer) = read_tail(&fs.contents("target").unwrap());
        let rows: Vec<u64> = footer.stripes.iter().map(|s| s.number_of_rows).collect();
        assert_eq!(rows, vec![4, 1, 4, 2]);
    }

    #[test]
    fn test_merge_rejects_other_schema() {
        let fs = MemoryFileSystem::new();
        let mut target = open(&fs, "a", 8);
        let options = WriterOptions::new(
            "b",
            Schema::new(vec![ColumnDesc::new("x", ColumnType::Int32)]),
        );
        let other = MicroPartitionWriter::open(Arc::new(fs.clone()), options).unwrap();
        assert!(matches!(target.merge_to(other), Err(Error::SchemaNotMatch(_))));
        assert!(fs.exists("b"));
    }

    #[test]
    fn test_invalid_options() {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        let options = WriterOptions::new("p", schema()).with_group_limit(0);
        assert!(matches!(
            MicroPartitionWriter::open(fs.clone(), options),
            Err(Error::Config(_))
        ));
        let options = WriterOptions::new("p", schema()).with_minmax_columns(vec![5]);
        assert!(MicroPartitionWriter::open(fs, options).is_err());
    }
}
