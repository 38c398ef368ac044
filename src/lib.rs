//! Columnar micro-partition storage.
//!
//! A micro-partition is one immutable file of stripes. Each stripe stores
//! a run of rows column by column, and the footer keeps per-stripe zone
//! maps so scans can skip stripes without touching their data.

pub mod bitmap;
pub mod column;
pub mod config;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod format;
pub mod fs;
pub mod logging;
pub mod merge;
pub mod reader;
pub mod statistics;
pub mod toast;
pub mod tombstone;
pub mod types;
pub mod writer;

pub use bitmap::Bitmap;
pub use column::{Column, ColumnSet};
pub use config::ColumnarConfig;
pub use encoding::{EncodingKind, EncodingOption};
pub use error::{Error, Result};
pub use filter::{Filter, ScanKey, Strategy};
pub use format::StorageFormat;
pub use fs::{FileSystem, LocalFileSystem, MemoryFileSystem};
pub use merge::{MergePolicy, PartitionedWriter};
pub use reader::{Group, MicroPartitionReader, ReaderOptions};
pub use statistics::{BuiltinComparators, ComparatorProvider, MicroPartitionStats};
pub use tombstone::TombstoneSet;
pub use types::{ColumnDesc, ColumnType, Datum, Decimal128, Schema};
pub use writer::{MicroPartitionWriter, WriteSummary, WriterOptions};
