//! In-memory columns of one stripe.
//!
//! Writer-side columns own growable buffers and are filled row by row.
//! Reader-side columns are immutable views over the stripe read buffer;
//! appending to them is a logic error. Either side may be wrapped in an
//! [`EncodedColumn`] which encodes on demand (writer) or decodes on first
//! access (reader).

mod bitpacked;
mod decimal;
mod encoded;
mod fixed;
mod non_fixed;
pub mod set;

pub use bitpacked::BitPackedColumn;
pub use decimal::DecimalColumn;
pub use encoded::EncodedColumn;
pub use fixed::{FixedColumn, FixedValue};
pub use non_fixed::NonFixedColumn;
pub use set::ColumnSet;

use crate::bitmap::Bitmap;
use crate::encoding::{EncodingKind, EncodingOption};
use crate::error::{Error, Result};
use crate::format::{ColumnEncoding, StorageFormat, NO_ENCODE_ORIGIN_LEN};
use crate::toast::{ToastOptions, Toaster};
use crate::types::{ColumnDesc, ColumnType, Datum};
use bytes::Bytes;
use std::cell::OnceCell;
use std::fmt;

pub trait Column: Send + fmt::Debug {
    fn column_type(&self) -> ColumnType;

    fn storage_format(&self) -> StorageFormat;

    fn rows(&self) -> usize;

    fn non_null_rows(&self) -> usize;

    /// Present only when at least one row is NULL; a set bit marks a NULL.
    fn null_bitmap(&self) -> Option<&Bitmap>;

    fn has_null(&self) -> bool {
        self.non_null_rows() < self.rows()
    }

    fn all_null(&self) -> bool {
        self.rows() > 0 && self.non_null_rows() == 0
    }

    fn is_null(&self, row: usize) -> bool {
        self.null_bitmap().is_some_and(|b| b.test(row))
    }

    /// Fails where `append(value)` would, without touching the column.
    fn check(&self, _value: &Datum) -> Result<()> {
        Ok(())
    }

    fn append(&mut self, value: &Datum) -> Result<()>;

    fn append_null(&mut self) -> Result<()>;

    /// Value of `row`, NULL included.
    fn get(&self, row: usize) -> Result<Datum>;

    /// The DATA stream as it goes to disk.
    fn get_buffer(&self) -> Result<&[u8]>;

    /// Raw bytes of `len` physical values starting at value `start`.
    fn get_range_buffer(&self, start: usize, len: usize) -> Result<&[u8]>;

    /// The LENGTH stream of variable-width columns.
    fn lengths_buffer(&self) -> Result<Option<&[u8]>> {
        Ok(None)
    }

    fn toast_buffer(&self) -> Option<&[u8]> {
        None
    }

    fn toast_count(&self) -> usize {
        0
    }

    fn encoding(&self) -> EncodingKind {
        EncodingKind::NoEncoded
    }

    fn compress_level(&self) -> i32 {
        0
    }

    /// Length of the DATA stream before encoding, or `NO_ENCODE_ORIGIN_LEN`.
    fn origin_length(&self) -> i64 {
        NO_ENCODE_ORIGIN_LEN
    }

    fn lengths_encoding(&self) -> EncodingKind {
        EncodingKind::NoEncoded
    }

    fn lengths_level(&self) -> i32 {
        0
    }

    fn lengths_origin_length(&self) -> i64 {
        NO_ENCODE_ORIGIN_LEN
    }

    fn align_size(&self) -> usize;

    /// Bytes buffered by the column before encoding.
    fn physical_size(&self) -> usize;
}

/// Data of a column: owned while writing, shared while reading.
#[derive(Debug, Clone)]
pub(crate) enum Buffer {
    Owned(Vec<u8>),
    Shared(Bytes),
}

impl Buffer {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Owned(v) => v.as_slice(),
            Buffer::Shared(b) => b.as_ref(),
        }
    }

    pub(crate) fn owned_mut(&mut self) -> Result<&mut Vec<u8>> {
        match self {
            Buffer::Owned(v) => Ok(v),
            Buffer::Shared(_) => Err(Error::Logic("append to a read-only column".to_string())),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// Row counters and the lazily created null bitmap.
#[derive(Debug, Clone, Default)]
pub(crate) struct NullTracker {
    rows: usize,
    non_null_rows: usize,
    bitmap: Option<Bitmap>,
    /// Non-null values before each bitmap byte, built on first lookup.
    ranks: OnceCell<Vec<u32>>,
}

impl NullTracker {
    pub(crate) fn read_only(rows: usize, non_null_rows: usize, bitmap: Option<Bitmap>) -> Self {
        Self {
            rows,
            non_null_rows,
            bitmap,
            ranks: OnceCell::new(),
        }
    }

    pub(crate) fn rows(&self) -> usize {
        self.rows
    }

    pub(crate) fn non_null_rows(&self) -> usize {
        self.non_null_rows
    }

    pub(crate) fn bitmap(&self) -> Option<&Bitmap> {
        self.bitmap.as_ref()
    }

    pub(crate) fn push_value(&mut self) {
        self.rows += 1;
        self.non_null_rows += 1;
        self.ranks = OnceCell::new();
    }

    pub(crate) fn push_null(&mut self) -> Result<()> {
        let rows = self.rows;
        self.bitmap
            .get_or_insert_with(|| Bitmap::with_capacity(rows + 1))
            .set(rows)?;
        self.rows += 1;
        self.ranks = OnceCell::new();
        Ok(())
    }

    pub(crate) fn is_null(&self, row: usize) -> bool {
        self.bitmap.as_ref().is_some_and(|b| b.test(row))
    }

    /// Checks `row` and reports whether it holds a value.
    pub(crate) fn check(&self, row: usize) -> Result<bool> {
        if row >= self.rows {
            return Err(Error::out_of_range(row, self.rows));
        }
        Ok(!self.is_null(row))
    }

    /// Position of `row` among the stored values of a row-major column.
    pub(crate) fn value_index(&self, row: usize) -> usize {
        let Some(bitmap) = &self.bitmap else {
            return row;
        };
        let ranks = self.ranks.get_or_init(|| {
            let raw = bitmap.raw();
            let mut ranks = Vec::with_capacity(raw.len() + 1);
            let mut seen = 0u32;
            for (i, byte) in raw.iter().enumerate() {
                ranks.push(seen);
                let bits = (self.rows.saturating_sub(i * 8)).min(8) as u32;
                let valid = if bits == 8 { 0xffu8 } else { (1u8 << bits) - 1 };
                seen += bits - (byte & valid).count_ones();
            }
            ranks.push(seen);
            ranks
        });
        let byte = row / 8;
        let before = ranks.get(byte).copied().unwrap_or(0) as usize;
        let within = match bitmap.raw().get(byte) {
            Some(b) => (row % 8) - (b & ((1u8 << (row % 8)) - 1)).count_ones() as usize,
            None => row % 8,
        };
        before + within
    }

    /// Slot of `row` in the DATA stream under `format`.
    pub(crate) fn slot(&self, format: StorageFormat, row: usize) -> usize {
        match format {
            StorageFormat::RowMajor => self.value_index(row),
            StorageFormat::Columnar => row,
        }
    }

    pub(crate) fn bitmap_size(&self) -> usize {
        if self.bitmap.is_some() {
            Bitmap::minimal_stored_bytes(self.rows)
        } else {
            0
        }
    }
}

pub(crate) fn type_mismatch(ty: ColumnType, value: &Datum) -> Error {
    Error::SchemaNotMatch(format!(
        "{} value appended to a {:?} column",
        value.type_name(),
        ty
    ))
}

/// Builds an empty writer-side column for `desc`.
pub fn new_column(
    desc: &ColumnDesc,
    format: StorageFormat,
    encoding: &EncodingOption,
    toast: &ToastOptions,
) -> Box<dyn Column> {
    let align = desc.align.size();
    let base: Box<dyn Column> = match desc.ty {
        ColumnType::Bool => Box::new(BitPackedColumn::new(format)),
        ColumnType::Int8 => Box::new(FixedColumn::<i8>::new(desc.ty, format, align)),
        ColumnType::Int16 => Box::new(FixedColumn::<i16>::new(desc.ty, format, align)),
        ColumnType::Int32 => Box::new(FixedColumn::<i32>::new(desc.ty, format, align)),
        ColumnType::Int64 => Box::new(FixedColumn::<i64>::new(desc.ty, format, align)),
        ColumnType::Float32 => Box::new(FixedColumn::<f32>::new(desc.ty, format, align)),
        ColumnType::Float64 => Box::new(FixedColumn::<f64>::new(desc.ty, format, align)),
        ColumnType::Decimal { precision, scale } => {
            Box::new(DecimalColumn::new(precision, scale, format, align))
        }
        ColumnType::Bytes => Box::new(NonFixedColumn::new(
            format,
            align,
            Toaster::new(toast, desc.storage),
        )),
    };

    let resolved = encoding.resolve(&desc.ty);
    let lengths_encoded =
        desc.ty.is_variable() && resolved.lengths_kind != EncodingKind::NoEncoded;
    if resolved.kind == EncodingKind::NoEncoded && !lengths_encoded {
        return base;
    }
    Box::new(EncodedColumn::new(base, resolved))
}

/// Streams of one column as cut out of a stripe.
#[derive(Debug, Clone, Default)]
pub struct ColumnParts {
    pub rows: usize,
    pub non_null_rows: usize,
    pub present: Option<Bytes>,
    pub data: Bytes,
    pub lengths: Option<Bytes>,
    pub toast: Option<Bytes>,
}

/// Builds a reader-side column over already cut streams.
pub fn open_column(
    ty: ColumnType,
    format: StorageFormat,
    align: usize,
    parts: ColumnParts,
    encoding: &ColumnEncoding,
) -> Result<Box<dyn Column>> {
    let kind = EncodingKind::from_wire(encoding.kind)?;
    let lengths_kind = EncodingKind::from_wire(encoding.lengths_kind)?;
    if kind == EncodingKind::DefEncoded || lengths_kind == EncodingKind::DefEncoded {
        return Err(Error::InvalidFormat(
            "unresolved default encoding in stripe footer".to_string(),
        ));
    }
    if parts.non_null_rows > parts.rows {
        return Err(Error::InvalidFormat(format!(
            "{} non-null rows in a column of {} rows",
            parts.non_null_rows, parts.rows
        )));
    }
    if kind == EncodingKind::NoEncoded && lengths_kind == EncodingKind::NoEncoded {
        return open_plain(ty, format, align, parts);
    }
    Ok(Box::new(EncodedColumn::open(ty, format, align, parts, encoding)?))
}

/// Reader-side column over unencoded streams.
pub(crate) fn open_plain(
    ty: ColumnType,
    format: StorageFormat,
    align: usize,
    parts: ColumnParts,
) -> Result<Box<dyn Column>> {
    let tracker = NullTracker::read_only(
        parts.rows,
        parts.non_null_rows,
        parts.present.map(Bitmap::read_only),
    );
    Ok(match ty {
        ColumnType::Bool => Box::new(BitPackedColumn::read_only(format, tracker, parts.data)?),
        ColumnType::Int8 => Box::new(FixedColumn::<i8>::read_only(ty, format, align, tracker, parts.data)?),
        ColumnType::Int16 => Box::new(FixedColumn::<i16>::read_only(ty, format, align, tracker, parts.data)?),
        ColumnType::Int32 => Box::new(FixedColumn::<i32>::read_only(ty, format, align, tracker, parts.data)?),
        ColumnType::Int64 => Box::new(FixedColumn::<i64>::read_only(ty, format, align, tracker, parts.data)?),
        ColumnType::Float32 => Box::new(FixedColumn::<f32>::read_only(ty, format, align, tracker, parts.data)?),
        ColumnType::Float64 => Box::new(FixedColumn::<f64>::read_only(ty, format, align, tracker, parts.data)?),
        ColumnType::Decimal { precision, scale } => Box::new(DecimalColumn::read_only(
            precision,
            scale,
            format,
            align,
            tracker,
            parts.data,
        )?),
        ColumnType::Bytes => {
            let lengths = parts.lengths.ok_or_else(|| {
                Error::InvalidFormat("variable-width column without LENGTH stream".to_string())
            })?;
            Box::new(NonFixedColumn::read_only(
                format,
                align,
                tracker,
                parts.data,
                lengths,
                parts.toast,
            )?)
        }
    })
}
