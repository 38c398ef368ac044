use super::{type_mismatch, Buffer, Column, NullTracker};
use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::format::StorageFormat;
use crate::types::{ColumnType, Datum, Decimal128};
use bytes::Bytes;

const WIDTH: usize = 16;

/// Decimals packed as 16-byte little endian unscaled integers at the column
/// scale.
#[derive(Debug)]
pub struct DecimalColumn {
    precision: u8,
    scale: u8,
    format: StorageFormat,
    align: usize,
    nulls: NullTracker,
    data: Buffer,
}

impl DecimalColumn {
    pub fn new(precision: u8, scale: u8, format: StorageFormat, align: usize) -> Self {
        Self {
            precision,
            scale,
            format,
            align,
            nulls: NullTracker::default(),
            data: Buffer::Owned(Vec::new()),
        }
    }

    pub(crate) fn read_only(
        precision: u8,
        scale: u8,
        format: StorageFormat,
        align: usize,
        nulls: NullTracker,
        data: Bytes,
    ) -> Result<Self> {
        let slots = match format {
            StorageFormat::RowMajor => nulls.non_null_rows(),
            StorageFormat::Columnar => nulls.rows(),
        };
        if data.len() < slots * WIDTH {
            return Err(Error::InvalidFormat(format!(
                "decimal DATA of {} bytes holds fewer than {} values",
                data.len(),
                slots
            )));
        }
        Ok(Self {
            precision,
            scale,
            format,
            align,
            nulls,
            data: Buffer::Shared(data),
        })
    }

    fn pack(&self, value: &Decimal128) -> Result<i128> {
        let rescaled = value
            .rescale(self.scale)
            .filter(|d| d.fits_precision(self.precision))
            .ok_or_else(|| {
                Error::OutOfRange(format!(
                    "decimal {} does not fit numeric({}, {})",
                    value, self.precision, self.scale
                ))
            })?;
        Ok(rescaled.unscaled)
    }
}

impl Column for DecimalColumn {
    fn column_type(&self) -> ColumnType {
        ColumnType::Decimal {
            precision: self.precision,
            scale: self.scale,
        }
    }

    fn storage_format(&self) -> StorageFormat {
        self.format
    }

    fn rows(&self) -> usize {
        self.nulls.rows()
    }

    fn non_null_rows(&self) -> usize {
        self.nulls.non_null_rows()
    }

    fn null_bitmap(&self) -> Option<&Bitmap> {
        self.nulls.bitmap()
    }

    fn check(&self, value: &Datum) -> Result<()> {
        match value {
            Datum::Null => Ok(()),
            Datum::Decimal(d) => self.pack(d).map(|_| ()),
            other => Err(type_mismatch(self.column_type(), other)),
        }
    }

    fn append(&mut self, value: &Datum) -> Result<()> {
        let decimal = match value {
            Datum::Null => return self.append_null(),
            Datum::Decimal(d) => d,
            other => return Err(type_mismatch(self.column_type(), other)),
        };
        let unscaled = self.pack(decimal)?;
        self.data
            .owned_mut()?
            .extend_from_slice(&unscaled.to_le_bytes());
        self.nulls.push_value();
        Ok(())
    }

    fn append_null(&mut self) -> Result<()> {
        let data = self.data.owned_mut()?;
        if self.format == StorageFormat::Columnar {
            data.extend_from_slice(&[0u8; WIDTH]);
        }
        self.nulls.push_null()
    }

    fn get(&self, row: usize) -> Result<Datum> {
        if !self.nulls.check(row)? {
            return Ok(Datum::Null);
        }
        let start = self.nulls.slot(self.format, row) * WIDTH;
        let raw = self.get_range_buffer(start / WIDTH, 1)?;
        let mut bytes = [0u8; WIDTH];
        bytes.copy_from_slice(raw);
        Ok(Datum::Decimal(Decimal128::new(
            i128::from_le_bytes(bytes),
            self.scale,
        )))
    }

    fn get_buffer(&self) -> Result<&[u8]> {
        Ok(self.data.as_slice())
    }

    fn get_range_buffer(&self, start: usize, len: usize) -> Result<&[u8]> {
        let data = self.data.as_slice();
        let end = (start + len) * WIDTH;
        data.get(start * WIDTH..end)
            .ok_or_else(|| Error::out_of_range(end, data.len()))
    }

    fn align_size(&self) -> usize {
        self.align
    }

    fn physical_size(&self) -> usize {
        self.data.len() + self.nulls.bitmap_size()
    }
}
