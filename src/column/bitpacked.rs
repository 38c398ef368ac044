use super::{type_mismatch, Buffer, Column, NullTracker};
use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::format::StorageFormat;
use crate::types::{ColumnType, Datum};
use bytes::Bytes;

/// Booleans, one bit per stored value, least significant bit first.
#[derive(Debug)]
pub struct BitPackedColumn {
    format: StorageFormat,
    nulls: NullTracker,
    data: Buffer,
    /// Stored bits, which differs from the row count in row-major layout.
    bits: usize,
}

impl BitPackedColumn {
    pub fn new(format: StorageFormat) -> Self {
        Self {
            format,
            nulls: NullTracker::default(),
            data: Buffer::Owned(Vec::new()),
            bits: 0,
        }
    }

    pub(crate) fn read_only(format: StorageFormat, nulls: NullTracker, data: Bytes) -> Result<Self> {
        let bits = match format {
            StorageFormat::RowMajor => nulls.non_null_rows(),
            StorageFormat::Columnar => nulls.rows(),
        };
        if data.len() < Bitmap::minimal_stored_bytes(bits) {
            return Err(Error::InvalidFormat(format!(
                "boolean DATA of {} bytes holds fewer than {} values",
                data.len(),
                bits
            )));
        }
        Ok(Self {
            format,
            nulls,
            data: Buffer::Shared(data),
            bits,
        })
    }

    fn push_bit(&mut self, value: bool) -> Result<()> {
        let data = self.data.owned_mut()?;
        if self.bits % 8 == 0 {
            data.push(0);
        }
        if value {
            if let Some(last) = data.last_mut() {
                *last |= 1 << (self.bits % 8);
            }
        }
        self.bits += 1;
        Ok(())
    }
}

impl Column for BitPackedColumn {
    fn column_type(&self) -> ColumnType {
        ColumnType::Bool
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

    fn append(&mut self, value: &Datum) -> Result<()> {
        match value {
            Datum::Null => self.append_null(),
            Datum::Bool(v) => {
                self.push_bit(*v)?;
                self.nulls.push_value();
                Ok(())
            }
            other => Err(type_mismatch(ColumnType::Bool, other)),
        }
    }

    fn append_null(&mut self) -> Result<()> {
        self.data.owned_mut()?;
        if self.format == StorageFormat::Columnar {
            self.push_bit(false)?;
        }
        self.nulls.push_null()
    }

    fn get(&self, row: usize) -> Result<Datum> {
        if !self.nulls.check(row)? {
            return Ok(Datum::Null);
        }
        let bit = self.nulls.slot(self.format, row);
        let byte = self
            .data
            .as_slice()
            .get(bit / 8)
            .ok_or_else(|| Error::out_of_range(bit, self.bits))?;
        Ok(Datum::Bool(byte & (1 << (bit % 8)) != 0))
    }

    fn get_buffer(&self) -> Result<&[u8]> {
        Ok(self.data.as_slice())
    }

    /// Bytes covering bits `[start, start + len)`.
    fn get_range_buffer(&self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.bits {
            return Err(Error::out_of_range(start + len, self.bits));
        }
        let data = self.data.as_slice();
        Ok(&data[start / 8..(start + len).div_ceil(8)])
    }

    fn align_size(&self) -> usize {
        1
    }

    fn physical_size(&self) -> usize {
        self.data.len() + self.nulls.bitmap_size()
    }
}
