use super::{type_mismatch, Buffer, Column, NullTracker};
use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::format::StorageFormat;
use crate::toast::{ToastIndex, Toasted, Toaster};
use crate::types::{ColumnType, Datum};
use bytes::Bytes;
use std::cell::OnceCell;

const LENGTH_WIDTH: usize = 4;

/// Variable-width byte strings.
///
/// The LENGTH stream holds one `i32` length per stored value in row-major
/// layout, and `rows + 1` `i32` offsets into DATA in columnar layout.
#[derive(Debug)]
pub struct NonFixedColumn {
    format: StorageFormat,
    align: usize,
    nulls: NullTracker,
    data: Buffer,
    lengths: Buffer,
    toaster: Option<Toaster>,
    toast_raw: OnceCell<Bytes>,
    toast_index: OnceCell<Option<ToastIndex>>,
    /// Row-major value start offsets, built on first lookup.
    offsets: OnceCell<Vec<usize>>,
}

impl NonFixedColumn {
    pub fn new(format: StorageFormat, align: usize, toaster: Option<Toaster>) -> Self {
        let lengths = match format {
            StorageFormat::RowMajor => Vec::new(),
            StorageFormat::Columnar => 0i32.to_le_bytes().to_vec(),
        };
        Self {
            format,
            align,
            nulls: NullTracker::default(),
            data: Buffer::Owned(Vec::new()),
            lengths: Buffer::Owned(lengths),
            toaster,
            toast_raw: OnceCell::new(),
            toast_index: OnceCell::new(),
            offsets: OnceCell::new(),
        }
    }

    pub(crate) fn read_only(
        format: StorageFormat,
        align: usize,
        nulls: NullTracker,
        data: Bytes,
        lengths: Bytes,
        toast: Option<Bytes>,
    ) -> Result<Self> {
        let entries = match format {
            StorageFormat::RowMajor => nulls.non_null_rows(),
            StorageFormat::Columnar => nulls.rows() + 1,
        };
        if lengths.len() < entries * LENGTH_WIDTH {
            return Err(Error::InvalidFormat(format!(
                "LENGTH of {} bytes holds fewer than {} entries",
                lengths.len(),
                entries
            )));
        }
        let toast_raw = OnceCell::new();
        if let Some(raw) = toast {
            let _ = toast_raw.set(raw);
        }
        let column = Self {
            format,
            align,
            nulls,
            data: Buffer::Shared(data),
            lengths: Buffer::Shared(lengths),
            toaster: None,
            toast_raw,
            toast_index: OnceCell::new(),
            offsets: OnceCell::new(),
        };
        let stored = column.stored_values();
        let end = match stored {
            0 => 0,
            n => column.value_bounds(n - 1)?.1,
        };
        if end > column.data.len() {
            return Err(Error::InvalidFormat(format!(
                "variable-width values end at {} past DATA of {} bytes",
                end,
                column.data.len()
            )));
        }
        Ok(column)
    }

    fn stored_values(&self) -> usize {
        match self.format {
            StorageFormat::RowMajor => self.nulls.non_null_rows(),
            StorageFormat::Columnar => self.nulls.rows(),
        }
    }

    fn length_at(&self, index: usize) -> Result<i32> {
        let raw = self.lengths.as_slice();
        let start = index * LENGTH_WIDTH;
        let bytes = raw
            .get(start..start + LENGTH_WIDTH)
            .ok_or_else(|| Error::out_of_range(index, raw.len() / LENGTH_WIDTH))?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn row_major_offsets(&self) -> Result<&[usize]> {
        if let Some(offsets) = self.offsets.get() {
            return Ok(offsets);
        }
        let mut offsets = Vec::with_capacity(self.nulls.non_null_rows() + 1);
        let mut end = 0usize;
        offsets.push(0);
        for i in 0..self.nulls.non_null_rows() {
            let len = self.length_at(i)?;
            if len < 0 {
                return Err(Error::InvalidFormat(format!("negative value length {}", len)));
            }
            end += len as usize;
            offsets.push(end);
        }
        Ok(self.offsets.get_or_init(|| offsets))
    }

    /// Byte range of the stored value at `slot`.
    fn value_bounds(&self, slot: usize) -> Result<(usize, usize)> {
        match self.format {
            StorageFormat::RowMajor => {
                let offsets = self.row_major_offsets()?;
                if slot + 1 >= offsets.len() {
                    return Err(Error::out_of_range(slot, offsets.len() - 1));
                }
                Ok((offsets[slot], offsets[slot + 1]))
            }
            StorageFormat::Columnar => {
                let start = self.length_at(slot)?;
                let end = self.length_at(slot + 1)?;
                if start < 0 || end < start {
                    return Err(Error::InvalidFormat(format!(
                        "bad offsets {}..{} at slot {}",
                        start, end, slot
                    )));
                }
                Ok((start as usize, end as usize))
            }
        }
    }

    fn toast_index(&self) -> Result<Option<&ToastIndex>> {
        if let Some(index) = self.toast_index.get() {
            return Ok(index.as_ref());
        }
        let index = match self.toast_buffer() {
            Some(raw) => Some(ToastIndex::parse(Bytes::copy_from_slice(raw))?),
            None => None,
        };
        Ok(self.toast_index.get_or_init(|| index).as_ref())
    }

    fn invalidate(&mut self) {
        self.toast_raw = OnceCell::new();
        self.toast_index = OnceCell::new();
        self.offsets = OnceCell::new();
    }

    fn push_slot(&mut self, value: &[u8]) -> Result<()> {
        let data = self.data.owned_mut()?;
        data.extend_from_slice(value);
        let entry = match self.format {
            StorageFormat::RowMajor => value.len(),
            StorageFormat::Columnar => data.len(),
        };
        let entry = i32::try_from(entry).map_err(|_| {
            Error::OutOfRange(format!("variable-width column grew past {} bytes", i32::MAX))
        })?;
        self.lengths
            .owned_mut()?
            .extend_from_slice(&entry.to_le_bytes());
        Ok(())
    }
}

impl Column for NonFixedColumn {
    fn column_type(&self) -> ColumnType {
        ColumnType::Bytes
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
        let bytes = match value {
            Datum::Null => return self.append_null(),
            Datum::Bytes(v) => v.as_slice(),
            other => return Err(type_mismatch(ColumnType::Bytes, other)),
        };
        self.data.owned_mut()?;
        let row = self.nulls.rows();
        let toasted = match self.toaster.as_mut() {
            Some(toaster) => toaster.toast(row, bytes)?,
            None => Toasted::Inline(bytes),
        };
        match toasted {
            Toasted::Inline(v) => self.push_slot(v)?,
            Toasted::Compressed(packed) => self.push_slot(&packed)?,
            Toasted::External => self.push_slot(&[])?,
        }
        self.nulls.push_value();
        self.invalidate();
        Ok(())
    }

    fn append_null(&mut self) -> Result<()> {
        let data_len = self.data.owned_mut()?.len();
        if self.format == StorageFormat::Columnar {
            let offset = i32::try_from(data_len).map_err(|_| {
                Error::OutOfRange(format!("variable-width column grew past {} bytes", i32::MAX))
            })?;
            self.lengths
                .owned_mut()?
                .extend_from_slice(&offset.to_le_bytes());
        }
        self.nulls.push_null()?;
        self.invalidate();
        Ok(())
    }

    fn get(&self, row: usize) -> Result<Datum> {
        if !self.nulls.check(row)? {
            return Ok(Datum::Null);
        }
        let (start, end) = self.value_bounds(self.nulls.slot(self.format, row))?;
        let slot = self
            .data
            .as_slice()
            .get(start..end)
            .ok_or_else(|| Error::out_of_range(end, self.data.len()))?;
        let value = match self.toast_index()? {
            Some(index) => index.detoast(row, slot)?,
            None => slot.to_vec(),
        };
        Ok(Datum::Bytes(value))
    }

    fn get_buffer(&self) -> Result<&[u8]> {
        Ok(self.data.as_slice())
    }

    fn get_range_buffer(&self, start: usize, len: usize) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let stored = self.stored_values();
        if start + len > stored {
            return Err(Error::out_of_range(start + len, stored));
        }
        let (begin, _) = self.value_bounds(start)?;
        let (_, end) = self.value_bounds(start + len - 1)?;
        let data = self.data.as_slice();
        data.get(begin..end)
            .ok_or_else(|| Error::out_of_range(end, data.len()))
    }

    fn lengths_buffer(&self) -> Result<Option<&[u8]>> {
        Ok(Some(self.lengths.as_slice()))
    }

    fn toast_buffer(&self) -> Option<&[u8]> {
        if let Some(raw) = self.toast_raw.get() {
            return Some(raw.as_ref());
        }
        let toaster = self.toaster.as_ref().filter(|t| t.count() > 0)?;
        Some(self.toast_raw.get_or_init(|| Bytes::from(toaster.serialize())).as_ref())
    }

    fn toast_count(&self) -> usize {
        match &self.toaster {
            Some(toaster) => toaster.count(),
            None => self
                .toast_index()
                .ok()
                .flatten()
                .map_or(0, |index| index.len()),
        }
    }

    fn align_size(&self) -> usize {
        self.align
    }

    fn physical_size(&self) -> usize {
        self.data.len()
            + self.lengths.len()
            + self.nulls.bitmap_size()
            + self.toaster.as_ref().map_or(0, |t| t.external_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toast::ToastOptions;
    use crate::types::StorageClass;

    fn bytes(v: &str) -> Datum {
        Datum::Bytes(v.as_bytes().to_vec())
    }

    fn lengths(col: &NonFixedColumn) -> Vec<i32> {
        col.lengths_buffer()
            .unwrap()
            .unwrap()
            .chunks(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_row_major_lengths_per_value() {
        let mut col = NonFixedColumn::new(StorageFormat::RowMajor, 4, None);
        col.append(&bytes("ab")).unwrap();
        col.append_null().unwrap();
        col.append(&bytes("")).unwrap();
        col.append(&bytes("xyz")).unwrap();

        assert_eq!(lengths(&col), vec![2, 0, 3]);
        assert_eq!(col.get_buffer().unwrap(), b"abxyz");
        assert_eq!(col.get(0).unwrap(), bytes("ab"));
        assert_eq!(col.get(1).unwrap(), Datum::Null);
        assert_eq!(col.get(2).unwrap(), bytes(""));
        assert_eq!(col.get(3).unwrap(), bytes("xyz"));
        assert_eq!(col.get_range_buffer(1, 2).unwrap(), b"xyz");
    }

    #[test]
    fn test_columnar_offsets_repeat_for_nulls() {
        let mut col = NonFixedColumn::new(StorageFormat::Columnar, 4, None);
        col.append(&bytes("ab")).unwrap();
        col.append_null().unwrap();
        col.append(&bytes("c")).unwrap();
        assert_eq!(lengths(&col), vec![0, 2, 2, 3]);
        assert_eq!(col.get(2).unwrap(), bytes("c"));
        assert_eq!(col.get_range_buffer(0, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_toasted_values_read_back() {
        let options = ToastOptions {
            threshold: 16,
            external_threshold: 64,
            ..Default::default()
        };
        let toaster = Toaster::new(&options, StorageClass::Extended);
        let mut col = NonFixedColumn::new(StorageFormat::RowMajor, 4, toaster);
        let compressible = "ab".repeat(20);
        let repeated = "q".repeat(5000);
        col.append(&bytes("short")).unwrap();
        col.append(&bytes(&compressible)).unwrap();
        col.append(&bytes(&repeated)).unwrap();

        assert_eq!(col.toast_count(), 2);
        assert!(col.get_buffer().unwrap().len() < 5 + compressible.len());
        assert_eq!(col.get(1).unwrap(), bytes(&compressible));
        assert_eq!(col.get(2).unwrap(), bytes(&repeated));

        let reader = NonFixedColumn::read_only(
            StorageFormat::RowMajor,
            4,
            NullTracker::read_only(3, 3, None),
            Bytes::copy_from_slice(col.get_buffer().unwrap()),
            Bytes::copy_from_slice(col.lengths_buffer().unwrap().unwrap()),
            col.toast_buffer().map(Bytes::copy_from_slice),
        )
        .unwrap();
        assert_eq!(reader.toast_count(), 2);
        assert_eq!(reader.get(0).unwrap(), bytes("short"));
        assert_eq!(reader.get(2).unwrap(), bytes(&repeated));
    }

    #[test]
    fn test_read_only_validation() {
        let short_lengths = NonFixedColumn::read_only(
            StorageFormat::Columnar,
            4,
            NullTracker::read_only(2, 2, None),
            Bytes::from_static(b"abc"),
            Bytes::from(vec![0, 0, 0, 0, 1, 0, 0, 0]),
            None,
        );
        assert!(matches!(short_lengths, Err(Error::InvalidFormat(_))));

        let past_end = NonFixedColumn::read_only(
            StorageFormat::RowMajor,
            4,
            NullTracker::read_only(1, 1, None),
            Bytes::from_static(b"abc"),
            Bytes::from(vec![9, 0, 0, 0]),
            None,
        );
        assert!(matches!(past_end, Err(Error::InvalidFormat(_))));
    }
}
