use super::{type_mismatch, Buffer, Column, NullTracker};
use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::format::StorageFormat;
use crate::types::{ColumnType, Datum};
use bytes::Bytes;
use std::fmt;
use std::marker::PhantomData;

/// Primitive stored little endian at a fixed width.
pub trait FixedValue: Copy + Default + Send + fmt::Debug + 'static {
    const WIDTH: usize;

    fn from_datum(datum: &Datum) -> Option<Self>;
    fn to_datum(self) -> Datum;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(raw: &[u8]) -> Self;
}

macro_rules! impl_fixed_value {
    ($ty:ty, $variant:ident) => {
        impl FixedValue for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn from_datum(datum: &Datum) -> Option<Self> {
                match datum {
                    Datum::$variant(v) => Some(*v),
                    _ => None,
                }
            }

            fn to_datum(self) -> Datum {
                Datum::$variant(self)
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(raw: &[u8]) -> Self {
                let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                bytes.copy_from_slice(&raw[..Self::WIDTH]);
                <$ty>::from_le_bytes(bytes)
            }
        }
    };
}

impl_fixed_value!(i8, Int8);
impl_fixed_value!(i16, Int16);
impl_fixed_value!(i32, Int32);
impl_fixed_value!(i64, Int64);
impl_fixed_value!(f32, Float32);
impl_fixed_value!(f64, Float64);

/// Fixed-width values. Row-major keeps only non-null values; columnar keeps
/// a zeroed slot for every NULL row.
pub struct FixedColumn<T: FixedValue> {
    ty: ColumnType,
    format: StorageFormat,
    align: usize,
    nulls: NullTracker,
    data: Buffer,
    _marker: PhantomData<T>,
}

impl<T: FixedValue> fmt::Debug for FixedColumn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedColumn")
            .field("ty", &self.ty)
            .field("format", &self.format)
            .field("rows", &self.nulls.rows())
            .field("non_null_rows", &self.nulls.non_null_rows())
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl<T: FixedValue> FixedColumn<T> {
    pub fn new(ty: ColumnType, format: StorageFormat, align: usize) -> Self {
        Self {
            ty,
            format,
            align,
            nulls: NullTracker::default(),
            data: Buffer::Owned(Vec::new()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn read_only(
        ty: ColumnType,
        format: StorageFormat,
        align: usize,
        nulls: NullTracker,
        data: Bytes,
    ) -> Result<Self> {
        let slots = match format {
            StorageFormat::RowMajor => nulls.non_null_rows(),
            StorageFormat::Columnar => nulls.rows(),
        };
        if data.len() < slots * T::WIDTH {
            return Err(Error::InvalidFormat(format!(
                "{:?} DATA of {} bytes holds fewer than {} values",
                ty,
                data.len(),
                slots
            )));
        }
        Ok(Self {
            ty,
            format,
            align,
            nulls,
            data: Buffer::Shared(data),
            _marker: PhantomData,
        })
    }

    pub(crate) fn push_value(&mut self, value: T) -> Result<()> {
        value.write_le(self.data.owned_mut()?);
        self.nulls.push_value();
        Ok(())
    }

    /// Typed value of `row`, `None` for NULL.
    pub fn value(&self, row: usize) -> Result<Option<T>> {
        if !self.nulls.check(row)? {
            return Ok(None);
        }
        let start = self.nulls.slot(self.format, row) * T::WIDTH;
        let raw = self
            .data
            .as_slice()
            .get(start..start + T::WIDTH)
            .ok_or_else(|| Error::out_of_range(start + T::WIDTH, self.data.len()))?;
        Ok(Some(T::read_le(raw)))
    }
}

impl<T: FixedValue> Column for FixedColumn<T> {
    fn column_type(&self) -> ColumnType {
        self.ty
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
        if value.is_null() {
            return self.append_null();
        }
        let typed = T::from_datum(value).ok_or_else(|| type_mismatch(self.ty, value))?;
        self.push_value(typed)
    }

    fn append_null(&mut self) -> Result<()> {
        if self.format == StorageFormat::Columnar {
            T::default().write_le(self.data.owned_mut()?);
        } else {
            self.data.owned_mut()?;
        }
        self.nulls.push_null()
    }

    fn get(&self, row: usize) -> Result<Datum> {
        Ok(self.value(row)?.map_or(Datum::Null, T::to_datum))
    }

    fn get_buffer(&self) -> Result<&[u8]> {
        Ok(self.data.as_slice())
    }

    fn get_range_buffer(&self, start: usize, len: usize) -> Result<&[u8]> {
        let data = self.data.as_slice();
        let end = (start + len) * T::WIDTH;
        data.get(start * T::WIDTH..end)
            .ok_or_else(|| Error::out_of_range(end, data.len()))
    }

    fn align_size(&self) -> usize {
        self.align
    }

    fn physical_size(&self) -> usize {
        self.data.len() + self.nulls.bitmap_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_skips_null_slots() {
        let mut col = FixedColumn::<i32>::new(ColumnType::Int32, StorageFormat::RowMajor, 4);
        col.append(&Datum::Int32(7)).unwrap();
        col.append_null().unwrap();
        col.append(&Datum::Int32(-3)).unwrap();

        assert_eq!(col.rows(), 3);
        assert_eq!(col.non_null_rows(), 2);
        assert!(col.has_null());
        assert_eq!(col.get_buffer().unwrap().len(), 8);
        assert_eq!(col.get(0).unwrap(), Datum::Int32(7));
        assert_eq!(col.get(1).unwrap(), Datum::Null);
        assert_eq!(col.get(2).unwrap(), Datum::Int32(-3));
        assert_eq!(col.get_range_buffer(1, 1).unwrap(), &(-3i32).to_le_bytes());
        assert!(col.get(3).is_err());
    }

    #[test]
    fn test_columnar_keeps_zeroed_null_slots() {
        let mut col = FixedColumn::<f64>::new(ColumnType::Float64, StorageFormat::Columnar, 8);
        col.append_null().unwrap();
        col.append(&Datum::Float64(1.5)).unwrap();
        assert_eq!(col.get_buffer().unwrap().len(), 16);
        assert_eq!(&col.get_buffer().unwrap()[..8], &[0u8; 8]);
        assert_eq!(col.get(1).unwrap(), Datum::Float64(1.5));
    }

    #[test]
    fn test_type_mismatch() {
        let mut col = FixedColumn::<i64>::new(ColumnType::Int64, StorageFormat::RowMajor, 8);
        assert!(matches!(
            col.append(&Datum::Int32(1)),
            Err(Error::SchemaNotMatch(_))
        ));
        assert_eq!(col.rows(), 0);
    }

    #[test]
    fn test_read_only_rejects_append() {
        let data = Bytes::from(vec![1, 0, 2, 0]);
        let nulls = NullTracker::read_only(2, 2, None);
        let mut col =
            FixedColumn::<i16>::read_only(ColumnType::Int16, StorageFormat::RowMajor, 2, nulls, data)
                .unwrap();
        assert_eq!(col.get(1).unwrap(), Datum::Int16(2));
        assert!(matches!(col.append(&Datum::Int16(3)), Err(Error::Logic(_))));
        assert!(matches!(col.append_null(), Err(Error::Logic(_))));

        let short = NullTracker::read_only(3, 3, None);
        assert!(FixedColumn::<i16>::read_only(
            ColumnType::Int16,
            StorageFormat::RowMajor,
            2,
            short,
            Bytes::from(vec![0u8; 4])
        )
        .is_err());
    }
}
