//! Column set and the stripe buffer packer.
//!
//! Packing measures every stream first, allocates the stripe buffer once at
//! its exact size and then writes the streams through in column order. A
//! stream's `length` counts its trailing `padding` bytes.

use super::Column;
use crate::encoding::EncodingKind;
use crate::error::{Error, Result};
use crate::format::{
    ColumnEncoding, StorageFormat, Stream, StreamKind, StripeFooter, MEMORY_ALIGN_SIZE,
    NO_ENCODE_ORIGIN_LEN,
};
use std::borrow::Cow;

/// Packed stream data of one stripe and the footer describing it.
#[derive(Debug)]
pub struct PackedStripe {
    pub data: Vec<u8>,
    pub footer: StripeFooter,
}

struct Segment<'a> {
    stream: Stream,
    content: Cow<'a, [u8]>,
}

/// Index-aligned columns of one stripe. `None` marks a dropped column on
/// write and an unprojected column on read.
#[derive(Debug)]
pub struct ColumnSet {
    format: StorageFormat,
    columns: Vec<Option<Box<dyn Column>>>,
}

impl ColumnSet {
    pub fn new(format: StorageFormat) -> Self {
        Self {
            format,
            columns: Vec::new(),
        }
    }

    pub fn with_columns(format: StorageFormat, columns: Vec<Option<Box<dyn Column>>>) -> Self {
        Self { format, columns }
    }

    pub fn storage_format(&self) -> StorageFormat {
        self.format
    }

    pub fn push(&mut self, column: Option<Box<dyn Column>>) {
        self.columns.push(column);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<&dyn Column> {
        self.columns.get(index)?.as_deref()
    }

    pub fn column_mut(&mut self, index: usize) -> Option<&mut Box<dyn Column>> {
        self.columns.get_mut(index)?.as_mut()
    }

    pub fn columns(&self) -> &[Option<Box<dyn Column>>] {
        &self.columns
    }

    /// Row count, taken from the first present column.
    pub fn rows(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .map(|c| c.rows())
            .next()
            .unwrap_or(0)
    }

    pub fn physical_size(&self) -> usize {
        self.columns.iter().flatten().map(|c| c.physical_size()).sum()
    }

    /// DATA buffer of the column at `position`.
    pub fn get_buffer(&self, position: usize) -> Result<&[u8]> {
        match self.columns.get(position) {
            None => Err(Error::out_of_range(position, self.columns.len())),
            Some(None) => Err(Error::Logic(format!("column {} is not present", position))),
            Some(Some(column)) => column.get_buffer(),
        }
    }

    pub fn get_range_buffer(&self, _start: usize, _len: usize) -> Result<&[u8]> {
        Err(Error::Logic(
            "range buffers are only defined per column".to_string(),
        ))
    }

    pub fn pack(&self) -> Result<PackedStripe> {
        let mut segments = Vec::new();
        let mut encodings = Vec::new();
        let mut buffer_len = 0usize;

        for column in self.columns.iter().flatten() {
            let column = column.as_ref();
            match self.format {
                StorageFormat::RowMajor => {
                    self.measure_row_major(column, &mut segments, &mut buffer_len)?
                }
                StorageFormat::Columnar => {
                    self.measure_columnar(column, &mut segments, &mut buffer_len)?
                }
            }
            encodings.push(column_encoding(column)?);
        }

        let mut data = Vec::with_capacity(buffer_len);
        let mut streams = Vec::with_capacity(segments.len());
        for segment in segments {
            data.extend_from_slice(&segment.content);
            let padding = segment.stream.length as usize - segment.content.len();
            data.resize(data.len() + padding, 0);
            streams.push(segment.stream);
        }
        debug_assert_eq!(data.len(), buffer_len);

        Ok(PackedStripe {
            data,
            footer: StripeFooter {
                streams,
                col_encodings: encodings,
            },
        })
    }

    fn measure_row_major<'a>(
        &self,
        column: &'a dyn Column,
        segments: &mut Vec<Segment<'a>>,
        buffer_len: &mut usize,
    ) -> Result<()> {
        let rows = column.rows();
        let non_null = column.non_null_rows();
        let mut push = |buffer_len: &mut usize, kind, rows, content: Cow<'a, [u8]>, padding: usize| {
            let length = content.len() + padding;
            *buffer_len += length;
            segments.push(Segment {
                stream: Stream::new(kind, rows as u64, length as u64, padding as u32),
                content,
            });
        };

        if let Some(present) = present_bytes(column) {
            push(buffer_len, StreamKind::Present, rows, Cow::Owned(present), 0);
        }
        if column.toast_count() > 0 {
            if let Some(toast) = column.toast_buffer() {
                push(buffer_len, StreamKind::Toast, column.toast_count(), Cow::Borrowed(toast), 0);
            }
        }
        if let Some(lengths) = column.lengths_buffer()? {
            let align = column.align_size().max(1);
            let end = *buffer_len + lengths.len();
            let padding = end.next_multiple_of(align) - end;
            push(buffer_len, StreamKind::Length, non_null, Cow::Borrowed(lengths), padding);
        }
        push(buffer_len, StreamKind::Data, non_null, Cow::Borrowed(column.get_buffer()?), 0);
        Ok(())
    }

    fn measure_columnar<'a>(
        &self,
        column: &'a dyn Column,
        segments: &mut Vec<Segment<'a>>,
        buffer_len: &mut usize,
    ) -> Result<()> {
        let rows = column.rows();
        let non_null = column.non_null_rows();
        let mut push = |kind, rows, content: Cow<'a, [u8]>, pad: bool| {
            let length = if pad {
                content.len().next_multiple_of(MEMORY_ALIGN_SIZE)
            } else {
                content.len()
            };
            *buffer_len += length;
            segments.push(Segment {
                stream: Stream::new(
                    kind,
                    rows as u64,
                    length as u64,
                    (length - content.len()) as u32,
                ),
                content,
            });
        };

        if let Some(present) = present_bytes(column) {
            push(StreamKind::Present, rows, Cow::Owned(present), true);
        }
        if column.toast_count() > 0 {
            if let Some(toast) = column.toast_buffer() {
                push(StreamKind::Toast, column.toast_count(), Cow::Borrowed(toast), true);
            }
        }
        if let Some(lengths) = column.lengths_buffer()? {
            push(StreamKind::Length, rows, Cow::Borrowed(lengths), true);
        }
        let pad_data = column.encoding() == EncodingKind::NoEncoded;
        push(StreamKind::Data, non_null, Cow::Borrowed(column.get_buffer()?), pad_data);
        Ok(())
    }
}

fn present_bytes(column: &dyn Column) -> Option<Vec<u8>> {
    if !column.has_null() {
        return None;
    }
    column
        .null_bitmap()
        .map(|bitmap| bitmap.to_stored_bytes(column.rows()))
}

fn column_encoding(column: &dyn Column) -> Result<ColumnEncoding> {
    let check = |kind: EncodingKind, origin: i64, what: &str| {
        if kind == EncodingKind::DefEncoded {
            return Err(Error::Logic(format!("unresolved default encoding on {}", what)));
        }
        if kind != EncodingKind::NoEncoded && origin == NO_ENCODE_ORIGIN_LEN {
            return Err(Error::Logic(format!(
                "{:?} {} stream without origin length",
                kind, what
            )));
        }
        Ok(())
    };
    let (kind, origin) = (column.encoding(), column.origin_length());
    let (lengths_kind, lengths_origin) = (column.lengths_encoding(), column.lengths_origin_length());
    check(kind, origin, "data")?;
    check(lengths_kind, lengths_origin, "lengths")?;

    let mut encoding = ColumnEncoding {
        compress_lvl: column.compress_level(),
        length: origin,
        lengths_level: column.lengths_level(),
        lengths_origin_length: lengths_origin,
        ..Default::default()
    };
    encoding.set_kind(kind);
    encoding.set_lengths_kind(lengths_kind);
    Ok(encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{new_column, FixedColumn, NonFixedColumn};
    use crate::encoding::EncodingOption;
    use crate::toast::ToastOptions;
    use crate::types::{ColumnDesc, ColumnType, Datum, TypeAlign};

    fn int_column(format: StorageFormat, values: &[Option<i32>]) -> Box<dyn Column> {
        let mut col = FixedColumn::<i32>::new(ColumnType::Int32, format, 4);
        for v in values {
            match v {
                Some(v) => col.append(&Datum::Int32(*v)).unwrap(),
                None => col.append_null().unwrap(),
            }
        }
        Box::new(col)
    }

    fn bytes_column(format: StorageFormat, align: usize, values: &[Option<&str>]) -> Box<dyn Column> {
        let mut col = NonFixedColumn::new(format, align, None);
        for v in values {
            match v {
                Some(v) => col.append(&Datum::Bytes(v.as_bytes().to_vec())).unwrap(),
                None => col.append_null().unwrap(),
            }
        }
        Box::new(col)
    }

    fn kinds(footer: &StripeFooter) -> Vec<StreamKind> {
        footer.streams.iter().map(|s| s.kind()).collect()
    }

    #[test]
    fn test_row_major_layout() {
        let format = StorageFormat::RowMajor;
        let set = ColumnSet::with_columns(
            format,
            vec![
                Some(int_column(format, &[Some(1), None, Some(3)])),
                None,
                Some(bytes_column(format, 8, &[Some("abc"), Some("de"), None])),
            ],
        );
        let packed = set.pack().unwrap();
        let footer = &packed.footer;
        assert_eq!(
            kinds(footer),
            vec![
                StreamKind::Present,
                StreamKind::Data,
                StreamKind::Present,
                StreamKind::Length,
                StreamKind::Data
            ]
        );
        assert_eq!(footer.col_encodings.len(), 2);

        // present(1) + data(8) + present(1) = 10; lengths(8) padded to 24.
        let lengths = &footer.streams[3];
        assert_eq!(lengths.rows, 2);
        assert_eq!(lengths.padding, 6);
        assert_eq!(lengths.length, 14);
        assert_eq!(footer.streams[0].rows, 3);
        assert_eq!(footer.streams[1].rows, 2);

        let total: u64 = footer.streams.iter().map(|s| s.length).sum();
        assert_eq!(total as usize, packed.data.len());
        assert_eq!(&packed.data[24..], b"abcde");
        assert_eq!(packed.data[0], 0b010);
    }

    #[test]
    fn test_columnar_layout_pads_to_eight() {
        let format = StorageFormat::Columnar;
        let set = ColumnSet::with_columns(
            format,
            vec![
                Some(int_column(format, &[Some(1), None, Some(3)])),
                Some(bytes_column(format, 4, &[Some("abc"), None, Some("z")])),
            ],
        );
        let packed = set.pack().unwrap();
        for stream in &packed.footer.streams {
            assert_eq!(stream.length % 8, 0, "{:?}", stream);
        }
        let lengths = &packed.footer.streams[3];
        assert_eq!(lengths.kind(), StreamKind::Length);
        assert_eq!(lengths.rows, 3);
        assert_eq!(lengths.payload_length(), 16);
        assert_eq!(packed.footer.streams[1].rows, 2);
        assert_eq!(packed.footer.streams[1].payload_length(), 12);
    }

    #[test]
    fn test_encoded_column_descriptor() {
        let desc = ColumnDesc::new("id", ColumnType::Int64).with_align(TypeAlign::Double);
        let mut col = new_column(
            &desc,
            StorageFormat::Columnar,
            &EncodingOption::default(),
            &ToastOptions::default(),
        );
        for i in 0..10 {
            col.append(&Datum::Int64(i)).unwrap();
        }
        let set = ColumnSet::with_columns(StorageFormat::Columnar, vec![Some(col)]);
        let packed = set.pack().unwrap();
        let encoding = &packed.footer.col_encodings[0];
        assert_eq!(encoding.kind(), EncodingKind::RleV2);
        assert_eq!(encoding.length, 80);
        assert_eq!(encoding.lengths_origin_length, NO_ENCODE_ORIGIN_LEN);
        let data = &packed.footer.streams[0];
        assert_eq!(data.padding, 0);
        assert_eq!(data.length as usize, packed.data.len());
    }

    #[test]
    fn test_get_buffer_positions() {
        let format = StorageFormat::RowMajor;
        let set = ColumnSet::with_columns(format, vec![Some(int_column(format, &[Some(5)])), None]);
        assert_eq!(set.get_buffer(0).unwrap(), &5i32.to_le_bytes());
        assert!(matches!(set.get_buffer(1), Err(Error::Logic(_))));
        assert!(matches!(set.get_buffer(2), Err(Error::OutOfRange(_))));
        assert!(matches!(set.get_range_buffer(0, 1), Err(Error::Logic(_))));
        assert_eq!(set.rows(), 1);
    }

    #[test]
    fn test_empty_set_packs_nothing() {
        let packed = ColumnSet::new(StorageFormat::RowMajor).pack().unwrap();
        assert!(packed.data.is_empty());
        assert!(packed.footer.streams.is_empty());
    }
}
