//! On-disk metadata messages.
//!
//! A micro-partition file is laid out as
//! `[stripe]* [Footer] [PostScript] [u64 postscript length, little endian]`,
//! each stripe being its stream data followed by a `StripeFooter`.

use crate::encoding::EncodingKind;
use prost::Message;
use serde::Serialize;

pub const MAGIC: &str = "PAXC";
pub const MAJOR_VERSION: u32 = 1;
pub const MINOR_VERSION: u32 = 0;
pub const WRITER_ID: u32 = 1;
/// Width of the trailing postscript length.
pub const POST_SCRIPT_SIZE: usize = 8;
pub const MEMORY_ALIGN_SIZE: usize = 8;
/// Origin length recorded for streams that were stored as is.
pub const NO_ENCODE_ORIGIN_LEN: i64 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize)]
#[repr(i32)]
pub enum TypeKind {
    Boolean = 0,
    Byte = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    Double = 6,
    String = 7,
    Struct = 12,
    Decimal = 14,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum StorageFormat {
    /// Only non-null values are stored, lengths stream per value.
    RowMajor = 0,
    /// One slot per row, every stream 8-byte aligned.
    Columnar = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize)]
#[repr(i32)]
pub enum StreamKind {
    Present = 0,
    Length = 1,
    Data = 2,
    Toast = 3,
}

#[derive(Clone, PartialEq, Message)]
pub struct PostScript {
    #[prost(uint64, tag = "1")]
    pub footer_length: u64,
    #[prost(uint32, tag = "2")]
    pub major_version: u32,
    #[prost(uint32, tag = "3")]
    pub minor_version: u32,
    #[prost(uint32, tag = "4")]
    pub writer: u32,
    #[prost(string, tag = "8000")]
    pub magic: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Type {
    #[prost(enumeration = "TypeKind", tag = "1")]
    pub kind: i32,
    #[prost(uint32, repeated, tag = "2")]
    pub subtypes: Vec<u32>,
    #[prost(uint32, tag = "3")]
    pub precision: u32,
    #[prost(uint32, tag = "4")]
    pub scale: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ColumnDataStats {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub minimal: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub maximum: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ColumnBasicInfo {
    #[prost(uint32, tag = "1")]
    pub typid: u32,
    #[prost(uint32, tag = "2")]
    pub collation: u32,
    #[prost(uint32, tag = "3")]
    pub opfamily: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ColumnStats {
    #[prost(bool, tag = "1")]
    pub all_null: bool,
    #[prost(bool, tag = "2")]
    pub has_null: bool,
    #[prost(message, optional, tag = "3")]
    pub info: Option<ColumnBasicInfo>,
    #[prost(message, optional, tag = "4")]
    pub data_stats: Option<ColumnDataStats>,
}

impl ColumnStats {
    pub fn min_max(&self) -> Option<(&[u8], &[u8])> {
        let data = self.data_stats.as_ref()?;
        match (&data.minimal, &data.maximum) {
            (Some(min), Some(max)) => Some((min.as_slice(), max.as_slice())),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct MicroPartitionStatisticsInfo {
    #[prost(message, repeated, tag = "1")]
    pub column_stats: Vec<ColumnStats>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StripeInformation {
    #[prost(uint64, tag = "1")]
    pub offset: u64,
    #[prost(uint64, tag = "2")]
    pub data_length: u64,
    /// Stream data plus the stripe footer.
    #[prost(uint64, tag = "3")]
    pub footer_length: u64,
    #[prost(uint64, tag = "4")]
    pub number_of_rows: u64,
    #[prost(message, repeated, tag = "5")]
    pub col_stats: Vec<ColumnStats>,
}

impl StripeInformation {
    pub fn stripe_footer_length(&self) -> u64 {
        self.footer_length.saturating_sub(self.data_length)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Footer {
    #[prost(uint64, tag = "1")]
    pub content_length: u64,
    #[prost(uint64, tag = "2")]
    pub number_of_rows: u64,
    #[prost(message, repeated, tag = "3")]
    pub types: Vec<Type>,
    #[prost(message, repeated, tag = "4")]
    pub stripes: Vec<StripeInformation>,
    #[prost(message, repeated, tag = "5")]
    pub col_info: Vec<ColumnBasicInfo>,
    #[prost(enumeration = "StorageFormat", tag = "6")]
    pub storage_format: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Stream {
    #[prost(enumeration = "StreamKind", tag = "1")]
    pub kind: i32,
    #[prost(uint64, tag = "2")]
    pub rows: u64,
    #[prost(uint64, tag = "3")]
    pub length: u64,
    #[prost(uint32, tag = "4")]
    pub padding: u32,
}

impl Stream {
    pub fn new(kind: StreamKind, rows: u64, length: u64, padding: u32) -> Self {
        Self {
            kind: kind as i32,
            rows,
            length,
            padding,
        }
    }

    /// Bytes of stream content; `length` also counts the trailing
    /// `padding` zero bytes.
    pub fn payload_length(&self) -> u64 {
        self.length.saturating_sub(self.padding as u64)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ColumnEncoding {
    #[prost(enumeration = "EncodingKind", tag = "1")]
    pub kind: i32,
    #[prost(int32, tag = "2")]
    pub compress_lvl: i32,
    #[prost(int64, tag = "3")]
    pub length: i64,
    #[prost(enumeration = "EncodingKind", tag = "4")]
    pub lengths_kind: i32,
    #[prost(int32, tag = "5")]
    pub lengths_level: i32,
    #[prost(int64, tag = "6")]
    pub lengths_origin_length: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct StripeFooter {
    #[prost(message, repeated, tag = "1")]
    pub streams: Vec<Stream>,
    #[prost(message, repeated, tag = "2")]
    pub col_encodings: Vec<ColumnEncoding>,
}

pub(crate) fn encode_message<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postscript_round_trip() {
        let ps = PostScript {
            footer_length: 1234,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            writer: WRITER_ID,
            magic: MAGIC.to_string(),
        };
        let raw = encode_message(&ps);
        assert_eq!(PostScript::decode(raw.as_slice()).unwrap(), ps);
    }

    #[test]
    fn test_enumeration_accessors() {
        let mut stream = Stream::new(StreamKind::Toast, 3, 40, 0);
        assert_eq!(stream.kind(), StreamKind::Toast);
        stream.set_kind(StreamKind::Data);
        assert_eq!(stream.kind, StreamKind::Data as i32);

        let mut encoding = ColumnEncoding::default();
        encoding.set_kind(EncodingKind::RleV2);
        encoding.set_lengths_kind(EncodingKind::CompressZstd);
        assert_eq!(encoding.kind(), EncodingKind::RleV2);
        assert_eq!(encoding.lengths_kind(), EncodingKind::CompressZstd);
    }

    #[test]
    fn test_stripe_lengths() {
        let stripe = StripeInformation {
            offset: 0,
            data_length: 100,
            footer_length: 130,
            number_of_rows: 10,
            col_stats: vec![],
        };
        assert_eq!(stripe.stripe_footer_length(), 30);
        let stats = ColumnStats {
            all_null: false,
            has_null: true,
            info: None,
            data_stats: Some(ColumnDataStats {
                minimal: Some(vec![1]),
                maximum: None,
            }),
        };
        assert!(stats.min_max().is_none());
    }
}
