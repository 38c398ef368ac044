//! Codec framework.
//!
//! Two families exist side by side: streaming integer encoders that take one
//! value at a time (`RleV2`, `DirectDelta`) and block compressors that work
//! on a fully materialized buffer (`zstd`, `lz4`, `snappy`). A column uses at
//! most one of them; when neither applies to the configured kind the column
//! stays unencoded.

pub mod compress;
pub mod delta;
pub mod rle;

use crate::error::{Error, Result};
use crate::types::ColumnType;
use bytes::BufMut;
use serde::{Deserialize, Serialize};

pub use compress::{block_compressor, BlockCompressor};
pub use delta::{DirectDeltaDecoder, DirectDeltaEncoder};
pub use rle::{RleV2Decoder, RleV2Encoder};

pub const DEFAULT_COMPRESS_LEVEL: i32 = 3;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    prost::Enumeration,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum EncodingKind {
    NoEncoded = 0,
    RleV2 = 1,
    DirectDelta = 2,
    CompressZstd = 3,
    CompressLz4 = 4,
    CompressSnappy = 5,
    /// Placeholder resolved per column type before anything is written.
    DefEncoded = 6,
}

impl EncodingKind {
    pub fn is_streaming(&self) -> bool {
        matches!(self, EncodingKind::RleV2 | EncodingKind::DirectDelta)
    }

    pub fn is_block(&self) -> bool {
        matches!(
            self,
            EncodingKind::CompressZstd | EncodingKind::CompressLz4 | EncodingKind::CompressSnappy
        )
    }

    pub fn from_wire(value: i32) -> Result<Self> {
        EncodingKind::try_from(value)
            .map_err(|_| Error::InvalidFormat(format!("unknown encoding kind {}", value)))
    }

    fn default_block() -> Self {
        if cfg!(feature = "zstd-compression") {
            EncodingKind::CompressZstd
        } else {
            EncodingKind::CompressLz4
        }
    }
}

/// Per-column encoding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingOption {
    pub kind: EncodingKind,
    pub level: i32,
    /// Encoding of the lengths/offsets stream of variable-width columns.
    pub lengths_kind: EncodingKind,
    pub lengths_level: i32,
}

impl Default for EncodingOption {
    fn default() -> Self {
        Self {
            kind: EncodingKind::DefEncoded,
            level: DEFAULT_COMPRESS_LEVEL,
            lengths_kind: EncodingKind::DefEncoded,
            lengths_level: DEFAULT_COMPRESS_LEVEL,
        }
    }
}

impl EncodingOption {
    pub fn new(kind: EncodingKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn no_encoded() -> Self {
        Self {
            kind: EncodingKind::NoEncoded,
            lengths_kind: EncodingKind::NoEncoded,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_lengths(mut self, kind: EncodingKind, level: i32) -> Self {
        self.lengths_kind = kind;
        self.lengths_level = level;
        self
    }

    /// Replaces `DefEncoded` with the concrete kind used for `ty`. Integer
    /// streaming kinds requested for non-integer columns and block kinds
    /// compiled out of this build degrade to `NoEncoded`.
    pub fn resolve(&self, ty: &ColumnType) -> Self {
        let mut resolved = *self;
        if resolved.kind == EncodingKind::DefEncoded {
            resolved.kind = match ty {
                t if t.is_integer() => EncodingKind::RleV2,
                ColumnType::Bytes | ColumnType::Decimal { .. } => EncodingKind::default_block(),
                _ => EncodingKind::NoEncoded,
            };
        }
        if resolved.kind.is_streaming() && !ty.is_integer() {
            tracing::debug!(kind = ?resolved.kind, ty = ?ty, "streaming encoding degraded to none");
            resolved.kind = EncodingKind::NoEncoded;
        }
        if resolved.kind.is_block() && block_compressor(resolved.kind, resolved.level).is_none() {
            tracing::debug!(kind = ?resolved.kind, ty = ?ty, "block compressor unavailable, column left unencoded");
            resolved.kind = EncodingKind::NoEncoded;
        }
        if resolved.lengths_kind == EncodingKind::DefEncoded {
            resolved.lengths_kind = EncodingKind::RleV2;
        }
        if resolved.lengths_kind.is_block()
            && block_compressor(resolved.lengths_kind, resolved.lengths_level).is_none()
        {
            tracing::debug!(kind = ?resolved.lengths_kind, "block compressor unavailable, lengths left unencoded");
            resolved.lengths_kind = EncodingKind::NoEncoded;
        }
        resolved
    }
}

pub trait StreamEncoder: Send + std::fmt::Debug {
    fn append(&mut self, value: i64);

    /// Emits everything still buffered.
    fn flush(&mut self);

    /// Hands the encoded bytes to the caller, leaving the encoder empty.
    fn take_buffer(&mut self) -> Vec<u8>;

    fn kind(&self) -> EncodingKind;
}

pub trait StreamDecoder: Send + std::fmt::Debug {
    fn decode(&self, input: &[u8], out: &mut Vec<i64>) -> Result<()>;

    fn kind(&self) -> EncodingKind;
}

pub fn stream_encoder(kind: EncodingKind, is_sign: bool) -> Option<Box<dyn StreamEncoder>> {
    match kind {
        EncodingKind::RleV2 => Some(Box::new(RleV2Encoder::new(is_sign))),
        EncodingKind::DirectDelta => Some(Box::new(DirectDeltaEncoder::new())),
        _ => None,
    }
}

pub fn stream_decoder(kind: EncodingKind, is_sign: bool) -> Option<Box<dyn StreamDecoder>> {
    match kind {
        EncodingKind::RleV2 => Some(Box::new(RleV2Decoder::new(is_sign))),
        EncodingKind::DirectDelta => Some(Box::new(DirectDeltaDecoder)),
        _ => None,
    }
}

/// Runs `values` through a streaming encoder in one go.
pub fn encode_integers(
    encoder: &mut dyn StreamEncoder,
    values: impl IntoIterator<Item = i64>,
) -> Vec<u8> {
    for value in values {
        encoder.append(value);
    }
    encoder.flush();
    encoder.take_buffer()
}

/// Compresses `src` into a fresh buffer sized by the compressor bound.
pub fn compress_buffer(compressor: &dyn BlockCompressor, src: &[u8]) -> Result<Vec<u8>> {
    let mut dst = vec![0u8; compressor.compress_bound(src.len())];
    let written = compressor.compress(src, &mut dst)?;
    if written > dst.len() {
        return Err(Error::Compress(format!(
            "{:?} reported {} bytes into a {} byte buffer",
            compressor.kind(),
            written,
            dst.len()
        )));
    }
    dst.truncate(written);
    Ok(dst)
}

/// Decompresses `src` into a buffer of exactly `origin_len` bytes.
pub fn decompress_buffer(
    compressor: &dyn BlockCompressor,
    src: &[u8],
    origin_len: usize,
) -> Result<Vec<u8>> {
    let mut dst = vec![0u8; origin_len];
    let written = compressor.decompress(src, &mut dst)?;
    if written != origin_len {
        return Err(Error::Compress(format!(
            "{:?} produced {} bytes, expected {}",
            compressor.kind(),
            written,
            origin_len
        )));
    }
    Ok(dst)
}

pub(crate) fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub(crate) fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub(crate) fn write_uvarint(out: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        out.put_u8((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

pub(crate) fn write_svarint(out: &mut impl BufMut, value: i64) {
    write_uvarint(out, zigzag_encode(value));
}

pub(crate) fn read_uvarint(input: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;
    loop {
        let byte = *input
            .get(*pos)
            .ok_or_else(|| Error::InvalidFormat("truncated varint".to_string()))?;
        *pos += 1;
        if shift >= 64 {
            return Err(Error::InvalidFormat("varint too long".to_string()));
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

pub(crate) fn read_svarint(input: &[u8], pos: &mut usize) -> Result<i64> {
    read_uvarint(input, pos).map(zigzag_decode)
}
