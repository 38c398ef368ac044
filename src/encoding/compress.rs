use super::EncodingKind;
use crate::error::{Error, Result};
use snap::raw::{Decoder, Encoder};

/// One-shot compressor over a materialized buffer.
///
/// `compress_bound` must be consulted to size the destination of
/// `compress`. Both directions return the number of bytes written.
pub trait BlockCompressor: Send + Sync + std::fmt::Debug {
    fn compress_bound(&self, len: usize) -> usize;
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;
    fn kind(&self) -> EncodingKind;
}

#[cfg(feature = "zstd-compression")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

#[cfg(feature = "zstd-compression")]
impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

#[cfg(feature = "zstd-compression")]
impl BlockCompressor for ZstdCompressor {
    fn compress_bound(&self, len: usize) -> usize {
        zstd::zstd_safe::compress_bound(len)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        zstd::bulk::compress_to_buffer(src, dst, self.level)
            .map_err(|e| Error::Compress(format!("zstd: {}", e)))
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| Error::Compress(format!("zstd: {}", e)))
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::CompressZstd
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor;

impl BlockCompressor for Lz4Compressor {
    fn compress_bound(&self, len: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(len)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        lz4_flex::block::compress_into(src, dst)
            .map_err(|e| Error::Compress(format!("lz4: {}", e)))
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| Error::Compress(format!("lz4: {}", e)))
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::CompressLz4
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SnappyCompressor;

impl BlockCompressor for SnappyCompressor {
    fn compress_bound(&self, len: usize) -> usize {
        snap::raw::max_compress_len(len)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        Encoder::new()
            .compress(src, dst)
            .map_err(|e| Error::Compress(format!("snappy: {}", e)))
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        Decoder::new()
            .decompress(src, dst)
            .map_err(|e| Error::Compress(format!("snappy: {}", e)))
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::CompressSnappy
    }
}

/// Compressor for `kind`, or `None` when the kind is not a block codec or
/// was compiled out.
#[cfg_attr(not(feature = "zstd-compression"), allow(unused_variables))]
pub fn block_compressor(kind: EncodingKind, level: i32) -> Option<Box<dyn BlockCompressor>> {
    match kind {
        #[cfg(feature = "zstd-compression")]
        EncodingKind::CompressZstd => Some(Box::new(ZstdCompressor::new(level))),
        EncodingKind::CompressLz4 => Some(Box::new(Lz4Compressor)),
        EncodingKind::CompressSnappy => Some(Box::new(SnappyCompressor)),
        _ => None,
    }
}
