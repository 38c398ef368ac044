//! Oversized variable-length values.
//!
//! A toasted value keeps its slot in the column's DATA stream, but the slot
//! holds either the compressed value or nothing at all when the value lives
//! out of line. The column's TOAST stream records which rows were toasted:
//!
//! ```text
//! [count: u32] [compression: u8] [entry; count] [external payload]
//! entry = [row: u32][kind: u8][raw_len: u32][ext_offset: u32][ext_len: u32]
//! ```
//!
//! All integers are little endian; `ext_offset` is relative to the start of
//! the external payload.

use crate::encoding::{
    block_compressor, compress_buffer, decompress_buffer, BlockCompressor, EncodingKind,
    DEFAULT_COMPRESS_LEVEL,
};
use crate::error::{Error, Result};
use crate::types::StorageClass;
use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_TOAST_THRESHOLD: usize = 2 * 1024;
const DEFAULT_EXTERNAL_THRESHOLD: usize = 8 * 1024;
const HEADER_SIZE: usize = 5;
const ENTRY_SIZE: usize = 17;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToastOptions {
    pub enabled: bool,
    /// Values longer than this are candidates for toasting.
    pub threshold: usize,
    /// `Extended` values still longer than this after compression move out
    /// of line.
    pub external_threshold: usize,
    pub compression: EncodingKind,
    pub level: i32,
}

impl Default for ToastOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_TOAST_THRESHOLD,
            external_threshold: DEFAULT_EXTERNAL_THRESHOLD,
            compression: EncodingKind::CompressLz4,
            level: DEFAULT_COMPRESS_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ToastKind {
    Compressed = 1,
    External = 2,
    ExternalCompressed = 3,
}

impl ToastKind {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ToastKind::Compressed),
            2 => Ok(ToastKind::External),
            3 => Ok(ToastKind::ExternalCompressed),
            other => Err(Error::InvalidFormat(format!("unknown toast kind {}", other))),
        }
    }

    fn is_compressed(&self) -> bool {
        matches!(self, ToastKind::Compressed | ToastKind::ExternalCompressed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToastEntry {
    pub row: u32,
    pub kind: ToastKind,
    pub raw_len: u32,
    pub ext_offset: u32,
    pub ext_len: u32,
}

/// What a column should store in the value's DATA slot.
#[derive(Debug, PartialEq, Eq)]
pub enum Toasted<'a> {
    Inline(&'a [u8]),
    Compressed(Vec<u8>),
    External,
}

/// Writer-side toast state of one column within one stripe.
#[derive(Debug)]
pub struct Toaster {
    options: ToastOptions,
    storage: StorageClass,
    compressor: Option<Box<dyn BlockCompressor>>,
    entries: Vec<ToastEntry>,
    external: Vec<u8>,
}

impl Toaster {
    /// `None` when the column never toasts.
    pub fn new(options: &ToastOptions, storage: StorageClass) -> Option<Self> {
        if !options.enabled || storage == StorageClass::Plain {
            return None;
        }
        let compressor = block_compressor(options.compression, options.level);
        Some(Self {
            options: options.clone(),
            storage,
            compressor,
            entries: Vec::new(),
            external: Vec::new(),
        })
    }

    /// Decides how `value` at `row` is stored, recording an entry when it
    /// gets toasted.
    pub fn toast<'a>(&mut self, row: usize, value: &'a [u8]) -> Result<Toasted<'a>> {
        if value.len() <= self.options.threshold {
            return Ok(Toasted::Inline(value));
        }
        let compressed = match (&self.compressor, self.storage) {
            (Some(c), StorageClass::Main | StorageClass::Extended) => {
                let packed = compress_buffer(c.as_ref(), value)?;
                (packed.len() < value.len()).then_some(packed)
            }
            _ => None,
        };

        let entry = |kind, ext_offset, ext_len| ToastEntry {
            row: row as u32,
            kind,
            raw_len: value.len() as u32,
            ext_offset,
            ext_len,
        };
        match (self.storage, compressed) {
            (StorageClass::External, _) => {
                let offset = self.push_external(value);
                self.entries.push(entry(ToastKind::External, offset, value.len() as u32));
                Ok(Toasted::External)
            }
            (StorageClass::Extended, Some(packed))
                if packed.len() > self.options.external_threshold =>
            {
                let offset = self.push_external(&packed);
                self.entries
                    .push(entry(ToastKind::ExternalCompressed, offset, packed.len() as u32));
                Ok(Toasted::External)
            }
            (StorageClass::Extended, None) if value.len() > self.options.external_threshold => {
                let offset = self.push_external(value);
                self.entries.push(entry(ToastKind::External, offset, value.len() as u32));
                Ok(Toasted::External)
            }
            (_, Some(packed)) => {
                self.entries.push(entry(ToastKind::Compressed, 0, 0));
                Ok(Toasted::Compressed(packed))
            }
            (_, None) => Ok(Toasted::Inline(value)),
        }
    }

    fn push_external(&mut self, value: &[u8]) -> u32 {
        let offset = self.external.len() as u32;
        self.external.extend_from_slice(value);
        offset
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn external_len(&self) -> usize {
        self.external.len()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_SIZE + self.entries.len() * ENTRY_SIZE + self.external.len(),
        );
        out.put_u32_le(self.entries.len() as u32);
        out.put_u8(self.options.compression as i32 as u8);
        for entry in &self.entries {
            out.put_u32_le(entry.row);
            out.put_u8(entry.kind as u8);
            out.put_u32_le(entry.raw_len);
            out.put_u32_le(entry.ext_offset);
            out.put_u32_le(entry.ext_len);
        }
        out.extend_from_slice(&self.external);
        out
    }
}

/// Reader-side view over a TOAST stream.
#[derive(Debug, Clone)]
pub struct ToastIndex {
    entries: HashMap<u32, ToastEntry>,
    external: Bytes,
    compression: EncodingKind,
}

impl ToastIndex {
    pub fn parse(raw: Bytes) -> Result<Self> {
        let mut cursor = raw.clone();
        if cursor.remaining() < HEADER_SIZE {
            return Err(Error::InvalidFormat("toast stream without header".to_string()));
        }
        let count = cursor.get_u32_le() as usize;
        let compression = EncodingKind::from_wire(cursor.get_u8() as i32)?;
        if cursor.remaining() < count * ENTRY_SIZE {
            return Err(Error::InvalidFormat(format!(
                "toast stream of {} bytes cannot hold {} entries",
                raw.len(),
                count
            )));
        }
        let mut entries = HashMap::with_capacity(count);
        for _ in 0..count {
            let row = cursor.get_u32_le();
            let kind = ToastKind::from_u8(cursor.get_u8())?;
            let entry = ToastEntry {
                row,
                kind,
                raw_len: cursor.get_u32_le(),
                ext_offset: cursor.get_u32_le(),
                ext_len: cursor.get_u32_le(),
            };
            entries.insert(row, entry);
        }
        let external = raw.slice(HEADER_SIZE + count * ENTRY_SIZE..);
        for entry in entries.values() {
            if entry.kind != ToastKind::Compressed
                && (entry.ext_offset as usize + entry.ext_len as usize) > external.len()
            {
                return Err(Error::InvalidFormat(format!(
                    "toast entry for row {} points past the external payload",
                    entry.row
                )));
            }
        }
        Ok(Self {
            entries,
            external,
            compression,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, row: usize) -> Option<&ToastEntry> {
        self.entries.get(&(row as u32))
    }

    /// Original value of `row`, given what its DATA slot holds. Rows that
    /// were not toasted come back unchanged.
    pub fn detoast(&self, row: usize, slot: &[u8]) -> Result<Vec<u8>> {
        let Some(entry) = self.entry(row) else {
            return Ok(slot.to_vec());
        };
        let stored = match entry.kind {
            ToastKind::Compressed => slot,
            ToastKind::External | ToastKind::ExternalCompressed => {
                let start = entry.ext_offset as usize;
                &self.external[start..start + entry.ext_len as usize]
            }
        };
        if !entry.kind.is_compressed() {
            return Ok(stored.to_vec());
        }
        let compressor = block_compressor(self.compression, DEFAULT_COMPRESS_LEVEL).ok_or_else(
            || Error::Compress(format!("toast compression {:?} unavailable", self.compression)),
        )?;
        decompress_buffer(compressor.as_ref(), stored, entry.raw_len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ToastOptions {
        ToastOptions {
            threshold: 64,
            external_threshold: 256,
            ..Default::default()
        }
    }

    fn compressible(len: usize) -> Vec<u8> {
        (0..len).map(|i| b"abcd"[i % 4]).collect()
    }

    fn noisy(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_plain_and_disabled_never_toast() {
        assert!(Toaster::new(&options(), StorageClass::Plain).is_none());
        let disabled = ToastOptions {
            enabled: false,
            ..options()
        };
        assert!(Toaster::new(&disabled, StorageClass::Extended).is_none());
    }

    #[test]
    fn test_small_values_stay_inline() {
        let mut toaster = Toaster::new(&options(), StorageClass::Extended).unwrap();
        let value = compressible(64);
        assert_eq!(toaster.toast(0, &value).unwrap(), Toasted::Inline(&value[..]));
        assert_eq!(toaster.count(), 0);
    }

    #[test]
    fn test_main_compresses_inline() {
        let mut toaster = Toaster::new(&options(), StorageClass::Main).unwrap();
        let value = compressible(4096);
        let Toasted::Compressed(packed) = toaster.toast(3, &value).unwrap() else {
            panic!("expected inline compression");
        };
        assert!(packed.len() < value.len());

        let index = ToastIndex::parse(Bytes::from(toaster.serialize())).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entry(3).unwrap().kind, ToastKind::Compressed);
        assert_eq!(index.detoast(3, &packed).unwrap(), value);
        assert_eq!(index.detoast(4, b"plain").unwrap(), b"plain".to_vec());
    }

    #[test]
    fn test_main_keeps_incompressible_inline() {
        let mut toaster = Toaster::new(&options(), StorageClass::Main).unwrap();
        let value = noisy(512);
        assert_eq!(toaster.toast(0, &value).unwrap(), Toasted::Inline(&value[..]));
    }

    #[test]
    fn test_external_and_extended_move_out_of_line() {
        let mut toaster = Toaster::new(&options(), StorageClass::Extended).unwrap();
        let big = noisy(1024);
        let packable = compressible(100_000);
        assert_eq!(toaster.toast(1, &big).unwrap(), Toasted::External);
        assert_eq!(toaster.toast(2, &packable).unwrap(), Toasted::External);

        let mut external = Toaster::new(&options(), StorageClass::External).unwrap();
        assert_eq!(external.toast(0, &packable[..100]).unwrap(), Toasted::External);

        let index = ToastIndex::parse(Bytes::from(toaster.serialize())).unwrap();
        assert_eq!(index.entry(1).unwrap().kind, ToastKind::External);
        assert_eq!(index.entry(2).unwrap().kind, ToastKind::ExternalCompressed);
        assert_eq!(index.detoast(1, &[]).unwrap(), big);
        assert_eq!(index.detoast(2, &[]).unwrap(), packable);
    }

    #[test]
    fn test_parse_rejects_truncated_streams() {
        assert!(ToastIndex::parse(Bytes::from_static(&[1, 0])).is_err());
        assert!(ToastIndex::parse(Bytes::from_static(&[2, 0, 0, 0, 4, 0])).is_err());
        assert!(ToastIndex::parse(Bytes::from_static(&[0, 0, 0, 0, 99])).is_err());
        let mut raw = vec![1, 0, 0, 0, 4];
        raw.extend_from_slice(&[0, 0, 0, 0, 2, 10, 0, 0, 0, 0, 0, 0, 0, 10, 0, 0, 0]);
        assert!(ToastIndex::parse(Bytes::from(raw)).is_err());
    }
}
