//! Growable bit vector used for null tracking and tombstones.
//!
//! Bit `i` lives in byte `i / 8` at position `i % 8` (least significant bit
//! first). A bitmap is either owned and growable, or a read-only view over a
//! shared buffer taken from a stripe read; mutating a view is a logic error.

use crate::error::{Error, Result};
use bytes::Bytes;

const BITS_TABLE: [u8; 256] = build_bits_table();

const fn build_bits_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u32).count_ones() as u8;
        i += 1;
    }
    table
}

#[derive(Debug, Clone)]
enum Storage {
    Owned(Vec<u8>),
    Shared(Bytes),
}

#[derive(Debug, Clone)]
pub struct Bitmap {
    storage: Storage,
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.raw() == other.raw()
    }
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            storage: Storage::Owned(Vec::new()),
        }
    }

    /// Owned bitmap with room for `bits` bits, all clear.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            storage: Storage::Owned(vec![0u8; Self::minimal_stored_bytes(bits)]),
        }
    }

    pub fn from_vec(raw: Vec<u8>) -> Self {
        Self {
            storage: Storage::Owned(raw),
        }
    }

    /// Immutable view over externally owned bytes.
    pub fn read_only(raw: Bytes) -> Self {
        Self {
            storage: Storage::Shared(raw),
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.storage, Storage::Shared(_))
    }

    pub fn raw(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(v) => v,
            Storage::Shared(b) => b,
        }
    }

    /// Number of addressable bits.
    pub fn capacity(&self) -> usize {
        self.raw().len() * 8
    }

    pub fn minimal_stored_bytes(rows: usize) -> usize {
        rows.div_ceil(8)
    }

    fn owned_mut(&mut self) -> Result<&mut Vec<u8>> {
        match &mut self.storage {
            Storage::Owned(v) => Ok(v),
            Storage::Shared(_) => Err(Error::Logic(
                "mutating call on a read-only bitmap".to_string(),
            )),
        }
    }

    fn grow_to(&mut self, index: usize) -> Result<&mut Vec<u8>> {
        let raw = self.owned_mut()?;
        let needed = index / 8 + 1;
        if needed > raw.len() {
            let new_len = needed.max(raw.len() * 2);
            raw.resize(new_len, 0);
        }
        Ok(raw)
    }

    pub fn set(&mut self, index: usize) -> Result<()> {
        let raw = self.grow_to(index)?;
        raw[index / 8] |= 1 << (index % 8);
        Ok(())
    }

    pub fn clear(&mut self, index: usize) -> Result<()> {
        let raw = self.owned_mut()?;
        if let Some(byte) = raw.get_mut(index / 8) {
            *byte &= !(1 << (index % 8));
        }
        Ok(())
    }

    pub fn test(&self, index: usize) -> bool {
        match self.raw().get(index / 8) {
            Some(byte) => byte & (1 << (index % 8)) != 0,
            None => false,
        }
    }

    /// Sets every bit in `[0, index]`.
    pub fn set_n(&mut self, index: usize) -> Result<()> {
        let raw = self.grow_to(index)?;
        let full = (index + 1) / 8;
        raw[..full].fill(0xff);
        let rest = (index + 1) % 8;
        if rest != 0 {
            raw[full] |= (1u8 << rest) - 1;
        }
        Ok(())
    }

    /// Clears every bit in `[0, index]`.
    pub fn clear_n(&mut self, index: usize) -> Result<()> {
        let raw = self.owned_mut()?;
        let full = ((index + 1) / 8).min(raw.len());
        raw[..full].fill(0);
        let rest = (index + 1) % 8;
        if rest != 0 && full < raw.len() && full == (index + 1) / 8 {
            raw[full] &= !((1u8 << rest) - 1);
        }
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        self.owned_mut()?.fill(0);
        Ok(())
    }

    /// Number of set bits in the inclusive range `[start, end]`.
    pub fn count_bits(&self, start: usize, end: usize) -> usize {
        let raw = self.raw();
        let cap = raw.len() * 8;
        if cap == 0 || start > end || start >= cap {
            return 0;
        }
        let end = end.min(cap - 1);
        let (first, last) = (start / 8, end / 8);
        let head_mask = 0xffu8 << (start % 8);
        let tail_mask = 0xffu8 >> (7 - end % 8);

        if first == last {
            return BITS_TABLE[(raw[first] & head_mask & tail_mask) as usize] as usize;
        }

        let mut count = BITS_TABLE[(raw[first] & head_mask) as usize] as usize;
        let middle = &raw[first + 1..last];
        let mut words = middle.chunks_exact(8);
        for word in &mut words {
            count += word
                .iter()
                .map(|b| BITS_TABLE[*b as usize] as usize)
                .sum::<usize>();
        }
        count += words
            .remainder()
            .iter()
            .map(|b| BITS_TABLE[*b as usize] as usize)
            .sum::<usize>();
        count + BITS_TABLE[(raw[last] & tail_mask) as usize] as usize
    }

    pub fn count_ones(&self) -> usize {
        self.raw().iter().map(|b| BITS_TABLE[*b as usize] as usize).sum()
    }

    /// True when no bit is set.
    pub fn empty(&self) -> bool {
        self.raw().iter().all(|b| *b == 0)
    }

    /// Copy of the first `rows` bits in their minimal byte length.
    pub fn to_stored_bytes(&self, rows: usize) -> Vec<u8> {
        let len = Self::minimal_stored_bytes(rows);
        let mut out = vec![0u8; len];
        let raw = self.raw();
        let copy = len.min(raw.len());
        out[..copy].copy_from_slice(&raw[..copy]);
        if rows % 8 != 0 && len > 0 && copy == len {
            out[len - 1] &= (1u8 << (rows % 8)) - 1;
        }
        out
    }
}
