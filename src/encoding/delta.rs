//! Direct delta encoding for slowly changing integers such as offsets.
//!
//! Values are cut into blocks of at most 128. Each block is
//! `[count: u8][base: zigzag varint][width: u8][deltas]`, where the
//! `count - 1` deltas are zigzag encoded and bit-packed least significant
//! bit first at `width` bits each.

use super::{read_svarint, write_svarint, zigzag_decode, zigzag_encode, EncodingKind, StreamDecoder, StreamEncoder};
use crate::error::{Error, Result};
use bytes::BufMut;

const BLOCK_SIZE: usize = 128;

#[derive(Debug, Default)]
pub struct DirectDeltaEncoder {
    buffer: Vec<u8>,
    pending: Vec<i64>,
}

impl DirectDeltaEncoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    fn write_block(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let deltas: Vec<u64> = self
            .pending
            .windows(2)
            .map(|w| zigzag_encode(w[1].wrapping_sub(w[0])))
            .collect();
        let width = deltas
            .iter()
            .map(|d| 64 - d.leading_zeros() as usize)
            .max()
            .unwrap_or(0);

        self.buffer.put_u8(self.pending.len() as u8);
        write_svarint(&mut self.buffer, self.pending[0]);
        self.buffer.put_u8(width as u8);

        let mut acc = 0u128;
        let mut acc_bits = 0usize;
        for delta in deltas {
            acc |= (delta as u128) << acc_bits;
            acc_bits += width;
            while acc_bits >= 8 {
                self.buffer.put_u8(acc as u8);
                acc >>= 8;
                acc_bits -= 8;
            }
        }
        if acc_bits > 0 {
            self.buffer.put_u8(acc as u8);
        }
        self.pending.clear();
    }
}

impl StreamEncoder for DirectDeltaEncoder {
    fn append(&mut self, value: i64) {
        self.pending.push(value);
        if self.pending.len() == BLOCK_SIZE {
            self.write_block();
        }
    }

    fn flush(&mut self) {
        self.write_block();
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::DirectDelta
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDeltaDecoder;

impl StreamDecoder for DirectDeltaDecoder {
    fn decode(&self, input: &[u8], out: &mut Vec<i64>) -> Result<()> {
        let truncated = || Error::InvalidFormat("truncated direct delta block".to_string());
        let mut pos = 0;
        while pos < input.len() {
            let count = input[pos] as usize;
            pos += 1;
            if count == 0 || count > BLOCK_SIZE {
                return Err(Error::InvalidFormat(format!(
                    "direct delta block of {} values",
                    count
                )));
            }
            let mut value = read_svarint(input, &mut pos)?;
            let width = *input.get(pos).ok_or_else(truncated)? as usize;
            pos += 1;
            if width > 64 {
                return Err(Error::InvalidFormat(format!("delta width {}", width)));
            }
            let packed_len = ((count - 1) * width).div_ceil(8);
            let packed = input.get(pos..pos + packed_len).ok_or_else(truncated)?;
            pos += packed_len;

            out.push(value);
            let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
            let mut acc = 0u128;
            let mut acc_bits = 0usize;
            let mut bytes = packed.iter();
            for _ in 1..count {
                while acc_bits < width {
                    let byte = *bytes.next().ok_or_else(truncated)?;
                    acc |= (byte as u128) << acc_bits;
                    acc_bits += 8;
                }
                let delta = (acc as u64) & mask;
                acc >>= width;
                acc_bits -= width;
                value = value.wrapping_add(zigzag_decode(delta));
                out.push(value);
            }
        }
        Ok(())
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::DirectDelta
    }
}
