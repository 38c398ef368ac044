//! Integer run-length encoding, version 2.
//!
//! Values are buffered into runs and emitted with one of three
//! sub-encodings:
//!
//! * `SHORT_REPEAT`: 3..=10 copies of one value,
//!   header `00 www ccc` followed by the value in `www + 1` big-endian bytes.
//! * `DIRECT`: up to 512 values bit-packed at an aligned width,
//!   header `01 wwwww l` + one length byte.
//! * `DELTA`: base value, first delta, then either nothing (fixed delta) or
//!   the absolute remaining deltas bit-packed (monotonic sequences).
//!
//! `PATCHED_BASE` is never produced and rejected on read.

use super::{
    read_svarint, read_uvarint, write_svarint, write_uvarint, zigzag_decode, zigzag_encode,
    EncodingKind, StreamDecoder, StreamEncoder,
};
use crate::error::{Error, Result};

const MIN_REPEAT: usize = 3;
const MAX_SHORT_REPEAT_LENGTH: usize = 10;
const MAX_SCOPE: usize = 512;

const SHORT_REPEAT: u8 = 0;
const DIRECT: u8 = 1;
const PATCHED_BASE: u8 = 2;
const DELTA: u8 = 3;

fn bits_required(value: u64) -> usize {
    64 - value.leading_zeros() as usize
}

fn closest_fixed_bits(n: usize) -> usize {
    match n {
        0 => 1,
        1..=24 => n,
        25..=26 => 26,
        27..=28 => 28,
        29..=30 => 30,
        31..=32 => 32,
        33..=40 => 40,
        41..=48 => 48,
        49..=56 => 56,
        _ => 64,
    }
}

fn closest_aligned_fixed_bits(n: usize) -> usize {
    match n {
        0 | 1 => 1,
        2 => 2,
        3..=4 => 4,
        5..=8 => 8,
        9..=16 => 16,
        17..=24 => 24,
        25..=32 => 32,
        33..=40 => 40,
        41..=48 => 48,
        49..=56 => 56,
        _ => 64,
    }
}

fn encode_bit_width(n: usize) -> u8 {
    match closest_fixed_bits(n) {
        n @ 1..=24 => (n - 1) as u8,
        26 => 24,
        28 => 25,
        30 => 26,
        32 => 27,
        40 => 28,
        48 => 29,
        56 => 30,
        _ => 31,
    }
}

fn decode_bit_width(code: u8) -> usize {
    match code {
        0..=23 => code as usize + 1,
        24 => 26,
        25 => 28,
        26 => 30,
        27 => 32,
        28 => 40,
        29 => 48,
        30 => 56,
        _ => 64,
    }
}

/// Big-endian bit packing, each value taking exactly `bits` bits.
fn write_ints(out: &mut Vec<u8>, values: &[u64], bits: usize) {
    let mut current = 0u8;
    let mut used = 0usize;
    for &value in values {
        let mut remaining = bits;
        while remaining > 0 {
            let avail = 8 - used;
            let take = avail.min(remaining);
            let chunk = ((value >> (remaining - take)) & ((1u64 << take) - 1)) as u8;
            current |= chunk << (avail - take);
            used += take;
            remaining -= take;
            if used == 8 {
                out.push(current);
                current = 0;
                used = 0;
            }
        }
    }
    if used > 0 {
        out.push(current);
    }
}

fn read_ints(
    input: &[u8],
    pos: &mut usize,
    count: usize,
    bits: usize,
    out: &mut Vec<u64>,
) -> Result<()> {
    let needed = (count * bits).div_ceil(8);
    let bytes = input
        .get(*pos..*pos + needed)
        .ok_or_else(|| Error::InvalidFormat("truncated bit-packed run".to_string()))?;
    let mut bit_pos = 0usize;
    for _ in 0..count {
        let mut value = 0u64;
        let mut remaining = bits;
        while remaining > 0 {
            let byte = bytes[bit_pos / 8];
            let avail = 8 - bit_pos % 8;
            let take = avail.min(remaining);
            let chunk = (byte >> (avail - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | chunk as u64;
            remaining -= take;
            bit_pos += take;
        }
        out.push(value);
    }
    *pos += needed;
    Ok(())
}

#[derive(Debug)]
pub struct RleV2Encoder {
    signed: bool,
    buffer: Vec<u8>,
    literals: Vec<i64>,
    fixed_run_length: usize,
    variable_run_length: usize,
    prev_delta: i64,
}

impl RleV2Encoder {
    pub fn new(signed: bool) -> Self {
        Self {
            signed,
            buffer: Vec::new(),
            literals: Vec::with_capacity(MAX_SCOPE),
            fixed_run_length: 0,
            variable_run_length: 0,
            prev_delta: 0,
        }
    }

    fn to_unsigned(&self, value: i64) -> u64 {
        if self.signed {
            zigzag_encode(value)
        } else {
            value as u64
        }
    }

    fn init_literals(&mut self, value: i64) {
        self.literals.push(value);
        self.fixed_run_length = 1;
        self.variable_run_length = 1;
    }

    fn reset(&mut self) {
        self.literals.clear();
        self.fixed_run_length = 0;
        self.variable_run_length = 0;
        self.prev_delta = 0;
    }

    /// Writes a run of identical values.
    fn write_fixed_run(&mut self) {
        match self.literals.len() {
            n if n < MIN_REPEAT => self.write_literals(),
            n if n <= MAX_SHORT_REPEAT_LENGTH => self.write_short_repeat(),
            _ => self.write_delta(Some(0), 0, &[]),
        }
    }

    /// Picks the cheapest sub-encoding for the buffered literals.
    fn write_literals(&mut self) {
        let n = self.literals.len();
        if n == 0 {
            return;
        }
        if n <= MIN_REPEAT {
            self.write_direct();
            return;
        }

        let lits = &self.literals;
        let init_delta = lits[1].wrapping_sub(lits[0]);
        let (mut min, mut max) = (lits[0], lits[0]);
        let (mut increasing, mut decreasing, mut fixed_delta) = (true, true, true);
        let mut delta_max = 0u64;
        let mut adjusted = Vec::with_capacity(n - 2);
        for i in 1..n {
            let (l0, l1) = (lits[i - 1], lits[i]);
            let delta = l1.wrapping_sub(l0);
            min = min.min(l1);
            max = max.max(l1);
            increasing &= l0 <= l1;
            decreasing &= l0 >= l1;
            fixed_delta &= delta == init_delta;
            if i > 1 {
                let abs = delta.unsigned_abs();
                adjusted.push(abs);
                delta_max = delta_max.max(abs);
            }
        }

        if max.checked_sub(min).is_none() {
            self.write_direct();
        } else if min == max {
            self.write_delta(Some(0), 0, &[]);
        } else if fixed_delta {
            self.write_delta(Some(init_delta), 0, &[]);
        } else if init_delta != 0 && (increasing || decreasing) {
            let bits = match closest_aligned_fixed_bits(bits_required(delta_max)) {
                1 => 2,
                b => b,
            };
            self.write_delta(None, bits, &adjusted);
        } else {
            self.write_direct();
        }
    }

    fn write_short_repeat(&mut self) {
        let value = self.to_unsigned(self.literals[0]);
        let width = closest_fixed_bits(bits_required(value)).div_ceil(8);
        let header = (SHORT_REPEAT << 6)
            | (((width - 1) as u8) << 3)
            | (self.literals.len() - MIN_REPEAT) as u8;
        self.buffer.push(header);
        for i in (0..width).rev() {
            self.buffer.push((value >> (i * 8)) as u8);
        }
        self.reset();
    }

    fn write_direct(&mut self) {
        let values: Vec<u64> = self.literals.iter().map(|v| self.to_unsigned(*v)).collect();
        let max = values.iter().copied().max().unwrap_or(0);
        let bits = closest_aligned_fixed_bits(closest_fixed_bits(bits_required(max)));
        let len = values.len() - 1;
        self.buffer
            .push((DIRECT << 6) | (encode_bit_width(bits) << 1) | ((len >> 8) & 1) as u8);
        self.buffer.push((len & 0xff) as u8);
        write_ints(&mut self.buffer, &values, bits);
        self.reset();
    }

    /// `fixed` carries the delta of a fixed-step run; otherwise `deltas`
    /// holds the absolute steps after the first one, packed at `bits`.
    fn write_delta(&mut self, fixed: Option<i64>, bits: usize, deltas: &[u64]) {
        let len = self.literals.len() - 1;
        let width_code = match fixed {
            Some(_) => 0,
            None => encode_bit_width(bits) << 1,
        };
        self.buffer
            .push((DELTA << 6) | width_code | ((len >> 8) & 1) as u8);
        self.buffer.push((len & 0xff) as u8);

        let base = self.literals[0];
        if self.signed {
            write_svarint(&mut self.buffer, base);
        } else {
            write_uvarint(&mut self.buffer, base as u64);
        }
        let first_delta = match fixed {
            Some(delta) => delta,
            None => self.literals[1].wrapping_sub(base),
        };
        write_svarint(&mut self.buffer, first_delta);
        if fixed.is_none() {
            write_ints(&mut self.buffer, deltas, bits);
        }
        self.reset();
    }
}

impl StreamEncoder for RleV2Encoder {
    fn append(&mut self, value: i64) {
        match self.literals.len() {
            0 => self.init_literals(value),
            1 => {
                self.prev_delta = value.wrapping_sub(self.literals[0]);
                self.literals.push(value);
                if value == self.literals[0] {
                    self.fixed_run_length = 2;
                    self.variable_run_length = 0;
                } else {
                    self.fixed_run_length = 0;
                    self.variable_run_length = 2;
                }
            }
            n => {
                let current_delta = value.wrapping_sub(self.literals[n - 1]);
                if self.prev_delta == 0 && current_delta == 0 {
                    self.literals.push(value);
                    if self.variable_run_length > 0 {
                        self.fixed_run_length = 2;
                    }
                    self.fixed_run_length += 1;

                    if self.fixed_run_length >= MIN_REPEAT && self.variable_run_length > 0 {
                        // the repeat splits off into its own run
                        let tail = self.literals.split_off(self.literals.len() - MIN_REPEAT);
                        self.write_literals();
                        self.literals.extend(tail);
                        self.fixed_run_length = MIN_REPEAT;
                    }
                    if self.literals.len() == MAX_SCOPE {
                        self.write_literals();
                    }
                } else {
                    if self.fixed_run_length >= MIN_REPEAT {
                        self.write_fixed_run();
                    }
                    if self.fixed_run_length > 0 && self.fixed_run_length < MIN_REPEAT {
                        self.variable_run_length = self.fixed_run_length;
                        self.fixed_run_length = 0;
                    }
                    if self.literals.is_empty() {
                        self.init_literals(value);
                    } else {
                        self.prev_delta = value.wrapping_sub(self.literals[self.literals.len() - 1]);
                        self.literals.push(value);
                        self.variable_run_length += 1;
                        if self.literals.len() == MAX_SCOPE {
                            self.write_literals();
                        }
                    }
                }
            }
        }
    }

    fn flush(&mut self) {
        if self.literals.is_empty() {
            return;
        }
        if self.variable_run_length != 0 {
            self.write_literals();
        } else {
            self.write_fixed_run();
        }
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::RleV2
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RleV2Decoder {
    signed: bool,
}

impl RleV2Decoder {
    pub fn new(signed: bool) -> Self {
        Self { signed }
    }

    fn to_signed(&self, value: u64) -> i64 {
        if self.signed {
            zigzag_decode(value)
        } else {
            value as i64
        }
    }

    fn run_length(header: u8, input: &[u8], pos: &mut usize) -> Result<usize> {
        let low = *input
            .get(*pos)
            .ok_or_else(|| Error::InvalidFormat("truncated run header".to_string()))?;
        *pos += 1;
        Ok((((header & 1) as usize) << 8 | low as usize) + 1)
    }
}

impl StreamDecoder for RleV2Decoder {
    fn decode(&self, input: &[u8], out: &mut Vec<i64>) -> Result<()> {
        let mut pos = 0;
        let mut scratch = Vec::new();
        while pos < input.len() {
            let header = input[pos];
            pos += 1;
            match header >> 6 {
                SHORT_REPEAT => {
                    let width = ((header >> 3) & 0x07) as usize + 1;
                    let count = (header & 0x07) as usize + MIN_REPEAT;
                    let bytes = input.get(pos..pos + width).ok_or_else(|| {
                        Error::InvalidFormat("truncated short repeat".to_string())
                    })?;
                    let raw = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
                    pos += width;
                    let value = self.to_signed(raw);
                    out.extend(std::iter::repeat(value).take(count));
                }
                DIRECT => {
                    let bits = decode_bit_width((header >> 1) & 0x1f);
                    let len = Self::run_length(header, input, &mut pos)?;
                    scratch.clear();
                    read_ints(input, &mut pos, len, bits, &mut scratch)?;
                    out.extend(scratch.iter().map(|v| self.to_signed(*v)));
                }
                PATCHED_BASE => {
                    return Err(Error::InvalidFormat(
                        "patched base runs are not supported".to_string(),
                    ))
                }
                _ => {
                    let width_code = (header >> 1) & 0x1f;
                    let len = Self::run_length(header, input, &mut pos)?;
                    let base = if self.signed {
                        read_svarint(input, &mut pos)?
                    } else {
                        read_uvarint(input, &mut pos)? as i64
                    };
                    let delta = read_svarint(input, &mut pos)?;
                    out.push(base);
                    if len == 1 {
                        continue;
                    }
                    if width_code == 0 {
                        let mut prev = base;
                        for _ in 1..len {
                            prev = prev.wrapping_add(delta);
                            out.push(prev);
                        }
                    } else {
                        let mut prev = base.wrapping_add(delta);
                        out.push(prev);
                        scratch.clear();
                        read_ints(input, &mut pos, len - 2, decode_bit_width(width_code), &mut scratch)?;
                        for step in &scratch {
                            prev = if delta < 0 {
                                prev.wrapping_sub(*step as i64)
                            } else {
                                prev.wrapping_add(*step as i64)
                            };
                            out.push(prev);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::RleV2
    }
}
