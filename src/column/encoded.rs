use super::{open_plain, Column, ColumnParts};
use crate::bitmap::Bitmap;
use crate::encoding::{
    block_compressor, compress_buffer, decompress_buffer, encode_integers, stream_decoder,
    stream_encoder, EncodingKind, EncodingOption,
};
use crate::error::{Error, Result};
use crate::format::{ColumnEncoding, StorageFormat, MEMORY_ALIGN_SIZE, NO_ENCODE_ORIGIN_LEN};
use crate::types::{ColumnType, Datum};
use std::cell::OnceCell;

const LENGTH_WIDTH: usize = 4;

/// Encoding decorator.
///
/// On the write side the wrapped column keeps raw values and the encoded
/// streams are produced on the first `get_buffer`/`lengths_buffer`, then
/// cached until the next append. On the read side the column holds the
/// encoded streams and decodes them into a plain column on first access.
#[derive(Debug)]
pub struct EncodedColumn {
    ty: ColumnType,
    format: StorageFormat,
    align: usize,
    option: EncodingOption,
    state: State,
}

#[derive(Debug)]
enum State {
    Writer {
        base: Box<dyn Column>,
        data: OnceCell<Vec<u8>>,
        lengths: OnceCell<Vec<u8>>,
    },
    Reader {
        parts: ColumnParts,
        bitmap: Option<Bitmap>,
        origin: i64,
        lengths_origin: i64,
        decoded: OnceCell<Box<dyn Column>>,
    },
}

impl EncodedColumn {
    /// Wraps a writer-side column; `option` must already be resolved.
    pub fn new(base: Box<dyn Column>, option: EncodingOption) -> Self {
        Self {
            ty: base.column_type(),
            format: base.storage_format(),
            align: base.align_size(),
            option,
            state: State::Writer {
                base,
                data: OnceCell::new(),
                lengths: OnceCell::new(),
            },
        }
    }

    pub(crate) fn open(
        ty: ColumnType,
        format: StorageFormat,
        align: usize,
        parts: ColumnParts,
        encoding: &ColumnEncoding,
    ) -> Result<Self> {
        let option = EncodingOption {
            kind: EncodingKind::from_wire(encoding.kind)?,
            level: encoding.compress_lvl,
            lengths_kind: EncodingKind::from_wire(encoding.lengths_kind)?,
            lengths_level: encoding.lengths_level,
        };
        Ok(Self {
            ty,
            format,
            align,
            option,
            state: State::Reader {
                bitmap: parts.present.clone().map(Bitmap::read_only),
                parts,
                origin: encoding.length,
                lengths_origin: encoding.lengths_origin_length,
                decoded: OnceCell::new(),
            },
        })
    }

    /// The plain column behind the decorator, decoding it if needed.
    fn plain(&self) -> Result<&dyn Column> {
        match &self.state {
            State::Writer { base, .. } => Ok(base.as_ref()),
            State::Reader {
                parts,
                origin,
                lengths_origin,
                decoded,
                ..
            } => {
                if let Some(column) = decoded.get() {
                    return Ok(column.as_ref());
                }
                let column = self.decode(parts, *origin, *lengths_origin)?;
                Ok(decoded.get_or_init(|| column).as_ref())
            }
        }
    }

    fn decode(&self, parts: &ColumnParts, origin: i64, lengths_origin: i64) -> Result<Box<dyn Column>> {
        let width = self.ty.fixed_width().unwrap_or(1);
        let data = decode_stream(
            self.option.kind,
            &parts.data,
            origin,
            width,
            true,
        )?;
        let lengths = match &parts.lengths {
            Some(raw) => Some(decode_stream(
                self.option.lengths_kind,
                raw,
                lengths_origin,
                LENGTH_WIDTH,
                false,
            )?),
            None => None,
        };
        tracing::trace!(ty = ?self.ty, kind = ?self.option.kind, bytes = data.len(), "column decoded");
        open_plain(
            self.ty,
            self.format,
            self.align,
            ColumnParts {
                rows: parts.rows,
                non_null_rows: parts.non_null_rows,
                present: parts.present.clone(),
                data: data.into(),
                lengths: lengths.map(Into::into),
                toast: parts.toast.clone(),
            },
        )
    }

    fn base_mut(&mut self) -> Result<&mut Box<dyn Column>> {
        match &mut self.state {
            State::Writer {
                base,
                data,
                lengths,
            } => {
                *data = OnceCell::new();
                *lengths = OnceCell::new();
                Ok(base)
            }
            State::Reader { .. } => Err(Error::Logic("append to a read-only column".to_string())),
        }
    }
}

impl Column for EncodedColumn {
    fn column_type(&self) -> ColumnType {
        self.ty
    }

    fn storage_format(&self) -> StorageFormat {
        self.format
    }

    fn rows(&self) -> usize {
        match &self.state {
            State::Writer { base, .. } => base.rows(),
            State::Reader { parts, .. } => parts.rows,
        }
    }

    fn non_null_rows(&self) -> usize {
        match &self.state {
            State::Writer { base, .. } => base.non_null_rows(),
            State::Reader { parts, .. } => parts.non_null_rows,
        }
    }

    fn null_bitmap(&self) -> Option<&Bitmap> {
        match &self.state {
            State::Writer { base, .. } => base.null_bitmap(),
            State::Reader { bitmap, .. } => bitmap.as_ref(),
        }
    }

    fn check(&self, value: &Datum) -> Result<()> {
        match &self.state {
            State::Writer { base, .. } => base.check(value),
            State::Reader { .. } => Err(Error::Logic("append to a read-only column".to_string())),
        }
    }

    fn append(&mut self, value: &Datum) -> Result<()> {
        self.base_mut()?.append(value)
    }

    fn append_null(&mut self) -> Result<()> {
        self.base_mut()?.append_null()
    }

    fn get(&self, row: usize) -> Result<Datum> {
        self.plain()?.get(row)
    }

    fn get_buffer(&self) -> Result<&[u8]> {
        match &self.state {
            State::Writer { base, data, .. } => {
                if self.option.kind == EncodingKind::NoEncoded {
                    return base.get_buffer();
                }
                if let Some(encoded) = data.get() {
                    return Ok(encoded.as_slice());
                }
                let width = self.ty.fixed_width().unwrap_or(1);
                let encoded = encode_stream(&self.option, false, base.get_buffer()?, width, self.format)?;
                Ok(data.get_or_init(|| encoded).as_slice())
            }
            State::Reader { parts, .. } => Ok(parts.data.as_ref()),
        }
    }

    fn get_range_buffer(&self, start: usize, len: usize) -> Result<&[u8]> {
        self.plain()?.get_range_buffer(start, len)
    }

    fn lengths_buffer(&self) -> Result<Option<&[u8]>> {
        match &self.state {
            State::Writer { base, lengths, .. } => {
                let Some(raw) = base.lengths_buffer()? else {
                    return Ok(None);
                };
                if self.option.lengths_kind == EncodingKind::NoEncoded {
                    return Ok(Some(raw));
                }
                if let Some(encoded) = lengths.get() {
                    return Ok(Some(encoded.as_slice()));
                }
                let encoded = encode_stream(&self.option, true, raw, LENGTH_WIDTH, self.format)?;
                Ok(Some(lengths.get_or_init(|| encoded).as_slice()))
            }
            State::Reader { parts, .. } => Ok(parts.lengths.as_deref()),
        }
    }

    fn toast_buffer(&self) -> Option<&[u8]> {
        match &self.state {
            State::Writer { base, .. } => base.toast_buffer(),
            State::Reader { parts, .. } => parts.toast.as_deref(),
        }
    }

    fn toast_count(&self) -> usize {
        self.plain().map_or(0, |c| c.toast_count())
    }

    fn encoding(&self) -> EncodingKind {
        self.option.kind
    }

    fn compress_level(&self) -> i32 {
        self.option.level
    }

    fn origin_length(&self) -> i64 {
        match &self.state {
            State::Writer { base, .. } => match base.get_buffer() {
                Ok(raw) => origin_length(self.option.kind, raw.len(), self.format),
                Err(_) => NO_ENCODE_ORIGIN_LEN,
            },
            State::Reader { origin, .. } => *origin,
        }
    }

    fn lengths_encoding(&self) -> EncodingKind {
        if self.ty.is_variable() {
            self.option.lengths_kind
        } else {
            EncodingKind::NoEncoded
        }
    }

    fn lengths_level(&self) -> i32 {
        if self.ty.is_variable() {
            self.option.lengths_level
        } else {
            0
        }
    }

    fn lengths_origin_length(&self) -> i64 {
        match &self.state {
            State::Writer { base, .. } => match base.lengths_buffer() {
                Ok(Some(raw)) => origin_length(self.lengths_encoding(), raw.len(), self.format),
                _ => NO_ENCODE_ORIGIN_LEN,
            },
            State::Reader { lengths_origin, .. } => *lengths_origin,
        }
    }

    fn align_size(&self) -> usize {
        self.align
    }

    fn physical_size(&self) -> usize {
        match &self.state {
            State::Writer { base, .. } => base.physical_size(),
            State::Reader { parts, .. } => {
                parts.data.len()
                    + parts.lengths.as_ref().map_or(0, |l| l.len())
                    + parts.present.as_ref().map_or(0, |p| p.len())
                    + parts.toast.as_ref().map_or(0, |t| t.len())
            }
        }
    }
}

/// Pre-encoding length recorded for a stream; columnar streams are padded
/// to `MEMORY_ALIGN_SIZE` before encoding.
pub(crate) fn origin_length(kind: EncodingKind, raw_len: usize, format: StorageFormat) -> i64 {
    match (kind, format) {
        (EncodingKind::NoEncoded, _) => NO_ENCODE_ORIGIN_LEN,
        (_, StorageFormat::Columnar) => raw_len.next_multiple_of(MEMORY_ALIGN_SIZE) as i64,
        (_, StorageFormat::RowMajor) => raw_len as i64,
    }
}

fn sign_extend(raw: &[u8]) -> i64 {
    let mut bytes = if raw.last().is_some_and(|b| b & 0x80 != 0) {
        [0xffu8; 8]
    } else {
        [0u8; 8]
    };
    bytes[..raw.len()].copy_from_slice(raw);
    i64::from_le_bytes(bytes)
}

fn encode_stream(
    option: &EncodingOption,
    lengths: bool,
    raw: &[u8],
    width: usize,
    format: StorageFormat,
) -> Result<Vec<u8>> {
    let (kind, level) = if lengths {
        (option.lengths_kind, option.lengths_level)
    } else {
        (option.kind, option.level)
    };
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if kind.is_streaming() {
        let mut encoder = stream_encoder(kind, !lengths)
            .ok_or_else(|| Error::Logic(format!("no stream encoder for {:?}", kind)))?;
        return Ok(encode_integers(
            encoder.as_mut(),
            raw.chunks_exact(width).map(sign_extend),
        ));
    }
    let compressor = block_compressor(kind, level)
        .ok_or_else(|| Error::Compress(format!("{:?} is not available", kind)))?;
    match format {
        StorageFormat::Columnar if raw.len() % MEMORY_ALIGN_SIZE != 0 => {
            let mut padded = raw.to_vec();
            padded.resize(raw.len().next_multiple_of(MEMORY_ALIGN_SIZE), 0);
            compress_buffer(compressor.as_ref(), &padded)
        }
        _ => compress_buffer(compressor.as_ref(), raw),
    }
}

fn decode_stream(
    kind: EncodingKind,
    encoded: &[u8],
    origin: i64,
    width: usize,
    signed: bool,
) -> Result<Vec<u8>> {
    if kind == EncodingKind::NoEncoded {
        return Ok(encoded.to_vec());
    }
    let origin = usize::try_from(origin).map_err(|_| {
        Error::InvalidFormat(format!("{:?} stream without origin length", kind))
    })?;
    if origin == 0 {
        return Ok(Vec::new());
    }
    if kind.is_streaming() {
        let decoder = stream_decoder(kind, signed)
            .ok_or_else(|| Error::Logic(format!("no stream decoder for {:?}", kind)))?;
        let mut values = Vec::with_capacity(origin / width);
        decoder.decode(encoded, &mut values)?;
        let mut out = Vec::with_capacity(origin);
        for value in values {
            out.extend_from_slice(&value.to_le_bytes()[..width]);
        }
        if out.len() > origin {
            return Err(Error::InvalidFormat(format!(
                "{:?} stream decoded to {} bytes, origin length is {}",
                kind,
                out.len(),
                origin
            )));
        }
        out.resize(origin, 0);
        return Ok(out);
    }
    let compressor = block_compressor(kind, 0)
        .ok_or_else(|| Error::Compress(format!("{:?} is not available", kind)))?;
    decompress_buffer(compressor.as_ref(), encoded, origin)
}
