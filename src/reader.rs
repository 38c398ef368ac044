//! Micro-partition file reader.
//!
//! Opening a file reads its tail once: the postscript length, the
//! postscript and the footer usually all fit into the first
//! `tail_read_size` bytes; larger tails are read again at their exact
//! offsets. Stripes are read whole, or column batch by column batch when a
//! projection is set.

use crate::column::{open_column, ColumnParts, ColumnSet};
use crate::config::ColumnarConfig;
use crate::error::{Error, Result};
use crate::filter::{Filter, StripeStats};
use crate::format::{
    Footer, PostScript, StorageFormat, Stream, StreamKind, StripeFooter, StripeInformation,
    TypeKind, MAGIC, MAJOR_VERSION, POST_SCRIPT_SIZE,
};
use crate::fs::{File, FileSystem};
use crate::types::{ColumnDesc, ColumnType, Datum, Schema};
use bytes::Bytes;
use prost::Message;
use smallvec::SmallVec;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Columns the caller expects; the file may hold a prefix of them.
    /// Derived from the file when unset.
    pub schema: Option<Schema>,
    pub filter: Option<Filter>,
    pub tail_read_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::from_config(&ColumnarConfig::default())
    }
}

impl ReaderOptions {
    pub fn from_config(config: &ColumnarConfig) -> Self {
        Self {
            schema: None,
            filter: None,
            tail_read_size: config.tail_read_size,
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Columns of one stripe.
#[derive(Debug)]
pub struct Group {
    index: usize,
    row_offset: u64,
    rows: usize,
    columns: ColumnSet,
}

impl Group {
    pub fn index(&self) -> usize {
        self.index
    }

    /// File row number of the first row.
    pub fn row_offset(&self) -> u64 {
        self.row_offset
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    /// Row `row` of the group. Unprojected and back-filled columns read as
    /// NULL.
    pub fn get_tuple(&self, row: usize) -> Result<Vec<Datum>> {
        if row >= self.rows {
            return Err(Error::out_of_range(row, self.rows));
        }
        (0..self.columns.len())
            .map(|i| match self.columns.column(i) {
                Some(column) => column.get(row),
                None => Ok(Datum::Null),
            })
            .collect()
    }
}

/// Byte range and streams of one column inside a stripe.
#[derive(Debug)]
struct ColumnLayout {
    start: u64,
    len: u64,
    /// PRESENT, TOAST, LENGTH and DATA at most.
    streams: SmallVec<[Stream; 4]>,
}

pub struct MicroPartitionReader {
    file: Box<dyn File>,
    options: ReaderOptions,
    footer: Footer,
    storage_format: StorageFormat,
    column_types: Vec<ColumnType>,
    schema: Schema,
    /// `row_offsets[i]` is the first row of stripe `i`; the last entry is
    /// the row count.
    row_offsets: Vec<u64>,
    cached: Option<Group>,
    next_group: usize,
    closed: bool,
}

impl std::fmt::Debug for MicroPartitionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroPartitionReader")
            .field("file", &self.file.path())
            .field("stripes", &self.footer.stripes.len())
            .field("rows", &self.total_rows())
            .field("format", &self.storage_format)
            .finish()
    }
}

impl MicroPartitionReader {
    pub fn open(fs: &dyn FileSystem, path: &str, options: ReaderOptions) -> Result<Self> {
        let mut file = fs.open(path)?;
        let (post_script, footer) = read_tail(file.as_mut(), options.tail_read_size)?;
        debug!(
            file = path,
            footer_length = post_script.footer_length,
            stripes = footer.stripes.len(),
            "Footer loaded"
        );

        let storage_format = StorageFormat::try_from(footer.storage_format).map_err(|_| {
            Error::InvalidFormat(format!("unknown storage format {}", footer.storage_format))
        })?;
        let column_types = column_types(&footer)?;
        check_stripes(&footer)?;
        let schema = resolve_schema(&footer, &column_types, options.schema.as_ref(), path)?;

        let mut row_offsets = Vec::with_capacity(footer.stripes.len() + 1);
        let mut rows = 0u64;
        row_offsets.push(rows);
        for stripe in &footer.stripes {
            rows += stripe.number_of_rows;
            row_offsets.push(rows);
        }

        Ok(Self {
            file,
            options,
            footer,
            storage_format,
            column_types,
            schema,
            row_offsets,
            cached: None,
            next_group: 0,
            closed: false,
        })
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Types of the columns stored in the file.
    pub fn column_types(&self) -> &[ColumnType] {
        &self.column_types
    }

    pub fn storage_format(&self) -> StorageFormat {
        self.storage_format
    }

    pub fn total_rows(&self) -> u64 {
        self.row_offsets.last().copied().unwrap_or(0)
    }

    pub fn group_count(&self) -> usize {
        self.footer.stripes.len()
    }

    pub fn group_rows(&self, index: usize) -> Result<u64> {
        Ok(self.stripe(index)?.number_of_rows)
    }

    /// File row number of the first row of group `index`.
    pub fn group_offset(&self, index: usize) -> Result<u64> {
        self.stripe(index)?;
        Ok(self.row_offsets[index])
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.options.filter = Some(filter);
        self.cached = None;
    }

    fn stripe(&self, index: usize) -> Result<&StripeInformation> {
        self.footer
            .stripes
            .get(index)
            .ok_or_else(|| Error::out_of_range(index, self.footer.stripes.len()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Logic(format!("reader of {} is closed", self.file.path())));
        }
        Ok(())
    }

    /// Columns read by `read_group`, all of them when `None`.
    pub fn projection(&self) -> Option<&[bool]> {
        self.options.filter.as_ref()?.column_projection()
    }

    pub fn read_group(&mut self, index: usize) -> Result<Group> {
        self.ensure_open()?;
        let stripe = self.stripe(index)?.clone();
        let rows = stripe.number_of_rows as usize;
        let ncols = self.schema.len();

        let mut group = Group {
            index,
            row_offset: self.row_offsets[index],
            rows,
            columns: ColumnSet::new(self.storage_format),
        };
        if stripe.footer_length == 0 {
            return Ok(group);
        }

        let projection = self.projection().map(|p| p.to_vec());
        let (stripe_footer, whole) = match &projection {
            None => {
                let buf = read_exact(self.file.as_mut(), stripe.offset, stripe.footer_length)?;
                let footer = StripeFooter::decode(&buf[stripe.data_length as usize..])?;
                (footer, Some(buf.slice(..stripe.data_length as usize)))
            }
            Some(_) => {
                let buf = read_exact(
                    self.file.as_mut(),
                    stripe.offset + stripe.data_length,
                    stripe.stripe_footer_length(),
                )?;
                (StripeFooter::decode(buf.as_ref())?, None)
            }
        };
        if stripe_footer.streams.is_empty() && stripe_footer.col_encodings.is_empty() {
            return Ok(group);
        }

        let disk_columns = self.column_types.len();
        let layouts = column_layouts(&stripe_footer, disk_columns, stripe.data_length)?;
        let wanted = |i: usize| projection.as_ref().is_none_or(|p| p.get(i).copied().unwrap_or(false));

        let mut sources: Vec<Option<(Bytes, u64)>> = vec![None; disk_columns];
        match whole {
            Some(data) => {
                for source in sources.iter_mut() {
                    *source = Some((data.clone(), 0));
                }
            }
            None => {
                let mut i = 0;
                while i < disk_columns {
                    if !wanted(i) {
                        i += 1;
                        continue;
                    }
                    let first = i;
                    while i + 1 < disk_columns && wanted(i + 1) {
                        i += 1;
                    }
                    let start = layouts[first].start;
                    let end = layouts[i].start + layouts[i].len;
                    let batch = read_exact(self.file.as_mut(), stripe.offset + start, end - start)?;
                    for source in &mut sources[first..=i] {
                        *source = Some((batch.clone(), start));
                    }
                    i += 1;
                }
            }
        }

        for (i, (layout, source)) in layouts.iter().zip(sources).enumerate() {
            let Some((buffer, base)) = source.filter(|_| wanted(i)) else {
                group.columns.push(None);
                continue;
            };
            let parts = cut_column(layout, &buffer, base, rows)?;
            let encoding = stripe_footer.col_encodings.get(i).ok_or_else(|| {
                Error::InvalidFormat(format!("stripe {} lacks encoding of column {}", index, i))
            })?;
            let align = self.schema.column(i).map_or(1, |desc| desc.align.size());
            let column = open_column(self.column_types[i], self.storage_format, align, parts, encoding)?;
            group.columns.push(Some(column));
        }
        for _ in disk_columns..ncols {
            group.columns.push(None);
        }
        Ok(group)
    }

    /// Next group whose statistics may satisfy the filter's scan keys.
    pub fn next_group(&mut self) -> Result<Option<Group>> {
        self.ensure_open()?;
        while self.next_group < self.footer.stripes.len() {
            let index = self.next_group;
            self.next_group += 1;
            if let Some(filter) = self.options.filter.as_ref().filter(|f| f.has_scan_keys()) {
                let stripe = &self.footer.stripes[index];
                let stats = StripeStats::new(stripe, &self.footer.col_info);
                if !filter.test_scan(&stats, &self.schema) {
                    crate::log_stripe!("skip", self.file.path(), index, stripe.number_of_rows, stripe.footer_length);
                    continue;
                }
            }
            return self.read_group(index).map(Some);
        }
        Ok(None)
    }

    /// Restarts `next_group` from the first stripe.
    pub fn rewind(&mut self) {
        self.next_group = 0;
    }

    pub fn get_tuple(&mut self, row: u64) -> Result<Vec<Datum>> {
        self.ensure_open()?;
        let total = self.total_rows();
        if row >= total {
            return Err(Error::OutOfRange(format!("row {} beyond {} rows", row, total)));
        }
        // first stripe whose end lies past `row`
        let index = self.row_offsets[1..].partition_point(|&end| end <= row);
        if self.cached.as_ref().is_none_or(|g| g.index != index) {
            self.cached = Some(self.read_group(index)?);
        }
        match &self.cached {
            Some(group) => group.get_tuple((row - group.row_offset) as usize),
            None => Err(Error::Logic("group cache empty".into())),
        }
    }

    pub fn close(&mut self) {
        self.cached = None;
        self.closed = true;
    }
}

fn read_exact(file: &mut dyn File, offset: u64, len: u64) -> Result<Bytes> {
    let mut buf = vec![0u8; len as usize];
    file.read_at(&mut buf, offset)?;
    Ok(Bytes::from(buf))
}

fn read_tail(file: &mut dyn File, tail_read_size: usize) -> Result<(PostScript, Footer)> {
    let file_len = file.size()?;
    let ps_size = POST_SCRIPT_SIZE as u64;
    if file_len < ps_size {
        return Err(Error::InvalidFormat(format!(
            "{}: {} bytes is too short for a micro-partition",
            file.path(),
            file_len
        )));
    }
    let tail_len = (tail_read_size as u64).max(ps_size).min(file_len);
    let tail = read_exact(file, file_len - tail_len, tail_len)?;

    let mut raw_len = [0u8; POST_SCRIPT_SIZE];
    raw_len.copy_from_slice(&tail[tail.len() - POST_SCRIPT_SIZE..]);
    let ps_len = u64::from_le_bytes(raw_len);
    if ps_len > file_len - ps_size {
        return Err(Error::InvalidFormat(format!(
            "postscript length {} exceeds file length {}",
            ps_len, file_len
        )));
    }

    let ps_end = tail_len - ps_size;
    let post_script = if ps_len + ps_size > tail_len {
        let raw = read_exact(file, file_len - ps_size - ps_len, ps_len)?;
        PostScript::decode(raw.as_ref())?
    } else {
        PostScript::decode(&tail[(ps_end - ps_len) as usize..ps_end as usize])?
    };
    if post_script.magic != MAGIC {
        return Err(Error::InvalidFormat(format!(
            "bad magic {:?}",
            post_script.magic
        )));
    }
    if post_script.major_version != MAJOR_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported version {}.{}",
            post_script.major_version, post_script.minor_version
        )));
    }

    let footer_len = post_script.footer_length;
    let trailer = footer_len
        .checked_add(ps_len + ps_size)
        .filter(|t| *t <= file_len)
        .ok_or_else(|| {
            Error::InvalidFormat(format!(
                "footer length {} exceeds file length {}",
                footer_len, file_len
            ))
        })?;
    let footer = if trailer > tail_len {
        let raw = read_exact(file, file_len - trailer, footer_len)?;
        Footer::decode(raw.as_ref())?
    } else {
        let start = (tail_len - trailer) as usize;
        Footer::decode(&tail[start..start + footer_len as usize])?
    };
    if footer.content_length > file_len - trailer {
        return Err(Error::InvalidFormat(format!(
            "content length {} exceeds the {} bytes before the footer",
            footer.content_length,
            file_len - trailer
        )));
    }
    Ok((post_script, footer))
}

/// Column types under the root struct; nested structs are rejected.
fn column_types(footer: &Footer) -> Result<Vec<ColumnType>> {
    let root = footer
        .types
        .first()
        .ok_or_else(|| Error::InvalidFormat("footer without types".into()))?;
    if root.kind != TypeKind::Struct as i32 {
        return Err(Error::InvalidFormat("root type is not a struct".into()));
    }
    if root.subtypes.len() != footer.types.len() - 1 {
        return Err(Error::InvalidFormat(format!(
            "root struct lists {} of {} types",
            root.subtypes.len(),
            footer.types.len() - 1
        )));
    }
    root.subtypes
        .iter()
        .map(|&id| {
            let ty = footer
                .types
                .get(id as usize)
                .filter(|_| id != 0)
                .ok_or_else(|| Error::InvalidFormat(format!("bad subtype id {}", id)))?;
            ColumnType::from_format_type(ty)
        })
        .collect()
}

fn check_stripes(footer: &Footer) -> Result<()> {
    for (i, stripe) in footer.stripes.iter().enumerate() {
        let end = stripe.offset.checked_add(stripe.footer_length);
        if stripe.data_length > stripe.footer_length
            || end.is_none_or(|end| end > footer.content_length)
        {
            return Err(Error::InvalidFormat(format!(
                "stripe {} [{}+{}] outside content of {} bytes",
                i, stripe.offset, stripe.footer_length, footer.content_length
            )));
        }
    }
    Ok(())
}

/// Expected schema of the scan. Files may lack trailing columns added after
/// they were written; those read as NULL.
fn resolve_schema(
    footer: &Footer,
    disk: &[ColumnType],
    expected: Option<&Schema>,
    path: &str,
) -> Result<Schema> {
    let Some(expected) = expected else {
        let columns = disk
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let mut desc = ColumnDesc::new(format!("c{}", i), *ty);
                if let Some(info) = footer.col_info.get(i) {
                    desc.type_oid = info.typid;
                    desc.collation = info.collation;
                    desc.opfamily = info.opfamily;
                }
                desc
            })
            .collect();
        return Ok(Schema::new(columns));
    };

    if disk.len() > expected.len() {
        return Err(Error::SchemaNotMatch(format!(
            "{} holds {} columns, {} expected",
            path,
            disk.len(),
            expected.len()
        )));
    }
    for (i, (ty, desc)) in disk.iter().zip(expected.columns()).enumerate() {
        if *ty != desc.ty {
            return Err(Error::SchemaNotMatch(format!(
                "column {} is {:?} on disk, {:?} expected",
                i, ty, desc.ty
            )));
        }
    }
    if disk.len() < expected.len() {
        warn!(
            file = path,
            missing = expected.len() - disk.len(),
            "Back-filling columns missing from file with NULL"
        );
    }
    Ok(expected.clone())
}

/// Groups the stripe's streams by column: each column's streams end with
/// its DATA stream.
fn column_layouts(footer: &StripeFooter, columns: usize, data_length: u64) -> Result<Vec<ColumnLayout>> {
    let mut layouts = Vec::with_capacity(columns);
    let mut streams = footer.streams.iter();
    let mut offset = 0u64;
    for column in 0..columns {
        let start = offset;
        let mut mine = SmallVec::new();
        loop {
            let stream = streams.next().ok_or_else(|| {
                Error::InvalidFormat(format!("stripe footer ends inside column {}", column))
            })?;
            offset += stream.length;
            mine.push(stream.clone());
            if stream.kind == StreamKind::Data as i32 {
                break;
            }
        }
        layouts.push(ColumnLayout {
            start,
            len: offset - start,
            streams: mine,
        });
    }
    if streams.next().is_some() || offset != data_length {
        return Err(Error::InvalidFormat(format!(
            "streams cover {} of {} stripe bytes",
            offset, data_length
        )));
    }
    Ok(layouts)
}

fn cut_column(layout: &ColumnLayout, buffer: &Bytes, base: u64, rows: usize) -> Result<ColumnParts> {
    let mut parts = ColumnParts {
        rows,
        ..Default::default()
    };
    let mut data = None;
    let mut cursor = (layout.start - base) as usize;
    for stream in &layout.streams {
        let kind = StreamKind::try_from(stream.kind)
            .map_err(|_| Error::InvalidFormat(format!("unknown stream kind {}", stream.kind)))?;
        let payload = stream.payload_length() as usize;
        if cursor + stream.length as usize > buffer.len() {
            return Err(Error::InvalidFormat(format!(
                "{:?} stream of {} bytes overruns the stripe",
                kind, stream.length
            )));
        }
        let bytes = buffer.slice(cursor..cursor + payload);
        cursor += stream.length as usize;
        match kind {
            StreamKind::Present => parts.present = Some(bytes),
            StreamKind::Length => parts.lengths = Some(bytes),
            StreamKind::Toast => parts.toast = Some(bytes),
            StreamKind::Data => {
                parts.non_null_rows = stream.rows as usize;
                data = Some(bytes);
            }
        }
    }
    parts.data = data.ok_or_else(|| Error::InvalidFormat("column without DATA stream".into()))?;
    if parts.non_null_rows < rows && parts.present.is_none() {
        return Err(Error::InvalidFormat(format!(
            "{} of {} rows are NULL but no PRESENT stream exists",
            rows - parts.non_null_rows,
            rows
        )));
    }
    Ok(parts)
}
