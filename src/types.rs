//! Logical value model: column types, schema descriptors and datums.

use crate::error::{Error, Result};
use crate::format::{self, TypeKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub const BOOL_OID: u32 = 16;
pub const BYTEA_OID: u32 = 17;
pub const CHAR_OID: u32 = 18;
pub const INT8_OID: u32 = 20;
pub const INT2_OID: u32 = 21;
pub const INT4_OID: u32 = 23;
pub const FLOAT4_OID: u32 = 700;
pub const FLOAT8_OID: u32 = 701;
pub const NUMERIC_OID: u32 = 1700;

/// Collation that sorts by database locale. Byte-wise comparators cannot
/// honour it, so columns carrying it get no min/max.
pub const DEFAULT_COLLATION_OID: u32 = 100;
/// Plain byte-order collation.
pub const C_COLLATION_OID: u32 = 950;

pub const MAX_DECIMAL_PRECISION: u8 = 38;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal { precision: u8, scale: u8 },
    Bytes,
}

impl ColumnType {
    /// Physical width of one value, `None` for variable-width types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ColumnType::Bool => None,
            ColumnType::Int8 => Some(1),
            ColumnType::Int16 => Some(2),
            ColumnType::Int32 | ColumnType::Float32 => Some(4),
            ColumnType::Int64 | ColumnType::Float64 => Some(8),
            ColumnType::Decimal { .. } => Some(16),
            ColumnType::Bytes => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::Int8 | ColumnType::Int16 | ColumnType::Int32 | ColumnType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ColumnType::Float32 | ColumnType::Float64)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, ColumnType::Bytes)
    }

    pub fn type_kind(&self) -> TypeKind {
        match self {
            ColumnType::Bool => TypeKind::Boolean,
            ColumnType::Int8 => TypeKind::Byte,
            ColumnType::Int16 => TypeKind::Short,
            ColumnType::Int32 => TypeKind::Int,
            ColumnType::Int64 => TypeKind::Long,
            ColumnType::Float32 => TypeKind::Float,
            ColumnType::Float64 => TypeKind::Double,
            ColumnType::Decimal { .. } => TypeKind::Decimal,
            ColumnType::Bytes => TypeKind::String,
        }
    }

    pub fn default_oid(&self) -> u32 {
        match self {
            ColumnType::Bool => BOOL_OID,
            ColumnType::Int8 => CHAR_OID,
            ColumnType::Int16 => INT2_OID,
            ColumnType::Int32 => INT4_OID,
            ColumnType::Int64 => INT8_OID,
            ColumnType::Float32 => FLOAT4_OID,
            ColumnType::Float64 => FLOAT8_OID,
            ColumnType::Decimal { .. } => NUMERIC_OID,
            ColumnType::Bytes => BYTEA_OID,
        }
    }

    pub fn to_format_type(&self) -> format::Type {
        let mut ty = format::Type::default();
        ty.set_kind(self.type_kind());
        if let ColumnType::Decimal { precision, scale } = self {
            ty.precision = *precision as u32;
            ty.scale = *scale as u32;
        }
        ty
    }

    pub fn from_format_type(ty: &format::Type) -> Result<Self> {
        let kind = TypeKind::try_from(ty.kind)
            .map_err(|_| Error::InvalidFormat(format!("unknown type kind {}", ty.kind)))?;
        Ok(match kind {
            TypeKind::Boolean => ColumnType::Bool,
            TypeKind::Byte => ColumnType::Int8,
            TypeKind::Short => ColumnType::Int16,
            TypeKind::Int => ColumnType::Int32,
            TypeKind::Long => ColumnType::Int64,
            TypeKind::Float => ColumnType::Float32,
            TypeKind::Double => ColumnType::Float64,
            TypeKind::String => ColumnType::Bytes,
            TypeKind::Decimal => ColumnType::Decimal {
                precision: ty.precision as u8,
                scale: ty.scale as u8,
            },
            TypeKind::Struct => {
                return Err(Error::InvalidFormat(
                    "nested struct columns are not supported".to_string(),
                ))
            }
        })
    }

    /// Serialized form of a value as kept in min/max statistics.
    pub fn decode_value(&self, raw: &[u8]) -> Result<Datum> {
        fn array<const N: usize>(raw: &[u8]) -> Result<[u8; N]> {
            raw.try_into().map_err(|_| {
                Error::InvalidFormat(format!("expected {} value bytes, got {}", N, raw.len()))
            })
        }

        Ok(match self {
            ColumnType::Bool => Datum::Bool(array::<1>(raw)?[0] != 0),
            ColumnType::Int8 => Datum::Int8(i8::from_le_bytes(array(raw)?)),
            ColumnType::Int16 => Datum::Int16(i16::from_le_bytes(array(raw)?)),
            ColumnType::Int32 => Datum::Int32(i32::from_le_bytes(array(raw)?)),
            ColumnType::Int64 => Datum::Int64(i64::from_le_bytes(array(raw)?)),
            ColumnType::Float32 => Datum::Float32(f32::from_le_bytes(array(raw)?)),
            ColumnType::Float64 => Datum::Float64(f64::from_le_bytes(array(raw)?)),
            ColumnType::Decimal { scale, .. } => Datum::Decimal(Decimal128::new(
                i128::from_le_bytes(array(raw)?),
                *scale,
            )),
            ColumnType::Bytes => Datum::Bytes(raw.to_vec()),
        })
    }

    /// True if `datum` can be stored in a column of this type.
    pub fn accepts(&self, datum: &Datum) -> bool {
        matches!(
            (self, datum),
            (_, Datum::Null)
                | (ColumnType::Bool, Datum::Bool(_))
                | (ColumnType::Int8, Datum::Int8(_))
                | (ColumnType::Int16, Datum::Int16(_))
                | (ColumnType::Int32, Datum::Int32(_))
                | (ColumnType::Int64, Datum::Int64(_))
                | (ColumnType::Float32, Datum::Float32(_))
                | (ColumnType::Float64, Datum::Float64(_))
                | (ColumnType::Decimal { .. }, Datum::Decimal(_))
                | (ColumnType::Bytes, Datum::Bytes(_))
        )
    }
}

/// Storage alignment of a type, as declared by the type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeAlign {
    Char,
    Short,
    Int,
    Double,
}

impl TypeAlign {
    pub fn size(&self) -> usize {
        match self {
            TypeAlign::Char => 1,
            TypeAlign::Short => 2,
            TypeAlign::Int => 4,
            TypeAlign::Double => 8,
        }
    }

    fn for_type(ty: &ColumnType) -> Self {
        match ty {
            ColumnType::Bool | ColumnType::Int8 => TypeAlign::Char,
            ColumnType::Int16 => TypeAlign::Short,
            ColumnType::Int32 | ColumnType::Float32 | ColumnType::Bytes => TypeAlign::Int,
            ColumnType::Int64 | ColumnType::Float64 | ColumnType::Decimal { .. } => {
                TypeAlign::Double
            }
        }
    }
}

/// Toast strategy hint for variable-length values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageClass {
    /// Never compressed or moved out of line.
    Plain,
    /// Compressed in place when it pays off.
    Main,
    /// Moved out of line uncompressed.
    External,
    /// Compressed, then moved out of line if still too large.
    #[default]
    Extended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDesc {
    pub name: String,
    pub ty: ColumnType,
    pub align: TypeAlign,
    pub type_oid: u32,
    pub collation: u32,
    pub opfamily: u32,
    pub storage: StorageClass,
    pub dropped: bool,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        let collation = if ty.is_variable() { C_COLLATION_OID } else { 0 };
        let storage = if ty.is_variable() {
            StorageClass::Extended
        } else {
            StorageClass::Plain
        };
        Self {
            name: name.into(),
            ty,
            align: TypeAlign::for_type(&ty),
            type_oid: ty.default_oid(),
            collation,
            opfamily: 0,
            storage,
            dropped: false,
        }
    }

    pub fn with_collation(mut self, collation: u32) -> Self {
        self.collation = collation;
        self
    }

    pub fn with_storage(mut self, storage: StorageClass) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_align(mut self, align: TypeAlign) -> Self {
        self.align = align;
        self
    }

    pub fn with_opfamily(mut self, opfamily: u32) -> Self {
        self.opfamily = opfamily;
        self
    }

    pub fn dropped(mut self) -> Self {
        self.dropped = true;
        self
    }
}

/// Relational attribute description handed over by the table layer.
#[derive(Debug, Clone)]
pub struct AttributeDesc {
    pub name: String,
    pub typlen: i16,
    pub byval: bool,
    pub align: TypeAlign,
    pub type_oid: u32,
    pub collation: u32,
    pub storage: StorageClass,
    pub dropped: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnDesc>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDesc>) -> Self {
        Self { columns }
    }

    /// Physical types are chosen from the attribute length alone: by-value
    /// lengths 1/2/4/8 become integers of that width, anything else is
    /// stored as bytes.
    pub fn from_attributes(attrs: &[AttributeDesc]) -> Self {
        let columns = attrs
            .iter()
            .map(|attr| {
                let ty = match (attr.byval, attr.typlen) {
                    (true, 1) => ColumnType::Int8,
                    (true, 2) => ColumnType::Int16,
                    (true, 4) => ColumnType::Int32,
                    (true, 8) => ColumnType::Int64,
                    _ => ColumnType::Bytes,
                };
                ColumnDesc {
                    name: attr.name.clone(),
                    ty,
                    align: attr.align,
                    type_oid: attr.type_oid,
                    collation: attr.collation,
                    opfamily: 0,
                    storage: attr.storage,
                    dropped: attr.dropped,
                }
            })
            .collect();
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDesc> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    pub fn push(&mut self, column: ColumnDesc) {
        self.columns.push(column);
    }

    /// Type tree written to the footer: a root struct followed by one
    /// entry per column.
    pub fn to_format_types(&self) -> Vec<format::Type> {
        let mut root = format::Type::default();
        root.set_kind(TypeKind::Struct);
        root.subtypes = (1..=self.columns.len() as u32).collect();

        let mut types = Vec::with_capacity(self.columns.len() + 1);
        types.push(root);
        types.extend(self.columns.iter().map(|c| c.ty.to_format_type()));
        types
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal128 {
    pub unscaled: i128,
    pub scale: u8,
}

impl Decimal128 {
    pub fn new(unscaled: i128, scale: u8) -> Self {
        Self { unscaled, scale }
    }

    /// Same value at another scale, rounding half away from zero when digits
    /// are dropped. `None` on overflow.
    pub fn rescale(&self, scale: u8) -> Option<Self> {
        match scale.cmp(&self.scale) {
            Ordering::Equal => Some(*self),
            Ordering::Greater => {
                let factor = 10i128.checked_pow((scale - self.scale) as u32)?;
                Some(Self::new(self.unscaled.checked_mul(factor)?, scale))
            }
            Ordering::Less => {
                let factor = 10i128.checked_pow((self.scale - scale) as u32)?;
                let mut quotient = self.unscaled / factor;
                let remainder = self.unscaled % factor;
                if remainder.unsigned_abs() * 2 >= factor.unsigned_abs() {
                    quotient += self.unscaled.signum();
                }
                Some(Self::new(quotient, scale))
            }
        }
    }

    pub fn fits_precision(&self, precision: u8) -> bool {
        match 10i128.checked_pow(precision.min(MAX_DECIMAL_PRECISION) as u32) {
            Some(limit) => self.unscaled.unsigned_abs() < limit.unsigned_abs(),
            None => true,
        }
    }

    pub fn cmp_value(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        match (self.rescale(scale), other.rescale(scale)) {
            (Some(a), Some(b)) => a.unscaled.cmp(&b.unscaled),
            _ => self.to_f64().total_cmp(&other.to_f64()),
        }
    }

    pub fn to_f64(&self) -> f64 {
        self.unscaled as f64 / 10f64.powi(self.scale as i32)
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.unscaled);
        }
        let digits = self.unscaled.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
        } else {
            digits
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        let sign = if self.unscaled < 0 { "-" } else { "" };
        write!(f, "{}{}.{}", sign, int_part, frac_part)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Datum {
    #[default]
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal128),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Bool(_) => "bool",
            Datum::Int8(_) => "int8",
            Datum::Int16(_) => "int16",
            Datum::Int32(_) => "int32",
            Datum::Int64(_) => "int64",
            Datum::Float32(_) => "float32",
            Datum::Float64(_) => "float64",
            Datum::Decimal(_) => "decimal",
            Datum::Bytes(_) => "bytes",
        }
    }

    /// Serialized form kept in min/max statistics, `None` for NULL.
    pub fn encode_value(&self) -> Option<Vec<u8>> {
        Some(match self {
            Datum::Null => return None,
            Datum::Bool(v) => vec![*v as u8],
            Datum::Int8(v) => v.to_le_bytes().to_vec(),
            Datum::Int16(v) => v.to_le_bytes().to_vec(),
            Datum::Int32(v) => v.to_le_bytes().to_vec(),
            Datum::Int64(v) => v.to_le_bytes().to_vec(),
            Datum::Float32(v) => v.to_le_bytes().to_vec(),
            Datum::Float64(v) => v.to_le_bytes().to_vec(),
            Datum::Decimal(v) => v.unscaled.to_le_bytes().to_vec(),
            Datum::Bytes(v) => v.clone(),
        })
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Datum::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view used by streaming integer encoders.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int8(v) => Some(*v as i64),
            Datum::Int16(v) => Some(*v as i64),
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Bool(v) => write!(f, "{}", v),
            Datum::Int8(v) => write!(f, "{}", v),
            Datum::Int16(v) => write!(f, "{}", v),
            Datum::Int32(v) => write!(f, "{}", v),
            Datum::Int64(v) => write!(f, "{}", v),
            Datum::Float32(v) => write!(f, "{}", v),
            Datum::Float64(v) => write!(f, "{}", v),
            Datum::Decimal(v) => write!(f, "{}", v),
            Datum::Bytes(v) => match std::str::from_utf8(v) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => {
                    write!(f, "\\x")?;
                    v.iter().try_for_each(|b| write!(f, "{:02x}", b))
                }
            },
        }
    }
}
