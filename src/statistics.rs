//! Per-column null flags and min/max bounds of a stripe or a whole file.

use crate::error::{Error, Result};
use crate::format::{ColumnBasicInfo, ColumnDataStats, ColumnStats, MicroPartitionStatisticsInfo};
use crate::types::{ColumnType, Datum, Schema, C_COLLATION_OID};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Total order over two values of one column type; `None` when the pair
/// cannot be compared.
pub type Comparator = fn(&Datum, &Datum) -> Option<Ordering>;

/// Resolves the ordering used for min/max of a column.
pub trait ComparatorProvider: Send + Sync + fmt::Debug {
    /// `None` when min/max cannot be kept for `ty` under `collation`.
    fn comparator(&self, ty: &ColumnType, collation: u32) -> Option<Comparator>;
}

/// Orderings for every built-in type. Byte strings are only ordered under
/// the plain byte-order collation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinComparators;

impl ComparatorProvider for BuiltinComparators {
    fn comparator(&self, ty: &ColumnType, collation: u32) -> Option<Comparator> {
        match ty {
            ColumnType::Bytes if collation != 0 && collation != C_COLLATION_OID => None,
            _ => Some(compare_datums),
        }
    }
}

/// Compares two non-null values. Integers compare across widths, floats by
/// total order.
pub fn compare_datums(a: &Datum, b: &Datum) -> Option<Ordering> {
    match (a, b) {
        (Datum::Bool(a), Datum::Bool(b)) => Some(a.cmp(b)),
        (Datum::Float32(a), Datum::Float32(b)) => Some(a.total_cmp(b)),
        (Datum::Float64(a), Datum::Float64(b)) => Some(a.total_cmp(b)),
        (Datum::Float32(a), Datum::Float64(b)) => Some((*a as f64).total_cmp(b)),
        (Datum::Float64(a), Datum::Float32(b)) => Some(a.total_cmp(&(*b as f64))),
        (Datum::Decimal(a), Datum::Decimal(b)) => Some(a.cmp_value(b)),
        (Datum::Bytes(a), Datum::Bytes(b)) => Some(a.cmp(b)),
        _ => Some(a.as_i64()?.cmp(&b.as_i64()?)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsStatus {
    Uninitialized,
    /// Min/max tracked, no value seen yet.
    NoValue,
    HasValue,
    /// Only null flags are tracked.
    NoComparator,
}

#[derive(Debug, Clone)]
struct ColumnAccumulator {
    status: StatsStatus,
    comparator: Option<Comparator>,
    all_null: bool,
    has_null: bool,
    min: Option<Datum>,
    max: Option<Datum>,
}

impl ColumnAccumulator {
    fn new() -> Self {
        Self {
            status: StatsStatus::Uninitialized,
            comparator: None,
            all_null: true,
            has_null: false,
            min: None,
            max: None,
        }
    }

    fn update(&mut self, value: &Datum) {
        let Some(compare) = self.comparator else {
            return;
        };
        if self
            .min
            .as_ref()
            .is_none_or(|min| compare(value, min) == Some(Ordering::Less))
        {
            self.min = Some(value.clone());
        }
        if self
            .max
            .as_ref()
            .is_none_or(|max| compare(value, max) == Some(Ordering::Greater))
        {
            self.max = Some(value.clone());
        }
    }
}

/// Statistics collector for one micro-partition or stripe.
#[derive(Debug, Clone)]
pub struct MicroPartitionStats {
    schema: Schema,
    comparators: Arc<dyn ComparatorProvider>,
    columns: Vec<ColumnAccumulator>,
    initialized: bool,
}

impl MicroPartitionStats {
    pub fn new(schema: Schema, comparators: Arc<dyn ComparatorProvider>) -> Self {
        let columns = vec![ColumnAccumulator::new(); schema.len()];
        Self {
            schema,
            comparators,
            columns,
            initialized: false,
        }
    }

    /// Chooses the columns that keep min/max. Dropped columns and columns
    /// without a comparator only keep null flags. Later calls are no-ops.
    pub fn initialize(&mut self, minmax_columns: &[usize]) {
        if self.initialized {
            return;
        }
        for (i, (desc, column)) in self
            .schema
            .columns()
            .iter()
            .zip(self.columns.iter_mut())
            .enumerate()
        {
            column.comparator = if desc.dropped || !minmax_columns.contains(&i) {
                None
            } else {
                self.comparators.comparator(&desc.ty, desc.collation)
            };
            column.status = match column.comparator {
                Some(_) => StatsStatus::NoValue,
                None => StatsStatus::NoComparator,
            };
        }
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn status(&self, column: usize) -> Option<StatsStatus> {
        self.columns.get(column).map(|c| c.status)
    }

    pub fn add_row(&mut self, row: &[Datum]) -> Result<()> {
        if !self.initialized {
            return Err(Error::Logic("statistics used before initialize".into()));
        }
        if row.len() != self.columns.len() {
            return Err(Error::SchemaNotMatch(format!(
                "statistics over {} columns, row has {}",
                self.columns.len(),
                row.len()
            )));
        }
        for (i, value) in row.iter().enumerate() {
            if value.is_null() {
                self.add_null_column(i)?;
            } else {
                self.add_non_null_column(i, value)?;
            }
        }
        Ok(())
    }

    pub fn add_null_column(&mut self, column: usize) -> Result<()> {
        let len = self.columns.len();
        let acc = self
            .columns
            .get_mut(column)
            .ok_or_else(|| Error::out_of_range(column, len))?;
        acc.has_null = true;
        Ok(())
    }

    pub fn add_non_null_column(&mut self, column: usize, value: &Datum) -> Result<()> {
        let len = self.columns.len();
        let acc = self
            .columns
            .get_mut(column)
            .ok_or_else(|| Error::out_of_range(column, len))?;
        acc.all_null = false;
        match acc.status {
            StatsStatus::Uninitialized => {
                return Err(Error::Logic("statistics used before initialize".into()))
            }
            StatsStatus::NoComparator => {}
            StatsStatus::NoValue => {
                acc.min = Some(value.clone());
                acc.max = Some(value.clone());
                acc.status = StatsStatus::HasValue;
            }
            StatsStatus::HasValue => acc.update(value),
        }
        Ok(())
    }

    /// Folds `other` into `self`. Both must cover the same schema and be
    /// initialized the same way.
    pub fn merge_to(&mut self, other: &MicroPartitionStats) -> Result<()> {
        if other.columns.len() != self.columns.len() {
            return Err(Error::SchemaNotMatch(format!(
                "cannot merge statistics over {} columns into {}",
                other.columns.len(),
                self.columns.len()
            )));
        }
        for (acc, theirs) in self.columns.iter_mut().zip(other.columns.iter()) {
            if acc.status == StatsStatus::Uninitialized
                || theirs.status == StatsStatus::Uninitialized
            {
                return Err(Error::Logic("merging uninitialized statistics".into()));
            }
            acc.all_null &= theirs.all_null;
            acc.has_null |= theirs.has_null;

            if theirs.status != StatsStatus::HasValue {
                continue;
            }
            match acc.status {
                StatsStatus::HasValue => {
                    if let Some(min) = &theirs.min {
                        acc.update(min);
                    }
                    if let Some(max) = &theirs.max {
                        acc.update(max);
                    }
                }
                StatsStatus::NoValue => {
                    acc.min = theirs.min.clone();
                    acc.max = theirs.max.clone();
                    acc.status = StatsStatus::HasValue;
                }
                _ => {
                    return Err(Error::Logic(
                        "merging min/max into a column without comparator".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Clears collected values, keeping the per-column setup.
    pub fn reset(&mut self) {
        for acc in &mut self.columns {
            if acc.status == StatsStatus::HasValue {
                acc.status = StatsStatus::NoValue;
            }
            acc.all_null = true;
            acc.has_null = false;
            acc.min = None;
            acc.max = None;
        }
    }

    pub fn stats_data(&self) -> MicroPartitionStatisticsInfo {
        let column_stats = self
            .schema
            .columns()
            .iter()
            .zip(self.columns.iter())
            .map(|(desc, acc)| {
                let data_stats = match (acc.status, &acc.min, &acc.max) {
                    (StatsStatus::HasValue, Some(min), Some(max)) => Some(ColumnDataStats {
                        minimal: min.encode_value(),
                        maximum: max.encode_value(),
                    }),
                    _ => None,
                };
                ColumnStats {
                    all_null: acc.all_null,
                    has_null: acc.has_null,
                    info: Some(ColumnBasicInfo {
                        typid: desc.type_oid,
                        collation: desc.collation,
                        opfamily: desc.opfamily,
                    }),
                    data_stats,
                }
            })
            .collect();
        MicroPartitionStatisticsInfo { column_stats }
    }

    /// Combines two serialized statistics, `right` into `left`. Returns
    /// false, leaving `left` untouched, when they cannot be combined.
    pub fn stats_info_combine(
        left: &mut MicroPartitionStatisticsInfo,
        right: &MicroPartitionStatisticsInfo,
        schema: &Schema,
        comparators: &dyn ComparatorProvider,
    ) -> Result<bool> {
        if left.column_stats.len() != right.column_stats.len()
            || left.column_stats.len() > schema.len()
        {
            return Ok(false);
        }

        let mut compares = Vec::with_capacity(left.column_stats.len());
        for (i, (l, r)) in left.column_stats.iter().zip(&right.column_stats).enumerate() {
            let Some(desc) = schema.column(i) else {
                return Ok(false);
            };
            let left_collation = l.info.as_ref().map_or(0, |info| info.collation);
            let right_collation = r.info.as_ref().map_or(0, |info| info.collation);
            if left_collation != right_collation {
                return Ok(false);
            }
            if left_collation != 0 && left_collation != desc.collation {
                return Ok(false);
            }
            let compare = comparators.comparator(&desc.ty, desc.collation);
            if compare.is_none() && l.min_max().is_some() && r.min_max().is_some() {
                return Ok(false);
            }
            compares.push(compare);
        }

        for (i, (l, r)) in left
            .column_stats
            .iter_mut()
            .zip(&right.column_stats)
            .enumerate()
        {
            let ty = schema.columns()[i].ty;
            l.all_null &= r.all_null;
            l.has_null |= r.has_null;
            if l.info.is_none() {
                l.info = r.info.clone();
            }

            let Some((right_min, right_max)) = r.min_max() else {
                continue;
            };
            let Some((left_min, left_max)) = l.min_max() else {
                l.data_stats = r.data_stats.clone();
                continue;
            };
            let Some(compare) = compares[i] else {
                continue;
            };
            let pick = |ours: &[u8], theirs: &[u8], keep_if: Ordering| -> Result<Vec<u8>> {
                let a = ty.decode_value(theirs)?;
                let b = ty.decode_value(ours)?;
                Ok(if compare(&a, &b) == Some(keep_if) {
                    theirs.to_vec()
                } else {
                    ours.to_vec()
                })
            };
            let min = pick(left_min, right_min, Ordering::Less)?;
            let max = pick(left_max, right_max, Ordering::Greater)?;
            l.data_stats = Some(ColumnDataStats {
                minimal: Some(min),
                maximum: Some(max),
            });
        }
        Ok(true)
    }
}

/// Renders statistics as `[(all_null,has_null),(min,max)]` per column, or
/// `[(all_null,has_null),None]` without bounds.
pub struct StatsDisplay<'a> {
    info: &'a MicroPartitionStatisticsInfo,
    types: Vec<ColumnType>,
}

impl<'a> StatsDisplay<'a> {
    pub fn new(info: &'a MicroPartitionStatisticsInfo, types: &[ColumnType]) -> Self {
        Self {
            info,
            types: types.to_vec(),
        }
    }
}

impl fmt::Display for StatsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = |i: usize, raw: &[u8]| -> String {
            match self.types.get(i).map(|ty| ty.decode_value(raw)) {
                Some(Ok(datum)) => datum.to_string(),
                _ => Datum::Bytes(raw.to_vec()).to_string(),
            }
        };
        for (i, column) in self.info.column_stats.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "[({},{})", column.all_null, column.has_null)?;
            match column.min_max() {
                Some((min, max)) => write!(f, ",({},{})]", value(i, min), value(i, max))?,
                None => write!(f, ",None]")?,
            }
        }
        Ok(())
    }
}
