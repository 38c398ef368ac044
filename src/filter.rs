//! Zone-map pruning over file and stripe statistics.
//!
//! A filter only answers "cannot contain a match" when the statistics prove
//! it. Anything it cannot evaluate keeps the stripe or file in the scan.

use crate::format::{
    ColumnBasicInfo, ColumnDataStats, ColumnStats, MicroPartitionStatisticsInfo,
    StripeInformation,
};
use crate::statistics::{BuiltinComparators, ComparatorProvider};
use crate::types::{ColumnType, Datum, Schema};
use std::cmp::Ordering;
use std::sync::Arc;

/// Key argument is NULL, or the key is a null test.
pub const SK_ISNULL: u32 = 0x0001;
/// `IS NULL`.
pub const SK_SEARCHNULL: u32 = 0x0040;
/// `IS NOT NULL`.
pub const SK_SEARCHNOTNULL: u32 = 0x0080;

/// B-tree strategy numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Invalid = 0,
    Less = 1,
    LessEqual = 2,
    Equal = 3,
    GreaterEqual = 4,
    Greater = 5,
}

/// One conjunct of a scan predicate: `column <strategy> argument`, or a
/// null test.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanKey {
    /// 1-based column number; 0 applies a null test to every column.
    pub attno: usize,
    pub strategy: Strategy,
    pub flags: u32,
    pub argument: Datum,
    pub collation: u32,
}

impl ScanKey {
    pub fn compare(attno: usize, strategy: Strategy, argument: Datum, collation: u32) -> Self {
        let flags = if argument.is_null() { SK_ISNULL } else { 0 };
        Self {
            attno,
            strategy,
            flags,
            argument,
            collation,
        }
    }

    pub fn is_null(attno: usize) -> Self {
        Self::null_test(attno, SK_ISNULL | SK_SEARCHNULL)
    }

    pub fn is_not_null(attno: usize) -> Self {
        Self::null_test(attno, SK_ISNULL | SK_SEARCHNOTNULL)
    }

    fn null_test(attno: usize, flags: u32) -> Self {
        Self {
            attno,
            strategy: Strategy::Invalid,
            flags,
            argument: Datum::Null,
            collation: 0,
        }
    }

    fn is_null_key(&self) -> bool {
        self.flags & SK_ISNULL != 0
    }

    /// Whether a column with these null flags may satisfy a null key.
    fn check_nulls(&self, all_null: bool, has_null: bool) -> bool {
        if self.flags & SK_SEARCHNULL != 0 {
            has_null
        } else if self.flags & SK_SEARCHNOTNULL != 0 {
            !all_null
        } else {
            // strict operators never match a NULL argument
            false
        }
    }
}

/// Column statistics as seen by the filter.
pub trait StatsProvider {
    fn column_count(&self) -> usize;
    fn all_null(&self, column: usize) -> bool;
    fn has_null(&self, column: usize) -> bool;
    fn info(&self, column: usize) -> Option<&ColumnBasicInfo>;
    fn data_stats(&self, column: usize) -> Option<&ColumnDataStats>;
}

impl StatsProvider for MicroPartitionStatisticsInfo {
    fn column_count(&self) -> usize {
        self.column_stats.len()
    }

    fn all_null(&self, column: usize) -> bool {
        self.column_stats.get(column).is_some_and(|c| c.all_null)
    }

    fn has_null(&self, column: usize) -> bool {
        self.column_stats.get(column).is_none_or(|c| c.has_null)
    }

    fn info(&self, column: usize) -> Option<&ColumnBasicInfo> {
        self.column_stats.get(column)?.info.as_ref()
    }

    fn data_stats(&self, column: usize) -> Option<&ColumnDataStats> {
        self.column_stats.get(column)?.data_stats.as_ref()
    }
}

/// Statistics of one stripe, falling back to the file's column info.
#[derive(Debug, Clone, Copy)]
pub struct StripeStats<'a> {
    stripe: &'a StripeInformation,
    col_info: &'a [ColumnBasicInfo],
}

impl<'a> StripeStats<'a> {
    pub fn new(stripe: &'a StripeInformation, col_info: &'a [ColumnBasicInfo]) -> Self {
        Self { stripe, col_info }
    }

    fn column(&self, column: usize) -> Option<&'a ColumnStats> {
        self.stripe.col_stats.get(column)
    }
}

impl StatsProvider for StripeStats<'_> {
    fn column_count(&self) -> usize {
        self.stripe.col_stats.len()
    }

    fn all_null(&self, column: usize) -> bool {
        self.column(column).is_some_and(|c| c.all_null)
    }

    fn has_null(&self, column: usize) -> bool {
        self.column(column).is_none_or(|c| c.has_null)
    }

    fn info(&self, column: usize) -> Option<&ColumnBasicInfo> {
        self.column(column)
            .and_then(|c| c.info.as_ref())
            .or_else(|| self.col_info.get(column))
    }

    fn data_stats(&self, column: usize) -> Option<&ColumnDataStats> {
        self.column(column)?.data_stats.as_ref()
    }
}

/// Scan keys and column projection of one scan.
#[derive(Debug, Clone)]
pub struct Filter {
    scan_keys: Vec<ScanKey>,
    projection: Option<Vec<bool>>,
    comparators: Arc<dyn ComparatorProvider>,
}

impl Default for Filter {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinComparators))
    }
}

impl Filter {
    pub fn new(comparators: Arc<dyn ComparatorProvider>) -> Self {
        Self {
            scan_keys: Vec::new(),
            projection: None,
            comparators,
        }
    }

    pub fn set_scan_keys(&mut self, scan_keys: Vec<ScanKey>) {
        self.scan_keys = scan_keys;
    }

    pub fn scan_keys(&self) -> &[ScanKey] {
        &self.scan_keys
    }

    pub fn has_scan_keys(&self) -> bool {
        !self.scan_keys.is_empty()
    }

    /// An all-true projection is the same as none.
    pub fn set_column_projection(&mut self, projection: Vec<bool>) {
        self.projection = if projection.iter().all(|p| *p) {
            None
        } else {
            Some(projection)
        };
    }

    pub fn column_projection(&self) -> Option<&[bool]> {
        self.projection.as_deref()
    }

    /// Indices of the projected columns, `None` when every column is read.
    pub fn projected_columns(&self) -> Option<Vec<usize>> {
        let projection = self.projection.as_ref()?;
        Some(
            projection
                .iter()
                .enumerate()
                .filter_map(|(i, p)| p.then_some(i))
                .collect(),
        )
    }

    /// False only when no row covered by `provider` can satisfy every scan
    /// key.
    pub fn test_scan(&self, provider: &dyn StatsProvider, schema: &Schema) -> bool {
        for key in &self.scan_keys {
            if key.is_null_key() {
                if !self.check_null_key(key, provider, schema) {
                    return false;
                }
                continue;
            }

            let Some(column) = key.attno.checked_sub(1) else {
                continue;
            };
            let Some(desc) = schema.column(column) else {
                return true;
            };
            if key.collation != desc.collation {
                return true;
            }
            if column >= provider.column_count() {
                continue;
            }
            if provider.all_null(column) {
                return false;
            }
            let stats_collation = provider.info(column).map_or(0, |info| info.collation);
            if key.collation != stats_collation {
                continue;
            }
            if !self.check_value(key, &desc.ty, stats_collation, provider.data_stats(column)) {
                return false;
            }
        }
        true
    }

    fn check_null_key(&self, key: &ScanKey, provider: &dyn StatsProvider, schema: &Schema) -> bool {
        if key.attno > 0 {
            let column = key.attno - 1;
            if column >= provider.column_count() {
                return true;
            }
            return key.check_nulls(provider.all_null(column), provider.has_null(column));
        }

        if schema.len() != provider.column_count() {
            return true;
        }
        schema
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, desc)| !desc.dropped)
            .all(|(i, _)| key.check_nulls(provider.all_null(i), provider.has_null(i)))
    }

    fn check_value(
        &self,
        key: &ScanKey,
        ty: &ColumnType,
        collation: u32,
        data_stats: Option<&ColumnDataStats>,
    ) -> bool {
        let Some((min, max)) = data_stats.and_then(|d| d.minimal.as_deref().zip(d.maximum.as_deref()))
        else {
            return true;
        };
        let Some(compare) = self.comparators.comparator(ty, collation) else {
            return true;
        };
        let value = &key.argument;
        let ordering = |raw: &[u8]| ty.decode_value(raw).ok().and_then(|d| compare(&d, value));

        match key.strategy {
            Strategy::Less => ordering(min).is_none_or(|o| o == Ordering::Less),
            Strategy::LessEqual => ordering(min).is_none_or(|o| o != Ordering::Greater),
            Strategy::Equal => {
                ordering(min).is_none_or(|o| o != Ordering::Greater)
                    && ordering(max).is_none_or(|o| o != Ordering::Less)
            }
            Strategy::GreaterEqual => ordering(max).is_none_or(|o| o != Ordering::Less),
            Strategy::Greater => ordering(max).is_none_or(|o| o == Ordering::Greater),
            Strategy::Invalid => true,
        }
    }
}
