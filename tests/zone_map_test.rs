mod common;

use common::write_rows;
use lightning_columnar::filter::{StatsProvider, StripeStats};
use lightning_columnar::statistics::compare_datums;
use lightning_columnar::{
    BuiltinComparators, ColumnDesc, ColumnType, Datum, Filter, MemoryFileSystem,
    MicroPartitionReader, MicroPartitionStats, ReaderOptions, ScanKey, Schema, WriterOptions,
};
use proptest::collection::vec as prop_vec;
use proptest::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;

type ScanStrategy = lightning_columnar::Strategy;

fn schema() -> Schema {
    Schema::new(vec![
        ColumnDesc::new("n", ColumnType::Int64),
        ColumnDesc::new("s", ColumnType::Bytes),
    ])
}

fn row(value: Option<i64>) -> Vec<Datum> {
    match value {
        Some(v) => vec![Datum::Int64(v), Datum::Bytes(format!("{:+08}", v).into_bytes())],
        None => vec![Datum::Null, Datum::Null],
    }
}

fn satisfies(value: &Datum, strategy: ScanStrategy, argument: &Datum) -> bool {
    let Some(ordering) = compare_datums(value, argument) else {
        return false;
    };
    match strategy {
        ScanStrategy::Less => ordering == Ordering::Less,
        ScanStrategy::LessEqual => ordering != Ordering::Greater,
        ScanStrategy::Equal => ordering == Ordering::Equal,
        ScanStrategy::GreaterEqual => ordering != Ordering::Less,
        ScanStrategy::Greater => ordering == Ordering::Greater,
        ScanStrategy::Invalid => true,
    }
}

fn strategy_of(index: u8) -> ScanStrategy {
    match index % 5 {
        0 => ScanStrategy::Less,
        1 => ScanStrategy::LessEqual,
        2 => ScanStrategy::Equal,
        3 => ScanStrategy::GreaterEqual,
        _ => ScanStrategy::Greater,
    }
}

fn stats_of(values: &[Option<i64>]) -> MicroPartitionStats {
    let mut stats = MicroPartitionStats::new(schema(), Arc::new(BuiltinComparators));
    stats.initialize(&[0, 1]);
    for value in values {
        stats.add_row(&row(*value)).unwrap();
    }
    stats
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // A stripe holding a matching row is never skipped.
    #[test]
    fn prop_zone_map_never_skips_matches(
        values in prop_vec(prop::option::weighted(0.8, -50i64..50), 1..120),
        group_limit in 1usize..40,
        strategy in 0u8..5,
        argument in -60i64..60,
    ) {
        let fs = MemoryFileSystem::new();
        let options = WriterOptions::new("z", schema()).with_group_limit(group_limit);
        write_rows(Arc::new(fs.clone()), options, values.iter().map(|v| row(*v)));

        let strategy = strategy_of(strategy);
        let argument = Datum::Int64(argument);
        let mut filter = Filter::default();
        filter.set_scan_keys(vec![ScanKey::compare(1, strategy, argument.clone(), 0)]);

        let mut reader = MicroPartitionReader::open(&fs, "z", ReaderOptions::default()).unwrap();
        let schema = reader.schema().clone();
        for index in 0..reader.group_count() {
            let stripe = reader.footer().stripes[index].clone();
            let kept = filter.test_scan(&StripeStats::new(&stripe, &reader.footer().col_info), &schema);
            let group = reader.read_group(index).unwrap();
            let matched = (0..group.rows())
                .any(|r| satisfies(&group.get_tuple(r).unwrap()[0], strategy, &argument));
            prop_assert!(kept || !matched, "stripe {} skipped with a matching row", index);
        }
    }

    #[test]
    fn prop_null_keys_follow_null_counts(
        values in prop_vec(prop::option::weighted(0.5, 0i64..10), 1..60),
    ) {
        let info = stats_of(&values).stats_data();
        let nulls = values.iter().filter(|v| v.is_none()).count();

        let mut filter = Filter::default();
        filter.set_scan_keys(vec![ScanKey::is_null(1)]);
        prop_assert_eq!(filter.test_scan(&info, &schema()), nulls > 0);
        filter.set_scan_keys(vec![ScanKey::is_not_null(1)]);
        prop_assert_eq!(filter.test_scan(&info, &schema()), nulls < values.len());
        prop_assert_eq!(info.has_null(0), nulls > 0);
        prop_assert_eq!(info.all_null(0), nulls == values.len());
    }

    #[test]
    fn prop_stats_merge_is_associative(
        a in prop_vec(prop::option::of(-1000i64..1000), 0..30),
        b in prop_vec(prop::option::of(-1000i64..1000), 0..30),
        c in prop_vec(prop::option::of(-1000i64..1000), 0..30),
    ) {
        let (sa, sb, sc) = (stats_of(&a), stats_of(&b), stats_of(&c));

        let mut left = sa.clone();
        left.merge_to(&sb).unwrap();
        left.merge_to(&sc).unwrap();

        let mut right_tail = sb.clone();
        right_tail.merge_to(&sc).unwrap();
        let mut right = sa.clone();
        right.merge_to(&right_tail).unwrap();

        let all: Vec<Option<i64>> = a.iter().chain(&b).chain(&c).copied().collect();
        let direct = stats_of(&all);

        prop_assert_eq!(left.stats_data(), right.stats_data());
        prop_assert_eq!(left.stats_data(), direct.stats_data());
    }
}
