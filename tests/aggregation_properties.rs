//! Property tests for aggregation, frequency inference and range arithmetic
//!
//! Uses property-based testing (proptest) to check the invariants that must
//! hold for any input, not just hand-picked series.

use proptest::prelude::*;

use tsview::aggregate::aggregate;
use tsview::cache::sub_range;
use tsview::frequency::infer_frequency;
use tsview::table::{Column, Table};

// =============================================================================
// Test Data Strategies
// =============================================================================

const SECOND: i64 = 1_000_000;

/// Ascending timestamps with whole-second deltas of 1..=600s
fn timestamp_sequence(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..=600, len).prop_map(|deltas| {
        let mut result = Vec::with_capacity(deltas.len());
        let mut current = 1_700_000_000 * SECOND;
        for delta in deltas {
            result.push(current);
            current += delta * SECOND;
        }
        result
    })
}

fn table_of(timestamps: &[i64]) -> Table {
    Table::new(vec![
        Column::temporal("ts", timestamps.iter().map(|t| Some(*t)).collect()),
        Column::numeric(
            "v",
            (0..timestamps.len()).map(|i| Some(i as f64)).collect(),
        ),
    ])
    .unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_output_respects_budget(ts in timestamp_sequence(2..400), budget in 1usize..50) {
        let table = table_of(&ts);
        let out = aggregate(&table, "ts", budget).unwrap();
        prop_assert!(out.num_rows() <= budget);

        let starts: Vec<i64> = out.temporal_values("ts").unwrap().iter().flatten().copied().collect();
        prop_assert_eq!(starts.len(), out.num_rows());
        prop_assert_eq!(starts[0], ts[0]);
        prop_assert!(starts.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(*starts.last().unwrap() <= *ts.last().unwrap());
    }

    #[test]
    fn prop_means_stay_in_range(ts in timestamp_sequence(60..300), budget in 2usize..30) {
        let table = table_of(&ts);
        let out = aggregate(&table, "ts", budget).unwrap();
        let max = (ts.len() - 1) as f64;
        for v in out.column("v").unwrap().as_numeric().unwrap().iter().flatten() {
            prop_assert!(*v >= 0.0 && *v <= max);
        }
    }

    #[test]
    fn prop_regular_grid_infers_its_step(step_secs in 1i64..100_000, n in 2usize..200) {
        let ts: Vec<Option<i64>> = (0..n as i64).map(|i| Some(i * step_secs * SECOND)).collect();
        let freq = infer_frequency(&ts).unwrap();
        prop_assert_eq!(freq.num_seconds(), step_secs);
    }

    #[test]
    fn prop_contained_ranges_resolve(
        prior_offset in 0i64..10_000,
        prior_limit in 1i64..10_000,
        start in 0i64..10_000,
        len in 1i64..10_000,
    ) {
        let offset = prior_offset + start % prior_limit;
        let limit = 1 + len % (prior_offset + prior_limit - offset);
        let (relative, kept) = sub_range(prior_offset, prior_limit, offset, limit).unwrap();
        prop_assert_eq!(relative, offset - prior_offset);
        prop_assert_eq!(kept, limit);
        prop_assert!(relative + kept <= prior_limit);
    }

    #[test]
    fn prop_ranges_past_the_end_are_rejected(
        prior_offset in 0i64..10_000,
        prior_limit in 1i64..10_000,
        overshoot in 1i64..100,
    ) {
        let end = prior_offset + prior_limit;
        prop_assert!(sub_range(prior_offset, prior_limit, prior_offset, prior_limit + overshoot).is_err());
        prop_assert!(sub_range(prior_offset, prior_limit, end, 1).is_err());
    }
}
