use anyhow::{bail, Result};
use chrono::{Duration, NaiveDateTime};

use crate::models::{
    dedup_column_names, CanonicalTable, Column, MergeMethod, TableRegistry,
};

/// Joins tables onto a common time axis by nearest-timestamp matching.
///
/// The sources run on different cadences (1-minute forecasts, 10-second
/// logs, quarter-hour meters) and their clocks drift by a few seconds, so an
/// exact equi-join on timestamps would pair almost nothing. Every join here
/// matches each row to the nearest row of the other table within a
/// tolerance; the method only decides which rows survive.
pub struct TimeAligner {
    tolerance: Duration,
    method: MergeMethod,
}

impl Default for TimeAligner {
    fn default() -> Self {
        Self {
            tolerance: Duration::minutes(1),
            method: MergeMethod::Outer,
        }
    }
}

impl TimeAligner {
    pub fn new(tolerance: Duration, method: MergeMethod) -> Self {
        Self { tolerance, method }
    }

    pub fn from_minutes(minutes: i64, method: MergeMethod) -> Self {
        Self::new(Duration::minutes(minutes), method)
    }

    /// Merge in insertion order; the first registry entry is the base.
    pub fn merge_registry(&self, registry: &TableRegistry) -> Result<CanonicalTable> {
        self.merge(registry.entries())
    }

    /// Merge an ordered list of named tables. The first is the base; each
    /// further table joins onto the running result, which is re-sorted
    /// after every step because the join appends unmatched rows at the end.
    pub fn merge(&self, tables: &[(String, CanonicalTable)]) -> Result<CanonicalTable> {
        if tables.is_empty() {
            bail!("merge requires at least one table");
        }
        let mut result = tables[0].1.clone();
        result.sort_by_timestamp();
        for (name, table) in &tables[1..] {
            result = self.join(result, name, table)?;
            result.sort_by_timestamp();
        }
        Ok(result)
    }

    fn join(
        &self,
        left: CanonicalTable,
        source: &str,
        right_in: &CanonicalTable,
    ) -> Result<CanonicalTable> {
        let mut right = right_in.clone();
        right.sort_by_timestamp();
        let tol_ms = self.tolerance.num_milliseconds().abs();

        // incoming columns that collide with the running result take a
        // source suffix; a final dedup keeps pathological cases unique
        let mut all_names: Vec<String> =
            left.column_names().iter().map(|s| s.to_string()).collect();
        for col in right.columns() {
            if left.column(&col.name).is_some() {
                all_names.push(format!("{}_{}", col.name, source));
            } else {
                all_names.push(col.name.clone());
            }
        }
        let right_names = dedup_column_names(&all_names).split_off(left.width());

        if self.method == MergeMethod::Right {
            let matches: Vec<Option<usize>> = right
                .timestamps()
                .iter()
                .map(|t| nearest_within(left.timestamps(), *t, tol_ms))
                .collect();
            let mut columns = Vec::with_capacity(left.width() + right.width());
            for col in left.columns() {
                let values = matches
                    .iter()
                    .map(|m| m.map(|i| col.values[i]).unwrap_or(f64::NAN))
                    .collect();
                columns.push(Column::new(col.name.clone(), values));
            }
            for (col, name) in right.columns().iter().zip(right_names) {
                columns.push(Column::new(name, col.values.clone()));
            }
            return CanonicalTable::from_parts(right.timestamps().to_vec(), columns);
        }

        let matches: Vec<Option<usize>> = left
            .timestamps()
            .iter()
            .map(|t| nearest_within(right.timestamps(), *t, tol_ms))
            .collect();
        let kept: Vec<usize> = match self.method {
            MergeMethod::Inner => (0..left.height()).filter(|i| matches[*i].is_some()).collect(),
            _ => (0..left.height()).collect(),
        };
        // under outer, right rows nobody matched become rows of their own
        let extra: Vec<usize> = if self.method == MergeMethod::Outer {
            let mut used = vec![false; right.height()];
            for m in matches.iter().flatten() {
                used[*m] = true;
            }
            (0..right.height()).filter(|i| !used[*i]).collect()
        } else {
            Vec::new()
        };

        let mut timestamps: Vec<NaiveDateTime> =
            kept.iter().map(|&i| left.timestamps()[i]).collect();
        timestamps.extend(extra.iter().map(|&j| right.timestamps()[j]));

        let mut columns = Vec::with_capacity(left.width() + right.width());
        for col in left.columns() {
            let mut values: Vec<f64> = kept.iter().map(|&i| col.values[i]).collect();
            values.extend(std::iter::repeat(f64::NAN).take(extra.len()));
            columns.push(Column::new(col.name.clone(), values));
        }
        for (col, name) in right.columns().iter().zip(right_names) {
            let mut values: Vec<f64> = kept
                .iter()
                .map(|&i| matches[i].map(|j| col.values[j]).unwrap_or(f64::NAN))
                .collect();
            values.extend(extra.iter().map(|&j| col.values[j]));
            columns.push(Column::new(name, values));
        }
        CanonicalTable::from_parts(timestamps, columns)
    }
}

/// Index of the nearest timestamp within tolerance, or None. Ties between
/// an earlier and a later candidate resolve to the earlier one.
fn nearest_within(sorted: &[NaiveDateTime], target: NaiveDateTime, tol_ms: i64) -> Option<usize> {
    if sorted.is_empty() {
        return None;
    }
    let idx = sorted.partition_point(|t| *t < target);
    let mut best: Option<(i64, usize)> = None;
    for cand in [idx.checked_sub(1), Some(idx)].into_iter().flatten() {
        if cand >= sorted.len() {
            continue;
        }
        let dist = (sorted[cand] - target).num_milliseconds().abs();
        if dist <= tol_ms {
            match best {
                Some((bd, _)) if dist >= bd => {}
                _ => best = Some((dist, cand)),
            }
        }
    }
    best.map(|(_, i)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn named(
        name: &str,
        column: &str,
        rows: &[(NaiveDateTime, f64)],
    ) -> (String, CanonicalTable) {
        let timestamps = rows.iter().map(|(t, _)| *t).collect();
        let values = rows.iter().map(|(_, v)| *v).collect();
        let table =
            CanonicalTable::from_parts(timestamps, vec![Column::new(column, values)]).unwrap();
        (name.to_string(), table)
    }

    fn base_and_offset() -> Vec<(String, CanonicalTable)> {
        vec![
            named(
                "forecast",
                "a",
                &[(ts(0, 0), 1.0), (ts(0, 10), 2.0), (ts(0, 20), 3.0)],
            ),
            named("power", "b", &[(ts(0, 1), 10.0), (ts(0, 19), 20.0)]),
        ]
    }

    #[test]
    fn nearest_match_within_tolerance_pairs_offset_rows() {
        let aligner = TimeAligner::from_minutes(2, MergeMethod::Outer);
        let merged = aligner.merge(&base_and_offset()).unwrap();
        assert_eq!(merged.timestamps(), &[ts(0, 0), ts(0, 10), ts(0, 20)]);
        let b = merged.column_values("b").unwrap();
        // 00:00 pairs with 00:01 and 00:20 with 00:19; nothing sits within
        // two minutes of 00:10
        assert_eq!(b[0], 10.0);
        assert!(b[1].is_nan());
        assert_eq!(b[2], 20.0);
    }

    #[test]
    fn outer_appends_unmatched_right_rows_in_time_order() {
        let tables = vec![
            named("forecast", "a", &[(ts(0, 0), 1.0)]),
            named("power", "b", &[(ts(0, 30), 9.0)]),
        ];
        let merged = TimeAligner::default().merge(&tables).unwrap();
        assert_eq!(merged.timestamps(), &[ts(0, 0), ts(0, 30)]);
        let a = merged.column_values("a").unwrap();
        let b = merged.column_values("b").unwrap();
        assert_eq!(a[0], 1.0);
        assert!(a[1].is_nan());
        assert!(b[0].is_nan());
        assert_eq!(b[1], 9.0);
    }

    #[test]
    fn inner_keeps_only_matched_base_rows() {
        let aligner = TimeAligner::from_minutes(2, MergeMethod::Inner);
        let merged = aligner.merge(&base_and_offset()).unwrap();
        assert_eq!(merged.timestamps(), &[ts(0, 0), ts(0, 20)]);
        assert_eq!(merged.column_values("a").unwrap(), &[1.0, 3.0]);
        assert_eq!(merged.column_values("b").unwrap(), &[10.0, 20.0]);
    }

    #[test]
    fn left_keeps_the_base_axis() {
        let aligner = TimeAligner::from_minutes(2, MergeMethod::Left);
        let merged = aligner.merge(&base_and_offset()).unwrap();
        assert_eq!(merged.timestamps(), &[ts(0, 0), ts(0, 10), ts(0, 20)]);
        assert_eq!(merged.height(), 3);
    }

    #[test]
    fn right_takes_the_joining_tables_axis() {
        let aligner = TimeAligner::from_minutes(2, MergeMethod::Right);
        let merged = aligner.merge(&base_and_offset()).unwrap();
        assert_eq!(merged.timestamps(), &[ts(0, 1), ts(0, 19)]);
        assert_eq!(merged.column_values("a").unwrap(), &[1.0, 3.0]);
        assert_eq!(merged.column_values("b").unwrap(), &[10.0, 20.0]);
    }

    #[test]
    fn colliding_column_names_take_the_source_suffix() {
        let tables = vec![
            named("forecast", "p", &[(ts(0, 0), 1.0)]),
            named("weather", "p", &[(ts(0, 0), 2.0)]),
        ];
        let merged = TimeAligner::default().merge(&tables).unwrap();
        assert_eq!(merged.column_names(), vec!["p", "p_weather"]);
        assert_eq!(merged.column_values("p_weather").unwrap(), &[2.0]);
    }

    #[test]
    fn appended_rows_participate_in_later_joins() {
        let tables = vec![
            named("forecast", "a", &[(ts(0, 0), 1.0)]),
            named("power", "b", &[(ts(0, 30), 9.0)]),
            named("weather", "c", &[(ts(0, 29), 30.0)]),
        ];
        let merged = TimeAligner::default().merge(&tables).unwrap();
        assert_eq!(merged.timestamps(), &[ts(0, 0), ts(0, 30)]);
        let c = merged.column_values("c").unwrap();
        // the row appended by the second join is re-sorted into the axis and
        // picks up the third table's value
        assert!(c[0].is_nan());
        assert_eq!(c[1], 30.0);
    }

    #[test]
    fn equidistant_candidates_resolve_to_the_earlier_side() {
        let tables = vec![
            named("base", "a", &[(ts(0, 10), 1.0)]),
            named("other", "b", &[(ts(0, 9), 5.0), (ts(0, 11), 7.0)]),
        ];
        let merged = TimeAligner::from_minutes(2, MergeMethod::Left).merge(&tables).unwrap();
        assert_eq!(merged.column_values("b").unwrap(), &[5.0]);
    }

    #[test]
    fn empty_input_list_is_an_error_and_single_table_is_identity() {
        let aligner = TimeAligner::default();
        assert!(aligner.merge(&[]).is_err());
        let only = vec![named("forecast", "a", &[(ts(0, 10), 1.0), (ts(0, 0), 2.0)])];
        let merged = aligner.merge(&only).unwrap();
        assert_eq!(merged.timestamps(), &[ts(0, 0), ts(0, 10)]);
    }

    #[test]
    fn empty_base_grows_under_outer() {
        let tables = vec![
            ("forecast".to_string(), CanonicalTable::empty()),
            named("power", "b", &[(ts(0, 0), 1.0), (ts(0, 10), 2.0)]),
        ];
        let merged = TimeAligner::default().merge(&tables).unwrap();
        assert_eq!(merged.height(), 2);
        assert_eq!(merged.column_values("b").unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn merge_registry_uses_insertion_order() {
        let mut registry = TableRegistry::new();
        let (name, table) = named("forecast", "a", &[(ts(0, 0), 1.0)]);
        registry.insert(name, table);
        let (name, table) = named("power", "b", &[(ts(0, 0), 2.0)]);
        registry.insert(name, table);
        let merged = TimeAligner::default().merge_registry(&registry).unwrap();
        assert_eq!(merged.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn no_matched_pair_exceeds_the_tolerance() {
        let base: Vec<(NaiveDateTime, f64)> =
            (0..30).map(|i| (ts(0, i * 2), i as f64)).collect();
        let offset: Vec<(NaiveDateTime, f64)> =
            (0..20).map(|i| (ts(0, i * 3 + 1), i as f64)).collect();
        let tables = vec![named("x", "a", &base), named("y", "b", &offset)];
        let tol = Duration::minutes(1);
        let merged = TimeAligner::new(tol, MergeMethod::Inner).merge(&tables).unwrap();
        // every surviving row carries a value matched at most one minute away
        let b = merged.column_values("b").unwrap();
        assert!(!merged.is_empty());
        for (row, value) in b.iter().enumerate() {
            assert!(!value.is_nan(), "row {} lost its match", row);
        }
    }
}
