//! Temporal aggregation of cumulative series into daily, weekly, biweekly and monthly rows.
//!
//! Each (base metric, series key) pair is an independent unit of work. Cumulative observations
//! are first differenced into a contiguous [`DailySeries`]; the coarser granularities are sums of
//! daily values over calendar-anchored windows. Synthesized rows are collected per unit and
//! concatenated once, so the input rows are never touched.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Weekday;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calendar::{first_weekday_on_or_after, month_windows};
use crate::config::Config;
use crate::ratio::{round_to_cents, safe_ratio_opt};
use crate::series::{BaseMetric, Granularity, Metric, Observation, SeriesKey};

pub const WEEK_DAYS: i64 = 7;
pub const BIWEEK_DAYS: i64 = 14;

/// How a cumulative delta spanning several days is turned into daily values.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Every day of the gap receives an equal share of the delta.
    #[default]
    Spread,
    /// Days inside a multi-day gap are null. Single-day steps keep their delta.
    Missing,
}

/// Which day of a calendar month a monthly row is dated at.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonthlyLabel {
    #[default]
    SecondToLastDay,
    LastDay,
}

/// Daily values for the contiguous offsets `start..start + values.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    pub start: i64,
    pub values: Vec<Option<f64>>,
}

impl DailySeries {
    /// Difference cumulative `(offset, value)` points, sorted by offset, into daily values. The
    /// delta between two consecutive points is assigned to every day in `(o0, o1]`. Returns `None`
    /// when the points do not span at least one day.
    pub fn from_cumulative(points: &[(i64, Option<f64>)], policy: GapPolicy) -> Option<Self> {
        let first = points.first()?.0;
        let mut values = vec![];
        for pair in points.windows(2) {
            let ((o0, v0), (o1, v1)) = (pair[0], pair[1]);
            let gap = o1 - o0;
            if gap <= 0 {
                continue;
            }
            let delta = v1.zip(v0).map(|(v1, v0)| v1 - v0);
            let daily = match policy {
                GapPolicy::Spread => safe_ratio_opt(delta, Some(gap as f64)).map(round_to_cents),
                GapPolicy::Missing if gap == 1 => delta.map(round_to_cents),
                GapPolicy::Missing => None,
            };
            values.extend(std::iter::repeat(daily).take(gap as usize));
        }
        if values.is_empty() {
            return None;
        }
        Some(Self {
            start: first + 1,
            values,
        })
    }

    /// Last covered offset.
    pub fn end(&self) -> i64 {
        self.start + self.values.len() as i64 - 1
    }

    pub fn days(&self) -> impl Iterator<Item = (i64, Option<f64>)> + '_ {
        (self.start..).zip(self.values.iter().copied())
    }

    /// Sum over the inclusive offsets `[first, last]`; null if any day in it is null.
    fn sum(&self, first: i64, last: i64) -> Option<f64> {
        let from = usize::try_from(first - self.start).ok()?;
        let to = usize::try_from(last - self.start).ok()?;
        self.values.get(from..=to)?.iter().copied().sum()
    }

    /// Sums over consecutive `days`-long windows. The first window opens on the first Monday
    /// strictly after the first daily value, so a series starting on a Monday skips that week.
    /// Each sum is dated at the last day of its window; a trailing partial window is dropped.
    pub fn windowed(&self, days: i64) -> Vec<(i64, Option<f64>)> {
        let monday = first_weekday_on_or_after(self.start + 1, Weekday::Mon);
        let end = self.end();
        (monday..)
            .step_by(days as usize)
            .map(|first| (first, first + days - 1))
            .take_while(|(_, last)| *last <= end)
            .map(|(first, last)| (last, self.sum(first, last)))
            .collect()
    }

    /// Sums over every calendar month the series fully covers.
    pub fn monthly(&self, label: MonthlyLabel) -> Vec<(i64, Option<f64>)> {
        month_windows(self.start, self.end())
            .into_iter()
            .map(|(first, last)| {
                let dated = match label {
                    MonthlyLabel::SecondToLastDay => last - 1,
                    MonthlyLabel::LastDay => last,
                };
                (dated, self.sum(first, last))
            })
            .collect()
    }
}

/// Derived rows of one cumulative metric of one series.
fn aggregate_series(
    key: &Arc<SeriesKey>,
    base: BaseMetric,
    mut points: Vec<(i64, Option<f64>)>,
    config: &Config,
) -> Vec<Observation> {
    if points.len() < 2 {
        return vec![];
    }
    points.sort_by_key(|(offset, _)| *offset);
    let Some(daily) = DailySeries::from_cumulative(&points, config.gap_policy) else {
        return vec![];
    };

    let metric = Metric::raw(base);
    let rows = |granularity: Granularity, values: Vec<(i64, Option<f64>)>| {
        values.into_iter().map(move |(offset, value)| {
            Observation::at_offset(key.clone(), offset, metric.with_granularity(granularity), value)
        })
    };
    rows(Granularity::Daily, daily.days().collect())
        .chain(rows(Granularity::Weekly, daily.windowed(WEEK_DAYS)))
        .chain(rows(Granularity::Biweekly, daily.windowed(BIWEEK_DAYS)))
        .chain(rows(Granularity::Monthly, daily.monthly(config.monthly_label)))
        .collect()
}

/// Synthesize the Daily, Weekly, Biweekly and Monthly rows of every series from its cumulative
/// Deaths, Cases and Tests rows. Rows without a valid date are skipped. The result is ordered by
/// metric, series key and day offset.
pub fn build_time_metrics(observations: &[Observation], config: &Config) -> Vec<Observation> {
    let mut units: HashMap<(BaseMetric, Arc<SeriesKey>), Vec<(i64, Option<f64>)>> =
        HashMap::new();
    let mut undated = 0usize;
    for base in BaseMetric::CUMULATIVE {
        let metric = Metric::raw(base);
        for observation in observations.iter().filter(|o| o.metric == metric) {
            if !observation.has_valid_date() {
                undated += 1;
                continue;
            }
            units
                .entry((base, observation.key.clone()))
                .or_default()
                .push((observation.day_offset, observation.value));
        }
    }
    if undated > 0 {
        warn!("Skipped {undated} cumulative rows without a valid date");
    }
    debug!("Aggregating {} series/metric pairs", units.len());

    let mut derived: Vec<Observation> = units
        .into_par_iter()
        .flat_map_iter(|((base, key), points)| aggregate_series(&key, base, points, config))
        .collect();
    derived.par_sort_by(|a, b| {
        a.metric
            .cmp(&b.metric)
            .then_with(|| a.key.cmp(&b.key))
            .then_with(|| a.day_offset.cmp(&b.day_offset))
    });
    info!("Synthesized {} aggregated rows", derived.len());
    derived
}
