//! Wide-to-long reshaping of the harmonised rows.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, warn};
use strum::IntoEnumIterator;

use crate::calendar::{days_since_epoch, to_date_code, SENTINEL_OFFSET};
use crate::ratio::safe_ratio_opt;
use crate::series::{BaseMetric, Metric, Observation, SeriesKey};

/// One harmonised row: a single date of one series with all of its metric columns.
#[derive(Debug, Clone, PartialEq)]
pub struct WideRecord {
    pub key: SeriesKey,
    pub date: Option<NaiveDate>,
    pub cases: Option<f64>,
    pub deaths: Option<f64>,
    pub tests: Option<f64>,
}

impl WideRecord {
    /// Case-fatality rate.
    pub fn cfr(&self) -> Option<f64> {
        safe_ratio_opt(self.deaths, self.cases)
    }

    pub fn tests_by_case(&self) -> Option<f64> {
        safe_ratio_opt(self.tests, self.cases)
    }

    pub fn value(&self, metric: BaseMetric) -> Option<f64> {
        match metric {
            BaseMetric::Cases => self.cases,
            BaseMetric::Deaths => self.deaths,
            BaseMetric::Tests => self.tests,
            BaseMetric::Cfr => self.cfr(),
            BaseMetric::TestsByCase => self.tests_by_case(),
        }
    }

    pub fn date_code(&self) -> Option<i64> {
        self.date.map(to_date_code)
    }

    pub fn day_offset(&self) -> i64 {
        self.date.map(days_since_epoch).unwrap_or(SENTINEL_OFFSET)
    }
}

/// Keep the last of several dated records of one series sharing a date. Undated records are all
/// kept.
fn dedup_dates(records: Vec<WideRecord>) -> Vec<WideRecord> {
    let total = records.len();
    let mut seen: HashSet<(SeriesKey, NaiveDate)> = HashSet::new();
    let mut kept: Vec<WideRecord> = records
        .into_iter()
        .rev()
        .filter(|r| match r.date {
            Some(date) => seen.insert((r.key.clone(), date)),
            None => true,
        })
        .collect();
    kept.reverse();
    if kept.len() < total {
        warn!(
            "Dropped {} rows repeating the date of a later row of the same series",
            total - kept.len()
        );
    }
    kept
}

/// Melt wide records into one observation per (record, metric), ordered by date code. A series
/// keeps one record per date, the last one in input order. Values that are missing or not above
/// `noise_floor` are dropped.
pub fn melt(mut records: Vec<WideRecord>, noise_floor: f64) -> Vec<Observation> {
    // Stable: rows sharing a date keep their input order. Undated rows sort first.
    records.sort_by_key(WideRecord::date_code);
    let records = dedup_dates(records);

    let mut keys: HashMap<SeriesKey, Arc<SeriesKey>> = HashMap::new();
    let mut observations = Vec::with_capacity(records.len() * 3);
    for record in records {
        let day_offset = record.day_offset();
        let values: Vec<(BaseMetric, f64)> = BaseMetric::iter()
            .filter_map(|metric| record.value(metric).map(|v| (metric, v)))
            .filter(|(_, v)| *v > noise_floor)
            .collect();
        if values.is_empty() {
            continue;
        }
        let key = keys
            .entry(record.key)
            .or_insert_with_key(|k| Arc::new(k.clone()))
            .clone();
        observations.extend(values.into_iter().map(|(metric, value)| Observation {
            key: key.clone(),
            date: record.date,
            day_offset,
            metric: Metric::raw(metric),
            value: Some(value),
            value_per_population: None,
        }));
    }
    debug!(
        "Melted into {} observations across {} series",
        observations.len(),
        keys.len()
    );
    observations
}
