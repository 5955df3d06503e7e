//! Read-only projections of the finished dataset.
//!
//! Every selection returns `Option<Dataset>`: `None` is the explicit "no data" answer and a `Some`
//! dataset always holds at least one row.

use chrono::NaiveDate;
use log::debug;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calendar::to_date_code;
use crate::dataset::Dataset;
use crate::error::AgeTrendsResult;
use crate::series::{Granularity, Metric, Sex, ALL_REGIONS};
use crate::COL;

/// Region name accepted in place of every region of the selected countries.
pub const ANY_REGION: &str = "All_regions";

/// Combine multiple queries with AND. If there are no queries in the input list, returns None.
fn combine_exprs_with_and(exprs: Vec<Expr>) -> Option<Expr> {
    let mut query: Option<Expr> = None;
    for expr in exprs {
        query = if let Some(partial_query) = query {
            Some(partial_query.and(expr))
        } else {
            Some(expr)
        };
    }
    query
}

fn is_in_strings(column: &str, values: Vec<String>) -> Expr {
    col(column).is_in(lit(Series::new(column, values)))
}

/// Membership lists for each dimension of a series. An empty list matches nothing. `metrics` is
/// optional and matches every metric when absent.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SelectCriteria {
    pub countries: Vec<String>,
    pub regions: Vec<String>,
    pub ages: Vec<u8>,
    pub sexes: Vec<Sex>,
    pub metrics: Option<Vec<Metric>>,
}

impl From<&SelectCriteria> for Expr {
    fn from(criteria: &SelectCriteria) -> Self {
        let ages: Vec<i32> = criteria.ages.iter().map(|a| i32::from(*a)).collect();
        let mut exprs = vec![
            is_in_strings(COL::COUNTRY, criteria.countries.clone()),
            is_in_strings(COL::REGION, criteria.regions.clone()),
            col(COL::AGE).is_in(lit(Series::new(COL::AGE, ages))),
            is_in_strings(
                COL::SEX,
                criteria.sexes.iter().map(ToString::to_string).collect(),
            ),
        ];
        if let Some(metrics) = &criteria.metrics {
            exprs.push(is_in_strings(
                COL::METRIC,
                metrics.iter().map(ToString::to_string).collect(),
            ));
        }
        combine_exprs_with_and(exprs).unwrap_or_else(|| lit(false))
    }
}

fn non_empty(df: DataFrame) -> Option<Dataset> {
    (df.height() > 0).then_some(Dataset(df))
}

/// Rows matching every dimension of `criteria`.
pub fn select(dataset: &Dataset, criteria: &SelectCriteria) -> AgeTrendsResult<Option<Dataset>> {
    let df = dataset.0.clone().lazy().filter(criteria.into()).collect()?;
    debug!("Selected {} of {} rows", df.height(), dataset.height());
    Ok(non_empty(df))
}

/// Rows dated between `start` and `end`, both inclusive. Undated rows never match.
pub fn date_range(
    dataset: &Dataset,
    start: NaiveDate,
    end: NaiveDate,
) -> AgeTrendsResult<Option<Dataset>> {
    let df = dataset
        .0
        .clone()
        .lazy()
        .filter(
            col(COL::DATE_CODE)
                .gt_eq(lit(to_date_code(start)))
                .and(col(COL::DATE_CODE).lt_eq(lit(to_date_code(end)))),
        )
        .collect()?;
    Ok(non_empty(df))
}

/// Sorted distinct regions of `countries`, without the country-level sentinel.
pub fn regions_of_country(dataset: &Dataset, countries: &[String]) -> AgeTrendsResult<Vec<String>> {
    let df = dataset
        .0
        .clone()
        .lazy()
        .filter(
            is_in_strings(COL::COUNTRY, countries.to_vec())
                .and(col(COL::REGION).neq(lit(ALL_REGIONS))),
        )
        .select([col(COL::REGION)])
        .unique(None, UniqueKeepStrategy::Any)
        .sort([COL::REGION], SortMultipleOptions::default())
        .collect()?;
    let regions = df
        .column(COL::REGION)?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    Ok(regions)
}

/// True when one of `regions` belongs to none of `countries`.
pub fn region_error(
    dataset: &Dataset,
    countries: &[String],
    regions: &[String],
) -> AgeTrendsResult<bool> {
    let available = regions_of_country(dataset, countries)?;
    Ok(regions
        .iter()
        .any(|r| r != ALL_REGIONS && r != ANY_REGION && !available.contains(r)))
}

/// Bare cumulative metrics at `granularity`. Metrics that already carry a granularity and ratio
/// metrics are kept as they are.
pub fn adapt_metrics_interval(metrics: &[Metric], granularity: Granularity) -> Vec<Metric> {
    metrics
        .iter()
        .map(|m| match m.granularity {
            Granularity::Cumulative => m.with_granularity(granularity),
            _ => *m,
        })
        .collect()
}

/// For every age band, the latest row dated at or before `max_offset`, ordered by age.
pub fn histogram_frame(dataset: &Dataset, max_offset: i64) -> AgeTrendsResult<Option<Dataset>> {
    let df = dataset
        .0
        .clone()
        .lazy()
        .filter(col(COL::DAY_OFFSET).lt_eq(lit(max_offset)))
        .filter(col(COL::DAY_OFFSET).eq(col(COL::DAY_OFFSET).max().over([col(COL::AGE)])))
        .unique_stable(Some(vec![COL::AGE.to_string()]), UniqueKeepStrategy::Last)
        .sort([COL::AGE], SortMultipleOptions::default())
        .collect()?;
    Ok(non_empty(df))
}
