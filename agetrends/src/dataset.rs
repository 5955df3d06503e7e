//! The finished long-format dataset and its conversions to and from frames and files.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use itertools::izip;
use log::debug;
use polars::prelude::*;

use crate::calendar::{
    days_since_epoch, input_date_string, label_date_string, parse_date, SENTINEL_OFFSET,
};
use crate::error::{AgeTrendsError, AgeTrendsResult};
use crate::ingest::require_columns;
use crate::ratio::{value_per_population, PopulationTables};
use crate::series::{Metric, Observation, SeriesKey, Sex};
use crate::COL;

/// Column types of the finished dataset, in output order.
fn output_schema() -> [(&'static str, DataType); 12] {
    [
        (COL::COUNTRY, DataType::String),
        (COL::REGION, DataType::String),
        (COL::AGE, DataType::Int32),
        (COL::SEX, DataType::String),
        (COL::DATE, DataType::String),
        (COL::DATE_CODE, DataType::Int64),
        (COL::DATE_FORMAT, DataType::String),
        (COL::DAY_OFFSET, DataType::Int64),
        (COL::METRIC, DataType::String),
        (COL::VALUE, DataType::Float64),
        (COL::VALUE_BY_POP, DataType::Float64),
        (COL::SERIES, DataType::String),
    ]
}

/// The finished long-format dataset, one row per [`Observation`].
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset(pub DataFrame);

impl Dataset {
    /// Wrap a frame holding the output columns, casting each to its canonical type and dropping
    /// any other column.
    pub fn from_frame(df: DataFrame) -> AgeTrendsResult<Self> {
        require_columns(&df, &COL::OUTPUT)?;
        let columns: Vec<Expr> = output_schema()
            .into_iter()
            .map(|(name, dtype)| col(name).cast(dtype))
            .collect();
        Ok(Self(df.lazy().select(columns).collect()?))
    }

    pub fn from_observations(observations: &[Observation]) -> AgeTrendsResult<Self> {
        let df = DataFrame::new(vec![
            Series::new(
                COL::COUNTRY,
                observations.iter().map(|o| o.key.country.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::REGION,
                observations.iter().map(|o| o.key.region.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::AGE,
                observations.iter().map(|o| i32::from(o.key.age)).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::SEX,
                observations.iter().map(|o| o.key.sex.to_string()).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::DATE,
                observations
                    .iter()
                    .map(|o| o.date.map(input_date_string))
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                COL::DATE_CODE,
                observations.iter().map(Observation::date_code).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::DATE_FORMAT,
                observations
                    .iter()
                    .map(|o| o.date.map(label_date_string))
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                COL::DAY_OFFSET,
                observations.iter().map(|o| o.day_offset).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::METRIC,
                observations.iter().map(|o| o.metric.to_string()).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::VALUE,
                observations.iter().map(|o| o.value).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::VALUE_BY_POP,
                observations
                    .iter()
                    .map(|o| o.value_per_population)
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                COL::SERIES,
                observations.iter().map(Observation::series_key).collect::<Vec<_>>(),
            ),
        ])?;
        Ok(Self(df))
    }

    /// Rebuild the observations held in the frame.
    pub fn observations(&self) -> AgeTrendsResult<Vec<Observation>> {
        let df = &self.0;
        let missing = |column: &str| AgeTrendsError::MissingValue(column.to_string());
        let mut keys: HashMap<SeriesKey, Arc<SeriesKey>> = HashMap::new();
        let mut observations = Vec::with_capacity(df.height());
        for (country, region, age, sex, date, offset, metric, value, value_by_pop) in izip!(
            df.column(COL::COUNTRY)?.str()?,
            df.column(COL::REGION)?.str()?,
            df.column(COL::AGE)?.i32()?,
            df.column(COL::SEX)?.str()?,
            df.column(COL::DATE)?.str()?,
            df.column(COL::DAY_OFFSET)?.i64()?,
            df.column(COL::METRIC)?.str()?,
            df.column(COL::VALUE)?.f64()?,
            df.column(COL::VALUE_BY_POP)?.f64()?,
        ) {
            let age = age.ok_or_else(|| missing(COL::AGE))?;
            let age = u8::try_from(age)
                .map_err(|_| AgeTrendsError::InvalidParameter(format!("age band {age}")))?;
            let sex = sex.ok_or_else(|| missing(COL::SEX))?;
            let sex: Sex = sex
                .parse()
                .map_err(|_| AgeTrendsError::UnknownSex(sex.to_string()))?;
            let key = SeriesKey::new(
                country.ok_or_else(|| missing(COL::COUNTRY))?,
                region.ok_or_else(|| missing(COL::REGION))?,
                age,
                sex,
            );
            let key = keys
                .entry(key)
                .or_insert_with_key(|k| Arc::new(k.clone()))
                .clone();
            let date = date.and_then(|d| parse_date(d).ok());
            observations.push(Observation {
                key,
                date,
                day_offset: offset
                    .or(date.map(days_since_epoch))
                    .unwrap_or(SENTINEL_OFFSET),
                metric: metric.ok_or_else(|| missing(COL::METRIC))?.parse::<Metric>()?,
                value,
                value_per_population: value_by_pop,
            });
        }
        Ok(observations)
    }

    /// Read a dataset previously written as CSV.
    pub fn read_csv(path: &Path) -> anyhow::Result<Self> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.into()))
            .with_context(|| format!("Failed to open dataset {}", path.display()))?
            .finish()
            .with_context(|| format!("Failed to parse dataset {}", path.display()))?;
        debug!("Read dataset with {} rows", df.height());
        Ok(Self::from_frame(df)?)
    }

    /// Variant of the dataset with `Value` expressed per million inhabitants of the US state named
    /// by each row's region. Rows outside a known state get a null value.
    pub fn per_million_by_state(&self, tables: &PopulationTables) -> AgeTrendsResult<Self> {
        let values: Float64Chunked = self
            .0
            .column(COL::REGION)?
            .str()?
            .into_iter()
            .zip(self.0.column(COL::VALUE)?.f64()?)
            .map(|(region, value)| value_per_population(value, region.and_then(|r| tables.state(r))))
            .collect();
        let mut df = self.0.clone();
        df.with_column(values.into_series().with_name(COL::VALUE))?;
        Ok(Self(df))
    }

    /// One row per series with its identity and number of rows, ordered by series key.
    pub fn series_summary(&self) -> AgeTrendsResult<DataFrame> {
        let df = self
            .0
            .clone()
            .lazy()
            .group_by([
                col(COL::SERIES),
                col(COL::COUNTRY),
                col(COL::REGION),
                col(COL::AGE),
                col(COL::SEX),
            ])
            .agg([col(COL::METRIC).count().alias(COL::ROWS)])
            .sort([COL::SERIES], SortMultipleOptions::default())
            .collect()?;
        Ok(df)
    }

    pub fn height(&self) -> usize {
        self.0.height()
    }

    pub fn is_empty(&self) -> bool {
        self.0.height() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::series::BaseMetric;

    fn observations() -> Vec<Observation> {
        let louisiana = Arc::new(SeriesKey::new("USA", "Lousiana", 80, Sex::Female));
        let texas = Arc::new(SeriesKey::new("USA", "Texas", 80, Sex::Female));
        let mut undated = Observation::at_offset(
            louisiana.clone(),
            SENTINEL_OFFSET,
            Metric::raw(BaseMetric::Cases),
            Some(5.0),
        );
        undated.date = None;
        vec![
            Observation::at_offset(louisiana, 91, Metric::raw(BaseMetric::Deaths), Some(465.0)),
            Observation::at_offset(texas, 91, Metric::raw(BaseMetric::Cfr), Some(0.1)),
            undated,
        ]
    }

    #[test]
    fn frame_columns_follow_output_layout() -> anyhow::Result<()> {
        let dataset = Dataset::from_observations(&observations())?;
        assert_eq!(dataset.0.get_column_names(), COL::OUTPUT.to_vec());
        let dates: Vec<Option<&str>> = dataset.0.column(COL::DATE_FORMAT)?.str()?.into_iter().collect();
        assert_eq!(dates, vec![Some("2020/04/01"), Some("2020/04/01"), None]);
        let codes: Vec<Option<i64>> = dataset.0.column(COL::DATE_CODE)?.i64()?.into_iter().collect();
        assert_eq!(codes, vec![Some(20200401), Some(20200401), None]);
        assert_eq!(
            dataset.0.column(COL::SERIES)?.str()?.get(0),
            Some("USA|Lousiana|80|f")
        );
        Ok(())
    }

    #[test]
    fn observations_survive_the_frame() -> anyhow::Result<()> {
        let original = observations();
        let dataset = Dataset::from_observations(&original)?;
        assert_eq!(dataset.observations()?, original);
        Ok(())
    }

    #[test]
    fn csv_file_is_read_back_with_canonical_types() -> anyhow::Result<()> {
        let mut dataset = Dataset::from_observations(&observations())?;
        let file = NamedTempFile::new()?;
        CsvWriter::new(file.reopen()?).finish(&mut dataset.0)?;

        let read = Dataset::read_csv(file.path())?;
        assert_eq!(read.0.column(COL::VALUE)?.dtype(), &DataType::Float64);
        assert_eq!(read.0.column(COL::AGE)?.dtype(), &DataType::Int32);
        assert_eq!(read.observations()?, observations());
        Ok(())
    }

    #[test]
    fn frame_without_output_columns_is_rejected() -> anyhow::Result<()> {
        let df = df!(COL::COUNTRY => ["France"])?;
        assert!(matches!(
            Dataset::from_frame(df),
            Err(AgeTrendsError::MissingColumn(_))
        ));
        Ok(())
    }

    #[test]
    fn state_normalisation_uses_aliases() -> anyhow::Result<()> {
        let tables = PopulationTables::new(
            HashMap::new(),
            HashMap::from([("Louisiana".to_string(), 4_650_000.0)]),
            BTreeMap::from([("Lousiana".to_string(), "Louisiana".to_string())]),
        );
        let dataset = Dataset::from_observations(&observations())?;
        let by_state = dataset.per_million_by_state(&tables)?;
        let values: Vec<Option<f64>> = by_state.0.column(COL::VALUE)?.f64()?.into_iter().collect();
        assert_eq!(values, vec![Some(100.0), None, Some(1.08)]);
        // The source dataset is untouched
        assert_eq!(dataset.0.column(COL::VALUE)?.f64()?.get(0), Some(465.0));
        Ok(())
    }

    #[test]
    fn summary_counts_rows_per_series() -> anyhow::Result<()> {
        let summary = Dataset::from_observations(&observations())?.series_summary()?;
        let rows: Vec<Option<u32>> = summary.column(COL::ROWS)?.u32()?.into_iter().collect();
        assert_eq!(rows, vec![Some(2), Some(1)]);
        Ok(())
    }
}
