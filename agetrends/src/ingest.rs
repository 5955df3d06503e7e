//! Reading the harmonised input file and the population reference tables.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use itertools::izip;
use log::{debug, info, warn};
use polars::prelude::*;

use crate::calendar::parse_date;
use crate::config::Config;
use crate::error::{AgeTrendsError, AgeTrendsResult};
use crate::ratio::{parse_population, PopulationTables};
use crate::reshape::WideRecord;
use crate::series::{SeriesKey, Sex};
use crate::COL;

/// Fail with [`AgeTrendsError::MissingColumn`] naming the first of `columns` absent from `df`.
pub fn require_columns(df: &DataFrame, columns: &[&str]) -> AgeTrendsResult<()> {
    let names = df.get_column_names();
    match columns.iter().find(|c| !names.contains(c)) {
        Some(missing) => Err(AgeTrendsError::MissingColumn(missing.to_string())),
        None => Ok(()),
    }
}

/// Read a delimited file with every column as a string.
fn read_string_csv(path: &Path, skip_rows: usize, separator: u8) -> anyhow::Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_skip_rows(skip_rows)
        .with_infer_schema_length(Some(0))
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .try_into_reader_with_file_path(Some(path.into()))
        .with_context(|| format!("Failed to open {}", path.display()))?
        .finish()
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    debug!("Read {} rows from {}", df.height(), path.display());
    Ok(df)
}

/// Read the harmonised file at `path` into wide records.
pub fn read_input(path: &Path, config: &Config) -> anyhow::Result<Vec<WideRecord>> {
    let df = read_string_csv(path, config.input_skip_rows, b',')?;
    input_records(df, config)
}

fn age_band(age: Option<f64>) -> Option<u8> {
    age.filter(|a| a.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(a))
        .map(|a| a as u8)
}

/// Convert a raw input frame into wide records. Excluded countries are dropped, non-numeric
/// counts become null, unparseable dates are kept undated and rows that cannot be keyed to a
/// series are dropped.
pub fn input_records(df: DataFrame, config: &Config) -> anyhow::Result<Vec<WideRecord>> {
    require_columns(&df, &COL::REQUIRED_INPUT)?;
    let total = df.height();
    let excluded = Series::new("excluded", config.excluded_countries.as_slice());
    let df = df
        .lazy()
        .filter(col(COL::COUNTRY).is_in(lit(excluded)).not())
        .select([
            col(COL::COUNTRY).cast(DataType::String),
            col(COL::REGION).cast(DataType::String),
            col(COL::DATE).cast(DataType::String),
            col(COL::SEX).cast(DataType::String),
            col(COL::AGE).cast(DataType::Float64),
            col(COL::CASES).cast(DataType::Float64),
            col(COL::DEATHS).cast(DataType::Float64),
            col(COL::TESTS).cast(DataType::Float64),
        ])
        .collect()?;
    if df.height() < total {
        info!(
            "Dropped {} rows from excluded countries {:?}",
            total - df.height(),
            config.excluded_countries
        );
    }

    let mut records = Vec::with_capacity(df.height());
    let mut unkeyed = 0usize;
    let mut undated = 0usize;
    for (country, region, date, sex, age, cases, deaths, tests) in izip!(
        df.column(COL::COUNTRY)?.str()?,
        df.column(COL::REGION)?.str()?,
        df.column(COL::DATE)?.str()?,
        df.column(COL::SEX)?.str()?,
        df.column(COL::AGE)?.f64()?,
        df.column(COL::CASES)?.f64()?,
        df.column(COL::DEATHS)?.f64()?,
        df.column(COL::TESTS)?.f64()?,
    ) {
        let sex = sex.and_then(|s| s.trim().parse::<Sex>().ok());
        let (Some(country), Some(region), Some(sex), Some(age)) = (country, region, sex, age_band(age))
        else {
            unkeyed += 1;
            continue;
        };
        let date = date.and_then(|d| parse_date(d).ok());
        if date.is_none() {
            undated += 1;
        }
        records.push(WideRecord {
            key: SeriesKey::new(country, region, age, sex),
            date,
            cases,
            deaths,
            tests,
        });
    }
    if unkeyed > 0 {
        warn!("Dropped {unkeyed} rows with a missing country or region or an unknown sex or age");
    }
    if undated > 0 {
        warn!("{undated} rows have an unparseable date and are kept without one");
    }
    info!("Ingested {} input rows", records.len());
    Ok(records)
}

/// Read a `key;pop` population table.
pub fn read_population_table(
    path: &Path,
    key_column: &str,
    separator: char,
) -> anyhow::Result<HashMap<String, f64>> {
    let separator = u8::try_from(separator).map_err(|_| {
        AgeTrendsError::InvalidParameter(format!("separator {separator:?} is not a single byte"))
    })?;
    let df = read_string_csv(path, 0, separator)?;
    require_columns(&df, &[key_column, COL::POPULATION])?;

    let mut table = HashMap::with_capacity(df.height());
    for (key, population) in df
        .column(key_column)?
        .str()?
        .into_iter()
        .zip(df.column(COL::POPULATION)?.str()?)
    {
        match (key, population.and_then(parse_population)) {
            (Some(key), Some(population)) => {
                table.insert(key.trim().to_string(), population);
            }
            (key, _) => warn!("Ignoring population entry {key:?} in {}", path.display()),
        }
    }
    Ok(table)
}

/// Load the country and US state tables.
pub fn load_population_tables(
    countries: &Path,
    states: &Path,
    config: &Config,
) -> anyhow::Result<PopulationTables> {
    let tables = PopulationTables::new(
        read_population_table(countries, COL::COUNTRY, config.population_separator)?,
        read_population_table(states, COL::STATE, config.population_separator)?,
        config.region_aliases.clone(),
    );
    Ok(tables)
}
