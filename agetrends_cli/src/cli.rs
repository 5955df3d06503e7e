use std::fs::File;
use std::path::{Path, PathBuf};

use agetrends::{
    config::Config,
    dataset::Dataset,
    error::AgeTrendsError,
    formatters::{CsvFormatter, JsonFormatter, OutputFormatter, OutputGenerator},
    ingest::load_population_tables,
    regression::{regression, regression_histogram, RegressionParams},
    select::{
        adapt_metrics_interval, date_range, histogram_frame, region_error, regions_of_country,
        select, SelectCriteria, ANY_REGION,
    },
    series::{BaseMetric, Granularity, Metric, Sex, ALL_REGIONS},
    AgeTrends,
};
use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use enum_dispatch::enum_dispatch;
use log::{debug, info};
use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};
use spinners::{Spinner, Spinners};
use strum_macros::EnumString;

use crate::display::{display_regions, display_series};
use crate::error::AgeTrendsCliResult;

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";
const NO_DATA: &str = "No data.";
const AGE_BANDS: [u8; 11] = [0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100];

/// Defines the output formats we are able to produce data in.
#[derive(Clone, Debug, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl From<&OutputFormat> for OutputFormatter {
    fn from(value: &OutputFormat) -> Self {
        match value {
            OutputFormat::Csv => OutputFormatter::Csv(CsvFormatter),
            OutputFormat::Json => OutputFormatter::Json(JsonFormatter),
        }
    }
}

fn write_output<T, U>(
    output_generator: T,
    mut data: DataFrame,
    output_file: Option<U>,
) -> AgeTrendsCliResult<()>
where
    T: OutputGenerator,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file).context("Failed to write output")?;
        output_generator.save(&mut f, &mut data)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        output_generator.save(&mut stdout_lock, &mut data)?;
    };
    Ok(())
}

fn start_spinner(quiet: bool, message: &str) -> Option<Spinner> {
    (!quiet).then(|| {
        Spinner::with_timer(
            DEFAULT_PROGRESS_SPINNER,
            message.to_string() + RUNNING_TAIL_STRING,
        )
    })
}

fn stop_spinner(spinner: Option<Spinner>) {
    if let Some(mut s) = spinner {
        s.stop_with_symbol(COMPLETE_PROGRESS_STRING);
    }
}

fn read_dataset(path: &Path, quiet: bool) -> AgeTrendsCliResult<Dataset> {
    let sp = start_spinner(quiet, "Reading dataset");
    let dataset = Dataset::read_csv(path)?;
    stop_spinner(sp);
    debug!("dataset has {} rows", dataset.height());
    Ok(dataset)
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    fn run(&self, config: Config) -> AgeTrendsCliResult<()>;
}

/// The `process` command runs the batch pipeline on a harmonised input file.
#[derive(Args, Debug)]
pub struct ProcessCommand {
    #[arg(long, help = "Harmonised input file [default: from the configuration]")]
    input: Option<PathBuf>,
    #[arg(long, help = "Country population table [default: from the configuration]")]
    population: Option<PathBuf>,
    #[arg(long, help = "US state population table [default: from the configuration]")]
    state_population: Option<PathBuf>,
    #[arg(
        short = 'f',
        long,
        value_name = "csv|json",
        default_value = "csv",
        help = "Output format for the finished dataset"
    )]
    output_format: OutputFormat,
    #[arg(short = 'o', long, help = "Output file to place the results")]
    output_file: Option<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for ProcessCommand {
    fn run(&self, config: Config) -> AgeTrendsCliResult<()> {
        info!("Running `process` subcommand");
        let input = self.input.clone().unwrap_or_else(|| config.input_path());
        let sp = start_spinner(self.quiet, "Loading population tables");
        let populations = load_population_tables(
            &self.population.clone().unwrap_or_else(|| config.population_path()),
            &self
                .state_population
                .clone()
                .unwrap_or_else(|| config.state_population_path()),
            &config,
        )?;
        stop_spinner(sp);

        let sp = start_spinner(self.quiet, "Building time metrics");
        let dataset = AgeTrends::new_with_populations(config, populations).process(&input)?;
        stop_spinner(sp);

        let formatter: OutputFormatter = (&self.output_format).into();
        write_output(formatter, dataset.0, self.output_file.as_deref())?;
        Ok(())
    }
}

/// The `series` command lists the independent series of a finished dataset.
#[derive(Args, Debug)]
pub struct SeriesCommand {
    #[arg(index = 1, help = "Finished dataset (CSV)")]
    dataset: PathBuf,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for SeriesCommand {
    fn run(&self, _config: Config) -> AgeTrendsCliResult<()> {
        info!("Running `series` subcommand");
        let dataset = read_dataset(&self.dataset, self.quiet)?;
        display_series(&dataset.series_summary()?)?;
        Ok(())
    }
}

/// The `regions` command lists the regions of the given countries.
#[derive(Args, Debug)]
pub struct RegionsCommand {
    #[arg(index = 1, help = "Finished dataset (CSV)")]
    dataset: PathBuf,
    #[arg(short = 'c', long = "country", required = true, value_delimiter = ',')]
    countries: Vec<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for RegionsCommand {
    fn run(&self, _config: Config) -> AgeTrendsCliResult<()> {
        info!("Running `regions` subcommand");
        let dataset = read_dataset(&self.dataset, self.quiet)?;
        let regions = regions_of_country(&dataset, &self.countries)?;
        display_regions(&self.countries, &regions);
        Ok(())
    }
}

/// Selection criteria shared by the `select` and `regress` commands. Lists are comma separated.
#[derive(Args, Debug, Clone)]
struct SelectionArgs {
    #[arg(short = 'c', long = "country", required = true, value_delimiter = ',')]
    countries: Vec<String>,
    #[arg(
        short = 'r',
        long = "region",
        value_delimiter = ',',
        default_values_t = [ALL_REGIONS.to_string()],
        help = "Regions, `All` for country-level data or `All_regions` for every region"
    )]
    regions: Vec<String>,
    #[arg(short = 'a', long = "age", value_delimiter = ',', default_values_t = AGE_BANDS)]
    ages: Vec<u8>,
    #[arg(
        short = 's',
        long = "sex",
        value_delimiter = ',',
        default_values_t = [Sex::Both],
        help = "Sex codes: b, m, f"
    )]
    sexes: Vec<Sex>,
    #[arg(
        short = 'm',
        long = "metric",
        value_delimiter = ',',
        help = "Metrics, e.g. Cases or \"Weekly Deaths\" [default: all]"
    )]
    metrics: Vec<Metric>,
    #[arg(
        short = 'i',
        long,
        value_name = "daily|weekly|biweekly|monthly",
        help = "Granularity applied to the cumulative metrics"
    )]
    interval: Option<Granularity>,
    #[arg(long, value_name = "YYYY-MM-DD", help = "First date to keep")]
    start: Option<NaiveDate>,
    #[arg(long, value_name = "YYYY-MM-DD", help = "Last date to keep")]
    end: Option<NaiveDate>,
}

impl SelectionArgs {
    fn metrics(&self) -> Option<Vec<Metric>> {
        let granularity = self.interval.unwrap_or(Granularity::Cumulative);
        if !self.metrics.is_empty() {
            Some(adapt_metrics_interval(&self.metrics, granularity))
        } else if granularity != Granularity::Cumulative {
            let cumulative = BaseMetric::CUMULATIVE.map(Metric::raw);
            Some(adapt_metrics_interval(&cumulative, granularity))
        } else {
            None
        }
    }

    fn criteria(&self, dataset: &Dataset) -> AgeTrendsCliResult<SelectCriteria> {
        let mut regions = self.regions.clone();
        if regions.iter().any(|r| r == ANY_REGION) {
            regions.extend(regions_of_country(dataset, &self.countries)?);
        }
        Ok(SelectCriteria {
            countries: self.countries.clone(),
            regions,
            ages: self.ages.clone(),
            sexes: self.sexes.clone(),
            metrics: self.metrics(),
        })
    }

    /// The selected rows, or `None` when nothing matches.
    fn apply(&self, dataset: &Dataset) -> AgeTrendsCliResult<Option<Dataset>> {
        if region_error(dataset, &self.countries, &self.regions)? {
            return Err(AgeTrendsError::InvalidParameter(format!(
                "regions {:?} are not all part of {:?}",
                self.regions, self.countries
            ))
            .into());
        }
        let Some(selected) = select(dataset, &self.criteria(dataset)?)? else {
            return Ok(None);
        };
        if self.start.is_none() && self.end.is_none() {
            return Ok(Some(selected));
        }
        let selected = date_range(
            &selected,
            self.start.unwrap_or(NaiveDate::MIN),
            self.end.unwrap_or(NaiveDate::MAX),
        )?;
        Ok(selected)
    }
}

/// The `select` command projects a finished dataset onto the given selection.
#[derive(Args, Debug)]
pub struct SelectCommand {
    #[arg(index = 1, help = "Finished dataset (CSV)")]
    dataset: PathBuf,
    #[command(flatten)]
    selection: SelectionArgs,
    #[arg(long, help = "Express values per million inhabitants of each US state")]
    per_state: bool,
    #[arg(
        short = 'f',
        long,
        value_name = "csv|json",
        default_value = "csv",
        help = "Output format for the results"
    )]
    output_format: OutputFormat,
    #[arg(short = 'o', long, help = "Output file to place the results")]
    output_file: Option<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for SelectCommand {
    fn run(&self, config: Config) -> AgeTrendsCliResult<()> {
        info!("Running `select` subcommand");
        let dataset = read_dataset(&self.dataset, self.quiet)?;
        let Some(mut selected) = self.selection.apply(&dataset)? else {
            println!("{NO_DATA}");
            return Ok(());
        };
        if self.per_state {
            let populations = load_population_tables(
                &config.population_path(),
                &config.state_population_path(),
                &config,
            )?;
            selected = selected.per_million_by_state(&populations)?;
        }
        let formatter: OutputFormatter = (&self.output_format).into();
        write_output(formatter, selected.0, self.output_file.as_deref())?;
        Ok(())
    }
}

/// The `regress` command fits trend curves to a selection and prints them as JSON.
#[derive(Args, Debug)]
pub struct RegressCommand {
    #[arg(index = 1, help = "Finished dataset (CSV)")]
    dataset: PathBuf,
    #[command(flatten)]
    selection: SelectionArgs,
    #[arg(long, default_value_t = 3, help = "Polynomial degree, 1 to 9")]
    degree: usize,
    #[arg(long, default_value_t = 0, help = "Days to extrapolate past the last observation")]
    forecast: u32,
    #[arg(long, help = "Fit values per million inhabitants")]
    by_pop: bool,
    #[arg(long, help = "Fit across age bands instead of over time")]
    histogram: bool,
    #[arg(long, requires = "histogram", help = "Latest day offset used by the histogram")]
    max_offset: Option<i64>,
    #[arg(short = 'o', long, help = "Output file to place the curves")]
    output_file: Option<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for RegressCommand {
    fn run(&self, config: Config) -> AgeTrendsCliResult<()> {
        info!("Running `regress` subcommand");
        let params = RegressionParams::new(self.degree, self.forecast, self.by_pop, &config)?;
        let dataset = read_dataset(&self.dataset, self.quiet)?;
        let selected = match self.selection.apply(&dataset)? {
            Some(selected) if self.histogram => {
                histogram_frame(&selected, self.max_offset.unwrap_or(i64::MAX))?
            }
            selected => selected,
        };
        let Some(selected) = selected else {
            println!("{NO_DATA}");
            return Ok(());
        };

        let sp = start_spinner(self.quiet, "Fitting curves");
        let observations = selected.observations()?;
        let curves = if self.histogram {
            regression_histogram(&observations, &params)?
        } else {
            regression(&observations, &params)?
        };
        stop_spinner(sp);

        if let Some(output_file) = &self.output_file {
            let f = File::create(output_file).context("Failed to write output")?;
            serde_json::to_writer_pretty(f, &curves)?;
        } else {
            serde_json::to_writer_pretty(std::io::stdout().lock(), &curves)?;
            println!();
        }
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about = "Derive time metrics and trends from age-stratified epidemic counts", long_about = None, name = "agetrends")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "\
            Do not print progress bar to stdout. Results and logs (when `RUST_LOG`\n\
            is set) will still be printed.",
        global = true
    )]
    quiet: bool,
    #[arg(
        long,
        global = true,
        help = "Configuration file [default: <config dir>/agetrends/config.toml]"
    )]
    pub config: Option<PathBuf>,
}

/// Commands contains the list of subcommands avaliable for use in the CLI.
/// Each command implements the RunCommand trait and specifies its args.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Run the pipeline on a harmonised file and output the finished dataset
    Process(ProcessCommand),
    /// List the series of a finished dataset
    Series(SeriesCommand),
    /// List the regions of countries in a finished dataset
    Regions(RegionsCommand),
    /// Select rows of a finished dataset. Criteria are applied conjunctively.
    Select(SelectCommand),
    /// Fit polynomial trend curves to selected rows
    Regress(RegressCommand),
}
