use std::path::Path;

use anyhow::Result;
use log::{debug, info};

use crate::aggregate::build_time_metrics;
use crate::config::Config;
use crate::dataset::Dataset;
use crate::ratio::PopulationTables;
use crate::reshape::{melt, WideRecord};

// Re-exports
pub use column_names as COL;

// Modules
pub mod aggregate;
pub mod calendar;
pub mod column_names;
pub mod config;
pub mod dataset;
pub mod error;
pub mod formatters;
pub mod ingest;
pub mod ratio;
pub mod regression;
pub mod reshape;
pub mod select;
pub mod series;

/// The batch pipeline with its configuration and population reference tables
pub struct AgeTrends {
    pub config: Config,
    pub populations: PopulationTables,
}

impl AgeTrends {
    /// Setup with the default configuration, loading the population tables it points at
    pub fn new() -> Result<Self> {
        Self::new_with_config(Config::default())
    }

    /// Setup with custom configuration, loading the population tables it points at
    pub fn new_with_config(config: Config) -> Result<Self> {
        debug!("config: {config:?}");
        let populations = ingest::load_population_tables(
            &config.population_path(),
            &config.state_population_path(),
            &config,
        )?;
        Ok(Self::new_with_populations(config, populations))
    }

    pub fn new_with_populations(config: Config, populations: PopulationTables) -> Self {
        Self {
            config,
            populations,
        }
    }

    /// Run the whole pipeline on the harmonised file at `input`
    pub fn process(&self, input: &Path) -> Result<Dataset> {
        info!("Reading {}", input.display());
        let records = ingest::read_input(input, &self.config)?;
        self.process_records(records)
    }

    /// Melt, aggregate and normalise already ingested records
    pub fn process_records(&self, records: Vec<WideRecord>) -> Result<Dataset> {
        let mut observations = melt(records, self.config.noise_floor);
        let derived = build_time_metrics(&observations, &self.config);
        observations.extend(derived);
        self.populations.normalize(&mut observations);
        let dataset = Dataset::from_observations(&observations)?;
        info!("Finished dataset has {} rows", dataset.height());
        Ok(dataset)
    }
}
