use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::aggregate::{GapPolicy, MonthlyLabel};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory the relative file names below are resolved against.
    pub data_dir: PathBuf,
    /// Harmonised cases/deaths/tests file.
    pub input_file: PathBuf,
    pub population_file: PathBuf,
    pub state_population_file: PathBuf,
    /// Preamble lines before the header of the harmonised file.
    pub input_skip_rows: usize,
    pub population_separator: char,
    /// Long-format values at or below this are dropped as noise.
    pub noise_floor: f64,
    /// Countries whose source data are not trusted and are dropped on ingestion.
    pub excluded_countries: Vec<String>,
    /// Region spellings used in the harmonised file mapped to the names of the state table.
    pub region_aliases: BTreeMap<String, String>,
    pub gap_policy: GapPolicy,
    pub monthly_label: MonthlyLabel,
    pub ridge_alpha: f64,
    pub curve_points: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: "data".into(),
            input_file: "Output_10.csv".into(),
            population_file: "population_datasets/Countries_pop.csv".into(),
            state_population_file: "population_datasets/States_of_the_USA_pop.csv".into(),
            input_skip_rows: 3,
            population_separator: ';',
            noise_floor: 0.001,
            excluded_countries: vec!["UK".into()],
            region_aliases: BTreeMap::from([
                ("Lousiana".into(), "Louisiana".into()),
                ("NYC".into(), "New York".into()),
            ]),
            gap_policy: GapPolicy::default(),
            monthly_label: MonthlyLabel::default(),
            ridge_alpha: 1.0,
            curve_points: 1000,
        }
    }
}

impl Config {
    pub fn input_path(&self) -> PathBuf {
        self.data_dir.join(&self.input_file)
    }

    pub fn population_path(&self) -> PathBuf {
        self.data_dir.join(&self.population_file)
    }

    pub fn state_population_path(&self) -> PathBuf {
        self.data_dir.join(&self.state_population_file)
    }
}
