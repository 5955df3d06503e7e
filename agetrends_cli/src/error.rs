use agetrends::error::AgeTrendsError;
use polars::error::PolarsError;

#[derive(thiserror::Error, Debug)]
pub enum AgeTrendsCliError {
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("serde JSON error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("agetrends error: {0}")]
    AgeTrendsError(#[from] AgeTrendsError),
    #[error("std IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type AgeTrendsCliResult<T> = Result<T, AgeTrendsCliError>;
