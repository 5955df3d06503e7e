//! Error types.

#[derive(thiserror::Error, Debug)]
pub enum AgeTrendsError {
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Unknown sex code: {0}")]
    UnknownSex(String),
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Missing value in column {0}")]
    MissingValue(String),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Wrapped IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type AgeTrendsResult<T> = Result<T, AgeTrendsError>;

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_anyhow() {
        let anyhow_error = anyhow!("An anyhow error");
        let agetrends_error: AgeTrendsError = anyhow_error.into();
        assert_eq!(
            agetrends_error.to_string(),
            "Wrapped anyhow error: An anyhow error"
        );
    }

    #[test]
    fn test_invalid_date_message() {
        let err = AgeTrendsError::InvalidDate("31/02/2020".into());
        assert_eq!(err.to_string(), "Invalid date: 31/02/2020");
    }
}
