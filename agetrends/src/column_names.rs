//! Column names of the raw harmonised input and of the finished long-format dataset. The output
//! names must stay in sync with whatever the presentation layer reads.

// Raw input (wide format)
pub const COUNTRY: &str = "Country";
pub const REGION: &str = "Region";
pub const DATE: &str = "Date";
pub const SEX: &str = "Sex";
pub const AGE: &str = "Age";
pub const CASES: &str = "Cases";
pub const DEATHS: &str = "Deaths";
pub const TESTS: &str = "Tests";

pub const REQUIRED_INPUT: [&str; 8] = [COUNTRY, REGION, DATE, SEX, AGE, CASES, DEATHS, TESTS];

// Finished dataset (long format)
pub const DATE_CODE: &str = "Date_code";
pub const DATE_FORMAT: &str = "Date_format";
pub const DAY_OFFSET: &str = "gap_in_day";
pub const METRIC: &str = "Metric";
pub const VALUE: &str = "Value";
pub const VALUE_BY_POP: &str = "Value_by_pop";
pub const SERIES: &str = "Series";

/// Ordered columns of the finished dataset.
pub const OUTPUT: [&str; 12] = [
    COUNTRY,
    REGION,
    AGE,
    SEX,
    DATE,
    DATE_CODE,
    DATE_FORMAT,
    DAY_OFFSET,
    METRIC,
    VALUE,
    VALUE_BY_POP,
    SERIES,
];

// Summaries
pub const ROWS: &str = "Rows";

// Population reference tables
pub const POPULATION: &str = "pop";
pub const STATE: &str = "State";
