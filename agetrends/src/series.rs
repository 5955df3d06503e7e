//! Identity of an independent time series and the long-format observation rows.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::calendar::{date_from_offset, to_date_code};
use crate::error::AgeTrendsError;

/// Sentinel region meaning "country-level aggregate".
pub const ALL_REGIONS: &str = "All";
/// Upper age band, covering ages 100 to 104.
pub const OLDEST_AGE_BAND: u8 = 100;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Sex {
    #[strum(serialize = "b")]
    #[serde(rename = "b")]
    Both,
    #[strum(serialize = "m")]
    #[serde(rename = "m")]
    Male,
    #[strum(serialize = "f")]
    #[serde(rename = "f")]
    Female,
}

impl Sex {
    pub fn label(&self) -> &'static str {
        match self {
            Sex::Both => "Both sexes",
            Sex::Male => "Males",
            Sex::Female => "Females",
        }
    }
}

/// Metrics present in (or derived from) a single raw row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum BaseMetric {
    Cases,
    Deaths,
    Tests,
    #[strum(serialize = "CFR")]
    Cfr,
    #[strum(serialize = "Tests by cases")]
    TestsByCase,
}

impl BaseMetric {
    /// Running totals which can be differenced into daily values. Ordered as they are aggregated.
    pub const CUMULATIVE: [BaseMetric; 3] = [BaseMetric::Deaths, BaseMetric::Cases, BaseMetric::Tests];

    pub fn is_cumulative(&self) -> bool {
        Self::CUMULATIVE.contains(self)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Granularity {
    Cumulative,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl Granularity {
    pub const DERIVED: [Granularity; 4] = [
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Biweekly,
        Granularity::Monthly,
    ];

    fn prefix(&self) -> &'static str {
        match self {
            Granularity::Cumulative => "",
            Granularity::Daily => "Daily ",
            Granularity::Weekly => "Weekly ",
            Granularity::Biweekly => "Biweekly ",
            Granularity::Monthly => "Monthly ",
        }
    }
}

/// A base metric at a given granularity, e.g. "Weekly Deaths". Only cumulative base metrics carry
/// a granularity other than [`Granularity::Cumulative`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Metric {
    pub granularity: Granularity,
    pub base: BaseMetric,
}

impl Metric {
    pub fn raw(base: BaseMetric) -> Self {
        Self {
            granularity: Granularity::Cumulative,
            base,
        }
    }

    /// The same base metric at `granularity`. Ratio metrics have no granular variants and are
    /// returned unchanged.
    pub fn with_granularity(self, granularity: Granularity) -> Self {
        if self.base.is_cumulative() {
            Self {
                granularity,
                base: self.base,
            }
        } else {
            self
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.granularity.prefix(), self.base)
    }
}

impl FromStr for Metric {
    type Err = AgeTrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || AgeTrendsError::UnknownMetric(s.to_string());
        let (granularity, rest) = Granularity::DERIVED
            .iter()
            .find_map(|g| s.strip_prefix(g.prefix()).map(|rest| (*g, rest)))
            .unwrap_or((Granularity::Cumulative, s));
        let base: BaseMetric = rest.parse().map_err(|_| unknown())?;
        if granularity != Granularity::Cumulative && !base.is_cumulative() {
            return Err(unknown());
        }
        Ok(Self { granularity, base })
    }
}

impl From<Metric> for String {
    fn from(value: Metric) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Metric {
    type Error = AgeTrendsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Identity of one independent series. Aggregation never reads across two keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub country: String,
    pub region: String,
    pub age: u8,
    pub sex: Sex,
}

impl SeriesKey {
    pub fn new(country: impl Into<String>, region: impl Into<String>, age: u8, sex: Sex) -> Self {
        Self {
            country: country.into(),
            region: region.into(),
            age,
            sex,
        }
    }

    pub fn is_country_level(&self) -> bool {
        self.region == ALL_REGIONS
    }
}

const KEY_SEPARATOR: char = '|';
const KEY_ESCAPE: char = '\\';

fn escape_key_field(value: &str) -> Cow<'_, str> {
    if value.contains([KEY_SEPARATOR, KEY_ESCAPE]) {
        let mut escaped = String::with_capacity(value.len() + 2);
        for c in value.chars() {
            if c == KEY_SEPARATOR || c == KEY_ESCAPE {
                escaped.push(KEY_ESCAPE);
            }
            escaped.push(c);
        }
        Cow::Owned(escaped)
    } else {
        Cow::Borrowed(value)
    }
}

/// Canonical string form `country|region|age|sex`, with `|` and `\` escaped in the text fields.
impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            escape_key_field(&self.country),
            escape_key_field(&self.region),
            self.age,
            self.sex,
            sep = KEY_SEPARATOR
        )
    }
}

/// Label of a 10-year age band, e.g. `"80-89"` or `"100-104"`.
pub fn age_range_label(age: u8) -> String {
    let upper = if age == OLDEST_AGE_BAND { 4 } else { 9 };
    format!("{age}-{}", u16::from(age) + upper)
}

/// One row of the long-format dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: Arc<SeriesKey>,
    /// `None` when the source date could not be parsed.
    pub date: Option<NaiveDate>,
    pub day_offset: i64,
    pub metric: Metric,
    pub value: Option<f64>,
    pub value_per_population: Option<f64>,
}

impl Observation {
    /// A synthesized row dated at `day_offset`.
    pub fn at_offset(key: Arc<SeriesKey>, day_offset: i64, metric: Metric, value: Option<f64>) -> Self {
        Self {
            key,
            date: Some(date_from_offset(day_offset)),
            day_offset,
            metric,
            value,
            value_per_population: None,
        }
    }

    pub fn date_code(&self) -> Option<i64> {
        self.date.map(to_date_code)
    }

    pub fn series_key(&self) -> String {
        self.key.to_string()
    }

    pub fn has_valid_date(&self) -> bool {
        self.date.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn sex_codes_parse_case_insensitively() -> anyhow::Result<()> {
        assert_eq!("b".parse::<Sex>()?, Sex::Both);
        assert_eq!("M".parse::<Sex>()?, Sex::Male);
        assert_eq!(Sex::Female.to_string(), "f");
        assert_eq!(Sex::Both.label(), "Both sexes");
        assert!("x".parse::<Sex>().is_err());
        Ok(())
    }

    #[test]
    fn metric_labels() -> anyhow::Result<()> {
        let weekly_deaths = Metric::raw(BaseMetric::Deaths).with_granularity(Granularity::Weekly);
        assert_eq!(weekly_deaths.to_string(), "Weekly Deaths");
        assert_eq!("Weekly Deaths".parse::<Metric>()?, weekly_deaths);
        assert_eq!("Tests by cases".parse::<Metric>()?, Metric::raw(BaseMetric::TestsByCase));
        assert_eq!(Metric::raw(BaseMetric::Cfr).to_string(), "CFR");
        // Ratio metrics never take a granularity
        assert_eq!(
            Metric::raw(BaseMetric::Cfr).with_granularity(Granularity::Daily),
            Metric::raw(BaseMetric::Cfr)
        );
        assert!("Daily CFR".parse::<Metric>().is_err());
        assert!("Hourly Cases".parse::<Metric>().is_err());
        Ok(())
    }

    #[test]
    fn every_metric_label_parses_back() -> anyhow::Result<()> {
        for base in BaseMetric::iter() {
            for granularity in Granularity::iter() {
                let metric = Metric::raw(base).with_granularity(granularity);
                assert_eq!(metric.to_string().parse::<Metric>()?, metric);
            }
        }
        Ok(())
    }

    #[test]
    fn series_keys_do_not_collide() {
        let a = SeriesKey::new("A|B", "C", 10, Sex::Both);
        let b = SeriesKey::new("A", "B|C", 10, Sex::Both);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(
            SeriesKey::new("France", "Corse", 80, Sex::Both).to_string(),
            "France|Corse|80|b"
        );

        let keys: HashSet<String> = ["x\\", "x"]
            .iter()
            .flat_map(|c| ["|y", "y"].map(|r| SeriesKey::new(*c, r, 0, Sex::Male).to_string()))
            .collect();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn age_labels() {
        assert_eq!(age_range_label(0), "0-9");
        assert_eq!(age_range_label(80), "80-89");
        assert_eq!(age_range_label(100), "100-104");
    }

    #[test]
    fn synthesized_rows_derive_dates_from_offsets() {
        let key = Arc::new(SeriesKey::new("France", ALL_REGIONS, 80, Sex::Both));
        let row = Observation::at_offset(key, 5, Metric::raw(BaseMetric::Cases), Some(1.0));
        assert_eq!(row.date_code(), Some(20200106));
        assert_eq!(row.series_key(), "France|All|80|b");
        assert!(row.key.is_country_level());
    }
}
