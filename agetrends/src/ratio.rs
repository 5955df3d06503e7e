//! Ratio metrics and population normalisation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, warn};

use crate::series::Observation;

const PER_MILLION: f64 = 1_000_000.0;

/// `numerator / denominator`, or `None` when the denominator is zero or the result is not finite.
pub fn safe_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let ratio = numerator / denominator;
    ratio.is_finite().then_some(ratio)
}

/// [`safe_ratio`] over nullable operands.
pub fn safe_ratio_opt(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    numerator
        .zip(denominator)
        .and_then(|(n, d)| safe_ratio(n, d))
}

pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `value` per million inhabitants, rounded to two decimals. `None` if either input is missing or
/// the population is zero.
pub fn value_per_population(value: Option<f64>, population: Option<f64>) -> Option<f64> {
    safe_ratio_opt(value.map(|v| v * PER_MILLION), population).map(round_to_cents)
}

/// Parse a population figure that may contain stray whitespace, e.g. `"39 512 223"`.
pub fn parse_population(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    digits.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Read-only population lookups, loaded once per pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationTables {
    countries: HashMap<String, f64>,
    states: HashMap<String, f64>,
    region_aliases: BTreeMap<String, String>,
}

impl PopulationTables {
    pub fn new(
        countries: HashMap<String, f64>,
        states: HashMap<String, f64>,
        region_aliases: BTreeMap<String, String>,
    ) -> Self {
        Self {
            countries,
            states,
            region_aliases,
        }
    }

    pub fn country(&self, country: &str) -> Option<f64> {
        self.countries.get(country).copied()
    }

    /// Population of a US state, resolving known misspellings of the region name first.
    pub fn state(&self, region: &str) -> Option<f64> {
        let name = self
            .region_aliases
            .get(region)
            .map(String::as_str)
            .unwrap_or(region);
        self.states.get(name).copied()
    }

    pub fn per_million(&self, observation: &Observation) -> Option<f64> {
        value_per_population(observation.value, self.country(&observation.key.country))
    }

    pub fn per_million_state(&self, observation: &Observation) -> Option<f64> {
        value_per_population(observation.value, self.state(&observation.key.region))
    }

    /// Fill `value_per_population` of every observation from the country table. Unknown countries
    /// leave the field empty.
    pub fn normalize(&self, observations: &mut [Observation]) {
        let mut unknown: BTreeSet<String> = BTreeSet::new();
        for observation in observations.iter_mut() {
            if self.country(&observation.key.country).is_none() {
                unknown.insert(observation.key.country.clone());
            }
            observation.value_per_population = self.per_million(observation);
        }
        if !unknown.is_empty() {
            warn!("No population for countries: {unknown:?}");
        }
        debug!("Normalised {} observations by population", observations.len());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::series::{BaseMetric, Metric, SeriesKey, Sex};

    fn tables() -> PopulationTables {
        PopulationTables::new(
            HashMap::from([("France".to_string(), 67_000_000.0)]),
            HashMap::from([
                ("Louisiana".to_string(), 4_650_000.0),
                ("New York".to_string(), 19_450_000.0),
            ]),
            BTreeMap::from([("Lousiana".to_string(), "Louisiana".to_string())]),
        )
    }

    #[test]
    fn ratio_with_zero_denominator_is_null() {
        for x in [0.0, 1.0, -3.5, 1e9] {
            assert_eq!(safe_ratio(x, 0.0), None);
        }
        for y in [1.0, -2.0, 1e-9] {
            assert_eq!(safe_ratio(0.0, y), Some(0.0));
        }
        assert_eq!(safe_ratio(10.0, 4.0), Some(2.5));
        assert_eq!(safe_ratio(f64::NAN, 4.0), None);
        assert_eq!(safe_ratio_opt(None, Some(2.0)), None);
        assert_eq!(safe_ratio_opt(Some(3.0), None), None);
    }

    #[test]
    fn per_population_values_are_rounded() {
        assert_eq!(value_per_population(Some(67.0), Some(67_000_000.0)), Some(1.0));
        assert_eq!(value_per_population(Some(1.0), Some(3_000_000.0)), Some(0.33));
        assert_eq!(value_per_population(Some(1.0), None), None);
        assert_eq!(value_per_population(None, Some(10.0)), None);
        assert_eq!(value_per_population(Some(1.0), Some(0.0)), None);
    }

    #[test]
    fn population_figures_with_spaces() {
        assert_eq!(parse_population(" 39 512 223 "), Some(39_512_223.0));
        assert_eq!(parse_population("4650000"), Some(4_650_000.0));
        assert_eq!(parse_population("n/a"), None);
        assert_eq!(parse_population(""), None);
    }

    #[test]
    fn state_lookup_resolves_aliases() {
        let tables = tables();
        assert_eq!(tables.state("Lousiana"), Some(4_650_000.0));
        assert_eq!(tables.state("Louisiana"), Some(4_650_000.0));
        assert_eq!(tables.state("Texas"), None);
    }

    #[test]
    fn unknown_country_leaves_normalised_value_empty() {
        let tables = tables();
        let metric = Metric::raw(BaseMetric::Deaths);
        let mut observations = vec![
            Observation::at_offset(
                Arc::new(SeriesKey::new("France", "All", 80, Sex::Both)),
                3,
                metric,
                Some(670.0),
            ),
            Observation::at_offset(
                Arc::new(SeriesKey::new("Atlantis", "All", 80, Sex::Both)),
                3,
                metric,
                Some(670.0),
            ),
        ];
        tables.normalize(&mut observations);
        assert_eq!(observations[0].value_per_population, Some(10.0));
        assert_eq!(observations[1].value_per_population, None);
        assert_eq!(observations[1].value, Some(670.0));
    }
}
