// src/config.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{DashError, DashResult};
use crate::fetch::{ResultsQuery, RetryPolicy, TurnoutQuery, DEFAULT_METRIC};

pub const DEFAULT_API_URL: &str = "https://qp4b96543m.execute-api.us-east-2.amazonaws.com/active";
pub const DEFAULT_FIPS_SOURCE: &str =
    "https://raw.githubusercontent.com/fhossain75/georgia-election-map/main/data/georgiaFIPS.csv";
pub const DEFAULT_POPULATION_SOURCE: &str =
    "https://raw.githubusercontent.com/plotly/datasets/master/minoritymajority.csv";

/// Which value colours the county map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapConfig {
    /// Majority winner per county. `None` means every candidate column.
    Winner {
        #[serde(default)]
        candidates: Option<Vec<String>>,
    },
    /// Total population per county from a census extract.
    Population {
        #[serde(default = "default_population_source")]
        source: String,
        state: String,
    },
}

fn default_population_source() -> String {
    DEFAULT_POPULATION_SOURCE.to_string()
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig::Winner { candidates: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub fips_source: String,
    pub fips_county_column: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub results: ResultsQuery,
    pub metric: String,
    pub map: MapConfig,
    /// When set, turnout is fetched with each results load (heatmap layout).
    pub turnout: Option<TurnoutQuery>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            fips_source: DEFAULT_FIPS_SOURCE.to_string(),
            fips_county_column: "County".to_string(),
            request_timeout_secs: 10,
            max_retries: 2,
            retry_backoff_ms: 250,
            results: ResultsQuery::default(),
            metric: DEFAULT_METRIC.to_string(),
            map: MapConfig::default(),
            turnout: None,
        }
    }
}

impl Config {
    /// Defaults, then the YAML file at `path` if given, then `ELECTIONDASH_*` env vars.
    pub fn load(path: Option<&Path>) -> DashResult<Self> {
        let mut config = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .map_err(|e| DashError::config(format!("reading {}: {}", p.display(), e)))?;
                info!(path = %p.display(), "loaded config file");
                Self::from_yaml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        debug!(?config, "effective config");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> DashResult<Self> {
        serde_yaml::from_str(text).map_err(DashError::config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> DashResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ELECTIONDASH_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = lookup("ELECTIONDASH_FIPS_SOURCE") {
            self.fips_source = v;
        }
        if let Some(v) = lookup("ELECTIONDASH_TIMEOUT_SECS") {
            self.request_timeout_secs = v.trim().parse().map_err(|_| {
                DashError::config(format!("ELECTIONDASH_TIMEOUT_SECS={:?} is not a number", v))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> DashResult<()> {
        self.api_base()?;
        if self.request_timeout_secs == 0 {
            return Err(DashError::config("request_timeout_secs must be positive"));
        }
        if self.metric.trim().is_empty() {
            return Err(DashError::config("metric must not be empty"));
        }
        if let MapConfig::Winner {
            candidates: Some(c),
        } = &self.map
        {
            if c.is_empty() {
                return Err(DashError::config("map.candidates must not be empty"));
            }
        }
        Ok(())
    }

    pub fn api_base(&self) -> DashResult<Url> {
        let url = Url::parse(&self.api_url)
            .map_err(|e| DashError::config(format!("api_url {:?}: {}", self.api_url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(DashError::config(format!(
                "api_url scheme {:?} is not http(s)",
                other
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ResultColumn;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.results.contest, 2);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(
            r#"
results:
  year: 2020
  column: absentee_by_mail
map:
  kind: winner
  candidates: ["DONALD J. TRUMP", "GARY JOHNSON", "HILLARY CLINTON"]
"#,
        )
        .unwrap();
        assert_eq!(config.results.year, 2020);
        assert_eq!(config.results.month, 11);
        assert_eq!(config.results.column, ResultColumn::AbsenteeByMail);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        match config.map {
            MapConfig::Winner { candidates } => assert_eq!(candidates.unwrap().len(), 3),
            other => panic!("unexpected map {:?}", other),
        }
    }

    #[test]
    fn population_map_and_turnout_parse() {
        let config = Config::from_yaml_str(
            r#"
map:
  kind: population
  source: ./minoritymajority.csv
  state: Georgia
turnout:
  gender: F
"#,
        )
        .unwrap();
        assert_eq!(
            config.map,
            MapConfig::Population {
                source: "./minoritymajority.csv".into(),
                state: "Georgia".into()
            }
        );
        let turnout = config.turnout.unwrap();
        assert_eq!(turnout.gender.as_deref(), Some("F"));
        assert_eq!(turnout.race, None);
    }

    #[test]
    fn population_source_defaults_to_census_extract() {
        let config = Config::from_yaml_str("map:\n  kind: population\n  state: Georgia\n").unwrap();
        assert_eq!(
            config.map,
            MapConfig::Population {
                source: DEFAULT_POPULATION_SOURCE.into(),
                state: "Georgia".into()
            }
        );
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("ELECTIONDASH_API_URL", "http://localhost:8080/dev"),
            ("ELECTIONDASH_TIMEOUT_SECS", "3"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api_url, "http://localhost:8080/dev");
        assert_eq!(config.request_timeout_secs, 3);
        assert_eq!(config.fips_source, DEFAULT_FIPS_SOURCE);
    }

    #[test]
    fn bad_timeout_override_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "ELECTIONDASH_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, DashError::Config { .. }));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = Config {
            api_url: "ftp://example.com".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.api_url = DEFAULT_API_URL.into();
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.request_timeout_secs = 5;
        config.map = MapConfig::Winner {
            candidates: Some(vec![]),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "metric: registered\nmax_retries: 0").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.metric, "registered");
        assert_eq!(config.retry_policy().max_retries, 0);
    }
}
