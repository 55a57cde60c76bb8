#![forbid(unsafe_code)]

mod classifier;
mod detectors;
mod error;
mod interfaces;
mod persistence;
mod system;
mod telemetry;
mod threats;

pub use classifier::Classifier;
pub use detectors::Detectors;
pub use error::Error;
pub use interfaces::{Interfaces, Upstream};
pub use persistence::Persistence;
pub use system::System;
pub use telemetry::Telemetry;
pub use threats::Threats;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables with this prefix override file values. Nested keys
/// are separated by `__`, e.g. `ROUTERD_CLASSIFIER__API_KEY`.
pub const ENV_PREFIX: &str = "ROUTERD_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub system: System,
    pub interfaces: Interfaces,
    pub telemetry: Telemetry,
    pub threats: Threats,
    pub classifier: Classifier,
    pub detectors: Detectors,
    pub persistence: Persistence,
}

impl Config {
    /// Built-in defaults, without reading any file or the environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults, then `path`, then `ROUTERD_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.is_dir() {
            return Err(Error::InvalidPath(path.to_owned()));
        }
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    /// Parse a TOML document directly. Environment overrides are not applied.
    pub fn from_toml_str(document: &str) -> Result<Self, Error> {
        Self::extract(Figment::new().merge(Toml::string(document)))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }

    pub fn short_term_path(&self) -> PathBuf {
        self.resolve(&self.persistence.short_term_path)
    }

    pub fn long_term_path(&self) -> PathBuf {
        self.resolve(&self.persistence.long_term_path)
    }

    pub fn blocklist_path(&self) -> PathBuf {
        self.resolve(&self.threats.blocklist_file)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.system.data_dir.join(path)
        }
    }

    fn extract(figment: Figment) -> Result<Self, Error> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        let non_zero = [
            ("interfaces.poll_interval", self.interfaces.poll_interval),
            ("telemetry.sample_interval", self.telemetry.sample_interval),
            ("telemetry.rollup_interval", self.telemetry.rollup_interval),
            ("detectors.flow_interval", self.detectors.flow_interval),
            ("detectors.activity_interval", self.detectors.activity_interval),
            ("detectors.tail_poll_interval", self.detectors.tail_poll_interval),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(Error::InvalidValue {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.threats.ledger_capacity == 0 {
            return Err(Error::InvalidValue {
                field: "threats.ledger_capacity",
                reason: "must hold at least one event".into(),
            });
        }
        if self.detectors.dns_capacity == 0 {
            return Err(Error::InvalidValue {
                field: "detectors.dns_capacity",
                reason: "must hold at least one observation".into(),
            });
        }
        if self.interfaces.upstreams.iter().any(|u| u.ssid.is_empty()) {
            return Err(Error::InvalidValue {
                field: "interfaces.upstreams",
                reason: "ssid must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.interfaces.poll_interval, Duration::from_secs(5));
        assert_eq!(config.threats.ledger_capacity, 500);
        assert_eq!(config.detectors.flow_rate_threshold, 80);
    }

    #[test]
    fn relative_paths_resolve_under_data_dir() {
        let mut config = Config::new();
        config.system.data_dir = PathBuf::from("/srv/router");
        assert_eq!(
            config.long_term_path(),
            PathBuf::from("/srv/router/run/longterm.json")
        );

        config.persistence.short_term_path = PathBuf::from("/tmp/short.json");
        assert_eq!(config.short_term_path(), PathBuf::from("/tmp/short.json"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = Config::from_toml_str("[interfaces]\npoll_interval = 0\n").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidValue {
                field: "interfaces.poll_interval",
                ..
            }
        ));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = Config::new();
        config.classifier.api_key = Some("sk-secret".into());
        config
            .interfaces
            .upstreams
            .push(Upstream::new("home", Some("hunter2".into())));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("home"));
    }
}
