//! Process configuration from `PARKD_*` environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineConfig;
use crate::model::ParkingSpace;
use crate::report::OccupancyDenominator;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("layout {path}: {source}")]
    LayoutIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("layout {path}: {source}")]
    LayoutParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Journal directory. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// JSON facility layout seeded on startup.
    pub layout: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    /// `None` when set to 0: wait for scopes indefinitely.
    pub lock_timeout: Option<Duration>,
    pub occupancy_denominator: OccupancyDenominator,
    pub publish_interval: Duration,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            layout: None,
            metrics_port: None,
            lock_timeout: Some(Duration::from_millis(5000)),
            occupancy_denominator: OccupancyDenominator::AllSpaces,
            publish_interval: Duration::from_secs(15),
            compact_threshold: 1000,
        }
    }
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    let parsed = value.trim().parse();
    parsed.map_err(|_| ConfigError::Invalid { var, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their
    /// defaults, malformed ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("PARKD_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(layout) = get("PARKD_LAYOUT") {
            config.layout = Some(PathBuf::from(layout));
        }
        if let Some(port) = get("PARKD_METRICS_PORT") {
            config.metrics_port = Some(parse("PARKD_METRICS_PORT", port)?);
        }
        if let Some(ms) = get("PARKD_LOCK_TIMEOUT_MS") {
            let ms: u64 = parse("PARKD_LOCK_TIMEOUT_MS", ms)?;
            config.lock_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(policy) = get("PARKD_OCCUPANCY_DENOMINATOR") {
            config.occupancy_denominator = parse("PARKD_OCCUPANCY_DENOMINATOR", policy)?;
        }
        if let Some(secs) = get("PARKD_PUBLISH_INTERVAL_SECS") {
            let secs: u64 = parse("PARKD_PUBLISH_INTERVAL_SECS", secs)?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "PARKD_PUBLISH_INTERVAL_SECS",
                    value: secs.to_string(),
                });
            }
            config.publish_interval = Duration::from_secs(secs);
        }
        if let Some(n) = get("PARKD_COMPACT_THRESHOLD") {
            config.compact_threshold = parse("PARKD_COMPACT_THRESHOLD", n)?;
        }
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout: self.lock_timeout,
            occupancy_denominator: self.occupancy_denominator,
        }
    }

    pub fn journal_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("parkd.wal"))
    }
}

/// Read a facility layout: a JSON array of `{code, category, status?}`.
pub fn load_layout(path: &Path) -> Result<Vec<ParkingSpace>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::LayoutIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::LayoutParse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::{SpaceStatus, VehicleCategory};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.journal_path(), None);
        assert_eq!(config.engine_config().lock_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("PARKD_DATA_DIR", "/var/lib/parkd"),
            ("PARKD_LAYOUT", "/etc/parkd/layout.json"),
            ("PARKD_METRICS_PORT", "9100"),
            ("PARKD_LOCK_TIMEOUT_MS", "250"),
            ("PARKD_OCCUPANCY_DENOMINATOR", "in_service"),
            ("PARKD_PUBLISH_INTERVAL_SECS", "30"),
            ("PARKD_COMPACT_THRESHOLD", "50"),
        ]))
        .unwrap();
        assert_eq!(config.journal_path(), Some(PathBuf::from("/var/lib/parkd/parkd.wal")));
        assert_eq!(config.layout, Some(PathBuf::from("/etc/parkd/layout.json")));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.occupancy_denominator, OccupancyDenominator::InService);
        assert_eq!(config.publish_interval, Duration::from_secs(30));
        assert_eq!(config.compact_threshold, 50);
    }

    #[test]
    fn zero_lock_timeout_waits_forever() {
        let config = Config::from_lookup(lookup(&[("PARKD_LOCK_TIMEOUT_MS", "0")])).unwrap();
        assert_eq!(config.lock_timeout, None);
    }

    #[test]
    fn malformed_values_rejected() {
        for (var, value) in [
            ("PARKD_METRICS_PORT", "http"),
            ("PARKD_METRICS_PORT", "70000"),
            ("PARKD_LOCK_TIMEOUT_MS", "-1"),
            ("PARKD_OCCUPANCY_DENOMINATOR", "half"),
            ("PARKD_PUBLISH_INTERVAL_SECS", "0"),
        ] {
            let r = Config::from_lookup(lookup(&[(var, value)]));
            assert!(
                matches!(r, Err(ConfigError::Invalid { var: v, .. }) if v == var),
                "{var}={value} should be rejected"
            );
        }
    }

    #[test]
    fn layout_from_json() {
        let dir = std::env::temp_dir().join("parkd_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("layout.json");
        std::fs::write(
            &path,
            r#"[
                {"code": "A-01", "category": "car"},
                {"code": "M-01", "category": "motorcycle", "status": "out_of_service"}
            ]"#,
        )
        .unwrap();

        let spaces = load_layout(&path).unwrap();
        assert_eq!(spaces.len(), 2);
        assert_eq!(spaces[0], ParkingSpace::new("A-01", VehicleCategory::Car));
        assert_eq!(spaces[1].status, SpaceStatus::OutOfService);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_layout(&path), Err(ConfigError::LayoutParse { .. })));
        let _ = std::fs::remove_file(&path);
    }
}
