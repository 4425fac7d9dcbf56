/// Configuration
///
/// Tunables recognized by the repository: the recent-updates buffer
/// capacity, the historical-read batch size, and the per-subscriber
/// back-pressure buffer size. Loaded via a layered `config::Config` source
/// (defaults, then an optional TOML file, then `REPO_`-prefixed
/// environment overrides) deserialized into a typed struct.

use crate::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub recent_updates_buffer_size: usize,
    pub batch_size: usize,
    pub back_pressure_buffer_size: usize,
    pub data_dir: String,
    #[serde(skip)]
    pub telemetry: TelemetryConfig,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            recent_updates_buffer_size: 1024,
            batch_size: 10,
            back_pressure_buffer_size: 1000,
            data_dir: "./data".to_string(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Loads `RepoConfig` from an optional TOML file layered under the
/// built-in defaults, with `REPO_*` environment variables taking final
/// precedence (e.g. `REPO_BATCH_SIZE=20`).
pub fn load_config(path: Option<&str>) -> Result<RepoConfig, Box<dyn Error>> {
    let defaults = RepoConfig::default();
    let mut builder = config::Config::builder()
        .set_default("recent_updates_buffer_size", defaults.recent_updates_buffer_size as i64)?
        .set_default("batch_size", defaults.batch_size as i64)?
        .set_default("back_pressure_buffer_size", defaults.back_pressure_buffer_size as i64)?
        .set_default("data_dir", defaults.data_dir.clone())?;

    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("REPO"));

    let built = builder.build()?;
    let mut cfg: RepoConfig = built.try_deserialize()?;
    cfg.telemetry = TelemetryConfig::default();
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_design() {
        let cfg = RepoConfig::default();
        assert_eq!(cfg.recent_updates_buffer_size, 1024);
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.back_pressure_buffer_size, 1000);
    }

    #[test]
    fn load_config_with_no_file_falls_back_to_defaults() {
        let cfg = load_config(Some("does-not-exist")).unwrap();
        assert_eq!(cfg.batch_size, 10);
    }
}
