/// Telemetry - Structured Logging with Tracing
///
/// An `EnvFilter` driven by `RUST_LOG` (default `info`), pretty or JSON
/// formatting, and optional daily file rotation.

use serde::{Deserialize, Serialize};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: String,
    pub log_file: Option<String>,
    pub rotation: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("REPO_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            log_file: std::env::var("REPO_LOG_FILE").ok(),
            rotation: "daily".to_string(),
        }
    }
}

/// Initializes the global tracing subscriber. Call once, from `main`.
pub fn init_tracing(config: TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if let Some(log_file_path) = config.log_file {
        let path = std::path::Path::new(&log_file_path);
        let directory = path.parent().ok_or("invalid log file path: no parent directory")?;
        let filename_prefix = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or("invalid log file path: no filename")?;

        let file_appender = match config.rotation.as_str() {
            "daily" => rolling::daily(directory, filename_prefix),
            "hourly" => rolling::hourly(directory, filename_prefix),
            "never" => rolling::never(directory, path.file_name().unwrap()),
            _ => rolling::daily(directory, filename_prefix),
        };
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        std::mem::forget(guard); // keep the writer alive for the process lifetime

        if config.log_format == "json" {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false).with_writer(non_blocking))
                .init();
        }
    } else if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}

/// Truncates a hex string for logging, keeping the first `len` characters.
pub fn truncate_hex(hex: &str, len: usize) -> String {
    if hex.len() <= len {
        hex.to_string()
    } else {
        format!("{}...", &hex[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_hex_leaves_short_strings_alone() {
        assert_eq!(truncate_hex("abcd", 16), "abcd");
    }

    #[test]
    fn truncate_hex_truncates_long_strings() {
        assert_eq!(
            truncate_hex("0123456789abcdef0123456789abcdef", 16),
            "0123456789abcdef..."
        );
    }
}
