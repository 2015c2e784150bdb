//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value {value:?} for environment variable {key}")]
    Env { key: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML document without validating it.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Resolve the effective configuration: optional file, then process
/// environment overrides, then validation.
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_config(&content)?
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply the supported environment variables on top of `config`.
///
/// `lookup` returns the raw value of a variable; empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = get("SERVER_HOST") {
        let port = split_port(&config.listener.bind_address).unwrap_or("8080");
        config.listener.bind_address = join_host_port(host.trim(), port);
    }
    if let Some(port) = get("SERVER_PORT") {
        if port.trim().parse::<u16>().is_err() {
            return Err(ConfigError::Env { key: "SERVER_PORT", value: port });
        }
        let host = split_host(&config.listener.bind_address).unwrap_or("0.0.0.0");
        config.listener.bind_address = join_host_port(host, port.trim());
    }
    if let Some(value) = get("SERVER_SHUTDOWN_TIMEOUT") {
        config.timeouts.shutdown_drain_ms =
            duration_ms("SERVER_SHUTDOWN_TIMEOUT", &value)?;
    }
    if let Some(value) = get("REQUEST_TIMEOUT") {
        config.timeouts.request_timeout_ms = duration_ms("REQUEST_TIMEOUT", &value)?;
    }
    if let Some(value) = get("SERVER_READ_TIMEOUT") {
        config.timeouts.read_timeout_ms = duration_ms("SERVER_READ_TIMEOUT", &value)?;
    }
    if let Some(value) = get("SERVER_WRITE_TIMEOUT") {
        config.timeouts.write_timeout_ms = duration_ms("SERVER_WRITE_TIMEOUT", &value)?;
    }
    if let Some(value) = get("SERVER_IDLE_TIMEOUT") {
        config.timeouts.idle_timeout_ms = duration_ms("SERVER_IDLE_TIMEOUT", &value)?;
    }
    if let Some(value) = get("RATE_LIMIT_RPS") {
        config.rate_limit.requests_per_second = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key: "RATE_LIMIT_RPS", value: value.clone() })?;
    }
    if let Some(value) = get("RATE_LIMIT_BURST") {
        config.rate_limit.burst_size = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key: "RATE_LIMIT_BURST", value: value.clone() })?;
    }
    if let Some(value) = get("CORS_ALLOWED_ORIGINS") {
        config.cors.allowed_origins = value
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(value) = get("LOG_LEVEL") {
        config.observability.log_level = value.trim().to_lowercase();
    }

    Ok(())
}

fn duration_ms(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    parse_duration(value)
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .ok_or_else(|| ConfigError::Env { key, value: value.to_string() })
}

/// Parse `"30s"`, `"500ms"`, `"2m"`, `"1h"` or a bare number of seconds.
///
/// Values too large for a [`Duration`] yield `None`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }

    let secs = match unit.trim() {
        "" | "s" => number,
        "ms" => number / 1000.0,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(secs).ok()
}

fn split_port(addr: &str) -> Option<&str> {
    addr.rsplit_once(':').map(|(_, port)| port)
}

fn split_host(addr: &str) -> Option<&str> {
    addr.rsplit_once(':').map(|(host, _)| host)
}

fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = parse_config(
            r#"
            [rate_limit]
            requests_per_second = 5.0
            burst_size = 10

            [cors]
            allowed_origins = ["https://shop.example"]
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.requests_per_second, 5.0);
        assert_eq!(config.rate_limit.burst_size, 10);
        assert_eq!(config.rate_limit.idle_eviction_secs, 180);
        assert_eq!(config.cors.allowed_origins, vec!["https://shop.example"]);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            parse_config("[rate_limit\nburst_size = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("SERVER_HOST", "127.0.0.1"),
                ("SERVER_PORT", "9000"),
                ("SERVER_SHUTDOWN_TIMEOUT", "5s"),
                ("REQUEST_TIMEOUT", "750ms"),
                ("RATE_LIMIT_RPS", "12.5"),
                ("RATE_LIMIT_BURST", "25"),
                ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ]),
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.timeouts.shutdown_drain_ms, 5_000);
        assert_eq!(config.timeouts.request_timeout_ms, 750);
        assert_eq!(config.rate_limit.requests_per_second, 12.5);
        assert_eq!(config.rate_limit.burst_size, 25);
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn invalid_env_value_is_an_error() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("RATE_LIMIT_BURST", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "RATE_LIMIT_BURST", .. }));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, env(&[("SERVER_PORT", "")])).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn duration_formats() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("15"), Some(Duration::from_secs(15)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("10 parsecs"), None);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert_eq!(parse_duration("99999999999999999999h"), None);
        assert_eq!(parse_duration("999999999999999999999999"), None);

        let mut config = AppConfig::default();
        let err = apply_env_overrides(
            &mut config,
            env(&[("REQUEST_TIMEOUT", "99999999999999999999h")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "REQUEST_TIMEOUT", .. }));

        // Fits in a Duration but not in u64 milliseconds.
        let err = apply_env_overrides(
            &mut config,
            env(&[("SERVER_SHUTDOWN_TIMEOUT", "20000000000000000s")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env { key: "SERVER_SHUTDOWN_TIMEOUT", .. }
        ));
        assert_eq!(config.timeouts.shutdown_drain_ms, 30_000);
    }

    #[test]
    fn connection_timeouts_from_env() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("SERVER_READ_TIMEOUT", "5s"),
                ("SERVER_WRITE_TIMEOUT", "20s"),
                ("SERVER_IDLE_TIMEOUT", "2m"),
            ]),
        )
        .unwrap();

        assert_eq!(config.timeouts.read_timeout_ms, 5_000);
        assert_eq!(config.timeouts.write_timeout_ms, 20_000);
        assert_eq!(config.timeouts.idle_timeout_ms, 120_000);
    }

    #[test]
    fn validation_error_lists_every_problem() {
        let err = ConfigError::Validation(vec![
            ValidationError::ZeroBurst,
            ValidationError::ZeroDrainTimeout,
        ]);
        let message = err.to_string();
        assert!(message.starts_with("Validation failed: "));
        assert!(message.contains("burst_size"));
        assert!(message.contains("shutdown_drain_ms"));
    }
}
