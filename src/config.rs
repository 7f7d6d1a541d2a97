//! Configuration file loading and resolution of runtime settings.
//!
//! The file is a flat `key = value` subset of TOML: double-quoted strings,
//! non-negative integers, `true`/`false`, and `#` comments. Unknown keys and
//! out-of-range values are rejected so typos never silently fall back to
//! defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use crate::controller::{ControllerSettings, DEFAULT_MAX_ATTEMPTS, DEFAULT_PROGRESS_INTERVAL};
use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DatabaseOptions};
use crate::probe::DEFAULT_FFPROBE_PROGRAM;
use crate::transfer::HttpTransferSettings;

/// Default database file, relative to the working directory.
pub const DEFAULT_DATABASE_PATH: &str = "dlkeeper.db";

/// Default download root, relative to the working directory.
pub const DEFAULT_WORK_DIR: &str = "downloads";

/// Values read from the config file. `None` means the key was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// SQLite database file.
    pub database_path: Option<PathBuf>,
    /// Root of per-job download directories.
    pub work_dir: Option<PathBuf>,
    /// Retry ceiling (1..=10).
    pub max_attempts: Option<u64>,
    /// Progress write interval in milliseconds (10..=60000).
    pub progress_interval_ms: Option<u64>,
    /// HTTP connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// HTTP idle read timeout in seconds (1..=3600).
    pub read_timeout_secs: Option<u64>,
    /// Whether finished files are probed for media metadata.
    pub probe: Option<bool>,
    /// `ffprobe` executable.
    pub ffprobe_path: Option<PathBuf>,
    /// Database pool size (1..=20).
    pub db_max_connections: Option<u32>,
    /// SQLite busy timeout in milliseconds (0..=120000).
    pub db_busy_timeout_ms: Option<u32>,
    /// Default log level.
    pub log_level: Option<LogLevel>,
    /// File that receives a copy of the logs.
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    /// Validates numeric ranges.
    ///
    /// # Errors
    ///
    /// Names the offending key and its allowed range.
    pub fn validate(&self) -> Result<()> {
        validate_range("max_attempts", self.max_attempts, 1, 10)?;
        validate_range("progress_interval_ms", self.progress_interval_ms, 10, 60_000)?;
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        validate_range("read_timeout_secs", self.read_timeout_secs, 1, 3600)?;
        validate_range(
            "db_max_connections",
            self.db_max_connections.map(u64::from),
            1,
            20,
        )?;
        validate_range(
            "db_busy_timeout_ms",
            self.db_busy_timeout_ms.map(u64::from),
            0,
            120_000,
        )?;
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Log level names accepted by `log_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive for this level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Config file outcome.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Path that was consulted, if any could be resolved.
    pub path: Option<PathBuf>,
    /// Parsed contents; `None` when no file exists at the default path.
    pub config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/dlkeeper/config.toml`
/// 2. `$HOME/.config/dlkeeper/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("dlkeeper").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("dlkeeper")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional.
///
/// # Errors
///
/// Fails when an explicit file is missing, or when any file that exists
/// cannot be read or parsed.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parses config file contents.
///
/// # Errors
///
/// Fails on bad syntax, unknown keys, malformed values, or values out of
/// range.
pub fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "database_path" => {
                cfg.database_path = Some(parse_string_literal(value).with_context(invalid)?.into());
            }
            "work_dir" => {
                cfg.work_dir = Some(parse_string_literal(value).with_context(invalid)?.into());
            }
            "max_attempts" => {
                cfg.max_attempts = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "progress_interval_ms" => {
                cfg.progress_interval_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "probe" => {
                cfg.probe = Some(parse_boolean(value).with_context(invalid)?);
            }
            "ffprobe_path" => {
                cfg.ffprobe_path = Some(parse_string_literal(value).with_context(invalid)?.into());
            }
            "db_max_connections" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.db_max_connections = Some(
                    u32::try_from(parsed)
                        .map_err(|_| anyhow!("db_max_connections out of range for u32"))?,
                );
            }
            "db_busy_timeout_ms" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.db_busy_timeout_ms = Some(
                    u32::try_from(parsed)
                        .map_err(|_| anyhow!("db_busy_timeout_ms out of range for u32"))?,
                );
            }
            "log_level" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.log_level = Some(
                    parse_log_level(&parsed)
                        .with_context(|| format!("Invalid `log_level` value '{parsed}' on line {line_no}"))?,
                );
            }
            "log_file" => {
                cfg.log_file = Some(parse_string_literal(value).with_context(invalid)?.into());
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow!("Integer value out of range for u64"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

fn parse_log_level(value: &str) -> Result<LogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warn" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        "trace" => Ok(LogLevel::Trace),
        _ => bail!("Expected one of: error, warn, info, debug, trace"),
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--database`.
    pub database_path: Option<PathBuf>,
    /// `--work-dir`.
    pub work_dir: Option<PathBuf>,
    /// `--log-file`.
    pub log_file: Option<PathBuf>,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Root of per-job download directories.
    pub work_dir: PathBuf,
    /// Retry ceiling.
    pub max_attempts: i64,
    /// Progress write interval.
    pub progress_interval: Duration,
    /// HTTP client timeouts.
    pub http: HttpTransferSettings,
    /// Whether to probe finished files.
    pub probe: bool,
    /// `ffprobe` executable.
    pub ffprobe_path: PathBuf,
    /// Pool tuning.
    pub database: DatabaseOptions,
    /// Level from the config file, if set.
    pub log_level: Option<LogLevel>,
    /// Log copy destination, if any.
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(None, &Overrides::default())
    }
}

impl Settings {
    /// Layers defaults, then `file`, then `overrides`.
    #[must_use]
    pub fn resolve(file: Option<&FileConfig>, overrides: &Overrides) -> Self {
        let file = file.cloned().unwrap_or_default();
        let http_defaults = HttpTransferSettings::default();

        Self {
            database_path: overrides
                .database_path
                .clone()
                .or(file.database_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            work_dir: overrides
                .work_dir
                .clone()
                .or(file.work_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            max_attempts: file
                .max_attempts
                .and_then(|n| i64::try_from(n).ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            progress_interval: file
                .progress_interval_ms
                .map_or(DEFAULT_PROGRESS_INTERVAL, Duration::from_millis),
            http: HttpTransferSettings {
                connect_timeout_secs: file
                    .connect_timeout_secs
                    .unwrap_or(http_defaults.connect_timeout_secs),
                read_timeout_secs: file
                    .read_timeout_secs
                    .unwrap_or(http_defaults.read_timeout_secs),
            },
            probe: file.probe.unwrap_or(true),
            ffprobe_path: file
                .ffprobe_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFPROBE_PROGRAM)),
            database: DatabaseOptions {
                max_connections: file.db_max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
                busy_timeout_ms: file.db_busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
            },
            log_level: file.log_level,
            log_file: overrides.log_file.clone().or(file.log_file),
        }
    }

    /// Worker settings derived from these values.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            work_dir: self.work_dir.clone(),
            max_attempts: self.max_attempts,
            progress_interval: self.progress_interval,
        }
    }
}
