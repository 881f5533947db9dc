use clap::Parser;
use md3_core::Timings;
use serde::Deserialize;
use std::{
    io,
    net::{AddrParseError, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

pub const DEFAULT_ADDR: &str = "0.0.0.0:9001";
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2_000;

#[derive(Parser, Debug, Default)]
#[command(name = "md3-exporter", about = "MD3 diffractometer exporter emulator")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,
    #[arg(long, default_value_t = false)]
    pub fix_initial_event_labels: bool,
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    addr: Option<String>,
    log_dir: Option<String>,
    write_timeout_ms: Option<u64>,
    fix_initial_event_labels: Option<bool>,
    timings: FileTimings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileTimings {
    motor_steps: Option<u32>,
    motor_travel_sec: Option<f64>,
    beamstop_travel_sec: Option<f64>,
    phase_change_sec: Option<f64>,
    raster_scan_sec: Option<f64>,
    scan_sec: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct ExporterConfig {
    pub addr: SocketAddr,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub write_timeout: Duration,
    pub fix_initial_event_labels: bool,
    pub timings: Timings,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            log_level: "info".to_string(),
            log_dir: None,
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            fix_initial_event_labels: false,
            timings: Timings::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid listen address '{addr}': {source}")]
    InvalidAddr {
        addr: String,
        source: AddrParseError,
    },
    #[error("invalid duration for {key}: {value}")]
    InvalidDuration { key: &'static str, value: f64 },
}

pub fn load_config() -> Result<ExporterConfig, ConfigError> {
    resolve(Args::parse(), |key| std::env::var(key).ok())
}

/// Flag > environment > config file > default, per setting.
pub fn resolve(
    args: Args,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ExporterConfig, ConfigError> {
    let file = match &args.config {
        Some(path) => read_file_config(path)?,
        None => FileConfig::default(),
    };

    let addr_text = first_non_empty([
        Some(args.addr.clone()),
        env("MD3_EXPORTER_ADDR"),
        file.addr.clone(),
    ])
    .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let addr = addr_text
        .trim()
        .parse::<SocketAddr>()
        .map_err(|source| ConfigError::InvalidAddr {
            addr: addr_text.clone(),
            source,
        })?;

    let debug = args.debug || env_true(env("MD3_EXPORTER_DEBUG"));
    // RUST_LOG, when set, still overrides this in the subscriber's filter.
    let log_level = first_non_empty([env("MD3_LOG_LEVEL")])
        .unwrap_or_else(|| if debug { "debug" } else { "info" }.to_string());
    let log_dir = first_non_empty([Some(args.log_dir.clone()), env("MD3_LOG_DIR"), file.log_dir])
        .map(PathBuf::from);

    let write_timeout = Duration::from_millis(
        args.write_timeout_ms
            .or(file.write_timeout_ms)
            .unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
    );
    let fix_initial_event_labels =
        args.fix_initial_event_labels || file.fix_initial_event_labels.unwrap_or(false);

    Ok(ExporterConfig {
        addr,
        log_level,
        log_dir,
        write_timeout,
        fix_initial_event_labels,
        timings: resolve_timings(&file.timings)?,
    })
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_timings(file: &FileTimings) -> Result<Timings, ConfigError> {
    let defaults = Timings::default();
    let scan = seconds("scan_sec", file.scan_sec, defaults.scan)?;
    Ok(Timings {
        motor_steps: file.motor_steps.unwrap_or(defaults.motor_steps).max(1),
        motor_travel: seconds("motor_travel_sec", file.motor_travel_sec, defaults.motor_travel)?,
        beamstop_travel: seconds(
            "beamstop_travel_sec",
            file.beamstop_travel_sec,
            defaults.beamstop_travel,
        )?,
        phase_change: seconds("phase_change_sec", file.phase_change_sec, defaults.phase_change)?,
        phase_task_margin: defaults.phase_task_margin,
        raster_scan: seconds("raster_scan_sec", file.raster_scan_sec, defaults.raster_scan)?,
        scan,
        scan_4d: scan,
    })
}

fn seconds(key: &'static str, value: Option<f64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|_| ConfigError::InvalidDuration { key, value: secs }),
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}

fn env_true(value: Option<String>) -> bool {
    match value {
        Some(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => false,
    }
}
