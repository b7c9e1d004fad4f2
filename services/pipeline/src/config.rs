//! Environment-driven configuration, loaded and validated in one place.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_PROMETHEUS_PORT: u16 = 9090;
const DEFAULT_STATE_DIR: &str = "/state";
const DEFAULT_PREDICTOR_PATH: &str = "predictor.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingRequired(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mllp_address: String,
    pub pager_address: String,
    pub prometheus_port: u16,
    pub state_dir: PathBuf,
    pub predictor_path: PathBuf,
    pub bootstrap_csv: Option<PathBuf>,
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("patient_database.db")
    }
}

/// Load and validate configuration from environment variables (see spec §6).
pub fn load_config() -> Result<Config, ConfigError> {
    let mllp_address = require_env("MLLP_ADDRESS")?;
    validate_host_port("MLLP_ADDRESS", &mllp_address)?;
    let pager_address = require_env("PAGER_ADDRESS")?;

    let prometheus_port = match env::var("PROMETHEUS_PORT") {
        Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
            name: "PROMETHEUS_PORT",
            value: raw,
        })?,
        Err(_) => DEFAULT_PROMETHEUS_PORT,
    };

    let state_dir = env::var("STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR));

    let predictor_path = env::var("PREDICTOR_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PREDICTOR_PATH));

    let bootstrap_csv = env::var("BOOTSTRAP_CSV").ok().map(PathBuf::from);

    Ok(Config {
        mllp_address,
        pager_address,
        prometheus_port,
        state_dir,
        predictor_path,
        bootstrap_csv,
    })
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingRequired(name))
}

/// Reject an empty/unparseable `host:port` string so a bad `MLLP_ADDRESS`
/// surfaces as a `FatalStartupError` at config load (spec §6/§7) instead of
/// only showing up later as an endlessly-retried connect failure.
fn validate_host_port(name: &'static str, value: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        name,
        value: value.to_owned(),
    };
    let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}
