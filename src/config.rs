use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::model::Capacity;
use crate::time::DEFAULT_SLOT_STEP_MINUTES;

/// Server settings, read from `CHAIRTIME_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub slot_step_minutes: u32,
    /// Capacity for salons created without one.
    pub default_capacity: Capacity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: '{}'", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let slot_step_minutes = parse_var(&lookup, "CHAIRTIME_SLOT_STEP_MINUTES")?
            .unwrap_or(DEFAULT_SLOT_STEP_MINUTES);
        if slot_step_minutes == 0 {
            return Err(ConfigError {
                var: "CHAIRTIME_SLOT_STEP_MINUTES",
                value: "0".into(),
            });
        }

        Ok(Self {
            bind: lookup("CHAIRTIME_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(&lookup, "CHAIRTIME_PORT")?.unwrap_or(5433),
            data_dir: PathBuf::from(lookup("CHAIRTIME_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("CHAIRTIME_PASSWORD").unwrap_or_else(|| "chairtime".into()),
            max_connections: parse_var(&lookup, "CHAIRTIME_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parse_var(&lookup, "CHAIRTIME_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parse_var(&lookup, "CHAIRTIME_METRICS_PORT")?,
            tls_cert: lookup("CHAIRTIME_TLS_CERT"),
            tls_key: lookup("CHAIRTIME_TLS_KEY"),
            slot_step_minutes,
            default_capacity: parse_var::<i64>(&lookup, "CHAIRTIME_DEFAULT_CAPACITY")?
                .map_or(Capacity::default(), Capacity::new),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("chairtime.wal")
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value: raw }),
    }
}
