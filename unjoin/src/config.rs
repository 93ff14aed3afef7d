use std::{error, fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_ESPLORA_URL: &str = "https://blockstream.info/api";

fn deserialize_fromstr<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    <T as FromStr>::Err: fmt::Display,
{
    let string = String::deserialize(deserializer)?;
    T::from_str(&string)
        .map_err(|e| de::Error::custom(format!("Error parsing '{}': {}", string, e)))
}

fn serialize_to_string<T: fmt::Display, S: Serializer>(field: T, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&field.to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

fn serialize_duration<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(duration.as_secs())
}

fn default_max_fee_rel() -> f64 {
    0.05
}

fn default_max_solutions() -> usize {
    1_000
}

fn default_dust_threshold() -> u64 {
    546
}

fn default_per_solve_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_memory_limit() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_esplora_url() -> String {
    DEFAULT_ESPLORA_URL.to_string()
}

fn default_loglevel() -> log::LevelFilter {
    log::LevelFilter::Info
}

/// Static settings of an analysis run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Maximum taker-to-maker fee per equal output, as a fraction of the
    /// denomination.
    #[serde(default = "default_max_fee_rel")]
    pub max_fee_rel: f64,
    /// Stop enumerating after this many solutions.
    #[serde(default = "default_max_solutions")]
    pub max_solutions: usize,
    /// No change output may be worth less than this.
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: u64,
    /// Wall-clock budget of a single solver call.
    #[serde(
        rename = "per_solve_timeout_secs",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration",
        default = "default_per_solve_timeout"
    )]
    pub per_solve_timeout: Duration,
    /// Ceiling on the process' resident memory.
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,
    /// Base URL of the Esplora instance to fetch transactions from.
    #[serde(default = "default_esplora_url")]
    pub esplora_url: String,
    /// What messages to log.
    #[serde(
        deserialize_with = "deserialize_fromstr",
        serialize_with = "serialize_to_string",
        default = "default_loglevel"
    )]
    pub log_level: log::LevelFilter,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_fee_rel: default_max_fee_rel(),
            max_solutions: default_max_solutions(),
            dust_threshold: default_dust_threshold(),
            per_solve_timeout: default_per_solve_timeout(),
            memory_limit_bytes: default_memory_limit(),
            esplora_url: default_esplora_url(),
            log_level: default_loglevel(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    FileNotFound(PathBuf),
    ReadingFile(String),
    Unexpected(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FileNotFound(path) => {
                write!(f, "Could not find configuration file '{}'.", path.display())
            }
            Self::ReadingFile(e) => write!(f, "Failed to read configuration file: {}", e),
            Self::Unexpected(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl error::Error for ConfigError {}

impl Config {
    /// Read settings from a TOML file. Everything is optional, absent
    /// settings keep their default.
    pub fn from_file(path: &PathBuf) -> Result<Config, ConfigError> {
        let content = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.clone()),
            _ => ConfigError::ReadingFile(e.to_string()),
        })?;
        let config = toml::from_slice::<Config>(&content)
            .map_err(|e| ConfigError::ReadingFile(format!("Parsing configuration file: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Make sure the settings are sane.
    pub fn check(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.max_fee_rel) {
            return Err(ConfigError::Unexpected(format!(
                "max_fee_rel must be within [0, 1], not {}",
                self.max_fee_rel
            )));
        }
        if self.max_solutions == 0 {
            return Err(ConfigError::Unexpected(
                "max_solutions must be positive".to_string(),
            ));
        }
        if self.per_solve_timeout.as_secs() == 0 {
            return Err(ConfigError::Unexpected(
                "per_solve_timeout_secs must be positive".to_string(),
            ));
        }
        if self.memory_limit_bytes == 0 {
            return Err(ConfigError::Unexpected(
                "memory_limit_bytes must be positive".to_string(),
            ));
        }
        if self.esplora_url.is_empty() {
            return Err(ConfigError::Unexpected(
                "esplora_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The absolute fee tolerance for a given denomination, floored to keep
    /// everything integer.
    pub fn max_fee_abs(&self, equal_amount: u64) -> u64 {
        (self.max_fee_rel * equal_amount as f64).floor() as u64
    }
}
