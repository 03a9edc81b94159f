use crate::codec::DEFAULT_PREFIX;
use crate::logger::Level;
use crate::schema::SchemaConfig;
use crate::{info, AppError};
use config::{Config, Environment, File};
use dotenv::dotenv;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Once;

static DOTENV_ONCE: Once = Once::new();

fn ensure_dotenv_loaded() {
    DOTENV_ONCE.call_once(|| match dotenv() {
        Ok(_) => info!("Settings loaded including .env file."),
        Err(_) => info!("Settings loaded without .env file."),
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Redb(PathBuf),
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("memory") => Ok(Backend::Memory),
            Some((scheme, path)) if scheme.eq_ignore_ascii_case("redb") && !path.is_empty() => Ok(Backend::Redb(PathBuf::from(path))),
            _ => Err(format!("Invalid value for Backend: {}, expected memory or redb:<path>", s)),
        }
    }
}

impl<'de> Deserialize<'de> for Backend {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Backend::from_str(&s).map_err(serde::de::Error::custom)
    }
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_backend() -> Backend {
    Backend::Memory
}

fn default_retry_attempts() -> usize {
    1
}

fn default_retry_delay_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    #[serde(default = "default_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default)]
    pub log_level: Level,
    /// Attempts per store command, 1 disables retrying.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            key_prefix: default_prefix(),
            backend: default_backend(),
            log_level: Level::default(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Reads `path` (any format the `config` crate knows), overridden by `<PREFIX>__SECTION__KEY`
/// environment variables and a `.env` file if present.
pub fn load_settings(path: &str, env_prefix: &str) -> Result<Settings, AppError> {
    ensure_dotenv_loaded();

    let builder = Config::builder()
        .add_source(File::with_name(path).required(true))
        .add_source(Environment::with_prefix(env_prefix).try_parsing(true).separator("__"));

    let settings = builder.build()?.try_deserialize::<Settings>()?;
    info!("{:#?}", settings.database);
    Ok(settings)
}
