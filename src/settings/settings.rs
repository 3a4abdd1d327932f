use config::{Config, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const ACCESS_SECRET: &str = "ACCESS_SECRET";
pub const REFRESH_SECRET: &str = "REFRESH_SECRET";

const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;
/// 100 years.
const MAX_EXPIRES_IN_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} missing")]
    MissingSecret(&'static str),
    #[error("invalid duration {0:?}, expected <n>s|m|h|d")]
    InvalidDuration(String),
    #[error("settings: {0}")]
    Settings(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub bus: Bus,
    pub cache: Cache,
    pub http: Http,
    pub jwt: Jwt,
    pub log: Log,
    pub store: Store,
}

#[derive(Debug, Deserialize)]
pub struct Bus {
    pub backend: String, // "kafka" or "memory"
    pub brokers: String,
    pub client_id: String,
    pub group_id: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Per-domain overrides in milliseconds, e.g. `course = 5000`.
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
    /// Downstream operations the gateway routes besides `auth.*`.
    #[serde(default)]
    pub operations: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

#[derive(Debug, Deserialize)]
pub struct Cache {
    pub backend: String, // "redis" or "memory"
    pub url: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    pub backend: String, // "mysql" or "memory"
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Jwt {
    #[serde(default = "default_access_expires_in")]
    pub access_expires_in: String,
    #[serde(default = "default_refresh_expires_in")]
    pub refresh_expires_in: String,
}

fn default_access_expires_in() -> String {
    "15m".to_owned()
}

fn default_refresh_expires_in() -> String {
    "30d".to_owned()
}

impl Jwt {
    pub fn access_ttl(&self) -> Result<Duration, ConfigError> {
        parse_expires_in(&self.access_expires_in)
    }

    pub fn refresh_ttl(&self) -> Result<Duration, ConfigError> {
        parse_expires_in(&self.refresh_expires_in)
    }
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .set_override_option("jwt.access_expires_in", std::env::var("ACCESS_EXPIRES_IN").ok())?
        .set_override_option(
            "jwt.refresh_expires_in",
            std::env::var("REFRESH_EXPIRES_IN").ok(),
        )?
        .build()?
        .try_deserialize()?;

    Ok(settings)
}

/// Signing secrets come from the environment only. Absent or empty is fatal at startup.
pub fn required_secret(name: &'static str) -> Result<Vec<u8>, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v.into_bytes()),
        _ => Err(ConfigError::MissingSecret(name)),
    }
}

/// Signing secrets resolved once at startup.
#[derive(Clone, Default)]
pub struct Secrets {
    values: HashMap<&'static str, Vec<u8>>,
}

impl Secrets {
    /// Whatever of `ACCESS_SECRET`/`REFRESH_SECRET` the environment provides. Each node
    /// `require`s only the ones it signs or verifies with.
    pub fn from_env() -> Self {
        let mut secrets = Secrets::default();
        for name in [ACCESS_SECRET, REFRESH_SECRET] {
            if let Ok(value) = required_secret(name) {
                secrets.values.insert(name, value);
            }
        }
        secrets
    }

    pub fn with(mut self, name: &'static str, value: impl Into<Vec<u8>>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn require(&self, name: &'static str) -> Result<Vec<u8>, ConfigError> {
        self.values
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or(ConfigError::MissingSecret(name))
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// `15m`, `30d`, `12h`, `45s` or bare seconds.
pub fn parse_expires_in(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let invalid = || ConfigError::InvalidDuration(raw.to_owned());

    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let n: u64 = digits.parse().map_err(|_| invalid())?;

    let unit_secs: u64 = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    // token expiry is an i64 unix timestamp, so anything past that range is meaningless
    let secs = n
        .checked_mul(unit_secs)
        .filter(|secs| *secs > 0 && *secs <= MAX_EXPIRES_IN_SECS)
        .ok_or_else(invalid)?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_jwt_style_durations() {
        assert_eq!(parse_expires_in("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_expires_in("30d").unwrap(), Duration::from_secs(2_592_000));
        assert_eq!(parse_expires_in("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_expires_in("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn rejects_garbage_durations() {
        assert!(parse_expires_in("").is_err());
        assert!(parse_expires_in("m15").is_err());
        assert!(parse_expires_in("10w").is_err());
        assert!(parse_expires_in("0s").is_err());
    }

    #[test]
    fn huge_durations_are_rejected_not_wrapped() {
        assert!(matches!(
            parse_expires_in("18446744073709551615d"),
            Err(ConfigError::InvalidDuration(_))
        ));
        assert!(parse_expires_in("999999999999h").is_err());
        assert_eq!(
            parse_expires_in("36500d").unwrap(),
            Duration::from_secs(36_500 * 86_400)
        );
    }

    #[test]
    fn dev_settings_select_memory_backends() {
        let settings = parse_settings(Some("settings/dev.toml")).unwrap();

        assert_eq!(settings.bus.backend, "memory");
        assert_eq!(settings.cache.backend, "memory");
        assert_eq!(settings.store.backend, "memory");
        assert_eq!(settings.bus.timeout_ms, 30_000);
    }

    #[test]
    fn missing_secret_is_a_config_error() {
        let err = required_secret("COURIER_TEST_SECRET_THAT_IS_NEVER_SET").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(_)));

        let secrets = Secrets::default().with(ACCESS_SECRET, "a");
        assert_eq!(secrets.require(ACCESS_SECRET).unwrap(), b"a".to_vec());
        assert!(matches!(
            secrets.require(REFRESH_SECRET),
            Err(ConfigError::MissingSecret("REFRESH_SECRET"))
        ));
    }
}
