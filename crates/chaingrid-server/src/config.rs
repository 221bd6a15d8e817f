use std::ops::RangeInclusive;
use std::path::PathBuf;

use chaingrid_api::mail::BrevoConfig;

/// JWT secrets that MUST NOT be used outside local tests.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Ten years.
const TOKEN_TTL_DAYS: RangeInclusive<i64> = 1..=3650;
/// One day.
const OTP_TTL_MINUTES: RangeInclusive<i64> = 1..=1440;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is unset")]
    Missing(&'static str),

    #[error("{0} is still a placeholder value")]
    Placeholder(&'static str),

    #[error("{key}={value:?} is invalid: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub otp_ttl_minutes: i64,
    pub otp_max_attempts: u32,
    pub staging_backend: StagingBackend,
    pub purge_interval_secs: u64,
    pub debug: bool,
    pub brevo: Option<BrevoConfig>,
    pub admin: Option<AdminBootstrap>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("CHAINGRID_JWT_SECRET").ok_or(ConfigError::Missing("CHAINGRID_JWT_SECRET"))?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::Placeholder("CHAINGRID_JWT_SECRET"));
        }

        let staging_backend = match get("CHAINGRID_STAGING_BACKEND").as_deref() {
            None | Some("sqlite") => StagingBackend::Sqlite,
            Some("memory") => StagingBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CHAINGRID_STAGING_BACKEND",
                    value: other.to_string(),
                    expected: "sqlite or memory",
                });
            }
        };

        let brevo = match (get("BREVO_API_KEY"), get("BREVO_SENDER_EMAIL")) {
            (Some(api_key), Some(sender_email)) => Some(BrevoConfig {
                api_key,
                sender_email,
                sender_name: get("BREVO_SENDER_NAME"),
            }),
            (Some(_), None) => return Err(ConfigError::Missing("BREVO_SENDER_EMAIL")),
            _ => None,
        };

        let admin = match (
            get("CHAINGRID_ADMIN_EMAIL"),
            get("CHAINGRID_ADMIN_USERNAME"),
            get("CHAINGRID_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(username), Some(password)) => Some(AdminBootstrap {
                name: get("CHAINGRID_ADMIN_NAME").unwrap_or_else(|| "Administrator".into()),
                username,
                email,
                password,
            }),
            (None, None, None) => None,
            _ => return Err(ConfigError::Missing("CHAINGRID_ADMIN_EMAIL/USERNAME/PASSWORD (all three)")),
        };

        Ok(Self {
            host: get("CHAINGRID_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "CHAINGRID_PORT", 8000, "a port number")?,
            db_path: get("CHAINGRID_DB_PATH").unwrap_or_else(|| "chaingrid.db".into()).into(),
            jwt_secret,
            token_ttl_days: parse_in(&get, "CHAINGRID_TOKEN_TTL_DAYS", 30, TOKEN_TTL_DAYS, "days between 1 and 3650")?,
            otp_ttl_minutes: parse_in(&get, "CHAINGRID_OTP_TTL_MINUTES", 10, OTP_TTL_MINUTES, "minutes between 1 and 1440")?,
            otp_max_attempts: parse_or::<u32, _>(&get, "CHAINGRID_OTP_MAX_ATTEMPTS", 5, "a positive integer")?
                .max(1),
            staging_backend,
            purge_interval_secs: parse_or::<u64, _>(&get, "CHAINGRID_PURGE_INTERVAL_SECS", 60, "seconds")?
                .max(1),
            debug: parse_flag(&get, "CHAINGRID_DEBUG")?,
            brevo,
            admin,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value, expected }),
    }
}

/// Like [`parse_or`], but values outside `range` are rejected too.
fn parse_in<G>(
    get: &G,
    key: &'static str,
    default: i64,
    range: RangeInclusive<i64>,
    expected: &'static str,
) -> Result<i64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default, expected)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            expected,
        })
    }
}

/// Only an explicit `true`/`1` turns a flag on.
fn parse_flag<G>(get: &G, key: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
            expected: "true or false",
        }),
    }
}
