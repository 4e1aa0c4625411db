use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetConfig {
    pub ttl_minutes: i64,
    /// Prefix for the link placed in reset emails.
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub reset: ResetConfig,
    pub smtp: SmtpConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Upper bounds for the token lifetimes, in minutes.
pub const MAX_JWT_TTL_MINUTES: i64 = 60 * 24 * 365;
pub const MAX_RESET_TTL_MINUTES: i64 = 60 * 24;

/// Parse a lifetime in minutes, rejecting values outside `1..=max`.
fn parse_minutes(key: &str, raw: Option<&str>, default: i64, max: i64) -> anyhow::Result<i64> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let minutes: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of minutes"))?;
    if !(1..=max).contains(&minutes) {
        anyhow::bail!("{key} must be between 1 and {max}, got {minutes}");
    }
    Ok(minutes)
}

fn env_minutes(key: &str, default: i64, max: i64) -> anyhow::Result<i64> {
    parse_minutes(key, std::env::var(key).ok().as_deref(), default, max)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "rigbase".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "rigbase-users".into()),
            ttl_minutes: env_minutes("JWT_TTL_MINUTES", 60 * 24 * 90, MAX_JWT_TTL_MINUTES)?,
        };
        let reset = ResetConfig {
            ttl_minutes: env_minutes("RESET_TOKEN_TTL_MINUTES", 10, MAX_RESET_TTL_MINUTES)?,
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_string(),
        };
        let smtp = SmtpConfig {
            host: std::env::var("SMTP_HOST").context("SMTP_HOST must be set")?,
            port: env_or("SMTP_PORT", 587),
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            from: std::env::var("MAIL_FROM").context("MAIL_FROM must be set")?,
        };
        Ok(Self {
            database_url,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            jwt,
            reset,
            smtp,
        })
    }
}
