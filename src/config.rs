use anyhow::{bail, Context};
use std::str::FromStr;
use std::time::Duration;

use crate::services::gemini::DEFAULT_GEMINI_ENDPOINT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("TASKHIVE_STORE must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub skip_migrations: bool,
    pub debug_mode: bool,
    pub allowed_origins: Vec<String>,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub relaxed_ownership: bool,
    pub gemini_api_key: Option<String>,
    pub gemini_endpoint: String,
    pub reward_suggestion_timeout: Duration,
}

const DEV_JWT_SECRET: &str = "taskhive-dev-secret";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            var(key)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false)
        };

        let debug_mode = flag("DEBUG_MODE");

        let port = match var("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT must be a valid number, got '{}'", raw))?,
            None => 5000,
        };

        let store = match var("TASKHIVE_STORE") {
            Some(raw) => raw.parse()?,
            None => StoreBackend::Postgres,
        };
        let database_url = var("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when TASKHIVE_STORE=postgres");
        }

        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None if debug_mode => DEV_JWT_SECRET.to_string(),
            None => bail!("JWT_SECRET must be set unless DEBUG_MODE=true"),
        };

        let token_ttl_hours = match var("TOKEN_TTL_HOURS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("TOKEN_TTL_HOURS must be a whole number, got '{}'", raw))?,
            None => 168,
        };

        let timeout_ms = match var("REWARD_SUGGESTION_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().with_context(|| {
                format!("REWARD_SUGGESTION_TIMEOUT_MS must be a whole number, got '{}'", raw)
            })?,
            None => 5000,
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5000".to_string())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Ok(Config {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            store,
            database_url,
            skip_migrations: flag("SKIP_MIGRATIONS"),
            debug_mode,
            allowed_origins,
            jwt_secret,
            token_ttl: Duration::from_secs(token_ttl_hours * 3600),
            relaxed_ownership: flag("TASKHIVE_RELAXED_OWNERSHIP"),
            gemini_api_key: var("GEMINI_API_KEY"),
            gemini_endpoint: var("GEMINI_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_GEMINI_ENDPOINT.to_string()),
            reward_suggestion_timeout: Duration::from_millis(timeout_ms),
        })
    }
}
