use std::{fmt::Display, str::FromStr};

use anyhow::Context;

/// Server settings, taken from the environment (and `.env`, if present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// SQLite URL for message history. Without it history lives in memory.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            host: lookup("CHAT_HOST").unwrap_or_else(|| "localhost".to_owned()),
            port: parse(&lookup, "CHAT_PORT", 8080)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse(&lookup, "CHAT_DB_MAX_CONNECTIONS", 16)?,
            json_logs: parse(&lookup, "CHAT_JSON_LOGS", false)?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value {raw:?} for {key}")),
        None => Ok(default),
    }
}
