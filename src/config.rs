//! Environment configuration.

use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub midtrans_base_url: String,
    pub midtrans_server_key: String,
    pub workers: usize,
    /// Payment window for a fresh order, in minutes.
    pub payment_ttl_minutes: i64,
    /// Lifetime of a buyer group, in minutes, capped by its parent session.
    pub group_ttl_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            port: env_or("PORT", 8084)?,
            nats_url: std::env::var("NATS_URL").ok(),
            midtrans_base_url: std::env::var("MIDTRANS_BASE_URL")
                .unwrap_or_else(|_| "https://api.sandbox.midtrans.com".to_string()),
            midtrans_server_key: std::env::var("MIDTRANS_SERVER_KEY")
                .context("MIDTRANS_SERVER_KEY is required")?,
            workers: env_or("WORKER_COUNT", 2)?,
            payment_ttl_minutes: env_or("PAYMENT_TTL_MINUTES", 5)?,
            group_ttl_minutes: env_or("GROUP_TTL_MINUTES", 60)?,
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("invalid {name}")),
        Err(_) => Ok(default),
    }
}
