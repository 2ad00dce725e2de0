use std::{env, fmt::Display, str::FromStr};

use anyhow::{Context, anyhow};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub supabase_url: String,
    pub admin_ids: Vec<String>,
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let database_url = var("DATABASE_URL");
        if database_url.is_none() {
            warn!("DATABASE_URL not set, votes will only live in memory");
        }

        let admin_ids = parse_admin_ids(var("ADMIN_IDS").as_deref().unwrap_or_default());
        if admin_ids.is_empty() {
            warn!("ADMIN_IDS is empty, admin routes are unreachable");
        }

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: try_load("PORT", "3000")?,
            database_url,
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            supabase_url: var("SUPABASE_URL").context("SUPABASE_URL must be set")?,
            admin_ids,
            cors_origin: var("CORS_ORIGIN"),
        })
    }

    pub fn is_admin(&self, subject: &str) -> bool {
        self.admin_ids.iter().any(|id| id == subject)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow!("Invalid {key} value {raw:?}: {e}"))
}

fn parse_admin_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
