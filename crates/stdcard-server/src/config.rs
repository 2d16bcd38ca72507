use std::net::SocketAddr;

use anyhow::{Context, Result};
use lm_client::LmConfig;

/// The Vite dev server, by name and by address.
const DEFAULT_CORS: &str = "http://localhost,http://localhost:5173,http://127.0.0.1:5173";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub lm: LmConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let port = var("STDCARD_PORT", "8001");
        let port = port.parse().with_context(|| format!("invalid STDCARD_PORT: {port}"))?;

        Ok(Self {
            host: var("STDCARD_HOST", "0.0.0.0"),
            port,
            cors_origins: var("STDCARD_CORS_ORIGIN", DEFAULT_CORS)
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            lm: LmConfig::from_lookup(&lookup),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}
