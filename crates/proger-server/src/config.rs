use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use lm_client::LmConfig;

use crate::sandbox::SandboxMode;

const DEFAULT_CORS: &str = "http://localhost,http://localhost:3000";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub sandbox: SandboxMode,
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

        let port = var("PROGER_PORT", "8000");
        let port = port.parse().with_context(|| format!("invalid PROGER_PORT: {port}"))?;

        let sandbox = var("PROGER_SANDBOX", "simulated");
        let Some(sandbox) = SandboxMode::parse(&sandbox) else {
            bail!("invalid PROGER_SANDBOX: {sandbox} (expected simulated or docker)");
        };

        Ok(Self {
            host: var("PROGER_HOST", "0.0.0.0"),
            port,
            cors_origins: var("PROGER_CORS_ORIGIN", DEFAULT_CORS)
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            sandbox,
            lm: LmConfig::from_lookup(&lookup),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}
