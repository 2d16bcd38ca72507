use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_ttl_secs: i64,
    pub upload_dir: PathBuf,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    /// Usernames granted the teacher flag at startup and on registration.
    pub teachers: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset and blank values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let port = var("SCDIO_PORT", "8051");
        let port: u16 = port.parse().with_context(|| format!("invalid SCDIO_PORT: {port}"))?;

        let ttl = var("SCDIO_JWT_TTL_SECS", "3600");
        let jwt_ttl_secs: i64 = ttl
            .parse()
            .ok()
            .filter(|secs| *secs > 0)
            .with_context(|| format!("invalid SCDIO_JWT_TTL_SECS: {ttl}"))?;

        let jwt_secret = var("SCDIO_JWT_SECRET", DEV_SECRET);
        if jwt_secret == DEV_SECRET {
            warn!("SCDIO_JWT_SECRET is not set; using the development secret");
        }

        let cors = var("SCDIO_CORS_ORIGIN", "*");
        let cors_origins = if cors == "*" {
            Vec::new()
        } else {
            cors.split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect()
        };

        let teachers = lookup("SCDIO_TEACHERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            host: var("SCDIO_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("SCDIO_DB_PATH", "scdio.db")),
            jwt_secret,
            jwt_ttl_secs,
            upload_dir: PathBuf::from(var("SCDIO_UPLOAD_DIR", "./uploads")),
            cors_origins,
            teachers,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 8051);
        assert_eq!(config.db_path, PathBuf::from("scdio.db"));
        assert_eq!(config.jwt_ttl_secs, 3600);
        assert!(config.cors_origins.is_empty());
        assert!(config.teachers.is_empty());
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:8051");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SCDIO_PORT", "9000"),
            ("SCDIO_JWT_SECRET", "s3cret"),
            ("SCDIO_UPLOAD_DIR", "/var/lib/scdio/uploads"),
            ("SCDIO_CORS_ORIGIN", "http://localhost:3000, https://club.example.com"),
            ("SCDIO_TEACHERS", "komon, ,tanaka"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.upload_dir, PathBuf::from("/var/lib/scdio/uploads"));
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:3000", "https://club.example.com"]
        );
        assert_eq!(config.teachers, vec!["komon", "tanaka"]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config(&[("SCDIO_PORT", "eighty")]).is_err());
        assert!(config(&[("SCDIO_JWT_TTL_SECS", "0")]).is_err());
        assert!(config(&[("SCDIO_HOST", "not a host")]).unwrap().addr().is_err());
    }
}
