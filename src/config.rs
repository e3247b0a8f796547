use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Remote store. Unset means the process never leaves local-only mode.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub analyzer: AnalyzerConfig,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub data_dir: PathBuf,
    pub undo_window: Duration,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: env_or("JWT_ISSUER", "mealsync"),
            audience: env_or("JWT_AUDIENCE", "mealsync-users"),
        };
        let analyzer = AnalyzerConfig {
            url: env_or("ANALYZER_URL", "http://localhost:8000"),
            api_key: non_empty_var("ANALYZER_API_KEY"),
            timeout: Duration::from_secs(env_parse("ANALYZER_TIMEOUT_SECS", 30)),
        };

        Ok(Self {
            database_url: non_empty_var("DATABASE_URL"),
            jwt,
            analyzer,
            minio_endpoint: env_or("MINIO_ENDPOINT", "http://localhost:9000"),
            minio_bucket: env_or("MINIO_BUCKET", "mealsync"),
            minio_access_key: env_or("MINIO_ACCESS_KEY", "minioadmin"),
            minio_secret_key: env_or("MINIO_SECRET_KEY", "minioadmin"),
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
            undo_window: Duration::from_secs(env_parse("UNDO_WINDOW_SECS", 5)),
            host: env_or("APP_HOST", "0.0.0.0"),
            port: env_parse("APP_PORT", 8080),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        std::env::set_var("MEALSYNC_TEST_PORT", "not-a-port");
        assert_eq!(env_parse::<u16>("MEALSYNC_TEST_PORT", 8080), 8080);
        std::env::set_var("MEALSYNC_TEST_PORT", "9090");
        assert_eq!(env_parse::<u16>("MEALSYNC_TEST_PORT", 8080), 9090);
    }

    #[test]
    fn blank_optional_vars_read_as_unset() {
        std::env::set_var("MEALSYNC_TEST_BLANK", "  ");
        assert_eq!(non_empty_var("MEALSYNC_TEST_BLANK"), None);
        assert_eq!(non_empty_var("MEALSYNC_TEST_MISSING"), None);
    }

    #[test]
    fn addr_joins_host_and_port() {
        let mut cfg = crate::testing::test_config();
        cfg.host = "127.0.0.1".into();
        cfg.port = 3000;
        assert_eq!(cfg.addr().unwrap().to_string(), "127.0.0.1:3000");
    }
}
