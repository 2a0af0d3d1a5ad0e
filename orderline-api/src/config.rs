//! HTTP Server Configuration
//!
//! Bind address, static assets and CORS for the read surface. Loaded from
//! environment variables with development defaults.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::constants::{DEFAULT_BIND_HOST, DEFAULT_CORS_MAX_AGE_SECS, DEFAULT_HTTP_PORT};
use crate::error::{ApiError, ApiResult};

/// Configuration for the HTTP read surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host or IP to bind
    pub bind_host: String,

    /// TCP port to bind
    pub port: u16,

    /// Directory served for every path the API does not handle.
    /// `None` disables static serving.
    pub web_dir: Option<PathBuf>,

    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            web_dir: None,
            cors_origins: Vec::new(),
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        }
    }
}

impl ServerConfig {
    /// Create ServerConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ORDERLINE_HTTP_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` or `ORDERLINE_HTTP_PORT`: Port (default: 8080)
    /// - `ORDERLINE_WEB_DIR`: Static asset directory (default: unset)
    /// - `ORDERLINE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `ORDERLINE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    pub fn from_env() -> Self {
        let bind_host = std::env::var("ORDERLINE_HTTP_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());

        let port = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("ORDERLINE_HTTP_PORT").ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HTTP_PORT);

        let web_dir = std::env::var("ORDERLINE_WEB_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let cors_origins = std::env::var("ORDERLINE_CORS_ORIGINS")
            .ok()
            .map(|s| parse_origins(&s))
            .unwrap_or_default();

        let cors_max_age_secs = std::env::var("ORDERLINE_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CORS_MAX_AGE_SECS);

        Self {
            bind_host,
            port,
            web_dir,
            cors_origins,
            cors_max_age_secs,
        }
    }

    /// Resolve the socket address to bind.
    pub fn socket_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>().map_err(|e| {
            ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.web_dir.is_none());
        assert!(config.cors_origins.is_empty());
        assert_eq!(
            config.socket_addr().unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_invalid_bind_host() {
        let config = ServerConfig {
            bind_host: "not an address".to_string(),
            ..Default::default()
        };
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins(" https://a.example , ,https://b.example"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_origins("").is_empty());
    }
}
