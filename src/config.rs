use crate::images::ImageConfig;
use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Comma-separated allowlist; empty or "*" means permissive outside
    /// production.
    pub cors_origins: Vec<String>,
    pub redis_url: String,
    pub env: AppEnv,
    pub images: ImageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            cors_origins: Vec::new(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            env: AppEnv::Development,
            images: ImageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGIN")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            env: match std::env::var("APP_ENV").as_deref() {
                Ok("production") => AppEnv::Production,
                _ => AppEnv::Development,
            },
            images: ImageConfig::from_env(),
        }
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let wildcard =
            self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*");
        if wildcard && self.env != AppEnv::Production {
            return CorsLayer::permissive();
        }

        let origins: Vec<HeaderValue> = self
            .cors_origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in ["PORT", "CORS_ORIGIN", "REDIS_URL", "APP_ENV"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        clear_env();
        let config = AppConfig::from_env();
        assert_eq!(config.port, 3001);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.env, AppEnv::Development);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    #[serial]
    fn env_overrides_are_applied() {
        clear_env();
        std::env::set_var("PORT", "8080");
        std::env::set_var("CORS_ORIGIN", "https://a.example, https://b.example");
        std::env::set_var("APP_ENV", "production");

        let config = AppConfig::from_env();
        assert_eq!(config.port, 8080);
        assert_eq!(config.env, AppEnv::Production);
        assert_eq!(
            config.cors_origins,
            vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ]
        );
        clear_env();
    }
}
