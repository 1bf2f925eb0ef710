use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use axum::http::{HeaderName, HeaderValue, Method, header::CONTENT_DISPOSITION};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info};
use url::Url;

use crate::error::ApiError;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_STORAGE_DIR: &str = "downloads";
pub const DEFAULT_RETENTION_SECONDS: u64 = 60 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;
pub const ARTIFACT_ID_HEADER: &str = "x-artifact-id";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub storage_dir: PathBuf,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub yt_dlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    /// `None` leaves collaborator invocations unbounded.
    pub collaborator_timeout: Option<Duration>,
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read_u64 = |name: &str| {
            lookup(name)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|value| *value > 0)
        };
        let read_text = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };

        let bind_addr = read_text("APP_ADDR")
            .or_else(|| {
                lookup("PORT")
                    .and_then(|value| value.trim().parse::<u16>().ok())
                    .map(|port| format!("0.0.0.0:{port}"))
            })
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            bind_addr,
            storage_dir: read_text("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            retention: Duration::from_secs(
                read_u64("RETENTION_SECONDS").unwrap_or(DEFAULT_RETENTION_SECONDS),
            ),
            sweep_interval: Duration::from_secs(
                read_u64("SWEEP_INTERVAL_SECONDS").unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS),
            ),
            yt_dlp_bin: read_text("YT_DLP_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("yt-dlp")),
            ffmpeg_bin: read_text("FFMPEG_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            collaborator_timeout: read_u64("COLLABORATOR_TIMEOUT_SECONDS").map(Duration::from_secs),
            allowed_origins,
        }
    }

    pub fn cors_layer(&self) -> Result<CorsLayer, ApiError> {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
            .expose_headers([
                CONTENT_DISPOSITION,
                HeaderName::from_static(ARTIFACT_ID_HEADER),
            ]);

        if self.allowed_origins.is_empty() {
            info!("ALLOWED_ORIGINS is not set, accepting requests from any origin");
            return Ok(layer.allow_origin(Any));
        }

        let normalized_origins = self
            .allowed_origins
            .iter()
            .map(|origin| {
                normalize_origin(origin).ok_or_else(|| {
                    ApiError::internal(format!(
                        "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                    ))
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;
        info!(
            "CORS allow-list loaded with {} origin(s): {:?}",
            normalized_origins.len(),
            normalized_origins
        );

        let allowed_origins = Arc::new(normalized_origins);
        let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        });

        Ok(layer.allow_origin(allow_origin))
    }
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.storage_dir, PathBuf::from("downloads"));
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.yt_dlp_bin, PathBuf::from("yt-dlp"));
        assert_eq!(config.collaborator_timeout, None);
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn port_binds_all_interfaces_unless_app_addr_is_set() {
        assert_eq!(config(&[("PORT", "9000")]).bind_addr, "0.0.0.0:9000");
        assert_eq!(
            config(&[("PORT", "9000"), ("APP_ADDR", "127.0.0.1:7000")]).bind_addr,
            "127.0.0.1:7000"
        );
    }

    #[test]
    fn zero_or_garbage_numbers_fall_back() {
        let config = config(&[
            ("RETENTION_SECONDS", "0"),
            ("SWEEP_INTERVAL_SECONDS", "soon"),
            ("COLLABORATOR_TIMEOUT_SECONDS", "120"),
        ]);
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.collaborator_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn origins_are_normalized() {
        assert_eq!(
            normalize_origin("https://Example.com:443").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:5173").as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(normalize_origin("https://example.com/path"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }

    #[test]
    fn invalid_origin_is_a_startup_error() {
        let config = config(&[("ALLOWED_ORIGINS", "https://ok.com, not-a-url")]);
        assert!(config.cors_layer().is_err());
    }
}
