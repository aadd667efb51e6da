// src/config.rs
use crate::models::{AnalysisOptions, Sensitivity};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Client configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    /// Total backoff budget for transient unary-call failures
    pub retry_max_elapsed: Duration,
    pub default_options: AnalysisOptions,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub is_pro: bool,
    /// Also ask the gateway to cancel the remote job when a session is cancelled
    pub cancel_remote: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            retry_max_elapsed: Duration::from_secs(60),
            default_options: AnalysisOptions::default(),
            access_token: None,
            user_id: None,
            is_pro: false,
            cancel_remote: true,
        }
    }
}

impl ClientConfig {
    /// Load from process environment after reading `.env` if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Invalid values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_base_url = non_empty("SAFESCAN_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);

        let request_timeout = parse_or(&non_empty, "SAFESCAN_REQUEST_TIMEOUT_SECS", 30u64);
        let retry_max_elapsed = parse_or(&non_empty, "SAFESCAN_RETRY_MAX_ELAPSED_SECS", 60u64);

        let default_options = AnalysisOptions {
            sensitivity: parse_or(&non_empty, "SAFESCAN_SENSITIVITY", Sensitivity::Medium),
            analyze_comments: parse_or(&non_empty, "SAFESCAN_ANALYZE_COMMENTS", true),
            top_comments_count: parse_or(&non_empty, "SAFESCAN_TOP_COMMENTS", 10u32),
        };

        Self {
            api_base_url,
            request_timeout: Duration::from_secs(request_timeout),
            retry_max_elapsed: Duration::from_secs(retry_max_elapsed),
            default_options,
            access_token: non_empty("SAFESCAN_ACCESS_TOKEN"),
            user_id: non_empty("SAFESCAN_USER_ID"),
            is_pro: parse_or(&non_empty, "SAFESCAN_IS_PRO", false),
            cancel_remote: parse_or(&non_empty, "SAFESCAN_CANCEL_REMOTE", true),
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring invalid value for {}: '{}'", key, raw);
                default
            }
        },
        None => default,
    }
}
