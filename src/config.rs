use std::time::Duration;

use serde::Deserialize;

use crate::Result;
use crate::error::Error;
use crate::queue::DEFAULT_MAX_CONCURRENT;
use crate::retry::{DEFAULT_RETRIES, DEFAULT_RETRY_INTERVAL};
use crate::util::validate_base_url;

pub const API_URL_ENV: &str = "FETCHGATE_API_URL";
pub const LOG_TRAFFIC_ENV: &str = "FETCHGATE_LOG_TRAFFIC";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Client-wide defaults. Every field can be overridden per request through
/// [`RequestOptions`](crate::RequestOptions).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(alias = "apiUrl")]
    pub api_url_prefix: String,
    pub max_concurrent: usize,
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    pub retries: usize,
    #[serde(alias = "retryInterval")]
    pub retry_interval_ms: u64,
    pub retry_on_fail_by_default: bool,
    pub attach_auth_header_by_default: bool,
    pub return_raw_response_by_default: bool,
    pub log_traffic: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url_prefix: String::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            retry_on_fail_by_default: false,
            attach_auth_header_by_default: true,
            return_raw_response_by_default: false,
            log_traffic: false,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|source| Error::InvalidConfig {
            message: format!("malformed client config: {source}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `FETCHGATE_API_URL` and `FETCHGATE_LOG_TRAFFIC`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(api_url) = lookup(API_URL_ENV) {
            config.api_url_prefix = api_url.trim().to_owned();
        }
        if let Some(flag) = lookup(LOG_TRAFFIC_ENV) {
            config.log_traffic = parse_flag(&flag).ok_or_else(|| Error::InvalidConfig {
                message: format!("{LOG_TRAFFIC_ENV} must be true or false, got {flag:?}"),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.api_url_prefix)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
