use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;

use crate::Result;
use crate::error::Error;
use crate::extensions::AttemptTimeout;
use crate::queue::Priority;
use crate::signal::CancelSignal;
use crate::util::{parse_header_name, parse_header_value};

/// Per-request overrides. Unset fields fall back to the client configuration.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub retries: Option<usize>,
    pub retry_interval: Option<Duration>,
    pub retry_on_fail: Option<bool>,
    pub api_url: Option<String>,
    pub attach_auth_header: Option<bool>,
    pub return_raw_response: Option<bool>,
    pub priority: Priority,
    pub signal: Option<CancelSignal>,
    pub attempt_timeout: Option<Arc<dyn AttemptTimeout>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `payload` as the body. A content type set earlier is kept.
    pub fn json<T>(mut self, payload: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::Serialize { source })?;
        self.body = Some(Bytes::from(body));
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = Some(retry_interval);
        self
    }

    pub fn retry_on_fail(mut self, enabled: bool) -> Self {
        self.retry_on_fail = Some(enabled);
        self
    }

    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn attach_auth_header(mut self, attach: bool) -> Self {
        self.attach_auth_header = Some(attach);
        self
    }

    pub fn return_raw_response(mut self, raw: bool) -> Self {
        self.return_raw_response = Some(raw);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn signal(mut self, signal: CancelSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn attempt_timeout(mut self, attempt_timeout: Arc<dyn AttemptTimeout>) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestOptions")
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_interval", &self.retry_interval)
            .field("retry_on_fail", &self.retry_on_fail)
            .field("api_url", &self.api_url)
            .field("attach_auth_header", &self.attach_auth_header)
            .field("return_raw_response", &self.return_raw_response)
            .field("priority", &self.priority)
            .field("has_signal", &self.signal.is_some())
            .field("has_attempt_timeout", &self.attempt_timeout.is_some())
            .finish()
    }
}

/// A request as it travels through the request-phase interceptors.
///
/// `target` is either a path joined onto the API URL prefix or an absolute
/// http(s) URL used as-is.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub target: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub options: RequestOptions,
}

impl RequestContext {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub(crate) fn from_options(
        method: Method,
        target: impl Into<String>,
        mut options: RequestOptions,
    ) -> Self {
        let headers = std::mem::take(&mut options.headers);
        let body = options.body.take();
        Self {
            target: target.into(),
            method,
            headers,
            body,
            options,
        }
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        self.headers.insert(name, value);
        Ok(())
    }
}
