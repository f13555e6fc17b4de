use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::{HeaderMap, Uri};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for (name, value) in request_headers {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.is_empty() {
        return path.to_owned();
    }
    let relative = path.trim_start_matches('/');
    if relative.is_empty() {
        return base.to_owned();
    }
    format!("{base}/{relative}")
}

/// Joins `path` onto `base_url` unless `path` is already an absolute http(s) URL.
pub(crate) fn resolve_uri(base_url: &str, path: &str) -> Result<(String, Uri), Error> {
    let uri_text = match path.parse::<Uri>() {
        Ok(uri) if uri.host().is_some() => {
            let Some(scheme) = uri.scheme_str() else {
                return Err(Error::InvalidUri {
                    uri: path.to_owned(),
                });
            };
            if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
                path.to_owned()
            } else {
                return Err(Error::InvalidUri {
                    uri: path.to_owned(),
                });
            }
        }
        _ => join_base_path(base_url, path),
    };
    let uri = uri_text.parse().map_err(|_| Error::InvalidUri {
        uri: uri_text.clone(),
    })?;
    Ok((uri_text, uri))
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), Error> {
    if base_url.is_empty() {
        return Ok(());
    }
    let invalid = || Error::InvalidConfig {
        message: format!("invalid api url prefix: {base_url}"),
    };
    if base_url.trim() != base_url {
        return Err(invalid());
    }
    // Relative prefixes such as `/api` are resolved by the transport.
    if base_url.starts_with('/') {
        return Ok(());
    }
    let parsed = url::Url::parse(base_url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid());
    }
    Ok(())
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let raw_value = value.to_str().ok()?.trim();
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    match date.duration_since(now) {
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
