//! Built-in interceptor stages.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, COOKIE, HeaderName, PROXY_AUTHORIZATION, SET_COOKIE};
use http::{HeaderMap, StatusCode};
use tracing::{info, warn};

use crate::auth::TokenSource;
use crate::error::Error;
use crate::pipeline::Interceptor;
use crate::request::RequestContext;
use crate::response::ResponseContext;
use crate::util::{parse_header_value, redact_uri_for_logs, truncate_body};

/// Copies the current access token into a request header.
///
/// Skipped when the request opts out of auth or the source has no token.
pub struct AuthInterceptor {
    source: Arc<dyn TokenSource>,
    header: HeaderName,
}

impl AuthInterceptor {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            header: AUTHORIZATION,
        }
    }

    pub fn header_name(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }
}

impl Interceptor<RequestContext> for AuthInterceptor {
    fn on_fulfilled<'a>(
        &'a self,
        context: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if !context.options.attach_auth_header.unwrap_or(true) {
                return Ok(());
            }
            let Some(token) = self.source.token().await? else {
                return Ok(());
            };
            if token.is_empty() {
                return Ok(());
            }
            let value = parse_header_value(self.header.as_str(), &token)?;
            context.headers.insert(self.header.clone(), value);
            Ok(())
        })
    }
}

/// Turns non-2xx responses into [`Error::HttpStatus`] unless the request asked
/// for the raw response.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusCheckInterceptor;

impl Interceptor<ResponseContext> for StatusCheckInterceptor {
    fn on_fulfilled<'a>(
        &'a self,
        context: &'a mut ResponseContext,
    ) -> BoxFuture<'a, Result<(), Error>> {
        let result = check_status(context);
        Box::pin(async move { result })
    }

    fn on_rejected(&self, error: &Error, _context: &ResponseContext) {
        warn!(code = error.code().as_str(), error = %error, "response rejected");
    }
}

fn check_status(context: &ResponseContext) -> Result<(), Error> {
    let response = &context.response;
    if context.request.options.return_raw_response.unwrap_or(false) || response.is_success() {
        return Ok(());
    }
    Err(Error::HttpStatus {
        status: response.status().as_u16(),
        method: context.request.method.clone(),
        uri: redact_uri_for_logs(&response.uri().to_string()),
        message: status_message(response.status()),
        body: truncate_body(response.body()),
    })
}

pub(crate) fn status_message(status: StatusCode) -> String {
    let text = match status.as_u16() {
        400 => "bad request",
        401 => "unauthorized, please sign in again",
        403 => "access forbidden",
        404 => "resource not found",
        405 => "method not allowed",
        408 => "request timed out",
        409 => "request conflicts with the current state",
        422 => "request validation failed",
        429 => "too many requests",
        500 => "internal server error",
        501 => "not implemented",
        502 => "bad gateway",
        503 => "service unavailable",
        504 => "gateway timed out",
        505 => "http version not supported",
        code => return format!("request failed with status {code}"),
    };
    text.to_owned()
}

/// Logs request and response metadata, plus bodies that parse as JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrafficLogInterceptor;

impl Interceptor<RequestContext> for TrafficLogInterceptor {
    fn on_fulfilled<'a>(
        &'a self,
        context: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<(), Error>> {
        info!(
            method = %context.method,
            target = %redact_uri_for_logs(&context.target),
            headers = %headers_for_log(&context.headers),
            body = %body_for_log(context.body.as_deref()),
            "outgoing request"
        );
        Box::pin(async { Ok(()) })
    }
}

impl Interceptor<ResponseContext> for TrafficLogInterceptor {
    fn on_fulfilled<'a>(
        &'a self,
        context: &'a mut ResponseContext,
    ) -> BoxFuture<'a, Result<(), Error>> {
        let response = &context.response;
        info!(
            status = response.status().as_u16(),
            uri = %redact_uri_for_logs(&response.uri().to_string()),
            headers = %headers_for_log(response.headers()),
            body = %body_for_log(Some(response.body().as_ref())),
            "incoming response"
        );
        Box::pin(async { Ok(()) })
    }
}

fn is_sensitive(name: &HeaderName) -> bool {
    *name == AUTHORIZATION
        || *name == PROXY_AUTHORIZATION
        || *name == COOKIE
        || *name == SET_COOKIE
        || name.as_str().contains("token")
}

pub(crate) fn headers_for_log(headers: &HeaderMap) -> String {
    let fields: Vec<String> = headers
        .iter()
        .map(|(name, value)| {
            if is_sensitive(name) {
                format!("{name}=<redacted>")
            } else {
                format!("{name}={}", value.to_str().unwrap_or("<binary>"))
            }
        })
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn body_for_log(body: Option<&[u8]>) -> String {
    match body {
        None | Some([]) => "-".to_owned(),
        Some(bytes) => match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) => value.to_string(),
            Err(_) => format!("<{} bytes>", bytes.len()),
        },
    }
}
