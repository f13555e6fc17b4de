use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterceptorPhase {
    Request,
    Response,
}

impl std::fmt::Display for InterceptorPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Request => "request",
            Self::Response => "response",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    Deserialize,
    RequestBuild,
    Cancelled,
    Timeout,
    Transport,
    HttpStatus,
    Interceptor,
    InvalidConfig,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::Deserialize => "deserialize",
            Self::RequestBuild => "request_build",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::HttpStatus => "http_status",
            Self::Interceptor => "interceptor",
            Self::InvalidConfig => "invalid_config",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("request cancelled by caller: {method} {uri}")]
    Cancelled { method: Method, uri: String },
    #[error("request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http status error {status} for {method} {uri}: {message}")]
    HttpStatus {
        status: u16,
        method: Method,
        uri: String,
        message: String,
        body: String,
    },
    #[error("{phase} interceptor failed: {source}")]
    Interceptor {
        phase: InterceptorPhase,
        #[source]
        source: BoxError,
    },
    #[error("invalid client configuration: {message}")]
    InvalidConfig { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::Interceptor { .. } => ErrorCode::Interceptor,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
        }
    }

    /// Builds an interceptor failure from any error source.
    pub fn interceptor<E>(phase: InterceptorPhase, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Interceptor {
            phase,
            source: source.into(),
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Failures the retry controller may attempt again.
    pub(crate) const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    pub(crate) fn cancelled(method: &Method, uri: &str) -> Self {
        Self::Cancelled {
            method: method.clone(),
            uri: uri.to_owned(),
        }
    }
}
