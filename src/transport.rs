use std::future::Future;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};

use crate::error::{BoxError, TransportErrorKind};

pub type TransportFuture = BoxFuture<'static, Result<Response<Bytes>, TransportError>>;

/// The raw fetch primitive the dispatcher sits on.
///
/// Implementations resolve with whatever response the server produced,
/// regardless of status. Aborting a call is done by dropping the returned
/// future, so implementations must not rely on being polled to completion.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request<Bytes>) -> TransportFuture;
}

#[derive(Debug)]
pub struct TransportError {
    kind: TransportErrorKind,
    source: BoxError,
}

impl TransportError {
    pub fn new<E>(kind: TransportErrorKind, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn connect<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::new(TransportErrorKind::Connect, source)
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub(crate) fn into_parts(self) -> (TransportErrorKind, BoxError) {
        (self.kind, self.source)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} error: {}", self.kind, self.source)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Adapts an async closure into a [`Transport`].
pub struct TransportFn<F> {
    send: F,
}

pub fn transport_fn<F, Fut>(send: F) -> TransportFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, TransportError>> + Send + 'static,
{
    TransportFn { send }
}

impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, TransportError>> + Send + 'static,
{
    fn send(&self, request: Request<Bytes>) -> TransportFuture {
        Box::pin((self.send)(request))
    }
}

#[cfg(feature = "hyper-transport")]
mod hyper_transport {
    use bytes::Bytes;
    use http::{Request, Response};
    use http_body_util::{BodyExt, Full};
    use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
    use hyper_util::client::legacy::Client;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::rt::TokioExecutor;

    use super::{Transport, TransportError, TransportFuture};
    use crate::error::TransportErrorKind;

    /// Default transport: hyper over rustls with the webpki root store.
    /// Buffers the whole response body before resolving.
    #[derive(Clone)]
    pub struct HyperTransport {
        client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    }

    impl HyperTransport {
        pub fn new() -> Self {
            let https = HttpsConnectorBuilder::new()
                .with_webpki_roots()
                .https_or_http()
                .enable_http1()
                .build();
            let client = Client::builder(TokioExecutor::new()).build(https);
            Self { client }
        }
    }

    impl Default for HyperTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl std::fmt::Debug for HyperTransport {
        fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.debug_struct("HyperTransport").finish_non_exhaustive()
        }
    }

    impl Transport for HyperTransport {
        fn send(&self, request: Request<Bytes>) -> TransportFuture {
            let client = self.client.clone();
            Box::pin(async move {
                let response = client
                    .request(request.map(Full::new))
                    .await
                    .map_err(|source| {
                        TransportError::new(classify_transport_error(&source), source)
                    })?;
                let (parts, body) = response.into_parts();
                let body = body
                    .collect()
                    .await
                    .map_err(|source| TransportError::new(TransportErrorKind::Read, source))?
                    .to_bytes();
                Ok(Response::from_parts(parts, body))
            })
        }
    }

    pub(crate) fn classify_transport_error(
        error: &hyper_util::client::legacy::Error,
    ) -> TransportErrorKind {
        if error.is_connect() {
            let text = error.to_string().to_ascii_lowercase();
            if text.contains("dns")
                || text.contains("name or service not known")
                || text.contains("failed to lookup address")
            {
                return TransportErrorKind::Dns;
            }
            if text.contains("tls") || text.contains("certificate") || text.contains("handshake")
            {
                return TransportErrorKind::Tls;
            }
            return TransportErrorKind::Connect;
        }

        let text = error.to_string().to_ascii_lowercase();
        if text.contains("read")
            || text.contains("connection reset")
            || text.contains("broken pipe")
            || text.contains("unexpected eof")
        {
            return TransportErrorKind::Read;
        }

        TransportErrorKind::Other
    }
}

#[cfg(feature = "hyper-transport")]
pub use hyper_transport::HyperTransport;
