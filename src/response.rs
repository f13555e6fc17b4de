use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode, Uri};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::request::RequestContext;
use crate::util::truncate_body;

#[derive(Clone, Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    uri: Uri,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, uri: Uri) -> Self {
        Self {
            status,
            headers,
            body,
            uri,
        }
    }

    pub(crate) fn from_transport(response: Response<Bytes>, uri: Uri) -> Self {
        let (parts, body) = response.into_parts();
        Self::new(parts.status, parts.headers, body, uri)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// The URI the request was finally sent to.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON. An empty body decodes as `null`.
    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body: &[u8] = if self.body.is_empty() {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&self.body),
        })
    }
}

/// What response-phase interceptors see: the response and the request that produced it.
#[derive(Clone, Debug)]
pub struct ResponseContext {
    pub response: HttpResponse,
    pub request: RequestContext,
}

impl ResponseContext {
    pub fn new(response: HttpResponse, request: RequestContext) -> Self {
        Self { response, request }
    }

    pub fn into_response(self) -> HttpResponse {
        self.response
    }
}
