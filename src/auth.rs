use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::Error;

/// Async accessor for the current access token, if any.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> BoxFuture<'_, Result<Option<String>, Error>>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticTokenSource {
    token: Option<String>,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl TokenSource for StaticTokenSource {
    fn token(&self) -> BoxFuture<'_, Result<Option<String>, Error>> {
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// Where the dispatcher runs, which decides where session tokens live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Server-side rendering or a backend process: tokens come from the
    /// incoming request's session.
    Server,
    /// An end-user process: tokens come from local client storage.
    #[default]
    Client,
}

/// Picks the server-side or client-side token source by execution context.
#[derive(Clone)]
pub struct ContextualTokenSource {
    context: ExecutionContext,
    server: Arc<dyn TokenSource>,
    client: Arc<dyn TokenSource>,
}

impl ContextualTokenSource {
    pub fn new(
        context: ExecutionContext,
        server: Arc<dyn TokenSource>,
        client: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            context,
            server,
            client,
        }
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }
}

impl TokenSource for ContextualTokenSource {
    fn token(&self) -> BoxFuture<'_, Result<Option<String>, Error>> {
        match self.context {
            ExecutionContext::Server => self.server.token(),
            ExecutionContext::Client => self.client.token(),
        }
    }
}

impl std::fmt::Debug for ContextualTokenSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ContextualTokenSource")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
