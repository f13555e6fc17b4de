use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::error::Error;

/// One stage of an [`InterceptorChain`].
///
/// `on_fulfilled` may edit or replace the value in place. When it fails, the
/// same stage's `on_rejected` observes the error together with the value as it
/// stood at the failure, and the error is then returned to the caller as-is.
pub trait Interceptor<T>: Send + Sync {
    fn on_fulfilled<'a>(&'a self, _value: &'a mut T) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }

    fn on_rejected(&self, _error: &Error, _value: &T) {}
}

struct FnInterceptor<F> {
    fulfilled: F,
}

impl<T, F> Interceptor<T> for FnInterceptor<F>
where
    T: Send,
    F: Fn(&mut T) -> Result<(), Error> + Send + Sync,
{
    fn on_fulfilled<'a>(&'a self, value: &'a mut T) -> BoxFuture<'a, Result<(), Error>> {
        let result = (self.fulfilled)(value);
        Box::pin(async move { result })
    }
}

/// Ordered interceptor stages for one phase. Stages are appended while the
/// client is configured and only read afterwards.
pub struct InterceptorChain<T> {
    stages: Vec<Arc<dyn Interceptor<T>>>,
}

impl<T> InterceptorChain<T>
where
    T: Send + 'static,
{
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn push<I>(&mut self, stage: I) -> &mut Self
    where
        I: Interceptor<T> + 'static,
    {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn push_shared(&mut self, stage: Arc<dyn Interceptor<T>>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Registers a synchronous fulfilment closure as a stage.
    pub fn use_fn<F>(&mut self, fulfilled: F) -> &mut Self
    where
        F: Fn(&mut T) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.push(FnInterceptor { fulfilled })
    }

    pub(crate) fn extend(&mut self, other: &InterceptorChain<T>) -> &mut Self {
        self.stages.extend(other.stages.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(&self, mut value: T) -> Result<T, Error> {
        for (index, stage) in self.stages.iter().enumerate() {
            if let Err(error) = stage.on_fulfilled(&mut value).await {
                debug!(stage = index, code = error.code().as_str(), "interceptor stage failed");
                stage.on_rejected(&error, &value);
                return Err(error);
            }
        }
        Ok(value)
    }
}

impl<T> Default for InterceptorChain<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InterceptorChain<T> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<T> std::fmt::Debug for InterceptorChain<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("InterceptorChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}
