use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use tracing::debug;

use crate::error::Error;
use crate::signal::{AbortSource, CancelSignal, EffectiveSignal};
use crate::transport::Transport;
use crate::util::redact_uri_for_logs;

/// Runs one transport call bounded by `timeout` and the caller's signal.
///
/// Aborts are classified by source: a fired caller signal becomes
/// [`Error::Cancelled`], an elapsed deadline becomes [`Error::Timeout`].
/// Transport failures become [`Error::Transport`]. Any response that arrives
/// in time is returned untouched, whatever its status; a response ready at the
/// same poll as the deadline is still returned.
pub async fn call_with_timeout(
    transport: &dyn Transport,
    request: Request<Bytes>,
    caller: Option<&CancelSignal>,
    timeout: Duration,
) -> Result<Response<Bytes>, Error> {
    let method = request.method().clone();
    let uri = redact_uri_for_logs(&request.uri().to_string());
    let mut signal = EffectiveSignal::new(caller, timeout);
    if signal.is_fired() {
        debug!(method = %method, uri = %uri, "request cancelled before transport call");
        return Err(Error::cancelled(&method, &uri));
    }

    let call = transport.send(request);
    tokio::select! {
        biased;
        result = call => result.map_err(|error| {
            let (kind, source) = error.into_parts();
            debug!(method = %method, uri = %uri, kind = %kind, "transport call failed");
            Error::Transport {
                kind,
                method,
                uri,
                source,
            }
        }),
        source = signal.fired() => match source {
            AbortSource::Caller => {
                debug!(method = %method, uri = %uri, "request cancelled by caller");
                Err(Error::cancelled(&method, &uri))
            }
            AbortSource::Deadline => {
                debug!(
                    method = %method,
                    uri = %uri,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(Error::Timeout {
                    timeout_ms: timeout.as_millis(),
                    method,
                    uri,
                })
            }
        },
    }
}
