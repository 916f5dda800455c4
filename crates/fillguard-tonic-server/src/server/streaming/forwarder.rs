use crate::server::telemetry::{increment_values_streamed, record_resolution};
use fillguard::Batch;
use fillguard_tonic_core::{Error, proto::Reply};
use futures::StreamExt;
use tokio::sync::mpsc;
use tonic::Status;

/// Forwards every resolution of `batch` to the client, in completion order.
///
/// Returns the number of replies written once the batch is exhausted.
///
/// # Behavior
///
/// - Each resolution becomes one `Reply { message }`; empty values (a
///   resolution that ran out of attempts) are forwarded like any other.
/// - If the client disconnects, or a send fails, the batch is cancelled so
///   that in-flight origin fetches are aborted, and an error is returned.
/// - If the batch was cut short by service shutdown, a best-effort
///   `UNAVAILABLE` status is sent to terminate the stream.
pub async fn forward_batch(
    mut batch: Batch,
    resp_tx: mpsc::Sender<Result<Reply, Status>>,
) -> fillguard_tonic_core::Result<usize> {
    let expected = batch.remaining();
    let mut sent = 0;

    loop {
        let resolution = tokio::select! {
            biased;
            () = resp_tx.closed() => {
                batch.cancel();
                return Err(Error::RequestCancelled);
            }
            next = batch.next() => match next {
                Some(resolution) => resolution,
                None => break,
            },
        };

        record_resolution(resolution.outcome.as_str());

        if let Err(e) = resp_tx
            .send(Ok(Reply {
                message: resolution.value,
            }))
            .await
        {
            batch.cancel();
            return Err(Error::ChannelError {
                context: format!("Failed to forward reply: {e}"),
            });
        }
        increment_values_streamed();
        sent += 1;
    }

    if sent < expected && batch.is_cancelled() {
        if let Err(_e) = resp_tx.send(Err(Error::ServiceShutdown.into())).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("Failed to forward shutdown status: {}", _e);
        }
        return Err(Error::ServiceShutdown);
    }

    Ok(sent)
}
