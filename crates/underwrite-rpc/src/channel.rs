use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use underwrite_core::error::{Result, UnderwriteError};

use crate::protocol::{frame_codec, Request, Response};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How long `close` waits for buffered frames to drain.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Calls awaiting a response, plus whether the stream has ended.
#[derive(Default)]
struct PendingCalls {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Response>>,
}

type SharedPending = Arc<StdMutex<PendingCalls>>;

fn lock(pending: &StdMutex<PendingCalls>) -> MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a call's waiter when the call ends, however it ends.
struct PendingGuard<'a> {
    pending: &'a StdMutex<PendingCalls>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).waiters.remove(&self.id);
    }
}

/// Request/response channel over one worker's byte stream.
///
/// A single reader task routes each response to the call that issued its
/// id. When the stream ends every in-flight call fails with
/// `ChannelClosed`, and so does every later call.
pub struct RpcChannel {
    name: String,
    next_id: AtomicU64,
    writer: Mutex<FramedWrite<BoxWriter, LinesCodec>>,
    pending: SharedPending,
    reader: JoinHandle<()>,
}

impl RpcChannel {
    /// Wrap a connected stream. Must be called inside a tokio runtime.
    pub fn new<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let pending = SharedPending::default();
        let frames = FramedRead::new(reader, frame_codec());
        let reader = tokio::spawn(read_loop(name.clone(), frames, pending.clone()));
        let writer: BoxWriter = Box::new(writer);

        Self {
            name,
            next_id: AtomicU64::new(1),
            writer: Mutex::new(FramedWrite::new(writer, frame_codec())),
            pending,
            reader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the underlying stream has ended.
    pub async fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    /// Number of calls waiting for a response.
    pub async fn in_flight(&self) -> usize {
        lock(&self.pending).waiters.len()
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` bounds the whole exchange: waiting for the writer, writing
    /// the frame and waiting for the answer.
    pub async fn call(
        &self,
        capability: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(UnderwriteError::ChannelClosed(self.name.clone()));
            }
            pending.waiters.insert(id, tx);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let frame = serde_json::to_string(&Request {
            id,
            capability: capability.to_string(),
            args,
        })?;

        let exchange = async {
            debug!(worker = %self.name, id, capability, "Sending request");
            if let Err(e) = self.writer.lock().await.send(frame).await {
                warn!(worker = %self.name, id, error = %e, "Failed to write request");
                return Err(UnderwriteError::ChannelClosed(self.name.clone()));
            }
            // Sender dropped: the reader drained the table on stream end.
            rx.await
                .map_err(|_| UnderwriteError::ChannelClosed(self.name.clone()))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => response.into_result(capability),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    worker = %self.name,
                    id,
                    capability,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(UnderwriteError::RpcTimeout {
                    capability: capability.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Stop reading, fail everything in flight and shut the write side.
    pub async fn close(&self) {
        self.reader.abort();
        fail_pending(&self.name, &self.pending);
        let closing = async {
            let mut writer = self.writer.lock().await;
            SinkExt::<String>::close(&mut *writer).await
        };
        match tokio::time::timeout(CLOSE_GRACE, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(worker = %self.name, error = %e, "Error closing writer"),
            Err(_) => debug!(worker = %self.name, "Writer did not drain before close"),
        }
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(name: String, mut frames: FramedRead<R, LinesCodec>, pending: SharedPending)
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(worker = %name, "Dropping oversized frame");
                continue;
            }
            Err(LinesCodecError::Io(e)) => {
                warn!(worker = %name, error = %e, "Worker stream failed");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response: Response = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(worker = %name, error = %e, "Dropping malformed frame");
                continue;
            }
        };

        let waiter = lock(&pending).waiters.remove(&response.id);
        match waiter {
            // Receiver may have been dropped if the caller gave up
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => {
                debug!(worker = %name, id = response.id, "Discarding uncorrelated response");
            }
        }
    }

    fail_pending(&name, &pending);
}

fn fail_pending(name: &str, pending: &StdMutex<PendingCalls>) {
    let mut pending = lock(pending);
    if pending.closed {
        return;
    }
    pending.closed = true;
    let in_flight = pending.waiters.len();
    // Dropping the senders wakes every waiter with ChannelClosed.
    pending.waiters.clear();
    info!(worker = %name, in_flight, "Worker channel closed");
}
