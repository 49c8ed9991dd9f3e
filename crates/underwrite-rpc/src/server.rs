//! Worker side of the protocol: answer the handshake and serve requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodecError};
use tracing::{debug, info, warn};

use underwrite_core::error::Result;
use underwrite_core::traits::Capability;

use crate::protocol::{frame_codec, Handshake, Request, Response, DESCRIBE};

/// Capabilities a worker process serves.
#[derive(Default, Clone)]
pub struct CapabilitySet {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability.
    pub fn register(&mut self, capability: impl Capability) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, Arc::new(capability));
    }

    /// Register an already shared capability.
    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, capability);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.capabilities.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Handshake payload describing every registered capability.
    pub fn describe(&self) -> Handshake {
        Handshake {
            capabilities: self.capabilities.values().map(|c| c.schema()).collect(),
        }
    }
}

/// Serve requests from `reader` until it ends, writing responses to `writer`.
///
/// Each request runs as its own task, so a slow call does not hold up the
/// ones behind it and responses go out in completion order.
pub async fn serve<R, W>(capabilities: CapabilitySet, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let capabilities = Arc::new(capabilities);
    let mut frames = FramedRead::new(reader, frame_codec());
    let (tx, mut rx) = mpsc::channel::<Response>(64);

    let writer_task = tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, frame_codec());
        while let Some(response) = rx.recv().await {
            let line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(e) => {
                    warn!(id = response.id, error = %e, "Failed to encode response");
                    continue;
                }
            };
            if let Err(e) = sink.send(line).await {
                warn!(error = %e, "Failed to write response, coordinator gone");
                break;
            }
        }
    });

    info!(capabilities = ?capabilities.list(), "Worker serving");

    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("Dropping oversized request");
                continue;
            }
            Err(LinesCodecError::Io(e)) => {
                warn!(error = %e, "Request stream failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                // Answer if an id can be recovered, otherwise drop it.
                let id = serde_json::from_str::<serde_json::Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").and_then(|id| id.as_u64()));
                match id {
                    Some(id) => {
                        let _ = tx.send(Response::err(id, "ProtocolError", e.to_string())).await;
                    }
                    None => warn!(error = %e, "Dropping malformed request"),
                }
                continue;
            }
        };

        if request.capability == DESCRIBE {
            let handshake = serde_json::to_value(capabilities.describe())?;
            let _ = tx.send(Response::ok(request.id, handshake)).await;
            continue;
        }

        let capabilities = capabilities.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = dispatch(&capabilities, request).await;
            let _ = tx.send(response).await;
        });
    }

    debug!("Request stream ended, draining responses");
    drop(tx);
    let _ = writer_task.await;
    Ok(())
}

/// Serve on this process's stdin/stdout.
pub async fn serve_stdio(capabilities: CapabilitySet) -> Result<()> {
    serve(capabilities, tokio::io::stdin(), tokio::io::stdout()).await
}

async fn dispatch(capabilities: &CapabilitySet, request: Request) -> Response {
    let Some(capability) = capabilities.get(&request.capability) else {
        return Response::err(
            request.id,
            "UnknownCapability",
            format!("capability '{}' is not served here", request.capability),
        );
    };

    debug!(id = request.id, capability = %request.capability, "Invoking capability");
    match capability.invoke(request.args).await {
        Ok(result) => Response::ok(request.id, result),
        Err(e) => {
            warn!(capability = %request.capability, error = %e, "Capability failed");
            Response::err(request.id, e.kind(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::future::BoxFuture;
    use serde_json::json;
    use underwrite_core::error::UnderwriteError;
    use underwrite_core::schema::CapabilitySchema;
    use underwrite_core::types::RecordField;

    use crate::channel::RpcChannel;

    /// Echoes its args after an optional delay.
    struct Echo {
        name: &'static str,
        delay: Duration,
    }

    impl Capability for Echo {
        fn name(&self) -> &str {
            self.name
        }

        fn schema(&self) -> CapabilitySchema {
            CapabilitySchema::new(self.name)
                .with_inputs(&[RecordField::Applicant])
                .with_outputs(&[RecordField::Explanation])
        }

        fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                if args.get("fail").is_some() {
                    return Err(UnderwriteError::Validation("asked to fail".into()));
                }
                Ok(args)
            })
        }
    }

    fn connect(set: CapabilitySet) -> RpcChannel {
        let (coordinator, worker) = tokio::io::duplex(64 * 1024);
        let (wr, ww) = tokio::io::split(worker);
        tokio::spawn(serve(set, wr, ww));
        let (cr, cw) = tokio::io::split(coordinator);
        RpcChannel::new("echo-worker", cr, cw)
    }

    #[tokio::test]
    async fn test_describe_lists_schemas() {
        let mut set = CapabilitySet::new();
        set.register(Echo { name: "slow", delay: Duration::ZERO });
        set.register(Echo { name: "fast", delay: Duration::ZERO });
        let channel = connect(set);

        let value = channel
            .call(DESCRIBE, json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        let handshake: Handshake = serde_json::from_value(value).unwrap();
        let names: Vec<_> = handshake.capabilities.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_fast_call() {
        let mut set = CapabilitySet::new();
        set.register(Echo { name: "slow", delay: Duration::from_millis(300) });
        set.register(Echo { name: "fast", delay: Duration::ZERO });
        let channel = connect(set);
        let timeout = Duration::from_secs(5);

        let (slow, fast) = tokio::join!(
            async {
                let value = channel.call("slow", json!({"n": 1}), timeout).await;
                (value, std::time::Instant::now())
            },
            async {
                let value = channel.call("fast", json!({"n": 2}), timeout).await;
                (value, std::time::Instant::now())
            },
        );
        let (slow_value, slow_done) = slow;
        let (fast_value, fast_done) = fast;

        assert_eq!(fast_value.unwrap()["n"], 2);
        assert_eq!(slow_value.unwrap()["n"], 1);
        assert!(fast_done < slow_done);
    }

    #[tokio::test]
    async fn test_unknown_capability_and_failure_payloads() {
        let mut set = CapabilitySet::new();
        set.register(Echo { name: "echo", delay: Duration::ZERO });
        let channel = connect(set);
        let timeout = Duration::from_secs(5);

        let err = channel.call("nope", json!({}), timeout).await.unwrap_err();
        match err {
            UnderwriteError::RpcExecution { kind, .. } => assert_eq!(kind, "UnknownCapability"),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = channel
            .call("echo", json!({"fail": true}), timeout)
            .await
            .unwrap_err();
        match err {
            UnderwriteError::RpcExecution { kind, .. } => assert_eq!(kind, "ValidationError"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
