use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use underwrite_core::config::{AppConfig, WorkerConfig};
use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::schema::CapabilitySchema;
use underwrite_core::traits::CapabilityClient;

use crate::channel::RpcChannel;
use crate::protocol::{Handshake, DESCRIBE};

/// How long to wait for a failed worker's exit status.
const EXIT_STATUS_GRACE: Duration = Duration::from_millis(200);

/// How to launch one worker process.
#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl WorkerDescriptor {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn from_config(name: &str, config: &WorkerConfig) -> Self {
        Self {
            name: name.to_string(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
        }
    }
}

/// A started worker: its channel, declared schemas and (if spawned) process.
pub struct WorkerHandle {
    name: String,
    channel: RpcChannel,
    schemas: Vec<CapabilitySchema>,
    child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field(
                "capabilities",
                &self.schemas.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schemas(&self) -> &[CapabilitySchema] {
        &self.schemas
    }

    pub fn schema(&self, capability: &str) -> Option<&CapabilitySchema> {
        self.schemas.iter().find(|s| s.name == capability)
    }

    pub async fn call(
        &self,
        capability: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        self.channel.call(capability, args, timeout).await
    }

    /// False once the worker's stream has ended.
    pub async fn is_alive(&self) -> bool {
        !self.channel.is_closed().await
    }

    /// Close the channel and kill the process.
    pub async fn shutdown(&self) {
        self.channel.close().await;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                debug!(worker = %self.name, error = %e, "Worker already gone");
            }
            let _ = child.wait().await;
        }
        info!(worker = %self.name, "Worker stopped");
    }
}

/// Started workers, addressable by the capabilities they serve.
pub struct WorkerRegistry {
    workers: Vec<Arc<WorkerHandle>>,
    by_capability: HashMap<String, Arc<WorkerHandle>>,
    handshake_timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            workers: vec![],
            by_capability: HashMap::new(),
            handshake_timeout,
        }
    }

    /// Start every configured worker, in name order.
    ///
    /// On any failure the workers already started are shut down and the
    /// launch error is returned.
    pub async fn start_all(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new(config.executor.handshake_timeout());

        let mut names: Vec<&String> = config.workers.keys().collect();
        names.sort();

        for name in names {
            let descriptor = WorkerDescriptor::from_config(name, &config.workers[name]);
            if let Err(e) = registry.start(&descriptor).await {
                registry.shutdown().await;
                return Err(e);
            }
        }

        info!(
            workers = registry.workers.len(),
            capabilities = registry.by_capability.len(),
            "Worker registry ready"
        );
        Ok(registry)
    }

    /// Launch a worker process and register the capabilities it declares.
    pub async fn start(&mut self, descriptor: &WorkerDescriptor) -> Result<Arc<WorkerHandle>> {
        let name = descriptor.name.clone();
        let launch_error = |message: String| UnderwriteError::Launch {
            worker: name.clone(),
            message,
        };

        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &descriptor.working_dir {
            cmd.current_dir(dir);
        }

        debug!(worker = %name, command = %descriptor.command, "Spawning worker");
        let mut child = cmd
            .spawn()
            .map_err(|e| launch_error(format!("failed to spawn {}: {}", descriptor.command, e)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(launch_error("worker stdio was not captured".into()));
        };

        let channel = RpcChannel::new(name.clone(), stdout, stdin);
        let schemas = match handshake(&channel, self.handshake_timeout).await {
            Ok(schemas) => schemas,
            Err(e) => {
                channel.close().await;
                let status = tokio::time::timeout(EXIT_STATUS_GRACE, child.wait())
                    .await
                    .ok()
                    .and_then(|r| r.ok());
                let message = match status {
                    Some(status) => format!("handshake failed: {} (worker exited: {})", e, status),
                    None => {
                        let _ = child.start_kill();
                        format!("handshake failed: {}", e)
                    }
                };
                warn!(worker = %name, %message, "Worker launch failed");
                return Err(launch_error(message));
            }
        };

        self.register(WorkerHandle {
            name,
            channel,
            schemas,
            child: Mutex::new(Some(child)),
        })
        .await
    }

    /// Handshake with a worker already connected over `reader`/`writer`.
    pub async fn attach<R, W>(
        &mut self,
        name: impl Into<String>,
        reader: R,
        writer: W,
    ) -> Result<Arc<WorkerHandle>>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let channel = RpcChannel::new(name.clone(), reader, writer);
        let schemas = match handshake(&channel, self.handshake_timeout).await {
            Ok(schemas) => schemas,
            Err(e) => {
                channel.close().await;
                return Err(UnderwriteError::Launch {
                    worker: name,
                    message: format!("handshake failed: {}", e),
                });
            }
        };

        self.register(WorkerHandle {
            name,
            channel,
            schemas,
            child: Mutex::new(None),
        })
        .await
    }

    async fn register(&mut self, handle: WorkerHandle) -> Result<Arc<WorkerHandle>> {
        for schema in &handle.schemas {
            if let Some(existing) = self.by_capability.get(&schema.name) {
                let message = format!(
                    "capability '{}' is already served by worker '{}'",
                    schema.name,
                    existing.name()
                );
                handle.shutdown().await;
                return Err(UnderwriteError::Launch {
                    worker: handle.name.clone(),
                    message,
                });
            }
        }

        let handle = Arc::new(handle);
        for schema in &handle.schemas {
            self.by_capability.insert(schema.name.clone(), handle.clone());
        }
        info!(
            worker = %handle.name,
            capabilities = ?handle.schemas.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Worker registered"
        );
        self.workers.push(handle.clone());
        Ok(handle)
    }

    /// Handle of the worker serving `capability`.
    pub fn capability_of(&self, capability: &str) -> Result<Arc<WorkerHandle>> {
        self.by_capability
            .get(capability)
            .cloned()
            .ok_or_else(|| UnderwriteError::UnknownCapability(capability.to_string()))
    }

    /// All registered capability names, sorted.
    pub fn capabilities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_capability.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    pub fn workers(&self) -> &[Arc<WorkerHandle>] {
        &self.workers
    }

    /// Stop every worker.
    pub async fn shutdown(&self) {
        for worker in &self.workers {
            worker.shutdown().await;
        }
    }
}

impl CapabilityClient for WorkerRegistry {
    fn schema(&self, capability: &str) -> Option<CapabilitySchema> {
        self.by_capability
            .get(capability)
            .and_then(|h| h.schema(capability))
            .cloned()
    }

    fn call(
        &self,
        capability: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let capability = capability.to_string();
        Box::pin(async move {
            let handle = self.capability_of(&capability)?;
            handle.call(&capability, args, timeout).await
        })
    }
}

async fn handshake(channel: &RpcChannel, timeout: Duration) -> Result<Vec<CapabilitySchema>> {
    let value = channel
        .call(DESCRIBE, serde_json::json!({}), timeout)
        .await?;
    let handshake: Handshake = serde_json::from_value(value)
        .map_err(|e| UnderwriteError::Protocol(format!("malformed handshake: {}", e)))?;
    if handshake.capabilities.is_empty() {
        return Err(UnderwriteError::Protocol(
            "handshake declares no capabilities".into(),
        ));
    }
    Ok(handshake.capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use underwrite_core::traits::Capability;
    use underwrite_core::types::RecordField;

    use crate::server::{serve, CapabilitySet};

    struct Fixed {
        name: &'static str,
        score: f64,
    }

    impl Capability for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn schema(&self) -> CapabilitySchema {
            CapabilitySchema::new(self.name)
                .with_inputs(&[RecordField::Applicant])
                .with_outputs(&[RecordField::FraudRiskScore])
        }

        fn invoke(&self, _args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move { Ok(json!({ "fraud_risk_score": self.score })) })
        }
    }

    async fn attach_set(
        registry: &mut WorkerRegistry,
        name: &str,
        set: CapabilitySet,
    ) -> Result<Arc<WorkerHandle>> {
        let (coordinator, worker) = tokio::io::duplex(64 * 1024);
        let (wr, ww) = tokio::io::split(worker);
        tokio::spawn(serve(set, wr, ww));
        let (cr, cw) = tokio::io::split(coordinator);
        registry.attach(name, cr, cw).await
    }

    fn fraud_set(score: f64) -> CapabilitySet {
        let mut set = CapabilitySet::new();
        set.register(Fixed {
            name: "evaluate_fraud_risk",
            score,
        });
        set
    }

    #[tokio::test]
    async fn test_attach_registers_and_routes_calls() {
        let mut registry = WorkerRegistry::new(Duration::from_secs(5));
        attach_set(&mut registry, "fraud", fraud_set(20.0)).await.unwrap();

        assert_eq!(registry.capabilities(), vec!["evaluate_fraud_risk"]);
        assert!(registry.schema("evaluate_fraud_risk").is_some());

        let value = CapabilityClient::call(
            &registry,
            "evaluate_fraud_risk",
            json!({}),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(value["fraud_risk_score"], 20.0);

        let handle = registry.capability_of("evaluate_fraud_risk").unwrap();
        assert!(handle.is_alive().await);
        let shown = format!("{handle:?}");
        assert!(shown.contains("fraud") && shown.contains("evaluate_fraud_risk"));
        registry.shutdown().await;
        assert!(!handle.is_alive().await);
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let registry = WorkerRegistry::new(Duration::from_secs(5));
        let err = registry.capability_of("fetch_macro_risk").unwrap_err();
        assert_eq!(err.kind(), "UnknownCapability");

        let err = CapabilityClient::call(
            &registry,
            "fetch_macro_risk",
            json!({}),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "UnknownCapability");
    }

    #[tokio::test]
    async fn test_duplicate_capability_is_a_launch_error() {
        let mut registry = WorkerRegistry::new(Duration::from_secs(5));
        attach_set(&mut registry, "fraud-a", fraud_set(20.0)).await.unwrap();
        let err = attach_set(&mut registry, "fraud-b", fraud_set(30.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "LaunchError");
        assert!(err.to_string().contains("fraud-a"));
        assert_eq!(registry.workers().len(), 1);
    }

    #[tokio::test]
    async fn test_silent_worker_fails_handshake() {
        let mut registry = WorkerRegistry::new(Duration::from_millis(100));
        let (coordinator, _worker) = tokio::io::duplex(1024);
        let (cr, cw) = tokio::io::split(coordinator);

        let err = registry.attach("mute", cr, cw).await.unwrap_err();
        assert_eq!(err.kind(), "LaunchError");
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn test_malformed_handshake_is_rejected() {
        let mut registry = WorkerRegistry::new(Duration::from_secs(5));
        let (coordinator, worker) = tokio::io::duplex(1024);
        let (wr, mut ww) = tokio::io::split(worker);

        tokio::spawn(async move {
            let mut lines = BufReader::new(wr).lines();
            let _ = lines.next_line().await;
            ww.write_all(b"{\"id\":1,\"result\":{\"tools\":[]}}\n")
                .await
                .unwrap();
            let _ = lines.next_line().await;
        });

        let (cr, cw) = tokio::io::split(coordinator);
        let err = registry.attach("odd", cr, cw).await.unwrap_err();
        assert_eq!(err.kind(), "LaunchError");
        assert!(err.to_string().contains("malformed handshake"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_a_launch_error() {
        let mut registry = WorkerRegistry::new(Duration::from_secs(1));
        let descriptor = WorkerDescriptor::new("ghost", "/nonexistent/underwrite-worker");
        let err = registry.start(&descriptor).await.unwrap_err();
        assert_eq!(err.kind(), "LaunchError");
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exiting_worker_reports_exit_status() {
        let mut registry = WorkerRegistry::new(Duration::from_secs(5));
        let descriptor = WorkerDescriptor::new("quitter", "sh").with_args(["-c", "exit 3"]);
        let err = registry.start(&descriptor).await.unwrap_err();
        assert_eq!(err.kind(), "LaunchError");
        assert!(err.to_string().contains("exit status: 3"), "{}", err);
    }

    #[test]
    fn test_descriptor_from_config() {
        let config = WorkerConfig {
            command: "underwrite".into(),
            args: vec!["worker".into(), "evaluate_fraud_risk".into()],
            env: HashMap::from([("UNDERWRITE_FRAUD_RISK_SCORE".into(), "20".into())]),
            working_dir: None,
        };
        let descriptor = WorkerDescriptor::from_config("fraud", &config);
        assert_eq!(descriptor.name, "fraud");
        assert_eq!(descriptor.args, vec!["worker", "evaluate_fraud_risk"]);
        assert_eq!(descriptor.env["UNDERWRITE_FRAUD_RISK_SCORE"], "20");
    }
}
