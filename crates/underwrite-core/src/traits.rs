use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::schema::CapabilitySchema;

/// Coordinator-side access to capabilities, wherever they run.
///
/// Implemented by the worker registry (child processes) and by in-memory
/// stubs in tests.
pub trait CapabilityClient: Send + Sync + 'static {
    /// Schema the capability declared, or `None` if nobody serves it.
    fn schema(&self, capability: &str) -> Option<CapabilitySchema>;

    /// Invoke a capability and wait for its result object.
    fn call(
        &self,
        capability: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Worker-side implementation of one capability.
pub trait Capability: Send + Sync + 'static {
    /// Capability name (used in requests).
    fn name(&self) -> &str;

    /// Declared inputs and outputs, returned in the handshake.
    fn schema(&self) -> CapabilitySchema;

    /// Compute the output object from the input arguments.
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>>;
}
