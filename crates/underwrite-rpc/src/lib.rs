pub mod channel;
pub mod protocol;
pub mod registry;
pub mod server;

pub use channel::RpcChannel;
pub use protocol::{Handshake, Request, Response, DESCRIBE};
pub use registry::{WorkerDescriptor, WorkerHandle, WorkerRegistry};
pub use server::{serve, serve_stdio, CapabilitySet};
