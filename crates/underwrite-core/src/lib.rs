pub mod config;
pub mod error;
pub mod event;
pub mod schema;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, UnderwriteError};
pub use event::{EventBus, RunEvent};
pub use schema::CapabilitySchema;
pub use types::*;
