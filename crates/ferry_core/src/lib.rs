//! FERRY Core Types
//!
//! Pure types shared by every FERRY crate: identifiers that namespace
//! executions, stable cache keys, and the error taxonomy of the bridge.
//! Nothing in this crate performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod exec;
pub mod hash;
pub mod id;

// Re-exports
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use exec::{ExecutionRequest, RawExecutionResult};
pub use hash::{CacheKey, HashError};
pub use id::{ExecutionId, RunId};

/// Structured payload exchanged with agents
pub type Payload = serde_json::Value;
