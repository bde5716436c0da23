//! FERRY Agent Layer
//!
//! Everything the bridge knows about an agent before and after its process
//! runs:
//! - Descriptors and the registry that resolves them by name
//! - Marshaling a payload into program arguments, stdin or an input file
//! - Naming, cleanup and sweeping of on-disk artifacts
//! - Demarshaling captured output into a structured payload
//!
//! Agents are opaque executables. The only contract is the declared input
//! and output encoding plus the exit status.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod demarshal;
pub mod descriptor;
pub mod marshal;
pub mod registry;

pub use artifact::{ArtifactGuard, ArtifactKind, SweepReport, artifact_path, sweep_artifacts};
pub use demarshal::{Demarshaled, demarshal};
pub use descriptor::{AgentDescriptor, InputEncoding, OutputEncoding};
pub use marshal::{Invocation, marshal};
pub use registry::AgentRegistry;

/// Environment variable carrying the execution id
pub const ENV_EXECUTION_ID: &str = "FERRY_EXECUTION_ID";
/// Environment variable carrying the agent name
pub const ENV_AGENT: &str = "FERRY_AGENT";
/// Environment variable carrying the sidecar output path
pub const ENV_OUTPUT_FILE: &str = "FERRY_OUTPUT_FILE";
/// Flag that precedes the input file path
pub const INPUT_FILE_FLAG: &str = "--input-file";
