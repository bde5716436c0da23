//! FERRY Planner
//!
//! Static workflow definitions, their validation rules, and the JSON
//! manifest that declares agents and workflows together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manifest;
pub mod validate;
pub mod workflow;

pub use manifest::{Manifest, ManifestConfig, ManifestError};
pub use validate::{ValidationError, ValidationWarning, Validator};
pub use workflow::{WorkflowDefinition, WorkflowStep};
