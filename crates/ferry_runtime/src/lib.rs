//! FERRY Runtime
//!
//! Runs agents as supervised subprocesses and chains them into workflows.
//! [`Bridge`] is the single entry point for one execution; it wires the
//! registry, marshaler, supervisor, demarshaler and result cache together.
//! [`WorkflowOrchestrator`] sequences executions through the [`StepExecutor`]
//! seam.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod cache;
pub mod config;
pub mod health;
pub mod limiter;
pub mod monitor;
pub mod orchestrator;
pub mod supervisor;

pub use bridge::{Bridge, ExecuteOptions, StructuredResult};
pub use cache::{CacheStats, ResultCache};
pub use config::BridgeConfig;
pub use health::{HealthReport, SmokeTest};
pub use limiter::ConcurrencyLimiter;
pub use monitor::{ExecutionMonitor, InFlight, Metrics};
pub use orchestrator::{
    RunState, StepExecutor, StepReport, StepStatus, WorkflowOrchestrator, WorkflowRunReport,
};
pub use supervisor::supervise;
