//! Workflow execution runtime
//!
//! The [`ExecutionEngine`] walks instances through their definition one node
//! at a time, persisting every step through a [`WorkflowRepository`]. The
//! in-process collaborators here (approval coordinator, in-memory
//! repository, tracing notifier) are enough to run workflows end to end.
//!
//! [`WorkflowRepository`]: wfcore::WorkflowRepository

mod approval;
mod config;
mod engine;
mod executor;
mod notify;
mod registry;
mod retry;
mod store;

pub use approval::{ApprovalCoordinator, DEFAULT_TASK_RETENTION};
pub use config::{ConfigError, EngineConfig, RetryPolicy};
pub use engine::ExecutionEngine;
pub use notify::TracingNotifier;
pub use store::InMemoryRepository;
