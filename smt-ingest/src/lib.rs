pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use pipeline::{Envelope, PipelineError};
pub use scheduler::{CycleOutcome, Orchestrator};
