//! # csm-orc
//!
//! A DAG-based step orchestrator that executes a declarative pipeline of
//! shell commands with dependency ordering, environment-variable contracts,
//! template reuse, inter-step data passing, and structured failure
//! propagation.
//!
//! ## Key features
//!
//! - **Pipeline loading**: typed, schema-validated JSON with
//!   `deny_unknown_fields` (see [`loader`]).
//! - **Template library**: process-wide registry of reusable command
//!   prototypes, discovered from plugins or declared inline (see
//!   [`library`]).
//! - **Concurrent scheduling**: each step runs as its own task; independent
//!   steps run in parallel while dependents wait on their precedents (see
//!   [`scheduler`]).
//! - **Output forwarding**: steps emit `CSM-OUTPUT-DATA:<name>:<value>`
//!   lines captured by the executor and bound to dependents' declared
//!   inputs (see [`executor`]).
//!
//! ## Usage
//!
//! ```no_run
//! use csm_orc::library::Library;
//! use csm_orc::orchestrator::{Orchestrator, RunRequest};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut orchestrator = Orchestrator::new(Library::new());
//! let report = orchestrator
//!     .run(std::path::Path::new("pipeline.json"), RunRequest::default())
//!     .await?;
//! println!("success: {}", report.success);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`env_var`] — a single environment-variable contract and its
//!   explicit-value/process-env/default resolution chain.
//! - [`template`] — immutable, registered command prototypes.
//! - [`step`] — a pipeline's DAG nodes, and their resolution against a
//!   template.
//! - [`library`] — the process-wide template registry and plugin discovery.
//! - [`loader`] — parses and validates a pipeline file into a runnable
//!   [`loader::Pipeline`].
//! - [`executor`] — runs one resolved step to completion.
//! - [`scheduler`] — drives an entire pipeline's DAG concurrently.
//! - [`orchestrator`] — the public façade tying the above together.
//! - [`config`] — layered runtime configuration.
//! - [`error`] — the [`error::OrchestratorError`] surfaced by loading and
//!   validation.

pub mod config;
pub mod env_var;
pub mod error;
pub mod executor;
pub mod library;
pub mod loader;
pub mod orchestrator;
pub mod scheduler;
pub mod step;
pub mod template;

pub use env_var::EnvVar;
pub use error::OrchestratorError;
pub use library::{Library, Plugin};
pub use loader::{load_pipeline_file, LoadOptions, Pipeline};
pub use orchestrator::{Orchestrator, RunReport, RunRequest};
pub use step::{InputSpec, OutputSpec, Step, StepStatus};
pub use template::Template;

/// Initializes the global `tracing` subscriber from `RUST_LOG`, defaulting
/// to `info` when unset. Safe to call more than once; later calls are
/// no-ops.
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
