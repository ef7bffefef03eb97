//! The public façade: load, validate, and run a pipeline file.

use std::collections::HashMap;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::OrchestratorError;
use crate::library::Library;
use crate::loader::{load_pipeline_file, LoadOptions, Pipeline};
use crate::scheduler::{run_exit_handlers, run_pipeline, RunOptions, StepOutcome};

/// Options accepted by [`Orchestrator::run`].
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub dry_run: bool,
    pub skipped_steps: Vec<String>,
    pub ignore_errors: bool,
    pub run_exit_handlers: bool,
}

/// The result of one `run` invocation.
#[derive(Debug)]
pub struct RunReport {
    pub success: bool,
    pub results: HashMap<String, StepOutcome>,
}

/// Top-level entry point wrapping loading, validation, and scheduling
/// behind a single object so callers (the CLI binary, embedders) don't need
/// to juggle a `Library` and a `Pipeline` themselves.
pub struct Orchestrator {
    library: Library,
}

impl Orchestrator {
    pub fn new(library: Library) -> Self {
        Self { library }
    }

    /// Loads and validates `path` without running anything.
    pub fn validate(&mut self, path: &Path) -> Result<Pipeline, OrchestratorError> {
        load_pipeline_file(path, &mut self.library, &LoadOptions::default())
    }

    /// Renders every environment variable referenced anywhere in `path`,
    /// alongside its resolution source, without running any step.
    pub fn display_environment(&mut self, path: &Path) -> Result<Vec<EnvironmentReportEntry>, OrchestratorError> {
        let options = LoadOptions {
            env_display: true,
            ..Default::default()
        };
        let pipeline = load_pipeline_file(path, &mut self.library, &options)?;
        let process_env: HashMap<String, String> = std::env::vars().collect();

        let mut entries = Vec::new();
        for step in pipeline.steps.values() {
            let resolved = pipeline.resolved.get(&step.id).expect("every step resolved");
            for var in resolved.environment.values() {
                entries.push(EnvironmentReportEntry {
                    step: step.id.clone(),
                    name: var.name.clone(),
                    effective_value: var.effective_value(&process_env),
                    description: var.description.clone(),
                    required: var.is_required(),
                });
            }
        }
        Ok(entries)
    }

    /// Writes a `.env`-style file covering every environment variable
    /// `path` references, one `NAME="value"` line per entry sorted by name
    /// (falling back to the variable's description when unresolved), for
    /// operators to fill in before a real run.
    pub fn generate_env_file(&mut self, path: &Path, target: &Path) -> Result<(), OrchestratorError> {
        let entries = self.display_environment(path)?;
        let mut by_name: std::collections::BTreeMap<String, EnvironmentReportEntry> = std::collections::BTreeMap::new();
        for entry in entries {
            by_name.entry(entry.name.clone()).or_insert(entry);
        }

        let lines: Vec<String> = by_name
            .into_values()
            .map(|entry| {
                let value = entry.effective_value.or(entry.description).unwrap_or_default();
                format!("{}=\"{value}\"", entry.name)
            })
            .collect();

        std::fs::write(target, lines.join("\n") + "\n").map_err(|source| OrchestratorError::Io {
            path: target.display().to_string(),
            source,
        })
    }

    /// Loads, validates, and runs `path`, returning whether every step
    /// finished in a non-failure state and each step's final outcome.
    pub async fn run(&mut self, path: &Path, request: RunRequest) -> Result<RunReport, OrchestratorError> {
        let load_options = LoadOptions {
            skipped_steps: request.skipped_steps,
            ignore_errors: request.ignore_errors,
            env_display: false,
        };
        let pipeline = load_pipeline_file(path, &mut self.library, &load_options)?;

        let cancellation = CancellationToken::new();
        let options = RunOptions { dry_run: request.dry_run };
        let results = run_pipeline(&pipeline, options, cancellation).await;
        let success = results.values().all(|outcome| !outcome.status.is_failure());

        info!(success, steps = pipeline.steps.len(), "pipeline run finished");

        if request.run_exit_handlers {
            run_exit_handlers(&self.library, success).await;
        }

        Ok(RunReport { success, results })
    }
}

/// One row of [`Orchestrator::display_environment`]'s report.
#[derive(Debug, Clone)]
pub struct EnvironmentReportEntry {
    pub step: String,
    pub name: String,
    pub effective_value: Option<String>,
    pub description: Option<String>,
    pub required: bool,
}
