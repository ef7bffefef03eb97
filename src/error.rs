//! Error types for pipeline loading and orchestration.

use thiserror::Error;

/// Errors that can occur while loading or validating a pipeline.
///
/// Runtime step failures are not represented here: a failing step sets its
/// own [`crate::step::StepStatus::RunError`] and is surfaced through the
/// orchestrator's result map, not through this error type.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to read pipeline file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline file {path} is not valid JSON: {source}")]
    SchemaInvalid {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate {kind} id: '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("step '{step}' references unknown template '{template}'")]
    UnknownTemplate { step: String, template: String },

    #[error("step '{step}' references unknown precedent '{precedent}'")]
    UnknownPrecedent { step: String, precedent: String },

    #[error("step '{step}' must set exactly one of 'command' or 'commandId', not {}", if *both { "both" } else { "neither" })]
    IllegalStepShape { step: String, both: bool },

    #[error(
        "step '{step}' declares input '{input}' bound to step '{precedent}', which is not a declared precedent"
    )]
    InputNotPrecedent {
        step: String,
        input: String,
        precedent: String,
    },

    #[error(
        "step '{step}' declares input '{input}' bound to output '{output}' of step '{precedent}', which does not declare that output"
    )]
    UnknownOutput {
        step: String,
        input: String,
        precedent: String,
        output: String,
    },

    #[error("cycle detected in pipeline involving steps: {steps}")]
    CycleDetected { steps: String },

    #[error("missing required environment variables: {}", render_missing(missing))]
    MissingEnvironment { missing: Vec<MissingEnvDetail> },
}

fn render_missing(missing: &[MissingEnvDetail]) -> String {
    missing.iter().map(MissingEnvDetail::to_string).collect::<Vec<_>>().join(", ")
}

/// One missing-required-variable detail, used to render `MissingEnvironment`.
#[derive(Debug, Clone)]
pub struct MissingEnvDetail {
    pub name: String,
    pub description: Option<String>,
}

impl std::fmt::Display for MissingEnvDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{} ({description})", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl OrchestratorError {
    /// Convenience constructor used by the loader when it needs to report
    /// every missing required variable at once.
    pub fn missing_environment(missing: Vec<MissingEnvDetail>) -> Self {
        Self::MissingEnvironment { missing }
    }
}
