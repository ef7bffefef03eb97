//! A single node in a pipeline's dependency graph.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::env_var::EnvVar;
use crate::error::OrchestratorError;
use crate::template::{deserialize_env_map, Template};

/// Binds one of a step's inputs to an output captured by one of its
/// precedents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    /// Name of the environment variable this input is delivered under in
    /// the step's own subprocess. The orchestrator's own process
    /// environment is never mutated to deliver it.
    #[serde(rename = "as")]
    pub as_env: String,

    #[serde(rename = "stepId")]
    pub step_id: String,

    pub output: String,

    #[serde(default)]
    pub optional: bool,

    #[serde(default, rename = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// Documents one output a step may capture via the `CSM-OUTPUT-DATA:` line
/// protocol. Purely descriptive: the executor captures whatever sentinels a
/// step actually emits, whether or not they are declared here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The lifecycle of a single step within one orchestrator run.
///
/// `Error` is a load-time-only value: the scheduler never produces it. A
/// step that fails while running transitions to `RunError`, never `Error`.
///
/// `Skipped` is likewise never produced by the scheduler: a step with
/// `skipped=true` (set directly in the pipeline file, or by the caller's
/// `skippedSteps` list at load time) is treated as having succeeded without
/// running and terminates in `Done`, not `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StepStatus {
    Init,
    Ready,
    DryRun,
    Done,
    Skipped,
    SkippedAfterFailure,
    RunError,
    Error,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Init
    }
}

impl StepStatus {
    /// Whether this status represents a step that did not produce usable
    /// output: `RunError`, `Error`, `Skipped`, or `SkippedAfterFailure`.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::RunError | Self::Error | Self::Skipped | Self::SkippedAfterFailure)
    }
}

/// One node of a pipeline's DAG, as loaded from JSON and (if it references a
/// template) resolved against the [`crate::library::Library`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, rename = "commandId", skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,

    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_env_map")]
    pub environment: IndexMap<String, EnvVar>,

    #[serde(default)]
    pub precedents: Vec<String>,

    #[serde(default)]
    pub inputs: IndexMap<String, InputSpec>,

    #[serde(default)]
    pub outputs: IndexMap<String, OutputSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, rename = "useSystemEnvironment")]
    pub use_system_environment: bool,

    #[serde(default)]
    pub skipped: bool,

    #[serde(default, skip)]
    pub status: StepStatus,

    /// Output values captured from this step's `CSM-OUTPUT-DATA:` lines
    /// after it finishes running. Empty until the executor runs the step.
    #[serde(default, skip)]
    pub captured_outputs: HashMap<String, String>,
}

impl Step {
    /// `true` when the step's shape is `command` XOR `commandId`, as required
    /// at load time.
    pub fn has_valid_command_shape(&self) -> bool {
        self.command.is_some() != self.command_id.is_some()
    }

    /// Resolves this step against its referenced template, producing the
    /// effective command, arguments, environment and system-environment
    /// flag the executor should use.
    ///
    /// Precondition: `self.command_id` is `Some` and names `template.id`.
    /// Called by the loader once all templates are registered, so an
    /// `UnknownTemplate` lookup failure never reaches this function.
    pub fn resolve_against(&self, template: &Template) -> ResolvedStep {
        let command = self
            .command
            .clone()
            .unwrap_or_else(|| template.command.clone());

        let mut arguments = template.arguments.clone();
        arguments.extend(self.arguments.clone());

        let mut environment = template.environment.clone();
        for (name, step_var) in &self.environment {
            match environment.get_mut(name) {
                Some(existing) => {
                    let mut merged = step_var.clone();
                    merged.join(existing);
                    *existing = merged;
                }
                None => {
                    environment.insert(name.clone(), step_var.clone());
                }
            }
        }

        let description = self.description.clone().or_else(|| template.description.clone());

        ResolvedStep {
            command,
            arguments,
            environment,
            use_system_environment: self.use_system_environment || template.use_system_environment,
            description,
        }
    }

    /// For a step with an inline `command` (no template), the step's own
    /// fields already are the resolved form.
    pub fn resolve_inline(&self) -> ResolvedStep {
        ResolvedStep {
            command: self.command.clone().unwrap_or_default(),
            arguments: self.arguments.clone(),
            environment: self.environment.clone(),
            use_system_environment: self.use_system_environment,
            description: self.description.clone(),
        }
    }

    /// Every required (non-optional, no default, no explicit value)
    /// environment variable this step needs once resolved.
    pub fn required_env_vars<'a>(&'a self, resolved: &'a ResolvedStep) -> impl Iterator<Item = &'a EnvVar> {
        resolved.environment.values().filter(|var| var.is_required())
    }
}

/// The command, arguments, environment and flags a [`Step`] actually runs
/// with, after template resolution.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub command: String,
    pub arguments: Vec<String>,
    pub environment: IndexMap<String, EnvVar>,
    pub use_system_environment: bool,
    pub description: Option<String>,
}

pub(crate) fn check_command_shape(step: &Step) -> Result<(), OrchestratorError> {
    if step.has_valid_command_shape() {
        Ok(())
    } else {
        Err(OrchestratorError::IllegalStepShape {
            step: step.id.clone(),
            both: step.command.is_some() && step.command_id.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str) -> Template {
        Template {
            id: id.into(),
            command: "deploy.sh".into(),
            arguments: vec!["--template-arg".into()],
            environment: IndexMap::from([(
                "REGION".to_string(),
                EnvVar {
                    name: "REGION".into(),
                    default_value: Some("us-east-1".into()),
                    ..Default::default()
                },
            )]),
            description: Some("from template".into()),
            use_system_environment: false,
            source_plugin: "inline".into(),
            is_exit_handler: false,
        }
    }

    #[test]
    fn has_valid_command_shape_rejects_both_and_neither() {
        let mut step = Step {
            id: "s".into(),
            command: None,
            command_id: None,
            arguments: vec![],
            environment: IndexMap::new(),
            precedents: vec![],
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            description: None,
            use_system_environment: false,
            skipped: false,
            status: StepStatus::Init,
            captured_outputs: HashMap::new(),
        };
        assert!(!step.has_valid_command_shape());

        step.command = Some("echo hi".into());
        step.command_id = Some("tpl".into());
        assert!(!step.has_valid_command_shape());

        step.command_id = None;
        assert!(step.has_valid_command_shape());
    }

    #[test]
    fn resolve_against_prepends_template_args_and_step_wins_env() {
        let step = Step {
            id: "deploy".into(),
            command: None,
            command_id: Some("deploy-template".into()),
            arguments: vec!["--step-arg".into()],
            environment: IndexMap::from([(
                "REGION".to_string(),
                EnvVar {
                    name: "REGION".into(),
                    value: Some("eu-west-1".into()),
                    ..Default::default()
                },
            )]),
            precedents: vec![],
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            description: None,
            use_system_environment: false,
            skipped: false,
            status: StepStatus::Init,
            captured_outputs: HashMap::new(),
        };

        let resolved = step.resolve_against(&template("deploy-template"));

        assert_eq!(resolved.command, "deploy.sh");
        assert_eq!(resolved.arguments, vec!["--template-arg".to_string(), "--step-arg".to_string()]);
        let region = resolved.environment.get("REGION").expect("region var");
        assert_eq!(region.value.as_deref(), Some("eu-west-1"), "step value must win");
        assert_eq!(region.default_value.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn resolve_against_step_value_wins_over_template_value_on_collision() {
        let mut tpl = template("deploy-template");
        tpl.environment.insert(
            "REGION".to_string(),
            EnvVar {
                name: "REGION".into(),
                value: Some("template-region".into()),
                default_value: Some("us-east-1".into()),
                ..Default::default()
            },
        );

        let step = Step {
            id: "deploy".into(),
            command: None,
            command_id: Some("deploy-template".into()),
            arguments: vec![],
            environment: IndexMap::from([(
                "REGION".to_string(),
                EnvVar {
                    name: "REGION".into(),
                    value: Some("eu-west-1".into()),
                    ..Default::default()
                },
            )]),
            precedents: vec![],
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            description: None,
            use_system_environment: false,
            skipped: false,
            status: StepStatus::Init,
            captured_outputs: HashMap::new(),
        };

        let resolved = step.resolve_against(&tpl);
        let region = resolved.environment.get("REGION").expect("region var");
        assert_eq!(region.value.as_deref(), Some("eu-west-1"), "step value must win on a true collision");
        assert_eq!(region.default_value.as_deref(), Some("us-east-1"), "template default still fills in");
    }

    #[test]
    fn resolve_against_inherits_description_and_ors_system_environment() {
        let step = Step {
            id: "deploy".into(),
            command: None,
            command_id: Some("deploy-template".into()),
            arguments: vec![],
            environment: IndexMap::new(),
            precedents: vec![],
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            description: None,
            use_system_environment: true,
            skipped: false,
            status: StepStatus::Init,
            captured_outputs: HashMap::new(),
        };

        let mut tpl = template("deploy-template");
        tpl.use_system_environment = false;
        let resolved = step.resolve_against(&tpl);
        assert_eq!(resolved.description.as_deref(), Some("from template"));
        assert!(resolved.use_system_environment);
    }

    #[test]
    fn status_is_failure_covers_terminal_non_success_states() {
        assert!(StepStatus::RunError.is_failure());
        assert!(StepStatus::Error.is_failure());
        assert!(StepStatus::Skipped.is_failure());
        assert!(StepStatus::SkippedAfterFailure.is_failure());
        assert!(!StepStatus::Done.is_failure());
        assert!(!StepStatus::Ready.is_failure());
    }
}
