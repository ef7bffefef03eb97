//! Turns a loaded [`crate::step::Step`] into a completed run: composes its
//! environment, binds its inputs, spawns its subprocess, and records its
//! resulting status and captured outputs.

mod env;
mod input_binding;
mod run;
mod sentinel;

pub use env::effective_env;
pub use input_binding::{bind_inputs, MissingInput};
pub use run::{run_step, ExecutionOutcome};
pub use sentinel::parse_output_data_line;

use std::collections::HashMap;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::step::{ResolvedStep, Step, StepStatus};

/// The full result of executing one step: its final status plus whatever it
/// captured, ready to be forwarded to dependents as precedent output.
#[derive(Debug)]
pub struct StepRunResult {
    pub status: StepStatus,
    pub captured_outputs: HashMap<String, String>,
}

/// Executes `step` (already resolved against its template, if any) to
/// completion.
///
/// `precedent_outputs` supplies every precedent's captured outputs for
/// input binding; a required, unresolvable input produces `RunError`
/// without spawning a process. `dry_run` short-circuits before spawning and
/// returns `DryRun` with no captured outputs.
pub async fn execute_step(
    step: &Step,
    resolved: &ResolvedStep,
    precedent_outputs: &HashMap<String, HashMap<String, String>>,
    process_env: &HashMap<String, String>,
    dry_run: bool,
    cancellation: CancellationToken,
) -> Result<StepRunResult> {
    let (bound_inputs, missing_inputs) = bind_inputs(step, precedent_outputs);
    if !missing_inputs.is_empty() {
        for missing in &missing_inputs {
            warn!(
                step = %missing.step,
                input = %missing.input,
                precedent = %missing.precedent,
                output = %missing.output,
                "required input has no bound value"
            );
        }
        return Ok(StepRunResult {
            status: StepStatus::RunError,
            captured_outputs: HashMap::new(),
        });
    }

    if dry_run {
        info!(step = %step.id, "dry run: skipping subprocess spawn");
        return Ok(StepRunResult {
            status: StepStatus::DryRun,
            captured_outputs: HashMap::new(),
        });
    }

    let mut env = effective_env(&resolved.environment, resolved.use_system_environment, process_env);
    env.extend(bound_inputs);

    let outcome = run_step(resolved, env, cancellation).await?;

    let status = if outcome.cancelled {
        StepStatus::RunError
    } else if outcome.succeeded {
        StepStatus::Done
    } else {
        StepStatus::RunError
    };

    Ok(StepRunResult {
        status,
        captured_outputs: outcome.captured_outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn step(id: &str) -> Step {
        Step {
            id: id.to_string(),
            command: Some("echo".into()),
            command_id: None,
            arguments: vec!["CSM-OUTPUT-DATA:value:42".into()],
            environment: IndexMap::new(),
            precedents: vec![],
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            description: None,
            use_system_environment: false,
            skipped: false,
            status: StepStatus::Init,
            captured_outputs: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn execute_step_captures_output_and_marks_done() {
        let s = step("producer");
        let resolved = s.resolve_inline();
        let result = execute_step(&s, &resolved, &HashMap::new(), &HashMap::new(), false, CancellationToken::new())
            .await
            .expect("execute");
        assert_eq!(result.status, StepStatus::Done);
        assert_eq!(result.captured_outputs.get("value").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn execute_step_dry_run_never_spawns() {
        let s = step("producer");
        let resolved = s.resolve_inline();
        let result = execute_step(&s, &resolved, &HashMap::new(), &HashMap::new(), true, CancellationToken::new())
            .await
            .expect("execute");
        assert_eq!(result.status, StepStatus::DryRun);
        assert!(result.captured_outputs.is_empty());
    }

    #[tokio::test]
    async fn execute_step_run_error_when_required_input_missing() {
        use crate::step::InputSpec;

        let mut s = step("consumer");
        s.precedents.push("producer".into());
        s.inputs.insert(
            "artifact".into(),
            InputSpec {
                as_env: "ARTIFACT_PATH".into(),
                step_id: "producer".into(),
                output: "path".into(),
                optional: false,
                default_value: None,
            },
        );
        let resolved = s.resolve_inline();
        let result = execute_step(&s, &resolved, &HashMap::new(), &HashMap::new(), false, CancellationToken::new())
            .await
            .expect("execute");
        assert_eq!(result.status, StepStatus::RunError);
    }
}
