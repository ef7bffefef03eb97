//! Drives a loaded [`crate::loader::Pipeline`] to completion: one Tokio task
//! per step, synchronized through `watch` channels on each precedent edge so
//! a step only starts once every precedent has posted its outcome.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::env_var::EnvVar;
use crate::executor::{self};
use crate::library::Library;
use crate::loader::Pipeline;
use crate::step::{Step, StepStatus};

/// The outcome one finished step posts for its dependents to observe.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub captured_outputs: HashMap<String, String>,
}

/// Options controlling one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

/// Runs every step in `pipeline` to completion, respecting precedent order
/// while letting independent steps run concurrently.
///
/// Returns the final status and captured outputs of every step, keyed by
/// id. `cancellation` is observed by every in-flight step; cancelling it
/// mid-run stops newly eligible steps from starting and asks running ones
/// to terminate.
pub async fn run_pipeline(pipeline: &Pipeline, options: RunOptions, cancellation: CancellationToken) -> HashMap<String, StepOutcome> {
    let process_env: Arc<HashMap<String, String>> = Arc::new(std::env::vars().collect());

    let mut senders = HashMap::new();
    let mut receivers = HashMap::new();
    for id in pipeline.steps.keys() {
        let (tx, rx) = watch::channel::<Option<StepOutcome>>(None);
        senders.insert(id.clone(), tx);
        receivers.insert(id.clone(), rx);
    }

    let mut handles = Vec::new();
    for step in pipeline.steps.values() {
        let step = step.clone();
        let resolved = pipeline.resolved.get(&step.id).expect("every step resolved").clone();
        let precedent_receivers: Vec<(String, watch::Receiver<Option<StepOutcome>>)> = step
            .precedents
            .iter()
            .map(|id| (id.clone(), receivers.get(id).expect("precedent channel exists").clone()))
            .collect();
        let sender = senders.get(&step.id).expect("own channel exists").clone();
        let process_env = process_env.clone();
        let cancellation = cancellation.clone();
        let dry_run = options.dry_run;

        handles.push(tokio::spawn(async move {
            let outcome = run_one_step(&step, &resolved, precedent_receivers, &process_env, dry_run, cancellation).await;
            let _ = sender.send(Some(outcome));
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    receivers
        .into_iter()
        .map(|(id, rx)| {
            let outcome = rx
                .borrow()
                .clone()
                .unwrap_or(StepOutcome {
                    status: StepStatus::RunError,
                    captured_outputs: HashMap::new(),
                });
            (id, outcome)
        })
        .collect()
}

async fn run_one_step(
    step: &Step,
    resolved: &crate::step::ResolvedStep,
    mut precedent_receivers: Vec<(String, watch::Receiver<Option<StepOutcome>>)>,
    process_env: &HashMap<String, String>,
    dry_run: bool,
    cancellation: CancellationToken,
) -> StepOutcome {
    let mut precedent_outputs = HashMap::new();
    let mut any_precedent_failed = false;

    for (id, rx) in &mut precedent_receivers {
        let outcome = wait_for_outcome(rx).await;
        if outcome.status.is_failure() {
            any_precedent_failed = true;
        }
        precedent_outputs.insert(id.clone(), outcome.captured_outputs.clone());
    }

    if cancellation.is_cancelled() {
        return StepOutcome {
            status: StepStatus::SkippedAfterFailure,
            captured_outputs: HashMap::new(),
        };
    }

    if step.skipped {
        info!(step = %step.id, "step skipped by request");
        return StepOutcome {
            status: StepStatus::Done,
            captured_outputs: HashMap::new(),
        };
    }

    if any_precedent_failed {
        warn!(step = %step.id, "skipping step because a precedent did not complete successfully");
        return StepOutcome {
            status: StepStatus::SkippedAfterFailure,
            captured_outputs: HashMap::new(),
        };
    }

    match executor::execute_step(step, resolved, &precedent_outputs, process_env, dry_run, cancellation).await {
        Ok(result) => StepOutcome {
            status: result.status,
            captured_outputs: result.captured_outputs,
        },
        Err(error) => {
            warn!(step = %step.id, %error, "step execution errored");
            StepOutcome {
                status: StepStatus::RunError,
                captured_outputs: HashMap::new(),
            }
        }
    }
}

async fn wait_for_outcome(rx: &mut watch::Receiver<Option<StepOutcome>>) -> StepOutcome {
    loop {
        if let Some(outcome) = rx.borrow().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return StepOutcome {
                status: StepStatus::RunError,
                captured_outputs: HashMap::new(),
            };
        }
    }
}

/// Synthesizes and runs exit handlers in `library`'s registration order,
/// each receiving `CSM_ORC_IS_SUCCESS` reflecting whether the run succeeded.
pub async fn run_exit_handlers(library: &Library, run_succeeded: bool) {
    let process_env: HashMap<String, String> = std::env::vars().collect();

    for handler_id in library.list_exit_commands() {
        let Some(template) = library.find_by_name(handler_id) else {
            continue;
        };
        let mut environment = template.environment.clone();
        environment.insert(
            "CSM_ORC_IS_SUCCESS".to_string(),
            EnvVar {
                name: "CSM_ORC_IS_SUCCESS".into(),
                value: Some(run_succeeded.to_string()),
                ..Default::default()
            },
        );
        let resolved = crate::step::ResolvedStep {
            command: template.command.clone(),
            arguments: template.arguments.clone(),
            environment,
            use_system_environment: template.use_system_environment,
            description: template.description.clone(),
        };
        let env = executor::effective_env(&resolved.environment, resolved.use_system_environment, &process_env);
        match executor::run_step(&resolved, env, CancellationToken::new()).await {
            Ok(outcome) if outcome.succeeded => info!(handler = %handler_id, "exit handler completed"),
            Ok(_) => warn!(handler = %handler_id, "exit handler exited non-zero"),
            Err(error) => warn!(handler = %handler_id, %error, "exit handler failed to run"),
        }
    }
}
