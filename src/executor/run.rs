//! Spawns a single step's subprocess and streams its output.

use std::collections::HashMap;
use std::io::Write as _;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sentinel::parse_output_data_line;
use crate::step::ResolvedStep;

/// What happened when a step's subprocess ran to completion or was
/// cancelled.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub captured_outputs: HashMap<String, String>,
    pub cancelled: bool,
}

/// Runs `resolved` as a transient shell script with `env`, streaming its
/// stdout and stderr concurrently and capturing any `CSM-OUTPUT-DATA:` lines
/// it emits on stdout. The protocol is stdout-only: a sentinel line on
/// stderr is logged verbatim like any other stderr output, never captured.
///
/// The script file is removed on every exit path, including cancellation,
/// since `NamedTempFile` deletes on drop.
pub async fn run_step(resolved: &ResolvedStep, env: HashMap<String, String>, cancellation: CancellationToken) -> Result<ExecutionOutcome> {
    let script = write_script(resolved).context("writing step script")?;

    let mut command = Command::new("/bin/sh");
    command.arg(script.path());
    command.envs(&env);
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().context("spawning step process")?;
    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let captured_outputs = std::sync::Arc::new(std::sync::Mutex::new(HashMap::new()));

    let stdout_task = stream_lines(stdout, captured_outputs.clone(), false);
    let stderr_task = stream_lines(stderr, captured_outputs.clone(), true);

    tokio::select! {
        _ = cancellation.cancelled() => {
            terminate(&mut child).await;
            Ok(ExecutionOutcome {
                succeeded: false,
                captured_outputs: std::sync::Arc::try_unwrap(captured_outputs).map(|m| m.into_inner().unwrap()).unwrap_or_default(),
                cancelled: true,
            })
        }
        result = run_to_completion(&mut child, stdout_task, stderr_task) => {
            let succeeded = result?;
            Ok(ExecutionOutcome {
                succeeded,
                captured_outputs: std::sync::Arc::try_unwrap(captured_outputs).map(|m| m.into_inner().unwrap()).unwrap_or_default(),
                cancelled: false,
            })
        }
    }
}

async fn run_to_completion(
    child: &mut tokio::process::Child,
    stdout_task: tokio::task::JoinHandle<()>,
    stderr_task: tokio::task::JoinHandle<()>,
) -> Result<bool> {
    let (status, _, _) = tokio::try_join!(
        async { child.wait().await.context("waiting on step process") },
        async { stdout_task.await.context("joining stdout reader") },
        async { stderr_task.await.context("joining stderr reader") },
    )?;
    Ok(status.success())
}

fn stream_lines(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    captured_outputs: std::sync::Arc<std::sync::Mutex<HashMap<String, String>>>,
    is_stderr: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if is_stderr {
                        warn!(target: "step", "{line}");
                    } else if let Some((name, value)) = parse_output_data_line(&line) {
                        captured_outputs.lock().expect("captured_outputs mutex poisoned").insert(name, value);
                    } else {
                        info!(target: "step", "{line}");
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(%error, "error reading step output stream");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
async fn terminate(child: &mut tokio::process::Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let pgid = Pid::from_raw(pid as i32);
        let _ = signal::killpg(pgid, Signal::SIGTERM);
    }
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut tokio::process::Child) {
    let _ = child.kill().await;
}

/// Writes the step's transient shell script: the bare `command` token
/// followed by each `arguments` entry double-quoted, matching the source
/// system's historical argument-passing convention (no further escaping).
fn write_script(resolved: &ResolvedStep) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("csm-orc-step-").suffix(".sh").tempfile()?;

    writeln!(file, "#!/bin/sh")?;
    writeln!(file, "set -e")?;
    write!(file, "exec {}", resolved.command)?;
    for argument in &resolved.arguments {
        write!(file, " \"{argument}\"")?;
    }
    writeln!(file)?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = file.path().metadata()?.permissions();
        permissions.set_mode(0o700);
        std::fs::set_permissions(file.path(), permissions)?;
    }

    Ok(file)
}
