use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use csm_orc::config::Config;
use csm_orc::library::Library;
use csm_orc::orchestrator::{Orchestrator, RunRequest};

#[derive(Parser)]
#[command(name = "csm-orc", about = "DAG-based step orchestrator for declarative shell pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every step of a pipeline file.
    Run {
        pipeline: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long = "skip")]
        skipped_steps: Vec<String>,
        #[arg(long)]
        ignore_errors: bool,
        #[arg(long)]
        no_exit_handlers: bool,
    },
    /// Load and validate a pipeline file without running anything.
    Validate { pipeline: PathBuf },
    /// Print every environment variable a pipeline references and how it
    /// would resolve.
    ShowEnv { pipeline: PathBuf },
    /// Write a `.env`-style file covering every variable a pipeline
    /// references.
    GenEnv { pipeline: PathBuf, output: PathBuf },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    csm_orc::init_tracing();

    let config = Config::load()?;
    let mut library = Library::with_plugin_root(config.plugin_root.clone());
    library.reload();
    let mut orchestrator = Orchestrator::new(library);

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            pipeline,
            dry_run,
            skipped_steps,
            ignore_errors,
            no_exit_handlers,
        } => {
            let request = RunRequest {
                dry_run,
                skipped_steps,
                ignore_errors,
                run_exit_handlers: config.run_exit_handlers && !no_exit_handlers,
            };
            let report = orchestrator.run(&pipeline, request).await?;
            for (id, outcome) in &report.results {
                println!("{id}: {:?}", outcome.status);
            }
            Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Validate { pipeline } => {
            orchestrator.validate(&pipeline)?;
            println!("pipeline is valid");
            Ok(ExitCode::SUCCESS)
        }
        Command::ShowEnv { pipeline } => {
            let entries = orchestrator.display_environment(&pipeline)?;
            for entry in entries {
                println!(
                    "{}.{} = {} (required: {})",
                    entry.step,
                    entry.name,
                    entry.effective_value.as_deref().unwrap_or("<unresolved>"),
                    entry.required
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::GenEnv { pipeline, output } => {
            orchestrator.generate_env_file(&pipeline, &output)?;
            println!("wrote {}", output.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}
