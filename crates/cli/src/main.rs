//! cronman CLI - cron job orchestration.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use cronman_core::{Job, JobFilter, JobId};
use cronman_discovery::{Reconciler, ScanOptions};
use cronman_execution::{CommandSpawner, EngineConfig, ExecutionEngine, ExecutionError, JobOutcome, JobRunner};
use cronman_storage::{JsonStorage, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_CONFIG};

#[derive(Parser)]
#[command(name = "cronman")]
#[command(about = "Cron job orchestration with dependencies", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for new or deleted cron jobs
    Scan {
        /// Do not remove jobs that are no longer declared
        #[arg(long, short)]
        keep_deleted: bool,
        /// Create new jobs disabled
        #[arg(long, short)]
        default_disabled: bool,
    },
    /// Run every due job once and wait for them to finish
    Run,
    /// Execute one job in the foreground (used by `run`)
    Process {
        /// Job ID
        id: JobId,
    },
    /// Display the status of jobs
    Status {
        /// Only jobs carrying any of these tags
        #[arg(long, short, num_args = 1..)]
        tags: Vec<String>,
        /// Show dependency information
        #[arg(long, short = 'd')]
        show_dependencies: bool,
    },
    /// Disable jobs by command name or id
    Disable {
        /// Command name or job id
        job: String,
        /// Only jobs carrying any of these tags
        #[arg(long, short, num_args = 1..)]
        tags: Vec<String>,
    },
    /// Enable jobs by command name or id
    Enable {
        /// Command name or job id
        job: String,
        /// Only jobs carrying any of these tags
        #[arg(long, short, num_args = 1..)]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = Config::load(&config_path, cli.config.is_some())?;

    // Open storage
    let mut storage = JsonStorage::new(&config.settings.store).await?;

    match cli.command {
        Commands::Scan { keep_deleted, default_disabled } => {
            if config.path.is_none() {
                bail!("no configuration found at {}", config_path.display());
            }

            let registry = config.catalog.registry();
            let options = ScanOptions::default()
                .with_keep_deleted(keep_deleted)
                .with_default_disabled(default_disabled);
            let report = Reconciler::new()
                .with_options(options)
                .scan(&mut storage, &config.catalog, &registry)
                .await?;

            for command in &report.created {
                println!("Found new job: {}", command);
            }
            for command in &report.updated {
                println!("Updated job: {}", command);
            }
            for failed in &report.failed {
                println!("Invalid job {}: {}", failed.command, failed.reason);
            }
            for edge in &report.edges {
                println!("  \"{}\" depends on \"{}\"", edge.dependent, edge.dependency);
            }
            for unresolved in &report.unresolved {
                println!("Job \"{}\" depends on \"{}\" which was not found", unresolved.job, unresolved.reference);
            }
            for command in &report.deleted {
                println!("Deleted job: {}", command);
            }
            if report.cycles.is_empty() {
                println!("No circular dependencies found");
            } else {
                println!("Circular dependencies detected:");
                for cycle in &report.cycles {
                    println!("  {}", cycle);
                }
            }
        }
        Commands::Run => {
            let mut worker_args = Vec::new();
            if let Some(path) = &config.path {
                worker_args.push("--config".to_string());
                worker_args.push(path.display().to_string());
            }
            let spawner = CommandSpawner::new(std::env::current_exe()?)
                .with_args(worker_args)
                .with_timeout(config.settings.timeout());

            let mut engine = ExecutionEngine::new(storage, Box::new(spawner)).with_config(
                EngineConfig::default()
                    .with_poll_interval(config.settings.poll_interval())
                    .with_result_retention_hours(config.settings.result_retention_hours),
            );

            let report = engine.run_tick().await?;

            for job in &report.outcomes {
                match &job.outcome {
                    JobOutcome::DependenciesUnmet { reason } => {
                        println!("Skipping {}: {}", job.command, reason);
                    }
                    JobOutcome::DisabledByDependency { reason } => {
                        println!("Disabled {}: {}", job.command, reason);
                    }
                    JobOutcome::LaunchFailed(e) | JobOutcome::Failed(e) => {
                        println!("Failed {}: {}", job.command, e);
                    }
                    _ => {}
                }
            }
            for completion in &report.completions {
                let code = completion
                    .exit_code
                    .map_or_else(|| "killed".to_string(), |c| c.to_string());
                println!("{} finished ({})", completion.command, code);
            }
            info!(
                found = report.jobs_found,
                launched = report.launched(),
                pruned = report.results_pruned,
                "cron jobs finished"
            );
        }
        Commands::Process { id } => {
            let mut runner = JobRunner::new(storage);
            match runner.run(id).await {
                Ok(result) => {
                    if let Some(output) = &result.output {
                        print!("{}", output);
                    }
                    return Ok(u8::try_from(result.status_code).map_or(ExitCode::FAILURE, ExitCode::from));
                }
                Err(ExecutionError::JobNotFound(id)) => {
                    eprintln!("Job {} not found", id);
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Status { tags, show_dependencies } => {
            let filter = if tags.is_empty() {
                JobFilter::default()
            } else {
                JobFilter::with_tags(tags)
            };
            let jobs = storage.list_jobs(&filter).await?;
            let all = storage.list_jobs(&JobFilter::default()).await?;

            println!("Cronjobs ({})", jobs.len());
            for job in &jobs {
                print_status(job, &all, show_dependencies);
            }
        }
        Commands::Disable { job, tags } => {
            return set_enabled(&mut storage, &job, &tags, false).await;
        }
        Commands::Enable { job, tags } => {
            return set_enabled(&mut storage, &job, &tags, true).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_status(job: &Job, all: &[Job], show_dependencies: bool) {
    let id = job.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let next = if job.enabled {
        job.next_run.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        "Not scheduled".to_string()
    };
    let last = job
        .last_run_at
        .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());

    println!(
        "  {:>4} | {} | {} | next: {} | last: {} | {}",
        id,
        job.full_command(),
        job.tags.join(", "),
        next,
        last,
        if job.enabled { "enabled" } else { "disabled" },
    );

    if show_dependencies && !job.dependencies.is_empty() {
        let names: Vec<&str> = job
            .dependencies
            .iter()
            .filter_map(|dep| all.iter().find(|j| j.id == Some(*dep)))
            .map(|j| j.command.as_str())
            .collect();
        println!(
            "       depends on: {} (mode: {}, on failure: {})",
            names.join(", "),
            job.dependency_mode,
            job.on_dependency_failure,
        );
    }
}

async fn set_enabled<S: Storage>(storage: &mut S, needle: &str, tags: &[String], enabled: bool) -> Result<ExitCode> {
    let jobs = storage.find_by_command_or_id(needle, tags).await?;
    if jobs.is_empty() {
        eprintln!("Cronjob \"{}\" not found", needle);
        return Ok(ExitCode::FAILURE);
    }

    for mut job in jobs {
        if enabled {
            job.enable();
        } else {
            job.disable();
        }
        storage.save_job(&mut job).await?;
        println!(
            "Cronjob \"{}\" {}",
            job.full_command(),
            if enabled { "enabled" } else { "disabled" }
        );
    }

    Ok(ExitCode::SUCCESS)
}
