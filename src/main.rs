mod args;
mod chain;
mod cli;
mod config;
mod error;
mod executor;
mod job;
mod retry;
mod runner;
mod scheduler;
#[cfg(test)]
mod testing;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::{ArgumentResolver, CalculatorRegistry};
use chain::{AbiStore, ChainClient, RpcChainClient};
use cli::{Cli, Command};
use config::{LogFormat, Settings};
use error::SchedulerError;
use executor::TransactionExecutor;
use job::{Job, JobResult};
use runner::JobRunner;
use scheduler::Scheduler;
use ui::RunProgress;

#[tokio::main]
async fn main() -> ExitCode {
    // `.env` é opcional.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(settings: &Settings, verbose: bool) {
    let fallback = if verbose { "debug" } else { settings.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match settings.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Simple => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (settings, loaded) = config::load(&cli.config)?;
    init_tracing(&settings, cli.verbose);

    for (name, error) in &loaded.rejected {
        warn!(job = %name, error = %error, "Job rejected");
    }

    match cli.command {
        Command::Validate => {
            ui::print_loaded(&loaded);
            Ok(if loaded.rejected.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Calculators => {
            let registry = CalculatorRegistry::with_builtins();
            let calculators: Vec<(&str, usize)> = registry
                .names()
                .into_iter()
                .filter_map(|name| registry.get(name).map(|c| (name, c.arity())))
                .collect();
            ui::print_calculators(&calculators);
            Ok(ExitCode::SUCCESS)
        }

        Command::Run {
            once,
            interval,
            jobs,
            dry_run,
        } => {
            let jobs = select_jobs(loaded.jobs, &jobs)?;
            if jobs.is_empty() {
                return Err(SchedulerError::NoJobs(cli.config.display().to_string()).into());
            }
            if dry_run {
                ui::print_plan(&jobs);
                return Ok(ExitCode::SUCCESS);
            }

            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_on_signal(cancel.clone()));
            let scheduler = build_scheduler(&settings, jobs, Duration::from_secs(interval), cancel)?;

            if once {
                let progress = RunProgress::start(&format!("Running {} job(s)", scheduler.jobs().len()));
                let results = scheduler.run_once().await;
                for result in &results {
                    progress.report(result);
                }
                progress.finish();
                if cli.verbose {
                    for result in &results {
                        progress.print_result(result);
                    }
                }
                Ok(if results.iter().all(JobResult::is_success) {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            } else {
                scheduler.run().await;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

/// Filtra pelos nomes pedidos em `--job`; lista vazia mantém todos.
fn select_jobs(jobs: Vec<Job>, names: &[String]) -> Result<Vec<Job>, SchedulerError> {
    if names.is_empty() {
        return Ok(jobs);
    }
    if let Some(missing) = names.iter().find(|name| !jobs.iter().any(|j| &j.name == *name)) {
        return Err(SchedulerError::JobNotFound(missing.clone()));
    }
    Ok(jobs.into_iter().filter(|j| names.contains(&j.name)).collect())
}

fn build_scheduler(
    settings: &Settings,
    jobs: Vec<Job>,
    tick: Duration,
    cancel: CancellationToken,
) -> Result<Scheduler> {
    let rpc = settings.rpc_settings()?;
    let networks = rpc.endpoints.len();
    let sender = rpc.signing.sender();
    let client: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(rpc)?);
    info!(
        networks,
        %sender,
        signing = ?settings.signing_mode,
        abi_dir = %settings.abi_dir.display(),
        "Chain client ready"
    );

    let resolver = ArgumentResolver::new(Arc::new(CalculatorRegistry::with_builtins()), Arc::clone(&client));
    let executor = TransactionExecutor::new(
        client,
        AbiStore::new(&settings.abi_dir),
        settings.confirmation_timeout(),
    );
    let runner = JobRunner::new(resolver, executor, settings.default_retry(), cancel.clone());
    Ok(Scheduler::new(Arc::new(runner), jobs, tick, cancel))
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received, finishing in-flight work");
    cancel.cancel();
}
