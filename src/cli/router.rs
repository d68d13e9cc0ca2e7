//! Command routing and execution
//!
//! Each subcommand has a `*_command` function taking its collaborators
//! explicitly, so tests can drive it with mock processes and a mock engine.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::app::AppConfig;
use crate::cli::args::Commands;
use crate::cluster::{self, ClusterSession, ClusterSettings, MachineRegistry};
use crate::coordinator::display::show_machine_list;
use crate::coordinator::{Coordinator, RunSummary};
use crate::credentials::{
    default_ssh_dir, ensure_key_pair, AuthOutcome, CredentialBootstrapper, PtyChannelFactory,
    TerminalOperator,
};
use crate::engine::{ProcessEngine, SimulationEngine};
use crate::experiment::{ExperimentConfig, DEFAULT_EXPERIMENT_CONFIG};
use crate::subprocess::SubprocessManager;

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands, config: &AppConfig) -> Result<()> {
    let subprocess = SubprocessManager::production();

    match command {
        Commands::Setup { machine_config } => {
            setup_command(config, &machine_config, &subprocess).await?;
        }
        Commands::Kill { machine_config } => {
            kill_command(config, &machine_config, &subprocess).await?;
        }
        Commands::Copy { machine_config } => {
            copy_command(config, &machine_config, &subprocess).await?;
        }
        Commands::Run {
            machine_config,
            experiment_config,
        } => {
            let experiment = ExperimentConfig::load(&experiment_config)
                .with_context(|| format!("loading {}", experiment_config.display()))?;
            let engine = ProcessEngine::new(experiment.engine.clone());
            let summary =
                run_command(config, &machine_config, &experiment, &subprocess, &engine).await?;
            println!(
                "\nRun complete: {} slave experiment(s) dispatched to {} machine(s)",
                summary.slaves_dispatched, summary.machines
            );
        }
    }
    Ok(())
}

fn open_session(
    config: &AppConfig,
    machine_config: &Path,
    settings: ClusterSettings,
) -> Result<ClusterSession> {
    let registry = MachineRegistry::parse(machine_config)?;
    registry.require_machines()?;
    show_machine_list(&registry);
    Ok(ClusterSession::new(registry, settings, config.log_path())?)
}

/// `[timing]`/`[workers]` from `experiment.toml` in the working directory.
fn standalone_settings(config: &AppConfig) -> Result<ClusterSettings> {
    let path = config.working_dir.join(DEFAULT_EXPERIMENT_CONFIG);
    Ok(ClusterSettings::load_or_default(&path)?)
}

pub async fn setup_command(
    config: &AppConfig,
    machine_config: &Path,
    subprocess: &SubprocessManager,
) -> Result<Vec<AuthOutcome>> {
    let mut session = open_session(config, machine_config, ClusterSettings::default())?;

    let ssh_dir = default_ssh_dir()?;
    let public_key = ensure_key_pair(subprocess.runner().as_ref(), &ssh_dir).await?;

    let bootstrapper = CredentialBootstrapper::new(
        Arc::new(PtyChannelFactory::default()),
        Arc::new(TerminalOperator),
    );
    let outcomes = bootstrapper.ensure_access(&mut session, &public_key).await?;
    session.teardown();

    println!("Passwordless access ready on {} machine(s)", outcomes.len());
    Ok(outcomes)
}

pub async fn kill_command(
    config: &AppConfig,
    machine_config: &Path,
    subprocess: &SubprocessManager,
) -> Result<cluster::CleanupReport> {
    let settings = standalone_settings(config)?;
    let mut session = open_session(config, machine_config, settings)?;

    let report = cluster::cleanup(&mut session, &subprocess.ssh()).await;
    session.teardown();

    println!(
        "Stopped workers on {}/{} machine(s)",
        report.succeeded(),
        report.attempted
    );
    Ok(report)
}

pub async fn copy_command(
    config: &AppConfig,
    machine_config: &Path,
    subprocess: &SubprocessManager,
) -> Result<Vec<cluster::DeployOutcome>> {
    let settings = standalone_settings(config)?;
    let mut session = open_session(config, machine_config, settings)?;

    let outcomes = cluster::deploy(&session, &subprocess.ssh(), &config.working_dir).await?;
    session.teardown();

    println!("Copied {} to {} machine(s)", config.working_dir.display(), outcomes.len());
    Ok(outcomes)
}

pub async fn run_command(
    config: &AppConfig,
    machine_config: &Path,
    experiment: &ExperimentConfig,
    subprocess: &SubprocessManager,
    engine: &dyn SimulationEngine,
) -> Result<RunSummary> {
    let mut session = open_session(config, machine_config, experiment.cluster_settings())?;
    let shell = subprocess.ssh();
    let master = experiment.master_experiment();

    let summary = Coordinator::new(&mut session, &shell, engine)
        .run(&config.working_dir, &master)
        .await?;
    Ok(summary)
}
