//! Two-phase convergence run
//!
//! The coordinator drives one `sqs run`: deploy and clean the cluster, start
//! the worker stacks, let a local master experiment converge, then hand one
//! calibrated slave experiment per worker slot to the engine. Every step is
//! recorded as a [`CoordinatorState`] transition; any error moves the run to
//! `Failed`, shuts the engine down (once) and tears the session down.

pub mod display;
pub mod state;


pub use state::{CoordinatorState, IllegalTransition};

use std::path::Path;

use crate::cluster::{
    cleanup, deploy, launch_all, CleanupReport, ClusterSession, DeployOutcome,
    LaunchScriptBuilder,
};
use crate::engine::{CalibrationValues, Experiment, SimulationEngine};
use crate::error::Result;
use crate::subprocess::RemoteShell;
use display::ProgressSpinner;

#[derive(Debug)]
pub struct RunSummary {
    pub machines: usize,
    pub slaves_dispatched: usize,
    pub calibration: CalibrationValues,
    pub states: Vec<CoordinatorState>,
    pub deploy: Vec<DeployOutcome>,
    pub cleanup: CleanupReport,
}

/// One slave per worker slot, all carrying the same calibration.
pub fn build_slave_experiments(
    master: &Experiment,
    calibration: &CalibrationValues,
    count: usize,
) -> Vec<Experiment> {
    (0..count)
        .map(|index| Experiment::slave(master, calibration, index))
        .collect()
}

pub struct Coordinator<'a> {
    session: &'a mut ClusterSession,
    shell: &'a dyn RemoteShell,
    engine: &'a dyn SimulationEngine,
    state: CoordinatorState,
    history: Vec<CoordinatorState>,
    engine_stopped: bool,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        session: &'a mut ClusterSession,
        shell: &'a dyn RemoteShell,
        engine: &'a dyn SimulationEngine,
    ) -> Self {
        Self {
            session,
            shell,
            engine,
            state: CoordinatorState::Idle,
            history: vec![CoordinatorState::Idle],
            engine_stopped: false,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn history(&self) -> &[CoordinatorState] {
        &self.history
    }

    fn advance(&mut self, next: CoordinatorState) -> Result<()> {
        self.state = self.state.advance(next)?;
        self.history.push(next);
        tracing::info!("Run state: {}", next);
        Ok(())
    }

    pub async fn run(&mut self, local_root: &Path, master: &Experiment) -> Result<RunSummary> {
        match self.drive(local_root, master).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tracing::error!("Run failed while {}: {}", self.state, e);
                if self.state.can_advance(CoordinatorState::Failed) {
                    self.state = CoordinatorState::Failed;
                    self.history.push(CoordinatorState::Failed);
                }
                if !self.engine_stopped {
                    self.engine_stopped = true;
                    if let Err(shutdown) = self.engine.shutdown().await {
                        tracing::warn!("Engine shutdown after failure also failed: {}", shutdown);
                    }
                }
                self.session.teardown();
                Err(e)
            }
        }
    }

    async fn drive(&mut self, local_root: &Path, master: &Experiment) -> Result<RunSummary> {
        self.session.registry().require_machines()?;
        let builder = LaunchScriptBuilder::new(&self.session.settings().workers)?;
        let timing = self.session.settings().timing.clone();

        display::show_phase("Deploying simulation tree");
        let deployed = deploy(&*self.session, self.shell, local_root).await?;
        let cleaned = cleanup(&mut *self.session, self.shell).await;
        display::show_cleanup(&cleaned);
        self.advance(CoordinatorState::DeployedAndClean)?;

        display::show_phase("Starting workers");
        launch_all(&mut *self.session, self.shell, &builder).await?;

        self.advance(CoordinatorState::MasterRunning)?;
        let spinner = ProgressSpinner::new(&format!("Running master experiment {:?}", master.name));
        let result = match self.engine.run(master).await {
            Ok(result) => {
                spinner.success("Master experiment converged");
                result
            }
            Err(e) => {
                spinner.error("Master experiment failed");
                return Err(e.into());
            }
        };

        let calibration = CalibrationValues::extract(&master.stat_specs, &result)?;
        self.advance(CoordinatorState::Converged)?;
        display::show_convergence(&master.stat_specs, &result);
        display::show_calibration(&calibration);

        let workers = self
            .session
            .registry()
            .worker_endpoints(&self.session.settings().workers.binding_prefix);
        let slaves = build_slave_experiments(master, &calibration, workers.len());
        tracing::info!(
            "Dispatching {} slave experiment(s) to {} machine(s)",
            slaves.len(),
            self.session.registry().len()
        );
        let receipt = self.engine.run_batch(&slaves, &workers).await?;
        if receipt.accepted != slaves.len() {
            tracing::warn!(
                "Engine accepted {} of {} slave experiments",
                receipt.accepted,
                slaves.len()
            );
        }
        self.advance(CoordinatorState::SlavesDispatched)?;

        self.advance(CoordinatorState::Settling)?;
        display::show_phase(&format!(
            "Slaves dispatched, waiting {:?} before exit",
            timing.slave_grace
        ));
        tokio::time::sleep(timing.slave_grace).await;

        self.session.teardown();
        self.engine_stopped = true;
        self.engine.shutdown().await?;
        self.advance(CoordinatorState::Done)?;

        Ok(RunSummary {
            machines: self.session.registry().len(),
            slaves_dispatched: slaves.len(),
            calibration,
            states: self.history.clone(),
            deploy: deployed,
            cleanup: cleaned,
        })
    }
}
