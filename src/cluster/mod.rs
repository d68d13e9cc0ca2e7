//! Cluster side of the orchestrator: which machines exist, how the
//! simulation tree gets onto them, and how worker stacks are stopped and
//! started.

pub mod cleanup;
pub mod deploy;
pub mod launcher;
pub mod registry;
pub mod script;
pub mod session;
pub mod settings;

pub use cleanup::{cleanup, render_stop_script, CleanupReport};
pub use deploy::{deploy, DeployOutcome};
pub use launcher::launch_all;
pub use registry::{MachineEntry, MachineRegistry};
pub use script::LaunchScriptBuilder;
pub use session::ClusterSession;
pub use settings::{ClusterSettings, TimingSettings, WorkerSettings};
