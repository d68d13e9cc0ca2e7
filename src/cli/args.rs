//! CLI argument structures

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::app::config::DEFAULT_LOG_FILE;
use crate::experiment::DEFAULT_EXPERIMENT_CONFIG;

/// Run convergence experiments across a cluster of worker machines
#[derive(Parser, Debug)]
#[command(name = "sqs")]
#[command(about = "sqs - deploy, launch and drive distributed simulation experiments", long_about = None)]
#[command(version, arg_required_else_help = true)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Append-only transcript of every command issued
    #[arg(long, value_name = "PATH", default_value = DEFAULT_LOG_FILE, global = true)]
    pub log_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install this machine's public key on every cluster machine
    Setup {
        /// Machine configuration: `<host> <user> <remote_dir> <worker_count>` per line
        machine_config: PathBuf,
    },

    /// Stop leftover workers on every cluster machine
    Kill {
        /// Machine configuration: `<host> <user> <remote_dir> <worker_count>` per line
        machine_config: PathBuf,
    },

    /// Mirror the current directory to every cluster machine
    Copy {
        /// Machine configuration: `<host> <user> <remote_dir> <worker_count>` per line
        machine_config: PathBuf,
    },

    /// Deploy, start workers, converge the master and dispatch slaves
    Run {
        /// Machine configuration: `<host> <user> <remote_dir> <worker_count>` per line
        machine_config: PathBuf,

        /// Experiment configuration
        #[arg(default_value = DEFAULT_EXPERIMENT_CONFIG)]
        experiment_config: PathBuf,
    },
}

impl Commands {
    pub fn machine_config(&self) -> &PathBuf {
        match self {
            Commands::Setup { machine_config }
            | Commands::Kill { machine_config }
            | Commands::Copy { machine_config }
            | Commands::Run { machine_config, .. } => machine_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults_experiment_config() {
        let cli = Cli::try_parse_from(["sqs", "run", "machines.cfg"]).unwrap();
        match cli.command {
            Commands::Run {
                machine_config,
                experiment_config,
            } => {
                assert_eq!(machine_config, PathBuf::from("machines.cfg"));
                assert_eq!(experiment_config, PathBuf::from("experiment.toml"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.log_file, PathBuf::from("sqs.log"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["sqs", "kill", "m.cfg", "-vv", "--log-file", "/tmp/x.log"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_file, PathBuf::from("/tmp/x.log"));
        assert_eq!(cli.command.machine_config(), &PathBuf::from("m.cfg"));
    }

    #[test]
    fn test_missing_machine_config_is_error() {
        assert!(Cli::try_parse_from(["sqs", "copy"]).is_err());
        assert!(Cli::try_parse_from(["sqs", "launch", "m.cfg"]).is_err());
    }
}
