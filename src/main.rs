use clap::Parser;
use sqs_cluster::app::{handle_fatal_error, init_logging, AppConfig};
use sqs_cluster::cli::{execute_command, Cli};
use tracing::debug;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too; clap knows which is which.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let config = match AppConfig::new(cli.verbose, &cli.log_file) {
        Ok(config) => config,
        Err(e) => handle_fatal_error(e, cli.verbose, None),
    };
    let log_path = config.log_path();

    let transcript = match init_logging(&config) {
        Ok(()) => Some(log_path.as_path()),
        Err(e) => {
            eprintln!(
                "Warning: cannot open log file {}: {}",
                log_path.display(),
                e
            );
            None
        }
    };
    debug!("Executing {:?}", cli.command);

    if let Err(e) = execute_command(cli.command, &config).await {
        handle_fatal_error(e, config.verbose, transcript);
    }
}
