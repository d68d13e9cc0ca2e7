use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::cluster::{CleanupReport, MachineRegistry};
use crate::engine::{CalibrationValues, ExperimentResult, ExperimentStatSpec};

pub struct ProgressSpinner {
    bar: ProgressBar,
}

impl ProgressSpinner {
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");
        bar.set_style(style);
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    pub fn success(self, message: &str) {
        self.bar.finish_with_message(format!("✓ {}", message));
    }

    pub fn error(self, message: &str) {
        self.bar.finish_with_message(format!("✗ {}", message));
    }
}

pub fn show_machine_list(registry: &MachineRegistry) {
    println!("Machine List ({}):", registry.origin());
    for (index, machine) in registry.iter().enumerate() {
        println!(
            "  [{}] {} {} {} workers={}",
            index,
            machine.host,
            machine.user,
            machine.remote_dir.display(),
            machine.worker_count
        );
    }
}

pub fn show_phase(message: &str) {
    println!("\n{}", message);
}

pub fn show_cleanup(report: &CleanupReport) {
    if report.is_clean() {
        println!("  ✓ Stopped stale workers on {} machine(s)", report.attempted);
    } else {
        println!(
            "  ! Cleanup failed on {} of {} machine(s), continuing",
            report.failures.len(),
            report.attempted
        );
    }
}

pub fn show_calibration(calibration: &CalibrationValues) {
    for entry in calibration.entries() {
        println!(
            "  {} boundaries: {} value(s)",
            entry.stat,
            entry.boundaries.len()
        );
    }
}

/// One line per tracked statistic: converged mean and the target quantile.
pub fn format_convergence(specs: &[ExperimentStatSpec], result: &ExperimentResult) -> Vec<String> {
    specs
        .iter()
        .filter_map(|spec| result.stat(spec.stat).map(|summary| (spec, summary)))
        .map(|(spec, summary)| {
            let quantile = summary
                .quantile(spec.quantile)
                .map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
            format!(
                "{} mean={:.4} q{}={}{}",
                spec.stat,
                summary.mean,
                spec.quantile,
                quantile,
                if summary.converged { "" } else { " (not converged)" }
            )
        })
        .collect()
}

pub fn show_convergence(specs: &[ExperimentStatSpec], result: &ExperimentResult) {
    for line in format_convergence(specs, result) {
        tracing::info!("Master {}", line);
        println!("  {}", line);
    }
}
