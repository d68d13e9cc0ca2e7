use tera::{Context, Tera};

use super::registry::MachineEntry;
use super::settings::WorkerSettings;
use crate::error::{Result, SqsError};

const WORKER_TEMPLATE: &str = "worker";
const SHEBANG: &str = "#!/bin/bash\n\n";

/// Renders the per-machine launch script.
///
/// The script starts the lookup service once, then one background worker per
/// slot, each bound under a distinct name. Output depends only on the machine
/// entry, its index and the worker settings.
pub struct LaunchScriptBuilder {
    tera: Tera,
    settings: WorkerSettings,
}

impl LaunchScriptBuilder {
    pub fn new(settings: &WorkerSettings) -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(WORKER_TEMPLATE, &settings.worker_command)
            .map_err(|e| {
                SqsError::invalid_experiment(
                    "[workers].worker_command",
                    format!("template does not compile: {e}"),
                )
            })?;

        let builder = Self {
            tera,
            settings: settings.clone(),
        };
        builder.check_slots_are_distinct()?;
        Ok(builder)
    }

    /// Every worker on a machine must start under its own name, otherwise the
    /// endpoints handed to the engine point at workers that never registered.
    fn check_slots_are_distinct(&self) -> Result<()> {
        let machine = MachineEntry::new("host", "user", "/dir", 2);
        let first = self.render_worker(&machine, 0, 0)?;
        let second = self.render_worker(&machine, 0, 1)?;
        if first == second {
            return Err(SqsError::invalid_experiment(
                "[workers].worker_command",
                "template renders the same command for every slot; \
                 use {{ binding }} or {{ index }}",
            ));
        }
        Ok(())
    }

    fn render_worker(&self, machine: &MachineEntry, index: usize, slot: u32) -> Result<String> {
        let binding = self.binding(slot);
        let mut context = Context::new();
        context.insert("workdir", &machine.workdir());
        context.insert("binding", &binding);
        context.insert("index", &slot);
        context.insert("machine_index", &index);
        context.insert("host", &machine.host);
        context.insert("user", &machine.user);

        let command = self
            .tera
            .render(WORKER_TEMPLATE, &context)
            .map_err(|e| {
                SqsError::invalid_experiment(
                    "[workers].worker_command",
                    format!("cannot render for {binding}: {e}"),
                )
            })?;
        Ok(command.trim().to_string())
    }

    pub fn build(&self, machine: &MachineEntry, index: usize) -> Result<String> {
        let workdir = machine.workdir();
        let registry_dir = format!("{}/{}", workdir, self.settings.registry_subdir);

        let mut script = String::from(SHEBANG);
        script.push_str(&format!(
            "cd {} && {} &\n",
            shell_words::quote(&registry_dir),
            self.settings.registry_command
        ));

        for slot in 0..machine.worker_count {
            let command = self.render_worker(machine, index, slot)?;
            script.push_str(&format!(
                "cd {} && {} &\n",
                shell_words::quote(&workdir),
                command
            ));
        }

        Ok(script)
    }

    pub fn binding(&self, slot: u32) -> String {
        format!("{}{}", self.settings.binding_prefix, slot)
    }

    /// File name of the script in the local staging directory.
    pub fn local_name(index: usize) -> String {
        format!("slave_{index}.sh")
    }

    /// Where the script is copied on the machine.
    pub fn remote_name(machine: &MachineEntry, index: usize) -> String {
        format!("slave_{}_{}.sh", index, machine.user)
    }

    pub fn remote_path(&self, machine: &MachineEntry, index: usize) -> String {
        format!(
            "{}/{}",
            self.settings.staging_dir.trim_end_matches('/'),
            Self::remote_name(machine, index)
        )
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }
}
