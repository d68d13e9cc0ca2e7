//! Machine configuration parsing
//!
//! One machine per line: `<host> <user> <remote_dir> <worker_count>`.
//! Lines starting with `#` and blank lines are ignored; anything else that
//! does not split into exactly four fields rejects the whole file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::WorkerEndpoint;
use crate::error::{Result, SqsError};

const FIELDS_PER_LINE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineEntry {
    pub host: String,
    pub user: String,
    pub remote_dir: PathBuf,
    pub worker_count: u32,
}

impl MachineEntry {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        remote_dir: impl Into<PathBuf>,
        worker_count: u32,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            remote_dir: remote_dir.into(),
            worker_count,
        }
    }

    /// `user@host`
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Per-user working directory on the machine: `<remote_dir>/<user>`.
    pub fn workdir(&self) -> String {
        self.remote_dir.join(&self.user).display().to_string()
    }
}

/// Ordered, read-only view of the cluster.
///
/// Order matters: machine `i` owns launch script `slave_<i>_<user>.sh` and its
/// worker slots come before those of machine `i + 1` when slaves are numbered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRegistry {
    origin: String,
    machines: Vec<MachineEntry>,
}

impl MachineRegistry {
    pub fn new(origin: impl Into<String>, machines: Vec<MachineEntry>) -> Self {
        Self {
            origin: origin.into(),
            machines,
        }
    }

    /// Parse a machine configuration file.
    pub fn parse(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SqsError::malformed(origin.clone(), 0, String::new(), format!("cannot read file: {e}"))
        })?;
        Self::parse_str(&content, origin)
    }

    /// Parse machine configuration text. `origin` names the source in errors.
    pub fn parse_str(content: &str, origin: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        let mut machines = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            if let Some(machine) = parse_line(&origin, idx + 1, line)? {
                machines.push(machine);
            }
        }

        tracing::debug!("Parsed {} machine(s) from {}", machines.len(), origin);
        Ok(Self { origin, machines })
    }

    /// Reject an empty registry for commands that need at least one machine.
    pub fn require_machines(&self) -> Result<()> {
        if self.machines.is_empty() {
            Err(SqsError::EmptyRegistry {
                origin: self.origin.clone(),
            })
        } else {
            Ok(())
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn machines(&self) -> &[MachineEntry] {
        &self.machines
    }

    pub fn iter(&self) -> impl Iterator<Item = &MachineEntry> {
        self.machines.iter()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Total worker slots across the cluster, independent of machine count.
    pub fn total_workers(&self) -> usize {
        self.machines.iter().map(|m| m.worker_count as usize).sum()
    }

    /// One endpoint per worker slot, in registry order. The binding is the
    /// name each worker registers under with its machine's lookup service.
    pub fn worker_endpoints(&self, binding_prefix: &str) -> Vec<WorkerEndpoint> {
        self.machines
            .iter()
            .flat_map(|machine| {
                (0..machine.worker_count).map(move |slot| WorkerEndpoint {
                    host: machine.host.clone(),
                    binding: format!("{binding_prefix}{slot}"),
                })
            })
            .collect()
    }
}

fn is_skipped(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn parse_line(origin: &str, line_number: usize, line: &str) -> Result<Option<MachineEntry>> {
    if is_skipped(line) {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELDS_PER_LINE {
        return Err(SqsError::malformed(
            origin,
            line_number,
            line,
            format!(
                "expected {FIELDS_PER_LINE} fields (host user remote_dir worker_count), found {}",
                fields.len()
            ),
        ));
    }

    let worker_count = match fields[3].parse::<u32>() {
        Ok(0) => {
            return Err(SqsError::malformed(
                origin,
                line_number,
                line,
                "worker count must be at least 1",
            ))
        }
        Ok(count) => count,
        Err(_) => {
            return Err(SqsError::malformed(
                origin,
                line_number,
                line,
                format!("worker count {:?} is not a positive integer", fields[3]),
            ))
        }
    };

    Ok(Some(MachineEntry::new(
        fields[0],
        fields[1],
        fields[2],
        worker_count,
    )))
}
