use std::fmt;

/// Phases of one `run` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorState {
    Idle,
    DeployedAndClean,
    MasterRunning,
    Converged,
    SlavesDispatched,
    Settling,
    Done,
    Failed,
}

impl CoordinatorState {
    /// The state that follows this one on the success path.
    pub fn successor(&self) -> Option<CoordinatorState> {
        use CoordinatorState::*;
        match self {
            Idle => Some(DeployedAndClean),
            DeployedAndClean => Some(MasterRunning),
            MasterRunning => Some(Converged),
            Converged => Some(SlavesDispatched),
            SlavesDispatched => Some(Settling),
            Settling => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Done | CoordinatorState::Failed)
    }

    /// Success path moves one step at a time; any live state may fail.
    pub fn can_advance(&self, next: CoordinatorState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == CoordinatorState::Failed || self.successor() == Some(next)
    }

    pub fn advance(self, next: CoordinatorState) -> Result<CoordinatorState, IllegalTransition> {
        if self.can_advance(next) {
            Ok(next)
        } else {
            Err(IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::DeployedAndClean => "deployed and clean",
            CoordinatorState::MasterRunning => "master running",
            CoordinatorState::Converged => "converged",
            CoordinatorState::SlavesDispatched => "slaves dispatched",
            CoordinatorState::Settling => "settling",
            CoordinatorState::Done => "done",
            CoordinatorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("coordinator cannot move from {from} to {to}")]
pub struct IllegalTransition {
    pub from: CoordinatorState,
    pub to: CoordinatorState,
}
