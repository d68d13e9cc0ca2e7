//! Password negotiation as a pure state machine.
//!
//! The channel turns terminal output into [`PromptEvent`]s; [`AuthState::step`]
//! decides the next state and what to do about it. Keeping the decision pure
//! lets every path be tested without a terminal.

/// A corrected password is requested at most once per command.
pub const MAX_REJECTIONS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AwaitingHostKeyConfirmation,
    AwaitingPassword { rejections: u8 },
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptEvent {
    /// "Are you sure you want to continue connecting"
    HostKeyConfirmation,
    /// "password:"
    PasswordPrompt,
    /// "Permission denied"
    PermissionDenied,
    /// The command finished without asking anything else.
    EndOfStream,
}

/// What to type in response to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    AcceptHostKey,
    CachedPassword,
    CorrectedPassword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    SendLine(Reply),
    /// Ask the operator for a corrected password, cache it, then keep
    /// waiting for the next prompt.
    RepromptOperator,
    Done,
}

impl AuthState {
    pub fn initial() -> Self {
        AuthState::AwaitingHostKeyConfirmation
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed)
    }

    pub fn step(self, event: PromptEvent) -> (AuthState, AuthAction) {
        use AuthState::*;
        use PromptEvent::*;

        match (self, event) {
            (Authenticated, _) | (Failed, _) => (self, AuthAction::Done),

            (AwaitingHostKeyConfirmation, HostKeyConfirmation) => {
                (self, AuthAction::SendLine(Reply::AcceptHostKey))
            }
            // A changed host key mid-negotiation is answered the same way.
            (AwaitingPassword { .. }, HostKeyConfirmation) => {
                (self, AuthAction::SendLine(Reply::AcceptHostKey))
            }

            (AwaitingHostKeyConfirmation, PasswordPrompt) => (
                AwaitingPassword { rejections: 0 },
                AuthAction::SendLine(Reply::CachedPassword),
            ),
            (AwaitingPassword { rejections: 0 }, PasswordPrompt) => {
                (self, AuthAction::SendLine(Reply::CachedPassword))
            }
            (AwaitingPassword { .. }, PasswordPrompt) => {
                (self, AuthAction::SendLine(Reply::CorrectedPassword))
            }

            (AwaitingPassword { rejections }, PermissionDenied) if rejections < MAX_REJECTIONS => (
                AwaitingPassword {
                    rejections: rejections + 1,
                },
                AuthAction::RepromptOperator,
            ),
            (AwaitingPassword { .. }, PermissionDenied) => (Failed, AuthAction::Done),
            // Rejected before any password was sent: key auth was refused
            // and no prompt will follow.
            (AwaitingHostKeyConfirmation, PermissionDenied) => (Failed, AuthAction::Done),

            (_, EndOfStream) => (Authenticated, AuthAction::Done),
        }
    }
}
