//! Session state machine states.

use std::fmt;

/// Where a [`Session`](crate::session::Session) is in the load/save/reset
/// sequence.
///
/// States advance strictly in [`SessionState::SUCCESS_PATH`] order.
/// [`SessionState::Failed`] is reachable from any state and, like
/// [`SessionState::ResetIssued`], is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SessionState {
    /// Port open, nothing exchanged yet.
    Disconnected,
    /// Waiting for the bootloader prompt.
    AwaitingPrompt,
    /// Load command issued, waiting for the ready banner.
    LoadCommandSent,
    /// YMODEM transfer running.
    TransferInProgress,
    /// Receiver acknowledged the whole file.
    TransferComplete,
    /// Flash save command issued.
    SaveCommandSent,
    /// Bootloader returned to the prompt after saving.
    Verified,
    /// Reset acknowledged. Terminal success.
    ResetIssued,
    /// A step failed or the session was aborted. Terminal.
    Failed,
}

impl SessionState {
    /// States visited by a successful session, in order.
    pub const SUCCESS_PATH: [Self; 8] = [
        Self::Disconnected,
        Self::AwaitingPrompt,
        Self::LoadCommandSent,
        Self::TransferInProgress,
        Self::TransferComplete,
        Self::SaveCommandSent,
        Self::Verified,
        Self::ResetIssued,
    ];

    /// Successor on the success path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Disconnected => Some(Self::AwaitingPrompt),
            Self::AwaitingPrompt => Some(Self::LoadCommandSent),
            Self::LoadCommandSent => Some(Self::TransferInProgress),
            Self::TransferInProgress => Some(Self::TransferComplete),
            Self::TransferComplete => Some(Self::SaveCommandSent),
            Self::SaveCommandSent => Some(Self::Verified),
            Self::Verified => Some(Self::ResetIssued),
            Self::ResetIssued | Self::Failed => None,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ResetIssued | Self::Failed)
    }

    /// Variant name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::AwaitingPrompt => "AwaitingPrompt",
            Self::LoadCommandSent => "LoadCommandSent",
            Self::TransferInProgress => "TransferInProgress",
            Self::TransferComplete => "TransferComplete",
            Self::SaveCommandSent => "SaveCommandSent",
            Self::Verified => "Verified",
            Self::ResetIssued => "ResetIssued",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
