//! Call state machine states.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Current state of the single call slot.
///
/// A live call is never `Idle`: the controller reports `Idle` when no call
/// exists. `Closing` is held while teardown runs so concurrent incoming
/// requests still see the slot as busy.
#[derive(Debug, Clone, Serialize, Default)]
pub enum CallState {
    /// No call.
    #[default]
    Idle,
    /// Incoming request stored, waiting for the local user to answer.
    Ringing { received_at: DateTime<Utc> },
    /// Accepted; offer/answer/ICE negotiation in progress, then waiting
    /// for the data channel to open.
    Negotiating { accepted_at: DateTime<Utc> },
    /// Data channel open, mirroring engine running.
    Connected { connected_at: DateTime<Utc> },
    /// Teardown in progress.
    Closing,
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    pub fn can_reject(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    pub fn can_terminate(&self) -> bool {
        matches!(self, Self::Negotiating { .. } | Self::Connected { .. })
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ringing { .. } => "ringing",
            Self::Negotiating { .. } => "negotiating",
            Self::Connected { .. } => "connected",
            Self::Closing => "closing",
        }
    }
}
