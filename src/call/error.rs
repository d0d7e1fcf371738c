//! Call-related error types.

use thiserror::Error;

use super::pipeline::NegotiationError;
use super::state::CallState;
use crate::signaling::SignalingError;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("{operation} is invalid in call state {}", state.name())]
    InvalidState {
        operation: &'static str,
        state: CallState,
    },

    #[error("negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
}
