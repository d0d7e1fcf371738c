//! Signaling contracts consumed by the core.
//!
//! The signaling transport itself (connection lifecycle, reconnection
//! backoff, request framing) lives outside this crate. The core consumes
//! two contracts from it: the transport event stream ([`TransportEvent`])
//! and the per-call session exchange ([`SessionChannel`]).
//!
//! # Reply codes
//!
//! The numeric values must match the remote peer's implementation exactly:
//! `200` success (payload `{"answer": "<sdp>"}`), `480` rejected,
//! `486` busy, `500` negotiation failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Status code carried in the one reply a session channel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// Negotiation succeeded; the reply carries the SDP answer.
    Ok,
    /// The local user declined the call.
    Rejected,
    /// A call is already active; the new request is turned away.
    Busy,
    /// Negotiation failed locally.
    InternalError,
}

impl ReplyCode {
    /// Wire value of the code.
    pub const fn code(self) -> u16 {
        match self {
            ReplyCode::Ok => 200,
            ReplyCode::Rejected => 480,
            ReplyCode::Busy => 486,
            ReplyCode::InternalError => 500,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Payload of a `200` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    /// Local SDP answer, complete after candidate gathering.
    pub answer: String,
}

/// Payload of an incoming call request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Remote SDP offer.
    pub offer: String,
}

impl RequestPayload {
    /// Parse the request payload of an incoming call.
    ///
    /// Transport implementations use this to extract the offer before
    /// surfacing the channel to the core.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SignalingError> {
        serde_json::from_value(value)
            .map_err(|e| SignalingError::Transport(format!("malformed call request: {e}")))
    }
}

/// Lifecycle events of one session channel. Each fires at most once;
/// `Close` may fire without a prior `Open` (rejected or never-accepted
/// calls).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Close,
}

/// One signaling exchange for one call, supplied by the transport.
///
/// The channel carries one inbound offer and accepts exactly one reply.
/// Implementations must fail a second `reply` loudly with
/// [`SignalingError::AlreadyReplied`] rather than ignore it.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    /// SDP offer carried by the incoming request payload.
    fn offer(&self) -> String;

    /// Send the single status reply for this channel.
    async fn reply(
        &self,
        code: ReplyCode,
        payload: Option<AnswerPayload>,
    ) -> Result<(), SignalingError>;

    /// Best-effort teardown notice to the remote side. Implementations
    /// discard delivery errors; the core never waits on the outcome.
    async fn notify_end(&self);

    /// Take the channel's open/close event stream. Yields `Some` exactly
    /// once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>>;
}

/// Events delivered by the signaling transport.
pub enum TransportEvent {
    /// The transport is (re)connecting; `reattempt` is 0 on the first try.
    Connecting { reattempt: u32 },
    /// The transport is connected.
    Online,
    /// The transport lost its connection. An established call continues:
    /// it depends on the peer-to-peer channel, not on signaling.
    Offline,
    /// A remote peer requests a call over a fresh session channel.
    Session(Arc<dyn SessionChannel>),
}

/// Errors surfaced by signaling implementations.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The channel's single reply was already sent. The state machine's
    /// guards make this unreachable; seeing it means an invariant broke.
    #[error("reply already sent for this session")]
    AlreadyReplied,

    #[error("session channel closed")]
    ChannelClosed,

    #[error("transport failure: {0}")]
    Transport(String),
}
