//! Remote screen-mirroring call agent.
//!
//! This crate establishes a single screen-mirroring call between two peers:
//! an out-of-band signaling exchange negotiates a direct peer-to-peer data
//! channel, after which an external mirroring protocol runs over that
//! channel.
//!
//! # Architecture
//!
//! - [`CallController`]: the call state machine. Owns at most one active
//!   call, mediates between an incoming [`SessionChannel`] and a
//!   negotiation pipeline, and exposes the user-intent operations
//!   (`accept`, `reject`, `terminate`).
//! - [`NegotiationPipeline`]: turns one remote SDP offer into one open,
//!   pre-negotiated data channel, or fails.
//! - [`SessionChannel`]: contract for one signaling exchange, supplied by
//!   the external transport.
//! - [`MirrorEngine`]: boundary to the external mirroring protocol; the
//!   core hands it the open channel and forwards its resize/cursor events
//!   to the presentation layer unmodified.
//! - [`Agent`]: wires a signaling transport's event stream into the
//!   controller and surfaces informational notifications.

pub mod agent;
pub mod call;
pub mod config;
pub mod mirror;
pub mod notifications;
pub mod signaling;

pub use agent::Agent;
pub use call::{
    CallController, CallError, CallState, NegotiationError, NegotiationPipeline, Negotiator,
    NegotiatorFactory, PipelineEvent, PipelineFactory,
};
pub use config::{AgentConfig, IceServerConfig, LocalIdentity};
pub use mirror::{MirrorChannel, MirrorEngine, MirrorEvent, MirrorOptions, MirrorSendError};
pub use notifications::{LogNotifier, NotificationSink, Severity};
pub use signaling::{
    AnswerPayload, ChannelEvent, ReplyCode, RequestPayload, SessionChannel, SignalingError,
    TransportEvent,
};
