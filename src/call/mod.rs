//! Call session state machine and negotiation pipeline.
//!
//! # Architecture
//!
//! - [`CallState`]: state-tagged variant tracking the single call's
//!   lifecycle.
//! - [`CallController`]: owns at most one active call and drives every
//!   transition; incoming channels, pipeline events and user intent all
//!   funnel through its guarded handlers.
//! - [`NegotiationPipeline`]: forward-only offer → answer → ICE-complete
//!   → channel-open pipeline over the `webrtc` crate, behind the
//!   [`Negotiator`] seam so the controller can be exercised with doubles.

mod controller;
mod error;
mod pipeline;
mod state;

pub use controller::CallController;
pub use error::CallError;
pub use pipeline::{
    DATA_CHANNEL_ID, DATA_CHANNEL_LABEL, DATA_CHANNEL_PROTOCOL, NegotiationError,
    NegotiationPipeline, Negotiator, NegotiatorFactory, PipelineEvent, PipelineFactory,
};
pub use state::CallState;
