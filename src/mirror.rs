//! Boundary to the external mirroring engine.
//!
//! Once negotiation completes and the data channel opens, the core hands
//! the channel to a [`MirrorEngine`] implementation and forwards the two
//! presentation-facing event categories it emits (viewport resizes and
//! remote pointer positions) unmodified. On call end the engine is
//! stopped exactly once.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Options for constructing the mirroring engine. The mirroring protocol
/// sends binary frames, so `blob` framing stays off.
#[derive(Debug, Clone, Copy)]
pub struct MirrorOptions {
    pub blob: bool,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self { blob: false }
    }
}

/// Engine-emitted events forwarded to the presentation layer. Both are
/// advisory; no acknowledgement is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MirrorEvent {
    /// The mirrored viewport changed size. Height is applied as reported.
    Resize { width: u32, height: u32 },
    /// The remote pointer moved.
    RemoteCursorMove { x: i32, y: i32 },
}

/// Errors from sending over the mirror channel.
#[derive(Debug, Error)]
pub enum MirrorSendError {
    #[error("data channel closed")]
    Closed,

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Opaque handle to the open peer-to-peer data channel.
///
/// The core passes it through to the engine without interpreting the
/// traffic.
#[async_trait]
pub trait MirrorChannel: Send + Sync {
    fn label(&self) -> String;

    /// Send one binary frame.
    async fn send(&self, data: &[u8]) -> Result<(), MirrorSendError>;

    /// Take the inbound frame stream. Yields `Some` exactly once.
    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>>;
}

/// External mirroring protocol engine.
#[async_trait]
pub trait MirrorEngine: Send + Sync {
    /// Start mirroring over the open channel. The returned stream carries
    /// the engine's [`MirrorEvent`]s until the engine stops.
    async fn start(
        &self,
        channel: Arc<dyn MirrorChannel>,
        options: MirrorOptions,
    ) -> mpsc::UnboundedReceiver<MirrorEvent>;

    /// Stop mirroring and release the channel.
    async fn stop(&self);
}
