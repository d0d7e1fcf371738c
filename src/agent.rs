//! The agent: owns the call controller and drives it from transport
//! events, translating connection lifecycle into user notifications.

use log::{info, warn};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::mpsc;

use crate::call::{CallController, CallError, CallState, NegotiatorFactory, PipelineFactory};
use crate::config::AgentConfig;
use crate::mirror::{MirrorEngine, MirrorEvent};
use crate::notifications::{NotificationSink, Severity};
use crate::signaling::TransportEvent;

/// Screen-mirroring call agent.
///
/// Construct one per identity, feed it the transport's event stream via
/// [`Agent::run`], and surface [`MirrorEvent`]s from [`Agent::mirror_events`]
/// to the presentation layer.
pub struct Agent {
    config: AgentConfig,
    controller: Arc<CallController>,
    notifier: Arc<dyn NotificationSink>,
    mirror_rx: StdMutex<Option<mpsc::UnboundedReceiver<MirrorEvent>>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        notifier: Arc<dyn NotificationSink>,
        engine: Arc<dyn MirrorEngine>,
    ) -> Arc<Self> {
        let factory = Arc::new(PipelineFactory::new(&config));
        Self::with_factory(config, notifier, engine, factory)
    }

    /// Like [`Agent::new`] but with a caller-supplied negotiation factory.
    pub fn with_factory(
        config: AgentConfig,
        notifier: Arc<dyn NotificationSink>,
        engine: Arc<dyn MirrorEngine>,
        factory: Arc<dyn NegotiatorFactory>,
    ) -> Arc<Self> {
        let (mirror_tx, mirror_rx) = mpsc::unbounded_channel();
        let controller = CallController::new(factory, engine, notifier.clone(), mirror_tx);
        Arc::new(Self {
            config,
            controller,
            notifier,
            mirror_rx: StdMutex::new(Some(mirror_rx)),
        })
    }

    /// The signaling URL this agent registers under.
    pub fn session_url(&self) -> String {
        self.config.session_url()
    }

    pub fn controller(&self) -> Arc<CallController> {
        self.controller.clone()
    }

    /// Mirror events for the presentation layer. Take-once; `None` on a
    /// second call.
    pub fn mirror_events(&self) -> Option<mpsc::UnboundedReceiver<MirrorEvent>> {
        self.mirror_rx.lock().unwrap().take()
    }

    pub async fn state(&self) -> CallState {
        self.controller.state().await
    }

    pub async fn accept(&self) -> Result<(), CallError> {
        self.controller.accept().await
    }

    pub async fn reject(&self) -> Result<(), CallError> {
        self.controller.reject().await
    }

    pub async fn terminate(&self) -> Result<(), CallError> {
        self.controller.terminate().await
    }

    /// Consume transport events until the stream ends.
    ///
    /// Transport loss is reported but never tears down an established
    /// call; media flows peer-to-peer and survives the signaling link.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connecting { reattempt: 0 } => {
                    self.notifier
                        .notify(Severity::Info, "connecting to signaling server...");
                }
                TransportEvent::Connecting { reattempt } => {
                    info!("signaling reconnect attempt {reattempt}");
                    self.notifier
                        .notify(Severity::Info, "reconnecting to signaling server...");
                }
                TransportEvent::Online => {
                    self.notifier
                        .notify(Severity::Success, "connected to signaling server");
                }
                TransportEvent::Offline => {
                    warn!("signaling connection lost");
                    self.notifier
                        .notify(Severity::Error, "disconnected from signaling server");
                }
                TransportEvent::Session(channel) => {
                    self.notifier
                        .notify(Severity::Info, "mirroring session requested");
                    self.controller.handle_incoming(channel).await;
                }
            }
        }
        info!("transport event stream ended");
    }
}
