//! Call controller: the session state machine.
//!
//! Owns at most one active call. Incoming session channels, pipeline
//! events, channel lifecycle events and user intent all funnel through
//! guarded handlers on the single call slot; asynchronous events carry
//! the sequence number of the call they belong to and are discarded once
//! it no longer matches, so late callbacks from a torn-down call can
//! never touch its successor.

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::CallError;
use super::pipeline::{NegotiationError, Negotiator, NegotiatorFactory, PipelineEvent};
use super::state::CallState;
use crate::mirror::{MirrorChannel, MirrorEngine, MirrorEvent, MirrorOptions};
use crate::notifications::{NotificationSink, Severity};
use crate::signaling::{AnswerPayload, ChannelEvent, ReplyCode, SessionChannel, SignalingError};

/// The one live call, present iff the controller is not idle.
struct Call {
    /// Tag carried by this call's asynchronous events.
    seq: u64,
    state: CallState,
    channel: Arc<dyn SessionChannel>,
    pipeline: Option<Arc<dyn Negotiator>>,
    /// Task forwarding the channel's open/close events. Aborted on local
    /// terminate so the remote-hangup branch cannot fire a second cleanup
    /// for the same channel.
    watcher: Option<JoinHandle<()>>,
    /// Whether the mirroring engine was started for this call.
    mirror_running: bool,
}

/// State machine for the single screen-mirroring call.
pub struct CallController {
    factory: Arc<dyn NegotiatorFactory>,
    engine: Arc<dyn MirrorEngine>,
    notifier: Arc<dyn NotificationSink>,
    mirror_tx: mpsc::UnboundedSender<MirrorEvent>,
    call: Mutex<Option<Call>>,
    next_seq: AtomicU64,
}

impl CallController {
    pub fn new(
        factory: Arc<dyn NegotiatorFactory>,
        engine: Arc<dyn MirrorEngine>,
        notifier: Arc<dyn NotificationSink>,
        mirror_tx: mpsc::UnboundedSender<MirrorEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            engine,
            notifier,
            mirror_tx,
            call: Mutex::new(None),
            next_seq: AtomicU64::new(1),
        })
    }

    /// Current call state; `Idle` when no call exists.
    pub async fn state(&self) -> CallState {
        self.call
            .lock()
            .await
            .as_ref()
            .map(|call| call.state.clone())
            .unwrap_or(CallState::Idle)
    }

    /// Handle an incoming session channel from the transport.
    ///
    /// If a call already exists the new channel is turned away with `486`
    /// before anything else happens; the existing call is not touched.
    pub async fn handle_incoming(self: &Arc<Self>, channel: Arc<dyn SessionChannel>) {
        let mut guard = self.call.lock().await;
        if guard.is_some() {
            drop(guard);
            info!("incoming call while busy, replying 486");
            self.notify(Severity::Info, "incoming call turned away: busy");
            if let Err(e) = channel.reply(ReplyCode::Busy, None).await {
                warn!("busy reply not delivered: {e}");
            }
            return;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let watcher = self.spawn_channel_watcher(seq, &channel);
        debug!("incoming call stored (seq {seq}), ringing");
        *guard = Some(Call {
            seq,
            state: CallState::Ringing {
                received_at: Utc::now(),
            },
            channel,
            pipeline: None,
            watcher,
            mirror_running: false,
        });
    }

    /// Accept the ringing call: create a negotiation pipeline for the
    /// channel's offer and move to `Negotiating`.
    ///
    /// A pipeline that cannot even be created is reported to the peer as
    /// a negotiation failure (`500`) and the call is torn down.
    pub async fn accept(self: &Arc<Self>) -> Result<(), CallError> {
        let (seq, offer, channel) = {
            let guard = self.call.lock().await;
            match guard.as_ref() {
                Some(call) if call.state.can_accept() => {
                    (call.seq, call.channel.offer(), call.channel.clone())
                }
                other => {
                    return Err(CallError::InvalidState {
                        operation: "accept",
                        state: state_of(other),
                    });
                }
            }
        };

        let (pipeline, mut events) = match self.factory.create().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("pipeline creation failed: {e}");
                self.notify(Severity::Error, &format!("negotiation setup failed: {e}"));
                if let Err(re) = channel.reply(ReplyCode::InternalError, None).await {
                    warn!("failure reply not delivered: {re}");
                }
                self.close_call(seq).await;
                return Err(CallError::Negotiation(e));
            }
        };

        let stale = {
            let mut guard = self.call.lock().await;
            match guard.as_mut() {
                Some(call) if call.seq == seq && call.state.can_accept() => {
                    call.pipeline = Some(pipeline.clone());
                    call.state = CallState::Negotiating {
                        accepted_at: Utc::now(),
                    };
                    None
                }
                // The call went away while the pipeline was being set up.
                other => Some(state_of(other.as_deref())),
            }
        };
        if let Some(state) = stale {
            pipeline.stop().await;
            return Err(CallError::InvalidState {
                operation: "accept",
                state,
            });
        }

        self.notify(Severity::Info, "call accepted, negotiating...");

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = pipeline.start(&offer).await {
                controller.fail_negotiation(seq, e).await;
                return;
            }
            while let Some(event) = events.recv().await {
                controller.handle_pipeline_event(seq, event).await;
            }
        });

        Ok(())
    }

    /// Reject the ringing call with `480`. No pipeline is ever created.
    pub async fn reject(&self) -> Result<(), CallError> {
        let (channel, watcher) = {
            let mut guard = self.call.lock().await;
            match guard.as_mut() {
                Some(call) if call.state.can_reject() => {
                    let channel = call.channel.clone();
                    let watcher = call.watcher.take();
                    *guard = None;
                    (channel, watcher)
                }
                other => {
                    return Err(CallError::InvalidState {
                        operation: "reject",
                        state: state_of(other.as_deref()),
                    });
                }
            }
        };

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        self.notify(Severity::Info, "call rejected");
        channel.reply(ReplyCode::Rejected, None).await?;
        Ok(())
    }

    /// Terminate the negotiating or connected call locally.
    ///
    /// The channel watcher is aborted first, so the close event the
    /// teardown provokes cannot run a second cleanup.
    pub async fn terminate(&self) -> Result<(), CallError> {
        let seq = {
            let guard = self.call.lock().await;
            match guard.as_ref() {
                Some(call) if call.state.can_terminate() => call.seq,
                other => {
                    return Err(CallError::InvalidState {
                        operation: "terminate",
                        state: state_of(other),
                    });
                }
            }
        };

        self.notify(Severity::Info, "terminating call");
        self.close_call(seq).await;
        Ok(())
    }

    fn spawn_channel_watcher(
        self: &Arc<Self>,
        seq: u64,
        channel: &Arc<dyn SessionChannel>,
    ) -> Option<JoinHandle<()>> {
        let Some(mut events) = channel.take_events() else {
            warn!("session channel provided no event stream");
            return None;
        };
        let controller = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ChannelEvent::Open => controller.handle_channel_open(seq).await,
                    ChannelEvent::Close => {
                        // Cleanup runs on its own task: close_call aborts
                        // this watcher, which must not cancel the cleanup
                        // itself.
                        let controller = Arc::clone(&controller);
                        tokio::spawn(async move {
                            controller.handle_channel_close(seq).await;
                        });
                        break;
                    }
                }
            }
        }))
    }

    async fn handle_channel_open(&self, seq: u64) {
        if !self.is_current(seq).await {
            return;
        }
        self.notify(Severity::Success, "session established");
    }

    async fn handle_channel_close(&self, seq: u64) {
        if !self.is_current(seq).await {
            return;
        }
        self.notify(Severity::Info, "session closed");
        self.close_call(seq).await;
    }

    async fn handle_pipeline_event(&self, seq: u64, event: PipelineEvent) {
        match event {
            PipelineEvent::Ready { answer } => self.handle_ready(seq, answer).await,
            PipelineEvent::ChannelOpen(link) => self.handle_data_channel_open(seq, link).await,
            PipelineEvent::IceConnected => {
                if self.is_current(seq).await {
                    self.notify(Severity::Success, "ICE connected");
                }
            }
        }
    }

    /// Negotiation and candidate gathering finished: send the one `200`
    /// reply carrying the answer. The call stays in `Negotiating` until
    /// the data channel opens.
    async fn handle_ready(&self, seq: u64, answer: String) {
        let channel = {
            let guard = self.call.lock().await;
            match guard.as_ref() {
                Some(call)
                    if call.seq == seq && matches!(call.state, CallState::Negotiating { .. }) =>
                {
                    call.channel.clone()
                }
                _ => {
                    debug!("discarding stale negotiation result (seq {seq})");
                    return;
                }
            }
        };

        info!("negotiation ready, replying 200 with answer");
        match channel.reply(ReplyCode::Ok, Some(AnswerPayload { answer })).await {
            Ok(()) => {}
            Err(SignalingError::AlreadyReplied) => {
                warn!("reply-once invariant violated for seq {seq}");
            }
            Err(e) => {
                warn!("success reply not delivered: {e}");
                self.notify(Severity::Error, "answer could not be delivered");
            }
        }
    }

    async fn handle_data_channel_open(&self, seq: u64, link: Arc<dyn MirrorChannel>) {
        {
            let guard = self.call.lock().await;
            match guard.as_ref() {
                Some(call)
                    if call.seq == seq && matches!(call.state, CallState::Negotiating { .. }) => {}
                _ => {
                    debug!("discarding stale data channel open (seq {seq})");
                    return;
                }
            }
        }

        self.notify(Severity::Info, "data channel open");

        // The engine starts before `Connected` is committed; `mirror_running`
        // only becomes true once `start` has returned, so teardown can never
        // stop an engine that has not started.
        let mut events = self.engine.start(link, MirrorOptions::default()).await;

        let committed = {
            let mut guard = self.call.lock().await;
            match guard.as_mut() {
                Some(call)
                    if call.seq == seq && matches!(call.state, CallState::Negotiating { .. }) =>
                {
                    call.state = CallState::Connected {
                        connected_at: Utc::now(),
                    };
                    call.mirror_running = true;
                    true
                }
                _ => false,
            }
        };
        if !committed {
            // The call ended while the engine was starting up.
            debug!("call gone after engine start (seq {seq}), winding engine down");
            self.engine.stop().await;
            return;
        }

        let mirror_tx = self.mirror_tx.clone();
        tokio::spawn(async move {
            // Pass-through: engine events reach presentation unmodified.
            while let Some(event) = events.recv().await {
                let _ = mirror_tx.send(event);
            }
        });
        self.notify(Severity::Info, "mirroring engine running");
    }

    /// Terminal negotiation failure: one `500` reply, then teardown. No
    /// retry happens at this layer.
    async fn fail_negotiation(&self, seq: u64, error: NegotiationError) {
        let channel = {
            let guard = self.call.lock().await;
            match guard.as_ref() {
                Some(call)
                    if call.seq == seq && matches!(call.state, CallState::Negotiating { .. }) =>
                {
                    call.channel.clone()
                }
                _ => return,
            }
        };

        warn!("negotiation failed: {error}");
        self.notify(Severity::Error, &format!("negotiation failed: {error}"));
        if let Err(e) = channel.reply(ReplyCode::InternalError, None).await {
            warn!("failure reply not delivered: {e}");
        }
        self.close_call(seq).await;
    }

    /// The single teardown path, shared by remote hangup, local terminate
    /// and negotiation failure. Idempotent: the slot is marked `Closing`
    /// in place (so a concurrent incoming request still sees busy) and a
    /// second invocation finds nothing to do.
    async fn close_call(&self, seq: u64) {
        let (channel, pipeline, watcher, mirror_running) = {
            let mut guard = self.call.lock().await;
            match guard.as_mut() {
                Some(call) if call.seq == seq => {
                    if matches!(call.state, CallState::Closing) {
                        return;
                    }
                    call.state = CallState::Closing;
                    (
                        call.channel.clone(),
                        call.pipeline.take(),
                        call.watcher.take(),
                        std::mem::take(&mut call.mirror_running),
                    )
                }
                _ => return,
            }
        };

        if let Some(watcher) = watcher {
            watcher.abort();
        }

        // Best-effort end notice, sent while the channel is still held.
        channel.notify_end().await;

        if let Some(pipeline) = pipeline {
            pipeline.stop().await;
        }
        if mirror_running {
            self.engine.stop().await;
        }

        let mut guard = self.call.lock().await;
        if matches!(guard.as_ref(), Some(call) if call.seq == seq) {
            *guard = None;
        }
        debug!("call torn down (seq {seq})");
    }

    async fn is_current(&self, seq: u64) -> bool {
        matches!(self.call.lock().await.as_ref(), Some(call) if call.seq == seq)
    }

    fn notify(&self, severity: Severity, message: &str) {
        self.notifier.notify(severity, message);
    }
}

fn state_of(call: Option<&Call>) -> CallState {
    call.map(|c| c.state.clone()).unwrap_or(CallState::Idle)
}
