//! WebRTC negotiation pipeline.
//!
//! One pipeline per call attempt: it binds the remote offer, produces a
//! local answer and reports [`PipelineEvent::Ready`] once ICE candidate
//! gathering completes — never earlier, so the peer always receives a
//! complete description. The data channel is created at construction
//! with pre-negotiated parameters, so no extra signaling round trip is
//! needed; its readiness surfaces separately as
//! [`PipelineEvent::ChannelOpen`].
//!
//! Failure of any negotiation step is terminal for the attempt; a new
//! pipeline must be created for a new call.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::AgentConfig;
use crate::mirror::{MirrorChannel, MirrorSendError};

/// Data channel label. Must match the remote peer bit-for-bit.
pub const DATA_CHANNEL_LABEL: &str = "swis";

/// Data channel subprotocol.
pub const DATA_CHANNEL_PROTOCOL: &str = "swis";

/// Pre-negotiated data channel id shared by both peers.
pub const DATA_CHANNEL_ID: u16 = 666;

/// Events reported by a negotiation pipeline.
pub enum PipelineEvent {
    /// Negotiation finished and candidate gathering is complete; `answer`
    /// is the final local description.
    Ready { answer: String },
    /// The pre-negotiated data channel opened; both peers finished
    /// negotiating. Carries the opaque handle for the mirroring hand-off.
    ChannelOpen(Arc<dyn MirrorChannel>),
    /// The ICE transport reached connected/completed. Informational,
    /// emitted at most once.
    IceConnected,
}

/// Errors from the negotiation pipeline.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("remote description rejected: {0}")]
    RemoteDescription(String),

    #[error("answer generation failed: {0}")]
    AnswerGeneration(String),

    #[error("local description rejected: {0}")]
    LocalDescription(String),

    #[error("peer connection setup failed: {0}")]
    Setup(String),
}

impl From<webrtc::Error> for NegotiationError {
    fn from(e: webrtc::Error) -> Self {
        Self::Setup(e.to_string())
    }
}

/// Drives one offer into one open data channel, or fails.
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Run the ordered negotiation steps: bind remote offer, generate the
    /// answer, bind it locally. Candidate gathering starts on success;
    /// completion is reported asynchronously via the event stream.
    async fn start(&self, offer: &str) -> Result<(), NegotiationError>;

    /// Release the peer connection and data channel. Idempotent; safe to
    /// call before `start` completes and from multiple unwind paths.
    async fn stop(&self);
}

/// Creates a [`Negotiator`] per call attempt.
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn Negotiator>, mpsc::UnboundedReceiver<PipelineEvent>), NegotiationError>;
}

/// Factory producing [`NegotiationPipeline`]s configured from the agent's
/// ICE server list.
pub struct PipelineFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl PipelineFactory {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.iter().map(|s| s.to_rtc()).collect(),
        }
    }
}

#[async_trait]
impl NegotiatorFactory for PipelineFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn Negotiator>, mpsc::UnboundedReceiver<PipelineEvent>), NegotiationError>
    {
        let (pipeline, events) = NegotiationPipeline::new(self.ice_servers.clone()).await?;
        Ok((pipeline, events))
    }
}

/// Wraps one peer connection and its pre-negotiated data channel.
pub struct NegotiationPipeline {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    stopped: AtomicBool,
}

impl NegotiationPipeline {
    /// Build the peer connection, create the pre-negotiated data channel
    /// and register every callback before negotiation begins.
    pub async fn new(
        ice_servers: Vec<RTCIceServer>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PipelineEvent>), NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);

        // Both peers create the channel out-of-band with the same id, so
        // nothing is announced in-band and it binds as soon as transport
        // negotiation finishes.
        let dc = pc
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    protocol: Some(DATA_CHANNEL_PROTOCOL.to_string()),
                    negotiated: Some(DATA_CHANNEL_ID),
                    ..Default::default()
                }),
            )
            .await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel::<PipelineEvent>();

        // Inbound frames go to the mirroring engine through the link.
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let incoming_tx = incoming_tx.clone();
            Box::pin(async move {
                if incoming_tx.send(msg.data.to_vec()).is_err() {
                    debug!("mirror channel consumer gone, dropping frame");
                }
            })
        }));

        let link: Arc<dyn MirrorChannel> = Arc::new(DataChannelLink {
            dc: dc.clone(),
            incoming: StdMutex::new(Some(incoming_rx)),
        });

        let open_tx = events_tx.clone();
        let open_link = Arc::new(StdMutex::new(Some(link)));
        dc.on_open(Box::new(move || {
            let open_tx = open_tx.clone();
            let open_link = open_link.clone();
            Box::pin(async move {
                info!("data channel '{DATA_CHANNEL_LABEL}' open");
                if let Some(link) = open_link.lock().unwrap().take() {
                    let _ = open_tx.send(PipelineEvent::ChannelOpen(link));
                }
            })
        }));

        // End-of-candidates is the None marker; only then is the local
        // description complete enough to send to the peer.
        let ready_tx = events_tx.clone();
        let answer_sent = Arc::new(AtomicBool::new(false));
        let pc_weak = Arc::downgrade(&pc);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ready_tx = ready_tx.clone();
            let answer_sent = answer_sent.clone();
            let pc_weak = pc_weak.clone();
            Box::pin(async move {
                if candidate.is_some() {
                    return;
                }
                if answer_sent.swap(true, Ordering::SeqCst) {
                    return;
                }
                let Some(pc) = pc_weak.upgrade() else {
                    return;
                };
                match pc.local_description().await {
                    Some(desc) => {
                        debug!("candidate gathering complete");
                        let _ = ready_tx.send(PipelineEvent::Ready { answer: desc.sdp });
                    }
                    None => warn!("end of candidates before a local description was bound"),
                }
            })
        }));

        let state_tx = events_tx.clone();
        let ice_connected = Arc::new(AtomicBool::new(false));
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let state_tx = state_tx.clone();
            let ice_connected = ice_connected.clone();
            Box::pin(async move {
                debug!("ice connection state: {state}");
                let connected = matches!(
                    state,
                    RTCIceConnectionState::Connected | RTCIceConnectionState::Completed
                );
                if connected && !ice_connected.swap(true, Ordering::SeqCst) {
                    let _ = state_tx.send(PipelineEvent::IceConnected);
                }
            })
        }));

        Ok((
            Arc::new(Self {
                pc,
                dc,
                stopped: AtomicBool::new(false),
            }),
            events_rx,
        ))
    }
}

#[async_trait]
impl Negotiator for NegotiationPipeline {
    async fn start(&self, offer: &str) -> Result<(), NegotiationError> {
        let remote = RTCSessionDescription::offer(offer.to_string())
            .map_err(|e| NegotiationError::RemoteDescription(e.to_string()))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| NegotiationError::RemoteDescription(e.to_string()))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::AnswerGeneration(e.to_string()))?;

        // Binding the local description starts candidate gathering.
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))?;

        debug!("local description bound, gathering candidates");
        Ok(())
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.dc.close().await;
        let _ = self.pc.close().await;
        debug!("negotiation pipeline stopped");
    }
}

/// [`MirrorChannel`] adapter over the open data channel.
struct DataChannelLink {
    dc: Arc<RTCDataChannel>,
    incoming: StdMutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

#[async_trait]
impl MirrorChannel for DataChannelLink {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    async fn send(&self, data: &[u8]) -> Result<(), MirrorSendError> {
        self.dc
            .send(&Bytes::copy_from_slice(data))
            .await
            .map_err(|e| MirrorSendError::Transport(e.to_string()))?;
        Ok(())
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.incoming.lock().unwrap().take()
    }
}
