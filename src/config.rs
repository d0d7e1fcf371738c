//! Agent configuration.

use webrtc::ice_transport::ice_server::RTCIceServer;

/// Identity announced to the signaling service.
#[derive(Clone, Debug, Default)]
pub struct LocalIdentity {
    pub username: String,
    pub uuid: String,
}

/// One ICE server descriptor (STUN or TURN).
#[derive(Clone, Debug, Default)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn to_rtc(&self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Configuration for the agent.
#[derive(Clone, Debug, Default)]
pub struct AgentConfig {
    /// Base URL of the signaling service.
    pub signaling_url: String,
    /// Identity carried in the signaling connection URL.
    pub local: LocalIdentity,
    /// ICE servers handed to each negotiation pipeline.
    pub ice_servers: Vec<IceServerConfig>,
}

impl AgentConfig {
    /// Signaling connection URL with the identity query parameters.
    pub fn session_url(&self) -> String {
        format!(
            "{}?username={}&uuid={}",
            self.signaling_url,
            urlencoding::encode(&self.local.username),
            urlencoding::encode(&self.local.uuid),
        )
    }
}
