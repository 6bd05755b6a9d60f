use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::sync::mpsc;

use crate::config::RtpCodecCapability;
use crate::error::Error;

/// Media kind of a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MediaKind {
    Audio,
    Video,
}

/// RTP send parameters. The orchestrator never inspects these, it hands them
/// between clients and the media engine unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpParameters(pub serde_json::Value);

/// RTP receive capabilities, opaque like [`RtpParameters`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpCapabilities(pub serde_json::Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub protocol: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Connection parameters a client needs to establish one transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParameters {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Lifecycle events raised by the engine for objects belonging to one router.
/// Each room owns the receiving end of its router's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    TransportClosed(String),
    ProducerClosed(String),
}

pub type RouterHandle = Arc<dyn RouterApi>;
pub type TransportHandle = Arc<dyn TransportApi>;
pub type ProducerHandle = Arc<dyn ProducerApi>;
pub type ConsumerHandle = Arc<dyn ConsumerApi>;

/// The media engine owning the packet-forwarding plane. The orchestrator only
/// creates routers through it and watches for the engine process dying.
#[async_trait]
pub trait MediaEngine: Send + Sync + Debug {
    /// Creates a router bound to the given codec list for its whole lifetime.
    /// Lifecycle events for objects under this router are delivered on
    /// `event_sender`.
    async fn create_router(
        &self,
        codecs: Vec<RtpCodecCapability>,
        event_sender: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<RouterHandle, Error>;

    /// Resolves once the engine process has died. Engine death is fatal to
    /// the server instance.
    async fn died(&self);
}

/// Per-room routing context.
#[async_trait]
pub trait RouterApi: Send + Sync + Debug {
    fn id(&self) -> String;

    /// Negotiated capabilities clients use to build a compatible local engine.
    fn capabilities(&self) -> RtpCapabilities;

    async fn create_transport(&self) -> Result<TransportHandle, Error>;

    /// Capability negotiation: whether `capabilities` can receive the encoding
    /// of the producer identified by `producer_id`.
    async fn can_consume(
        &self,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<bool, Error>;

    async fn close(&self);
}

#[async_trait]
pub trait TransportApi: Send + Sync + Debug {
    fn id(&self) -> String;

    fn parameters(&self) -> TransportParameters;

    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), Error>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerHandle, Error>;

    /// Creates a consumer for the given producer. The consumer starts paused
    /// and forwards nothing until [`ConsumerApi::resume`] is called.
    async fn consume(
        &self,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumerHandle, Error>;

    async fn close(&self);
}

#[async_trait]
pub trait ProducerApi: Send + Sync + Debug {
    fn id(&self) -> String;

    fn kind(&self) -> MediaKind;

    async fn close(&self);
}

#[async_trait]
pub trait ConsumerApi: Send + Sync + Debug {
    fn id(&self) -> String;

    fn producer_id(&self) -> String;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    /// Consumers are created paused and forward nothing until resumed.
    fn paused(&self) -> bool;

    /// Starts packet forwarding. Resuming an already running consumer is a
    /// no-op.
    async fn resume(&self) -> Result<(), Error>;

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_media_kind_strings() {
        assert_eq!(MediaKind::Audio.to_string(), "audio");
        assert_eq!(MediaKind::Video.to_string(), "video");
        assert_eq!(MediaKind::from_str("video").unwrap(), MediaKind::Video);
        assert_eq!(MediaKind::from_str("AUDIO").unwrap(), MediaKind::Audio);
    }

    #[test]
    fn test_transport_parameters_wire_shape() {
        let parameters = TransportParameters {
            id: "t1".to_string(),
            ice_parameters: IceParameters {
                username_fragment: "ufrag".to_string(),
                password: "pwd".to_string(),
                ice_lite: true,
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: 1076302079,
                ip: "127.0.0.1".to_string(),
                protocol: "udp".to_string(),
                port: 40000,
                candidate_type: "host".to_string(),
            }],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: "AB:CD".to_string(),
                }],
            },
        };
        let json = serde_json::to_value(&parameters).unwrap();
        println!("{}", json);
        assert_eq!(json["iceParameters"]["usernameFragment"], "ufrag");
        assert_eq!(json["iceCandidates"][0]["type"], "host");
        assert_eq!(json["dtlsParameters"]["role"], "auto");
    }
}
