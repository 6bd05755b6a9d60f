use actix::Message;
use serde::{Deserialize, Serialize};

use crate::engine::{
    DtlsParameters, IceCandidate, IceParameters, MediaKind, RtpCapabilities, RtpParameters,
};

/// Which media direction a transport carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Produce,
    Consume,
}

/// One room member as seen in membership snapshots. Snapshots preserve join
/// order and the first joiner carries the admin flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub connection_id: String,
    pub display_name: String,
    pub is_admin: bool,
}

/// One producer as seen in producer-list snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub producer_id: String,
    pub connection_id: String,
    pub kind: MediaKind,
}

/// Requests a client sends over its signaling channel.
#[derive(Deserialize, Message, Debug)]
#[serde(tag = "action")]
#[rtype(result = "()")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        display_name: String,
        title: String,
    },
    #[serde(rename_all = "camelCase")]
    CreateTransport { direction: TransportDirection },
    #[serde(rename_all = "camelCase")]
    ConnectTransport {
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },
    #[serde(rename_all = "camelCase")]
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    #[serde(rename_all = "camelCase")]
    Consume {
        transport_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    },
    #[serde(rename_all = "camelCase")]
    ResumeConsumer { consumer_id: String },
}

/// Acknowledgements and broadcasts the server sends to clients.
#[derive(Serialize, Message, Debug, Clone)]
#[serde(tag = "action")]
#[rtype(result = "()")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Joined {
        connection_id: String,
        room_id: String,
        title: String,
        is_new_room: bool,
        router_capabilities: RtpCapabilities,
        members: Vec<MemberInfo>,
        producers: Vec<ProducerInfo>,
    },
    #[serde(rename_all = "camelCase")]
    TransportCreated {
        transport_id: String,
        direction: TransportDirection,
        ice_parameters: IceParameters,
        ice_candidates: Vec<IceCandidate>,
        dtls_parameters: DtlsParameters,
    },
    #[serde(rename_all = "camelCase")]
    TransportConnected { transport_id: String },
    #[serde(rename_all = "camelCase")]
    Produced { producer_id: String },
    #[serde(rename_all = "camelCase")]
    Consumed {
        consumer_id: String,
        producer_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    #[serde(rename_all = "camelCase")]
    ConsumerResumed { consumer_id: String },
    /// Membership snapshot sent to existing members when someone joins.
    #[serde(rename_all = "camelCase")]
    MemberJoined { members: Vec<MemberInfo> },
    /// Membership snapshot sent to remaining members when someone leaves.
    #[serde(rename_all = "camelCase")]
    MemberLeft { members: Vec<MemberInfo> },
    /// A new producer is available. Sent to every member except the producing
    /// connection, with the room's full producer list and membership.
    #[serde(rename_all = "camelCase")]
    ProducerAdded {
        producers: Vec<ProducerInfo>,
        members: Vec<MemberInfo>,
    },
    /// A producer stopped. Sent once per torn-down consumer relationship so
    /// subscribers can drop their local consumers.
    #[serde(rename_all = "camelCase")]
    ProducerClosed { producer_id: String },
    #[serde(rename_all = "camelCase")]
    Error { code: String, message: String },
}
