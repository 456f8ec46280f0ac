//! Parsed peer messages.
//!
//! Messages form a closed sum type; every consumer classifies with
//! [`Message::kind`] and matches on [`MessageKind`], which keeps the
//! per-context dispatch exhaustive.

use std::net::{Ipv6Addr, SocketAddr};

use super::handshake::NodeIdHandshake;
use super::value_objects::Hash;

/// Number of peer endpoints carried by a keepalive.
pub const KEEPALIVE_PEERS: usize = 8;

/// Keepalive: a sample of the sender's peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    /// Peer endpoints advertised by the sender.
    pub peers: [SocketAddr; KEEPALIVE_PEERS],
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            peers: [SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)); KEEPALIVE_PEERS],
        }
    }
}

/// Publish of a single block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Serialized block.
    pub block: Vec<u8>,
}

/// Request for votes on (hash, root) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfirmReq {
    /// Block hash and root pairs.
    pub roots_hashes: Vec<(Hash, Hash)>,
}

/// Vote broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfirmAck {
    /// Serialized vote.
    pub vote: Vec<u8>,
}

/// Request for account frontiers, used by both bootstrap and realtime peers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrontierReq {
    /// First account to return.
    pub start: Hash,
    /// Only accounts modified within this many seconds.
    pub age: u32,
    /// Maximum number of frontiers.
    pub count: u32,
}

/// Pull a chain of blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkPull {
    /// Account or block to start from.
    pub start: Hash,
    /// Block to stop at.
    pub end: Hash,
    /// Optional block count limit.
    pub count: Option<u32>,
}

/// Pull pending entries of an account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkPullAccount {
    /// Account to pull.
    pub account: Hash,
    /// Entries below this amount are skipped.
    pub minimum_amount: u128,
    /// Response shape flags.
    pub flags: u8,
}

/// Request for the receiver's telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TelemetryReq;

/// Telemetry answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TelemetryAck {
    /// Serialized telemetry data.
    pub data: Vec<u8>,
}

/// Ascending bootstrap pull request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AscPullReq {
    /// Request id echoed in the ack.
    pub id: u64,
    /// Serialized request body.
    pub payload: Vec<u8>,
}

/// Ascending bootstrap pull answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AscPullAck {
    /// Id of the answered request.
    pub id: u64,
    /// Serialized response body.
    pub payload: Vec<u8>,
}

/// A parsed peer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Node-id handshake query and/or response.
    NodeIdHandshake(NodeIdHandshake),
    /// Pull a chain range (bootstrap).
    BulkPull(BulkPull),
    /// Pull pending entries of one account (bootstrap).
    BulkPullAccount(BulkPullAccount),
    /// Push blocks to us (bootstrap).
    BulkPush,
    /// Request account frontiers (bootstrap, or realtime once classified).
    FrontierReq(FrontierReq),
    /// Peer sample gossip (realtime).
    Keepalive(Keepalive),
    /// Block broadcast (realtime).
    Publish(Publish),
    /// Vote request (realtime).
    ConfirmReq(ConfirmReq),
    /// Vote (realtime).
    ConfirmAck(ConfirmAck),
    /// Telemetry request (realtime).
    TelemetryReq(TelemetryReq),
    /// Telemetry answer (realtime).
    TelemetryAck(TelemetryAck),
    /// Ascending bootstrap request (realtime).
    AscPullReq(AscPullReq),
    /// Ascending bootstrap answer (realtime).
    AscPullAck(AscPullAck),
}

/// Variant tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// [`Message::NodeIdHandshake`].
    NodeIdHandshake,
    /// [`Message::BulkPull`].
    BulkPull,
    /// [`Message::BulkPullAccount`].
    BulkPullAccount,
    /// [`Message::BulkPush`].
    BulkPush,
    /// [`Message::FrontierReq`].
    FrontierReq,
    /// [`Message::Keepalive`].
    Keepalive,
    /// [`Message::Publish`].
    Publish,
    /// [`Message::ConfirmReq`].
    ConfirmReq,
    /// [`Message::ConfirmAck`].
    ConfirmAck,
    /// [`Message::TelemetryReq`].
    TelemetryReq,
    /// [`Message::TelemetryAck`].
    TelemetryAck,
    /// [`Message::AscPullReq`].
    AscPullReq,
    /// [`Message::AscPullAck`].
    AscPullAck,
}

impl MessageKind {
    /// Every variant, in wire order.
    pub const ALL: [MessageKind; 13] = [
        MessageKind::NodeIdHandshake,
        MessageKind::BulkPull,
        MessageKind::BulkPullAccount,
        MessageKind::BulkPush,
        MessageKind::FrontierReq,
        MessageKind::Keepalive,
        MessageKind::Publish,
        MessageKind::ConfirmReq,
        MessageKind::ConfirmAck,
        MessageKind::TelemetryReq,
        MessageKind::TelemetryAck,
        MessageKind::AscPullReq,
        MessageKind::AscPullAck,
    ];

    /// Messages served by a bootstrap connection.
    pub fn is_bootstrap(self) -> bool {
        matches!(
            self,
            MessageKind::BulkPull
                | MessageKind::BulkPullAccount
                | MessageKind::BulkPush
                | MessageKind::FrontierReq
        )
    }

    /// Messages relayed by a realtime connection.
    pub fn is_realtime(self) -> bool {
        matches!(
            self,
            MessageKind::Keepalive
                | MessageKind::Publish
                | MessageKind::ConfirmReq
                | MessageKind::ConfirmAck
                | MessageKind::FrontierReq
                | MessageKind::TelemetryReq
                | MessageKind::TelemetryAck
                | MessageKind::AscPullReq
                | MessageKind::AscPullAck
        )
    }

    /// Lower-case name used in logs and stats.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::NodeIdHandshake => "node_id_handshake",
            MessageKind::BulkPull => "bulk_pull",
            MessageKind::BulkPullAccount => "bulk_pull_account",
            MessageKind::BulkPush => "bulk_push",
            MessageKind::FrontierReq => "frontier_req",
            MessageKind::Keepalive => "keepalive",
            MessageKind::Publish => "publish",
            MessageKind::ConfirmReq => "confirm_req",
            MessageKind::ConfirmAck => "confirm_ack",
            MessageKind::TelemetryReq => "telemetry_req",
            MessageKind::TelemetryAck => "telemetry_ack",
            MessageKind::AscPullReq => "asc_pull_req",
            MessageKind::AscPullAck => "asc_pull_ack",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// Classify a message into its variant tag.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::NodeIdHandshake(_) => MessageKind::NodeIdHandshake,
            Message::BulkPull(_) => MessageKind::BulkPull,
            Message::BulkPullAccount(_) => MessageKind::BulkPullAccount,
            Message::BulkPush => MessageKind::BulkPush,
            Message::FrontierReq(_) => MessageKind::FrontierReq,
            Message::Keepalive(_) => MessageKind::Keepalive,
            Message::Publish(_) => MessageKind::Publish,
            Message::ConfirmReq(_) => MessageKind::ConfirmReq,
            Message::ConfirmAck(_) => MessageKind::ConfirmAck,
            Message::TelemetryReq(_) => MessageKind::TelemetryReq,
            Message::TelemetryAck(_) => MessageKind::TelemetryAck,
            Message::AscPullReq(_) => MessageKind::AscPullReq,
            Message::AscPullAck(_) => MessageKind::AscPullAck,
        }
    }
}
