//! RinkLink message protocol: typed envelope, message families, roles.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::PeerId;

/// Current protocol version. Carried in discovery beacons and the session hello.
pub const PROTOCOL_VERSION: u8 = 1;

/// Pairing namespace identifier, constant across all instances.
pub const SERVICE_ID: &str = "rinklink";

/// Which side of the pairing a device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Directs the recording and drives the game clock.
    Controller,
    /// Captures video and reports recording state.
    Recorder,
}

impl Role {
    /// The role the other side of the pairing plays.
    pub fn counterpart(self) -> Role {
        match self {
            Role::Controller => Role::Recorder,
            Role::Recorder => Role::Controller,
        }
    }
}

/// How the advertising side wants connection approval handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingMode {
    /// Connect without prompting once trust is established.
    Automatic,
    /// Always surface an approval prompt.
    Manual,
}

/// Typed discovery metadata attached to advertising, decoded once at the
/// transport boundary instead of threading string maps around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub role: Role,
    pub pairing_mode: PairingMode,
}

/// Delivery family a message type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFamily {
    /// Liveness only; ping is auto-answered with pong.
    Control,
    /// At-least-once desired; a failed send gets one retry after reconnect.
    Lifecycle,
    /// Best-effort, most-recent-wins.
    Realtime,
}

/// Closed set of message types exchanged over a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Ping,
    Pong,
    ConnectionReady,
    GameStarting,
    GameEnded,
    StartRecording,
    StopRecording,
    RecordingStateUpdate,
    RequestRecordingState,
    ScoreUpdate,
    ClockControl,
    PeriodChange,
    ClockSync,
    GameStateUpdate,
}

impl MessageType {
    pub fn family(self) -> MessageFamily {
        match self {
            MessageType::Ping | MessageType::Pong | MessageType::ConnectionReady => {
                MessageFamily::Control
            }
            MessageType::GameStarting
            | MessageType::GameEnded
            | MessageType::StartRecording
            | MessageType::StopRecording
            | MessageType::RecordingStateUpdate
            | MessageType::RequestRecordingState => MessageFamily::Lifecycle,
            MessageType::ScoreUpdate
            | MessageType::ClockControl
            | MessageType::PeriodChange
            | MessageType::ClockSync
            | MessageType::GameStateUpdate => MessageFamily::Realtime,
        }
    }

    pub const ALL: [MessageType; 14] = [
        MessageType::Ping,
        MessageType::Pong,
        MessageType::ConnectionReady,
        MessageType::GameStarting,
        MessageType::GameEnded,
        MessageType::StartRecording,
        MessageType::StopRecording,
        MessageType::RecordingStateUpdate,
        MessageType::RequestRecordingState,
        MessageType::ScoreUpdate,
        MessageType::ClockControl,
        MessageType::PeriodChange,
        MessageType::ClockSync,
        MessageType::GameStateUpdate,
    ];
}

/// A single protocol message. Immutable once constructed; payload keys are
/// opaque strings carried for collaborators, never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub message_type: MessageType,
    pub payload: Option<BTreeMap<String, String>>,
    pub timestamp: DateTime<Utc>,
    pub sender_id: PeerId,
}

impl Message {
    pub fn new(
        message_type: MessageType,
        payload: Option<BTreeMap<String, String>>,
        sender_id: PeerId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            payload,
            timestamp: now,
            sender_id,
        }
    }

    pub fn family(&self) -> MessageFamily {
        self.message_type.family()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterpart_is_involutive() {
        assert_eq!(Role::Controller.counterpart(), Role::Recorder);
        assert_eq!(Role::Recorder.counterpart().counterpart(), Role::Recorder);
    }

    #[test]
    fn families_partition_all_types() {
        let control = MessageType::ALL
            .iter()
            .filter(|t| t.family() == MessageFamily::Control)
            .count();
        let lifecycle = MessageType::ALL
            .iter()
            .filter(|t| t.family() == MessageFamily::Lifecycle)
            .count();
        let realtime = MessageType::ALL
            .iter()
            .filter(|t| t.family() == MessageFamily::Realtime)
            .count();
        assert_eq!(control, 3);
        assert_eq!(lifecycle, 6);
        assert_eq!(realtime, 5);
    }

    #[test]
    fn new_message_stamps_unique_ids() {
        let sender = PeerId::new("ab");
        let now = Utc::now();
        let a = Message::new(MessageType::Ping, None, sender.clone(), now);
        let b = Message::new(MessageType::Ping, None, sender, now);
        assert_ne!(a.id, b.id);
        assert_eq!(a.timestamp, now);
    }
}
