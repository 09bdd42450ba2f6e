//! Host-driven session core: the host passes events in, the core returns
//! actions (transport commands, timer starts/cancels, notifications).
//!
//! All mutation happens through [`SessionCore::handle_event`], which the host
//! must call from a single serialized context. Timer callbacks are delivered
//! back as [`SessionEvent::TimerFired`] and every firing is checked against
//! the live state, so a timer that outraces its cancellation is a no-op.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::diagnostics::{ConnectionDiagnostics, DiagnosticsReport, DisconnectReason};
use crate::gate::{
    ApprovalOutcome, DiscoveryDecision, InvitationDecision, InvitationDirection, InvitationGate,
    PendingInvitation,
};
use crate::identity::{PeerId, PeerIdentity};
use crate::keepalive::KeepAlive;
use crate::protocol::{DiscoveryInfo, Message, MessageFamily, MessageType, PairingMode, Role};
use crate::reconnect::{resolve_role, Reconnect};
use crate::transport::{PeerTransportState, TransportEvent};
use crate::trust::{TrustStore, TrustedPeerRecord};
use crate::wire;

/// Tunables for one session manager instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Keep-alive probe interval while no recording workload is active.
    pub keepalive_idle: Duration,
    /// Keep-alive probe interval while recording; longer so the probe does not
    /// compete with video encoding, still under the mesh idle cutoff.
    pub keepalive_recording: Duration,
    /// Delay between `Connected` entry and the first keep-alive, letting the
    /// transport fully establish.
    pub settle_delay: Duration,
    pub fast_retry_delay: Duration,
    pub standard_retry_delay: Duration,
    /// Pending invitations older than this expire unanswered.
    pub invitation_ttl: Duration,
    pub invite_timeout_secs: u32,
    /// A session at least this long counts as a proven link; its drop gets the
    /// fast retry.
    pub stable_session_threshold: Duration,
    pub pairing_mode: PairingMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_idle: Duration::from_secs(5),
            keepalive_recording: Duration::from_secs(15),
            settle_delay: Duration::from_millis(500),
            fast_retry_delay: Duration::from_secs(1),
            standard_retry_delay: Duration::from_secs(5),
            invitation_ttl: Duration::from_secs(30),
            invite_timeout_secs: 30,
            stable_session_threshold: Duration::from_secs(30),
            pairing_mode: PairingMode::Automatic,
        }
    }
}

/// Lifecycle of the single logical session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Searching,
    Connecting(PeerId),
    Connected(PeerId),
    Disconnected(PeerId),
}

/// Cancellable timers owned by the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Post-connect settle delay before keep-alive starts.
    ConnectSettle,
    KeepAlive,
    Reconnect,
    InvitationExpiry(PeerId),
}

/// Everything that can drive the session, serialized by the host.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StartSession { role: Role },
    StopSession,
    Transport(TransportEvent),
    Send { message: Message },
    /// The host's asynchronous send for `message` failed.
    SendFailed { message: Message },
    Approve { peer_id: PeerId, remember: bool },
    Decline { peer_id: PeerId },
    SetRecordingActive { active: bool },
    EnableAutoReconnect,
    DisableAutoReconnect,
    TimerFired { timer: TimerKind },
}

/// Outbound notifications for collaborators (UI, video pipeline).
#[derive(Debug, Clone)]
pub enum SessionNotification {
    StateChanged(ConnectionState),
    MessageReceived(Message),
    InvitationPending(PendingInvitation),
    /// The pending invitation for this peer expired or was withdrawn.
    InvitationExpired { peer_id: PeerId },
}

/// Side effects for the host to perform, in order.
#[derive(Debug, Clone)]
pub enum SessionAction {
    StartAdvertising { info: DiscoveryInfo },
    StopAdvertising,
    StartBrowsing,
    StopBrowsing,
    Invite { peer_id: PeerId, timeout_secs: u32 },
    RespondToInvitation { peer_id: PeerId, accept: bool },
    SendMessage { peer_id: PeerId, message: Message, reliable: bool },
    DisconnectAll,
    StartTimer { timer: TimerKind, delay: Duration },
    CancelTimer { timer: TimerKind },
    Notify(SessionNotification),
}

/// The session manager core. One instance per process.
pub struct SessionCore {
    identity: PeerIdentity,
    config: SessionConfig,
    state: ConnectionState,
    last_role: Option<Role>,
    last_peer: Option<PeerId>,
    connected_at: Option<DateTime<Utc>>,
    gate: InvitationGate,
    keepalive: KeepAlive,
    reconnect: Reconnect,
    trust: Box<dyn TrustStore>,
    diagnostics: ConnectionDiagnostics,
    retry_queue: Vec<Message>,
    retried: HashSet<Uuid>,
}

impl SessionCore {
    pub fn new(identity: PeerIdentity, config: SessionConfig, trust: Box<dyn TrustStore>) -> Self {
        let keepalive = KeepAlive::new(config.keepalive_idle, config.keepalive_recording);
        let reconnect = Reconnect::new(
            config.stable_session_threshold,
            config.fast_retry_delay,
            config.standard_retry_delay,
        );
        Self {
            identity,
            config,
            state: ConnectionState::Idle,
            last_role: None,
            last_peer: None,
            connected_at: None,
            gate: InvitationGate::new(),
            keepalive,
            reconnect,
            trust,
            diagnostics: ConnectionDiagnostics::new(),
            retry_queue: Vec::new(),
            retried: HashSet::new(),
        }
    }

    pub fn current_state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        self.diagnostics.snapshot()
    }

    /// Single serialized entry point.
    pub fn handle_event(&mut self, event: SessionEvent, now: DateTime<Utc>) -> Vec<SessionAction> {
        match event {
            SessionEvent::StartSession { role } => self.on_start(role),
            SessionEvent::StopSession => self.on_stop(now),
            SessionEvent::Transport(ev) => self.on_transport(ev, now),
            SessionEvent::Send { message } => self.on_send(message),
            SessionEvent::SendFailed { message } => {
                self.queue_for_retry(message);
                Vec::new()
            }
            SessionEvent::Approve { peer_id, remember } => self.on_approve(peer_id, remember, now),
            SessionEvent::Decline { peer_id } => self.on_decline(peer_id),
            SessionEvent::SetRecordingActive { active } => self.on_set_recording(active),
            SessionEvent::EnableAutoReconnect => {
                self.reconnect.enable();
                Vec::new()
            }
            SessionEvent::DisableAutoReconnect => {
                self.reconnect.disable();
                vec![SessionAction::CancelTimer {
                    timer: TimerKind::Reconnect,
                }]
            }
            SessionEvent::TimerFired { timer } => self.on_timer(timer, now),
        }
    }

    fn on_start(&mut self, role: Role) -> Vec<SessionAction> {
        match self.state {
            ConnectionState::Idle | ConnectionState::Disconnected(_) | ConnectionState::Searching => {
                self.last_role = Some(role);
                // A fresh start restores the auto-reconnect default.
                self.reconnect.enable();
                let mut actions = Vec::new();
                self.enter_searching(role, &mut actions);
                actions
            }
            _ => {
                debug!(state = ?self.state, "start_session ignored");
                Vec::new()
            }
        }
    }

    fn on_stop(&mut self, now: DateTime<Utc>) -> Vec<SessionAction> {
        // Idempotent: a second stop changes nothing.
        if self.state == ConnectionState::Idle {
            return Vec::new();
        }
        let mut actions = vec![
            SessionAction::StopAdvertising,
            SessionAction::StopBrowsing,
            SessionAction::DisconnectAll,
            SessionAction::CancelTimer {
                timer: TimerKind::ConnectSettle,
            },
            SessionAction::CancelTimer {
                timer: TimerKind::KeepAlive,
            },
            SessionAction::CancelTimer {
                timer: TimerKind::Reconnect,
            },
        ];
        for peer_id in self.gate.clear() {
            actions.push(SessionAction::CancelTimer {
                timer: TimerKind::InvitationExpiry(peer_id),
            });
        }
        if let ConnectionState::Connected(_) = &self.state {
            let duration = self.session_duration(now);
            self.diagnostics
                .record_disconnection(DisconnectReason::Stopped, duration);
        }
        self.retry_queue.clear();
        self.retried.clear();
        self.keepalive.stop();
        // A deliberate teardown is never silently reversed.
        self.reconnect.disable();
        self.connected_at = None;
        self.set_state(ConnectionState::Idle, &mut actions);
        actions
    }

    fn on_transport(&mut self, event: TransportEvent, now: DateTime<Utc>) -> Vec<SessionAction> {
        match event {
            TransportEvent::PeerFound { peer, info } => self.on_peer_found(peer, info, now),
            TransportEvent::PeerLost { peer_id } => self.on_peer_lost(peer_id),
            TransportEvent::InvitationReceived { peer, info } => {
                self.on_invitation(peer, info, now)
            }
            TransportEvent::PeerStateChanged { peer_id, state } => {
                self.on_peer_state(peer_id, state, now)
            }
            TransportEvent::DataReceived { peer_id, bytes } => self.on_data(peer_id, &bytes, now),
        }
    }

    fn on_peer_found(
        &mut self,
        peer: PeerIdentity,
        info: Option<DiscoveryInfo>,
        now: DateTime<Utc>,
    ) -> Vec<SessionAction> {
        if peer.id == self.identity.id {
            return Vec::new();
        }
        // Only an actively searching session reacts to discovery; a peer found
        // while connecting or connected is ignored here.
        if self.state != ConnectionState::Searching {
            return Vec::new();
        }
        let trusted = self.is_trusted(&peer.id);
        let mut actions = Vec::new();
        match self
            .gate
            .on_peer_discovered(&self.identity.id, &peer, info, trusted, now)
        {
            DiscoveryDecision::Invite => {
                self.touch_trust(&peer.id, now);
                self.issue_invite(peer.id, &mut actions);
            }
            DiscoveryDecision::Wait => {
                self.touch_trust(&peer.id, now);
            }
            DiscoveryDecision::Surface(invitation) => {
                actions.push(SessionAction::StartTimer {
                    timer: TimerKind::InvitationExpiry(peer.id.clone()),
                    delay: self.config.invitation_ttl,
                });
                actions.push(SessionAction::Notify(SessionNotification::InvitationPending(
                    invitation,
                )));
            }
            DiscoveryDecision::Ignore => {}
        }
        actions
    }

    fn on_peer_lost(&mut self, peer_id: PeerId) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.gate.remove(&peer_id).is_some() {
            actions.push(SessionAction::CancelTimer {
                timer: TimerKind::InvitationExpiry(peer_id.clone()),
            });
            actions.push(SessionAction::Notify(
                SessionNotification::InvitationExpired { peer_id },
            ));
        }
        actions
    }

    fn on_invitation(
        &mut self,
        peer: PeerIdentity,
        info: Option<DiscoveryInfo>,
        now: DateTime<Utc>,
    ) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match &self.state {
            // One session at a time: a second inbound attempt is rejected.
            ConnectionState::Connected(current) | ConnectionState::Connecting(current) => {
                if *current != peer.id {
                    actions.push(SessionAction::RespondToInvitation {
                        peer_id: peer.id,
                        accept: false,
                    });
                }
                return actions;
            }
            ConnectionState::Idle => {
                actions.push(SessionAction::RespondToInvitation {
                    peer_id: peer.id,
                    accept: false,
                });
                return actions;
            }
            _ => {}
        }
        let trusted = self.is_trusted(&peer.id);
        match self.gate.on_invitation_received(&peer, info, trusted, now) {
            InvitationDecision::Accept => {
                if trusted {
                    self.touch_trust(&peer.id, now);
                }
                actions.push(SessionAction::CancelTimer {
                    timer: TimerKind::InvitationExpiry(peer.id.clone()),
                });
                self.accept_invitation(peer.id, &mut actions);
            }
            InvitationDecision::Surface(invitation) => {
                actions.push(SessionAction::StartTimer {
                    timer: TimerKind::InvitationExpiry(peer.id.clone()),
                    delay: self.config.invitation_ttl,
                });
                actions.push(SessionAction::Notify(SessionNotification::InvitationPending(
                    invitation,
                )));
            }
            InvitationDecision::Ignore => {}
        }
        actions
    }

    fn on_peer_state(
        &mut self,
        peer_id: PeerId,
        state: PeerTransportState,
        now: DateTime<Utc>,
    ) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match state {
            PeerTransportState::Connecting => match &self.state {
                ConnectionState::Searching => {
                    self.set_state(ConnectionState::Connecting(peer_id), &mut actions);
                }
                ConnectionState::Connecting(current) if *current == peer_id => {}
                _ => debug!(%peer_id, state = ?self.state, "connecting report ignored"),
            },
            PeerTransportState::Connected => match self.state.clone() {
                ConnectionState::Connecting(current) if current == peer_id => {
                    self.enter_connected(peer_id, now, &mut actions);
                }
                // The transport can race past its own connecting report; pass
                // through Connecting so observers always see the full sequence.
                ConnectionState::Searching => {
                    self.set_state(ConnectionState::Connecting(peer_id.clone()), &mut actions);
                    self.enter_connected(peer_id, now, &mut actions);
                }
                _ => debug!(%peer_id, state = ?self.state, "connected report ignored"),
            },
            PeerTransportState::NotConnected => match self.state.clone() {
                ConnectionState::Connected(current) if current == peer_id => {
                    self.enter_disconnected(peer_id, now, &mut actions);
                }
                ConnectionState::Connecting(current) if current == peer_id => {
                    // The attempt fell through; discovery is still running.
                    self.set_state(ConnectionState::Searching, &mut actions);
                }
                _ => {}
            },
        }
        actions
    }

    fn enter_connected(
        &mut self,
        peer_id: PeerId,
        now: DateTime<Utc>,
        actions: &mut Vec<SessionAction>,
    ) {
        self.connected_at = Some(now);
        self.last_peer = Some(peer_id.clone());
        self.diagnostics.record_connection_success();
        self.touch_trust(&peer_id, now);
        // Paired; no need to stay discoverable.
        actions.push(SessionAction::StopAdvertising);
        actions.push(SessionAction::StopBrowsing);
        actions.push(SessionAction::CancelTimer {
            timer: TimerKind::Reconnect,
        });
        if self.gate.remove(&peer_id).is_some() {
            actions.push(SessionAction::CancelTimer {
                timer: TimerKind::InvitationExpiry(peer_id.clone()),
            });
        }
        actions.push(SessionAction::StartTimer {
            timer: TimerKind::ConnectSettle,
            delay: self.config.settle_delay,
        });
        self.set_state(ConnectionState::Connected(peer_id), actions);
    }

    fn enter_disconnected(
        &mut self,
        peer_id: PeerId,
        now: DateTime<Utc>,
        actions: &mut Vec<SessionAction>,
    ) {
        let duration = self.session_duration(now);
        self.connected_at = None;
        self.keepalive.stop();
        actions.push(SessionAction::CancelTimer {
            timer: TimerKind::ConnectSettle,
        });
        actions.push(SessionAction::CancelTimer {
            timer: TimerKind::KeepAlive,
        });
        self.diagnostics
            .record_disconnection(DisconnectReason::PeerDropped, duration);
        self.set_state(ConnectionState::Disconnected(peer_id), actions);
        if self.reconnect.enabled() {
            let policy = self.reconnect.policy_for(duration);
            actions.push(SessionAction::StartTimer {
                timer: TimerKind::Reconnect,
                delay: self.reconnect.delay(policy),
            });
        }
    }

    fn on_data(&mut self, peer_id: PeerId, bytes: &[u8], now: DateTime<Utc>) -> Vec<SessionAction> {
        let message = match wire::decode_frame(bytes) {
            Ok((message, _)) => message,
            Err(err) => {
                // Malformed frames are dropped; they never affect the session.
                debug!(%peer_id, %err, "dropping undecodable frame");
                return Vec::new();
            }
        };
        self.diagnostics.record_message_received();
        if matches!(
            message.message_type,
            MessageType::Ping | MessageType::Pong
        ) {
            self.diagnostics.record_heartbeat_received();
        }
        let mut actions = Vec::new();
        // Ping is answered before any further dispatch.
        if message.message_type == MessageType::Ping {
            let pong = Message::new(
                MessageType::Pong,
                Some(heartbeat_payload(now)),
                self.identity.id.clone(),
                now,
            );
            self.push_send(peer_id, pong, &mut actions);
        }
        actions.push(SessionAction::Notify(SessionNotification::MessageReceived(
            message,
        )));
        actions
    }

    fn on_send(&mut self, message: Message) -> Vec<SessionAction> {
        match self.state.clone() {
            ConnectionState::Connected(peer_id) => {
                let mut actions = Vec::new();
                self.push_send(peer_id, message, &mut actions);
                actions
            }
            _ => {
                self.queue_for_retry(message);
                Vec::new()
            }
        }
    }

    /// Lifecycle messages get exactly one retry, flushed on the next connect;
    /// control and realtime messages are dropped.
    fn queue_for_retry(&mut self, message: Message) {
        if message.family() == MessageFamily::Lifecycle && !self.retried.contains(&message.id) {
            self.retried.insert(message.id);
            self.retry_queue.push(message);
        } else {
            debug!(message_type = ?message.message_type, "dropping unsendable message");
        }
    }

    fn push_send(&mut self, peer_id: PeerId, message: Message, actions: &mut Vec<SessionAction>) {
        let reliable = message.family() != MessageFamily::Realtime;
        self.diagnostics.record_message_sent();
        if matches!(
            message.message_type,
            MessageType::Ping | MessageType::Pong
        ) {
            self.diagnostics.record_heartbeat_sent();
        }
        actions.push(SessionAction::SendMessage {
            peer_id,
            message,
            reliable,
        });
    }

    fn on_approve(
        &mut self,
        peer_id: PeerId,
        remember: bool,
        now: DateTime<Utc>,
    ) -> Vec<SessionAction> {
        let outcome = self.gate.approve(&self.identity.id, &peer_id);
        let invitation = match &outcome {
            ApprovalOutcome::NotPending => {
                debug!(%peer_id, "approve without pending invitation");
                return Vec::new();
            }
            ApprovalOutcome::Invite(i)
            | ApprovalOutcome::Accept(i)
            | ApprovalOutcome::WaitForInvite(i) => i.clone(),
        };
        self.remember_if_requested(&invitation, remember, now);
        let mut actions = vec![SessionAction::CancelTimer {
            timer: TimerKind::InvitationExpiry(peer_id.clone()),
        }];
        match outcome {
            ApprovalOutcome::Invite(_) => self.issue_invite(peer_id, &mut actions),
            ApprovalOutcome::Accept(_) => self.accept_invitation(peer_id, &mut actions),
            // The peer holds the lower id; its invitation will be accepted on
            // arrival without a second prompt.
            _ => {}
        }
        actions
    }

    fn on_decline(&mut self, peer_id: PeerId) -> Vec<SessionAction> {
        let Some(invitation) = self.gate.decline(&peer_id) else {
            return Vec::new();
        };
        let mut actions = vec![SessionAction::CancelTimer {
            timer: TimerKind::InvitationExpiry(peer_id.clone()),
        }];
        if invitation.direction == InvitationDirection::Incoming {
            actions.push(SessionAction::RespondToInvitation {
                peer_id,
                accept: false,
            });
        }
        actions
    }

    fn on_set_recording(&mut self, active: bool) -> Vec<SessionAction> {
        let changed = self.keepalive.set_recording_active(active);
        if !changed || !self.keepalive.is_running() {
            return Vec::new();
        }
        // Swap immediately: replace the running timer, never mutate its period.
        vec![
            SessionAction::CancelTimer {
                timer: TimerKind::KeepAlive,
            },
            SessionAction::StartTimer {
                timer: TimerKind::KeepAlive,
                delay: self.keepalive.interval(),
            },
        ]
    }

    fn on_timer(&mut self, timer: TimerKind, now: DateTime<Utc>) -> Vec<SessionAction> {
        match timer {
            TimerKind::ConnectSettle => self.on_settle(now),
            TimerKind::KeepAlive => self.on_keepalive(now),
            TimerKind::Reconnect => self.on_reconnect_timer(),
            TimerKind::InvitationExpiry(peer_id) => {
                let mut actions = Vec::new();
                if self.gate.expire(&peer_id).is_some() {
                    actions.push(SessionAction::Notify(
                        SessionNotification::InvitationExpired { peer_id },
                    ));
                }
                actions
            }
        }
    }

    fn on_settle(&mut self, now: DateTime<Utc>) -> Vec<SessionAction> {
        let ConnectionState::Connected(peer_id) = self.state.clone() else {
            return Vec::new();
        };
        let mut actions = Vec::new();
        let ready = Message::new(
            MessageType::ConnectionReady,
            None,
            self.identity.id.clone(),
            now,
        );
        self.push_send(peer_id.clone(), ready, &mut actions);
        for message in std::mem::take(&mut self.retry_queue) {
            self.push_send(peer_id.clone(), message, &mut actions);
        }
        self.keepalive.start();
        actions.push(SessionAction::StartTimer {
            timer: TimerKind::KeepAlive,
            delay: self.keepalive.interval(),
        });
        actions
    }

    fn on_keepalive(&mut self, now: DateTime<Utc>) -> Vec<SessionAction> {
        let ConnectionState::Connected(peer_id) = self.state.clone() else {
            return Vec::new();
        };
        if !self.keepalive.is_running() {
            return Vec::new();
        }
        let mut actions = Vec::new();
        // Pong doubles as the heartbeat; the timestamp payload keeps the frame
        // non-empty.
        let probe = Message::new(
            MessageType::Pong,
            Some(heartbeat_payload(now)),
            self.identity.id.clone(),
            now,
        );
        self.push_send(peer_id, probe, &mut actions);
        actions.push(SessionAction::StartTimer {
            timer: TimerKind::KeepAlive,
            delay: self.keepalive.interval(),
        });
        actions
    }

    fn on_reconnect_timer(&mut self) -> Vec<SessionAction> {
        if !self.reconnect.enabled() {
            return Vec::new();
        }
        if !matches!(self.state, ConnectionState::Disconnected(_)) {
            return Vec::new();
        }
        let role = resolve_role(self.trust.as_ref(), self.last_peer.as_ref(), self.last_role);
        self.last_role = Some(role);
        let mut actions = Vec::new();
        self.enter_searching(role, &mut actions);
        actions
    }

    fn enter_searching(&mut self, role: Role, actions: &mut Vec<SessionAction>) {
        let info = DiscoveryInfo {
            role,
            pairing_mode: self.config.pairing_mode,
        };
        actions.push(SessionAction::StartAdvertising { info });
        actions.push(SessionAction::StartBrowsing);
        self.set_state(ConnectionState::Searching, actions);
    }

    fn issue_invite(&mut self, peer_id: PeerId, actions: &mut Vec<SessionAction>) {
        self.diagnostics.record_connection_attempt();
        actions.push(SessionAction::Invite {
            peer_id: peer_id.clone(),
            timeout_secs: self.config.invite_timeout_secs,
        });
        self.set_state(ConnectionState::Connecting(peer_id), actions);
    }

    fn accept_invitation(&mut self, peer_id: PeerId, actions: &mut Vec<SessionAction>) {
        self.diagnostics.record_connection_attempt();
        actions.push(SessionAction::RespondToInvitation {
            peer_id: peer_id.clone(),
            accept: true,
        });
        self.set_state(ConnectionState::Connecting(peer_id), actions);
    }

    fn remember_if_requested(
        &mut self,
        invitation: &PendingInvitation,
        remember: bool,
        now: DateTime<Utc>,
    ) {
        if !remember {
            return;
        }
        let role = invitation
            .info
            .map(|i| i.role)
            .unwrap_or(Role::Recorder);
        let record = TrustedPeerRecord {
            peer_id: invitation.peer.id.clone(),
            role,
            display_name: invitation.peer.display_name.clone(),
            last_connected_at: now,
        };
        if let Err(err) = self.trust.add_trusted(record) {
            warn!(%err, peer_id = %invitation.peer.id, "failed to remember device");
        }
    }

    fn set_state(&mut self, state: ConnectionState, actions: &mut Vec<SessionAction>) {
        if self.state == state {
            return;
        }
        self.state = state.clone();
        actions.push(SessionAction::Notify(SessionNotification::StateChanged(
            state,
        )));
    }

    fn session_duration(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.connected_at
            .and_then(|start| (now - start).to_std().ok())
    }

    /// A store failure means "not trusted", never a fatal error.
    fn is_trusted(&self, peer_id: &PeerId) -> bool {
        match self.trust.is_trusted(peer_id) {
            Ok(trusted) => trusted,
            Err(err) => {
                warn!(%err, "trust store unavailable; treating peer as untrusted");
                false
            }
        }
    }

    fn touch_trust(&mut self, peer_id: &PeerId, now: DateTime<Utc>) {
        if let Err(err) = self.trust.update_last_connected(peer_id, now) {
            warn!(%err, %peer_id, "failed to update last-connected time");
        }
    }
}

fn heartbeat_payload(now: DateTime<Utc>) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    payload.insert("sent_at".to_string(), now.to_rfc3339());
    payload
}
