//! Session actor: owns the core and a transport, serializes every input.
//!
//! Transport events, timer firings, and user commands all funnel through one
//! unbounded channel, so the core only ever sees one event at a time. Timers
//! are abortable sleeps that post `TimerFired` back through the same channel;
//! a firing that loses the race against its cancellation is rejected by the
//! core's own state checks.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use rink_core::session::{
    SessionAction, SessionCore, SessionEvent, SessionNotification, TimerKind,
};
use rink_core::transport::{Transport, TransportEvent};
use rink_core::{encode_frame, DiagnosticsReport, Message, PeerId, Role};

enum LoopInput {
    Event(SessionEvent),
    Diagnostics(oneshot::Sender<DiagnosticsReport>),
}

/// Clonable front for the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    input_tx: mpsc::UnboundedSender<LoopInput>,
    notify_tx: broadcast::Sender<SessionNotification>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notify_tx.subscribe()
    }

    pub fn start_session(&self, role: Role) {
        self.post(SessionEvent::StartSession { role });
    }

    pub fn stop_session(&self) {
        self.post(SessionEvent::StopSession);
    }

    pub fn send(&self, message: Message) {
        self.post(SessionEvent::Send { message });
    }

    pub fn approve(&self, peer_id: PeerId, remember: bool) {
        self.post(SessionEvent::Approve { peer_id, remember });
    }

    pub fn decline(&self, peer_id: PeerId) {
        self.post(SessionEvent::Decline { peer_id });
    }

    pub fn set_recording_active(&self, active: bool) {
        self.post(SessionEvent::SetRecordingActive { active });
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.post(if enabled {
            SessionEvent::EnableAutoReconnect
        } else {
            SessionEvent::DisableAutoReconnect
        });
    }

    /// Snapshot of the session health counters. `None` if the actor is gone.
    pub async fn diagnostics(&self) -> Option<DiagnosticsReport> {
        let (tx, rx) = oneshot::channel();
        self.input_tx.send(LoopInput::Diagnostics(tx)).ok()?;
        rx.await.ok()
    }

    fn post(&self, event: SessionEvent) {
        let _ = self.input_tx.send(LoopInput::Event(event));
    }
}

/// Spawn the actor. Transport events arrive on `transport_events` and are
/// forwarded into the serialized loop.
pub fn spawn_session(
    core: SessionCore,
    transport: Box<dyn Transport>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) -> SessionHandle {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (notify_tx, _) = broadcast::channel(64);

    let forward_tx = input_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = transport_events.recv().await {
            if forward_tx
                .send(LoopInput::Event(SessionEvent::Transport(event)))
                .is_err()
            {
                break;
            }
        }
    });

    let runner = Runner {
        core,
        transport,
        timers: HashMap::new(),
        input_tx: input_tx.clone(),
        notify_tx: notify_tx.clone(),
    };
    tokio::spawn(runner.run(input_rx));

    SessionHandle {
        input_tx,
        notify_tx,
    }
}

struct Runner {
    core: SessionCore,
    transport: Box<dyn Transport>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
    input_tx: mpsc::UnboundedSender<LoopInput>,
    notify_tx: broadcast::Sender<SessionNotification>,
}

impl Runner {
    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<LoopInput>) {
        while let Some(input) = input_rx.recv().await {
            match input {
                LoopInput::Event(event) => {
                    if let SessionEvent::TimerFired { timer } = &event {
                        self.timers.remove(timer);
                    }
                    let actions = self.core.handle_event(event, Utc::now());
                    self.apply(actions);
                }
                LoopInput::Diagnostics(reply) => {
                    let _ = reply.send(self.core.diagnostics());
                }
            }
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }

    fn apply(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::StartAdvertising { info } => {
                    if let Err(err) = self.transport.start_advertising(&info) {
                        warn!(%err, "start_advertising failed");
                    }
                }
                SessionAction::StopAdvertising => {
                    if let Err(err) = self.transport.stop_advertising() {
                        warn!(%err, "stop_advertising failed");
                    }
                }
                SessionAction::StartBrowsing => {
                    if let Err(err) = self.transport.start_browsing() {
                        warn!(%err, "start_browsing failed");
                    }
                }
                SessionAction::StopBrowsing => {
                    if let Err(err) = self.transport.stop_browsing() {
                        warn!(%err, "stop_browsing failed");
                    }
                }
                SessionAction::Invite {
                    peer_id,
                    timeout_secs,
                } => {
                    if let Err(err) = self.transport.invite(&peer_id, timeout_secs) {
                        warn!(%err, %peer_id, "invite failed");
                    }
                }
                SessionAction::RespondToInvitation { peer_id, accept } => {
                    if let Err(err) = self.transport.respond_to_invitation(&peer_id, accept) {
                        warn!(%err, %peer_id, "invitation response failed");
                    }
                }
                SessionAction::SendMessage {
                    peer_id,
                    message,
                    reliable,
                } => self.send_frame(peer_id, message, reliable),
                SessionAction::DisconnectAll => {
                    if let Err(err) = self.transport.disconnect_all() {
                        warn!(%err, "disconnect_all failed");
                    }
                }
                SessionAction::StartTimer { timer, delay } => {
                    if let Some(old) = self.timers.remove(&timer) {
                        old.abort();
                    }
                    let tx = self.input_tx.clone();
                    let fired = timer.clone();
                    let handle = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(LoopInput::Event(SessionEvent::TimerFired { timer: fired }));
                    });
                    self.timers.insert(timer, handle);
                }
                SessionAction::CancelTimer { timer } => {
                    if let Some(handle) = self.timers.remove(&timer) {
                        handle.abort();
                    }
                }
                SessionAction::Notify(notification) => {
                    // Lagging or absent subscribers are fine.
                    let _ = self.notify_tx.send(notification);
                }
            }
        }
    }

    fn send_frame(&mut self, peer_id: PeerId, message: Message, reliable: bool) {
        let frame = match encode_frame(&message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "frame encode failed");
                return;
            }
        };
        if let Err(err) = self.transport.send(&peer_id, frame, reliable) {
            debug!(%err, %peer_id, "send failed, reporting back to core");
            let _ = self
                .input_tx
                .send(LoopInput::Event(SessionEvent::SendFailed { message }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use rink_core::decode_frame;
    use rink_core::identity::PeerIdentity;
    use rink_core::protocol::{DiscoveryInfo, MessageType};
    use rink_core::session::{ConnectionState, SessionConfig};
    use rink_core::transport::{PeerTransportState, TransportError};
    use rink_core::trust::{MemoryTrustStore, TrustStore, TrustedPeerRecord};

    #[derive(Clone, Default)]
    struct FakeTransport {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeTransport {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn wait_for(&self, needle: &str) {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            loop {
                if self.calls().iter().any(|c| c.contains(needle)) {
                    return;
                }
                if tokio::time::Instant::now() > deadline {
                    panic!("timed out waiting for {needle:?}; saw {:?}", self.calls());
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    impl Transport for FakeTransport {
        fn start_advertising(&mut self, _info: &DiscoveryInfo) -> Result<(), TransportError> {
            self.record("start_advertising".into());
            Ok(())
        }
        fn stop_advertising(&mut self) -> Result<(), TransportError> {
            self.record("stop_advertising".into());
            Ok(())
        }
        fn start_browsing(&mut self) -> Result<(), TransportError> {
            self.record("start_browsing".into());
            Ok(())
        }
        fn stop_browsing(&mut self) -> Result<(), TransportError> {
            self.record("stop_browsing".into());
            Ok(())
        }
        fn invite(&mut self, peer_id: &PeerId, _timeout_secs: u32) -> Result<(), TransportError> {
            self.record(format!("invite:{peer_id}"));
            Ok(())
        }
        fn respond_to_invitation(
            &mut self,
            peer_id: &PeerId,
            accept: bool,
        ) -> Result<(), TransportError> {
            self.record(format!("respond:{peer_id}:{accept}"));
            Ok(())
        }
        fn send(
            &mut self,
            _peer_id: &PeerId,
            frame: Vec<u8>,
            _reliable: bool,
        ) -> Result<(), TransportError> {
            let (message, _) = decode_frame(&frame).unwrap();
            self.record(format!("send:{:?}", message.message_type));
            Ok(())
        }
        fn disconnect_all(&mut self) -> Result<(), TransportError> {
            self.record("disconnect_all".into());
            Ok(())
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            settle_delay: Duration::from_millis(10),
            keepalive_idle: Duration::from_millis(30),
            keepalive_recording: Duration::from_millis(90),
            ..SessionConfig::default()
        }
    }

    fn identity(id: &str) -> PeerIdentity {
        PeerIdentity::new(PeerId::new(id), format!("device-{id}"))
    }

    fn trusted_core(local: &str, peer: &str) -> SessionCore {
        let mut store = MemoryTrustStore::new();
        store
            .add_trusted(TrustedPeerRecord {
                peer_id: PeerId::new(peer),
                role: rink_core::Role::Recorder,
                display_name: format!("device-{peer}"),
                last_connected_at: Utc::now(),
            })
            .unwrap();
        SessionCore::new(identity(local), test_config(), Box::new(store))
    }

    #[tokio::test]
    async fn start_session_brings_up_discovery() {
        let fake = FakeTransport::default();
        let core = SessionCore::new(
            identity("aaaa"),
            test_config(),
            Box::new(MemoryTrustStore::new()),
        );
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = spawn_session(core, Box::new(fake.clone()), events_rx);
        handle.start_session(Role::Controller);
        fake.wait_for("start_advertising").await;
        fake.wait_for("start_browsing").await;
    }

    #[tokio::test]
    async fn trusted_peer_connects_settles_and_keeps_alive() {
        let fake = FakeTransport::default();
        let core = trusted_core("aaaa", "bbbb");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = spawn_session(core, Box::new(fake.clone()), events_rx);
        let mut notifications = handle.subscribe();

        handle.start_session(Role::Controller);
        fake.wait_for("start_browsing").await;
        events_tx
            .send(TransportEvent::PeerFound {
                peer: identity("bbbb"),
                info: None,
            })
            .unwrap();
        fake.wait_for("invite:bbbb").await;
        events_tx
            .send(TransportEvent::PeerStateChanged {
                peer_id: PeerId::new("bbbb"),
                state: PeerTransportState::Connected,
            })
            .unwrap();
        fake.wait_for("stop_advertising").await;
        // Settle timer fires, then the keep-alive cadence begins.
        fake.wait_for(&format!("send:{:?}", MessageType::ConnectionReady))
            .await;
        fake.wait_for(&format!("send:{:?}", MessageType::Pong)).await;

        let mut saw_connected = false;
        while let Ok(n) = notifications.try_recv() {
            if matches!(
                n,
                SessionNotification::StateChanged(ConnectionState::Connected(_))
            ) {
                saw_connected = true;
            }
        }
        assert!(saw_connected);

        let report = handle.diagnostics().await.unwrap();
        assert_eq!(report.successes, 1);
        assert!(report.heartbeats_sent >= 1);
    }

    #[tokio::test]
    async fn stop_session_cancels_keepalive_timers() {
        let fake = FakeTransport::default();
        let core = trusted_core("aaaa", "bbbb");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = spawn_session(core, Box::new(fake.clone()), events_rx);

        handle.start_session(Role::Controller);
        events_tx
            .send(TransportEvent::PeerFound {
                peer: identity("bbbb"),
                info: None,
            })
            .unwrap();
        events_tx
            .send(TransportEvent::PeerStateChanged {
                peer_id: PeerId::new("bbbb"),
                state: PeerTransportState::Connected,
            })
            .unwrap();
        fake.wait_for(&format!("send:{:?}", MessageType::Pong)).await;

        handle.stop_session();
        fake.wait_for("disconnect_all").await;
        let settled = fake.calls().len();
        // Several keep-alive periods later nothing further went out.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fake.calls().len(), settled);
    }
}
