//! Session health counters. Purely observational; safe to ignore.

use std::collections::VecDeque;
use std::time::Duration;

/// How many finished-session durations are retained for the report.
const SESSION_HISTORY: usize = 32;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport reported the peer gone.
    PeerDropped,
    /// The user tore the session down.
    Stopped,
}

/// Monotonically-accumulating counters plus a rolling session-duration history.
/// Reset only at process start, never mid-session.
#[derive(Debug, Default)]
pub struct ConnectionDiagnostics {
    attempts: u64,
    successes: u64,
    disconnections: u64,
    heartbeats_sent: u64,
    heartbeats_received: u64,
    messages_sent: u64,
    messages_received: u64,
    session_durations: VecDeque<Duration>,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsReport {
    pub attempts: u64,
    pub successes: u64,
    pub disconnections: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub longest_session: Option<Duration>,
    pub average_session: Option<Duration>,
}

impl ConnectionDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_connection_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_disconnection(&mut self, _reason: DisconnectReason, duration: Option<Duration>) {
        self.disconnections += 1;
        if let Some(d) = duration {
            if self.session_durations.len() == SESSION_HISTORY {
                self.session_durations.pop_front();
            }
            self.session_durations.push_back(d);
        }
    }

    pub fn record_heartbeat_sent(&mut self) {
        self.heartbeats_sent += 1;
    }

    pub fn record_heartbeat_received(&mut self) {
        self.heartbeats_received += 1;
    }

    pub fn record_message_sent(&mut self) {
        self.messages_sent += 1;
    }

    pub fn record_message_received(&mut self) {
        self.messages_received += 1;
    }

    pub fn snapshot(&self) -> DiagnosticsReport {
        let longest = self.session_durations.iter().max().copied();
        let average = if self.session_durations.is_empty() {
            None
        } else {
            let total: Duration = self.session_durations.iter().sum();
            Some(total / self.session_durations.len() as u32)
        };
        DiagnosticsReport {
            attempts: self.attempts,
            successes: self.successes,
            disconnections: self.disconnections,
            heartbeats_sent: self.heartbeats_sent,
            heartbeats_received: self.heartbeats_received,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            longest_session: longest,
            average_session: average,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut d = ConnectionDiagnostics::new();
        d.record_connection_attempt();
        d.record_connection_attempt();
        d.record_connection_success();
        d.record_heartbeat_sent();
        d.record_heartbeat_received();
        d.record_message_sent();
        d.record_message_received();
        let report = d.snapshot();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.successes, 1);
        assert_eq!(report.heartbeats_sent, 1);
        assert_eq!(report.messages_received, 1);
    }

    #[test]
    fn session_stats() {
        let mut d = ConnectionDiagnostics::new();
        d.record_disconnection(DisconnectReason::PeerDropped, Some(Duration::from_secs(10)));
        d.record_disconnection(DisconnectReason::PeerDropped, Some(Duration::from_secs(30)));
        d.record_disconnection(DisconnectReason::Stopped, None);
        let report = d.snapshot();
        assert_eq!(report.disconnections, 3);
        assert_eq!(report.longest_session, Some(Duration::from_secs(30)));
        assert_eq!(report.average_session, Some(Duration::from_secs(20)));
    }

    #[test]
    fn history_is_bounded() {
        let mut d = ConnectionDiagnostics::new();
        for i in 0..(SESSION_HISTORY as u64 + 8) {
            d.record_disconnection(DisconnectReason::PeerDropped, Some(Duration::from_secs(i)));
        }
        assert_eq!(d.session_durations.len(), SESSION_HISTORY);
        // Oldest entries evicted first.
        assert_eq!(d.session_durations.front(), Some(&Duration::from_secs(8)));
    }
}
