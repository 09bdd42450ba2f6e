//! Reconnection policy: how quickly to retry pairing after an unexpected drop.

use std::time::Duration;

use crate::protocol::Role;
use crate::trust::TrustStore;
use crate::identity::PeerId;

/// Retry cadence chosen per disconnect event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Short delay for a drop that is likely a transient hiccup. The pairing is
    /// 1:1, so availability wins over reconnect-storm avoidance.
    Fast,
    /// Default backoff for everything else.
    Standard,
}

/// Reconnection engine state. The session owns the timer; this decides policy
/// and whether a retry is allowed at all.
#[derive(Debug)]
pub struct Reconnect {
    enabled: bool,
    stable_session_threshold: Duration,
    fast_delay: Duration,
    standard_delay: Duration,
}

impl Reconnect {
    pub fn new(
        stable_session_threshold: Duration,
        fast_delay: Duration,
        standard_delay: Duration,
    ) -> Self {
        Self {
            enabled: true,
            stable_session_threshold,
            fast_delay,
            standard_delay,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// A deliberate teardown must never be silently reversed; only an explicit
    /// `enable` turns reconnection back on.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Pick the policy for one disconnect. A session that had been up past the
    /// stable threshold dropped on a proven link, so the drop is treated as a
    /// transient hiccup and retried fast.
    pub fn policy_for(&self, session_duration: Option<Duration>) -> ReconnectPolicy {
        match session_duration {
            Some(d) if d >= self.stable_session_threshold => ReconnectPolicy::Fast,
            _ => ReconnectPolicy::Standard,
        }
    }

    pub fn delay(&self, policy: ReconnectPolicy) -> Duration {
        match policy {
            ReconnectPolicy::Fast => self.fast_delay,
            ReconnectPolicy::Standard => self.standard_delay,
        }
    }
}

/// Resolve the role to reconnect as: the trust store's record for the lost
/// peer (we play its counterpart), then the last role used this process, then
/// the hard default.
pub fn resolve_role(
    store: &dyn TrustStore,
    lost_peer: Option<&PeerId>,
    last_role: Option<Role>,
) -> Role {
    if let Some(peer_id) = lost_peer {
        if let Ok(Some(peer_role)) = store.role_for(peer_id) {
            return peer_role.counterpart();
        }
    }
    last_role.unwrap_or(Role::Controller)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::trust::{MemoryTrustStore, TrustedPeerRecord};

    fn engine() -> Reconnect {
        Reconnect::new(
            Duration::from_secs(30),
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn stable_session_gets_fast_retry() {
        let r = engine();
        assert_eq!(
            r.policy_for(Some(Duration::from_secs(40))),
            ReconnectPolicy::Fast
        );
        assert_eq!(
            r.policy_for(Some(Duration::from_secs(3))),
            ReconnectPolicy::Standard
        );
        assert_eq!(r.policy_for(None), ReconnectPolicy::Standard);
    }

    #[test]
    fn delays_match_policy() {
        let r = engine();
        assert!(r.delay(ReconnectPolicy::Fast) < r.delay(ReconnectPolicy::Standard));
    }

    #[test]
    fn disable_until_explicit_enable() {
        let mut r = engine();
        assert!(r.enabled());
        r.disable();
        assert!(!r.enabled());
        r.enable();
        assert!(r.enabled());
    }

    #[test]
    fn role_resolution_prefers_trust_store() {
        let mut store = MemoryTrustStore::new();
        let peer = PeerId::new("aa");
        store
            .add_trusted(TrustedPeerRecord {
                peer_id: peer.clone(),
                role: Role::Recorder,
                display_name: "cam".into(),
                last_connected_at: Utc::now(),
            })
            .unwrap();
        let role = resolve_role(&store, Some(&peer), Some(Role::Recorder));
        assert_eq!(role, Role::Controller);
    }

    #[test]
    fn role_resolution_falls_back() {
        let store = MemoryTrustStore::new();
        assert_eq!(
            resolve_role(&store, Some(&PeerId::new("zz")), Some(Role::Recorder)),
            Role::Recorder
        );
        assert_eq!(resolve_role(&store, None, None), Role::Controller);
    }
}
