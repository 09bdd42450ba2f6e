//! Invitation and trust gate: decide whether a discovered or inviting peer
//! connects automatically or waits for user approval.
//!
//! Symmetric discovery means both sides browse and advertise at once. To keep
//! exactly one side inviting, the lexicographically lower peer id always
//! initiates and the higher side waits; the rule is applied both to trusted
//! auto-invites and to approved manual invites.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::{PeerId, PeerIdentity};
use crate::protocol::DiscoveryInfo;

/// Who initiated the pending invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationDirection {
    /// The peer invited us; approval answers their invitation.
    Incoming,
    /// We discovered the peer; approval issues our invitation.
    Outgoing,
}

/// An unresolved connection request awaiting user approval or expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvitation {
    pub id: Uuid,
    pub peer: PeerIdentity,
    pub info: Option<DiscoveryInfo>,
    pub direction: InvitationDirection,
    pub created_at: DateTime<Utc>,
}

/// What the session should do about a discovered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryDecision {
    /// Trusted and we hold the lower id: invite now.
    Invite,
    /// Trusted but the peer holds the lower id: wait for its invitation.
    Wait,
    /// Untrusted: a new pending invitation to surface to the UI.
    Surface(PendingInvitation),
    /// Duplicate or already in flight.
    Ignore,
}

/// What the session should do about an inbound invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvitationDecision {
    /// Trusted or pre-approved: accept without prompting.
    Accept,
    /// Untrusted: a new pending invitation to surface to the UI.
    Surface(PendingInvitation),
    /// Duplicate of an already-pending entry.
    Ignore,
}

/// Result of a user approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Issue our invitation to the peer.
    Invite(PendingInvitation),
    /// Accept the peer's waiting invitation.
    Accept(PendingInvitation),
    /// Approved, but the peer holds the lower id; its invitation will be
    /// accepted on arrival without a second prompt.
    WaitForInvite(PendingInvitation),
    /// Nothing pending for that peer.
    NotPending,
}

/// Pending-invitation queue. At most one entry per peer id.
#[derive(Debug, Default)]
pub struct InvitationGate {
    pending: HashMap<PeerId, PendingInvitation>,
    pre_approved: HashSet<PeerId>,
}

impl InvitationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_for(&self, peer_id: &PeerId) -> Option<&PendingInvitation> {
        self.pending.get(peer_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// A peer appeared in discovery.
    pub fn on_peer_discovered(
        &mut self,
        local_id: &PeerId,
        peer: &PeerIdentity,
        info: Option<DiscoveryInfo>,
        trusted: bool,
        now: DateTime<Utc>,
    ) -> DiscoveryDecision {
        if trusted {
            // A stale prompt for a now-trusted peer is moot.
            self.pending.remove(&peer.id);
            return if *local_id < peer.id {
                DiscoveryDecision::Invite
            } else {
                DiscoveryDecision::Wait
            };
        }
        if self.pending.contains_key(&peer.id) {
            return DiscoveryDecision::Ignore;
        }
        let invitation = PendingInvitation {
            id: Uuid::new_v4(),
            peer: peer.clone(),
            info,
            direction: InvitationDirection::Outgoing,
            created_at: now,
        };
        self.pending.insert(peer.id.clone(), invitation.clone());
        DiscoveryDecision::Surface(invitation)
    }

    /// A peer sent an invitation.
    pub fn on_invitation_received(
        &mut self,
        peer: &PeerIdentity,
        info: Option<DiscoveryInfo>,
        trusted: bool,
        now: DateTime<Utc>,
    ) -> InvitationDecision {
        if trusted || self.pre_approved.remove(&peer.id) {
            self.pending.remove(&peer.id);
            return InvitationDecision::Accept;
        }
        if let Some(existing) = self.pending.get_mut(&peer.id) {
            // A live inbound invitation supersedes our not-yet-issued outgoing
            // one; approval must answer the invitation that actually exists.
            existing.direction = InvitationDirection::Incoming;
            if info.is_some() {
                existing.info = info;
            }
            return InvitationDecision::Ignore;
        }
        let invitation = PendingInvitation {
            id: Uuid::new_v4(),
            peer: peer.clone(),
            info,
            direction: InvitationDirection::Incoming,
            created_at: now,
        };
        self.pending.insert(peer.id.clone(), invitation.clone());
        InvitationDecision::Surface(invitation)
    }

    /// The user approved the pending invitation for `peer_id`.
    pub fn approve(&mut self, local_id: &PeerId, peer_id: &PeerId) -> ApprovalOutcome {
        let Some(invitation) = self.pending.remove(peer_id) else {
            return ApprovalOutcome::NotPending;
        };
        match invitation.direction {
            InvitationDirection::Incoming => ApprovalOutcome::Accept(invitation),
            InvitationDirection::Outgoing => {
                if *local_id < *peer_id {
                    ApprovalOutcome::Invite(invitation)
                } else {
                    self.pre_approved.insert(peer_id.clone());
                    ApprovalOutcome::WaitForInvite(invitation)
                }
            }
        }
    }

    /// The user declined; returns the removed entry.
    pub fn decline(&mut self, peer_id: &PeerId) -> Option<PendingInvitation> {
        self.pre_approved.remove(peer_id);
        self.pending.remove(peer_id)
    }

    /// The expiry timer fired; returns the entry if it was still pending.
    pub fn expire(&mut self, peer_id: &PeerId) -> Option<PendingInvitation> {
        self.pending.remove(peer_id)
    }

    /// Drop a pending entry because the peer connected or vanished.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PendingInvitation> {
        self.pending.remove(peer_id)
    }

    /// Clear everything (session teardown). Returns the peer ids whose expiry
    /// timers must be cancelled.
    pub fn clear(&mut self) -> Vec<PeerId> {
        self.pre_approved.clear();
        self.pending.drain().map(|(id, _)| id).collect()
    }
}
