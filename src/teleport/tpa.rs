//! Directed peer-to-peer teleport requests.
//!
//! A request is pending until it is accepted, denied or expires. Expiry is
//! evaluated lazily against the clock; `sweep_expired` only frees memory.

use crate::entities::player::{PlayerId, PlayerRef};
use crate::error::TeleportError;
use crate::sync::lock;
use crate::teleport::action::CommandKey;
use crate::world::time::{ceil_secs, Clock, Timestamp};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Who travels once the request is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// The requester travels to the target.
    ToTarget,
    /// The target travels to the requester.
    ToRequester,
}

impl RequestKind {
    pub fn command(self) -> CommandKey {
        match self {
            RequestKind::ToTarget => CommandKey::Tpa,
            RequestKind::ToRequester => CommandKey::TpaHere,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TpaRequest {
    pub requester: PlayerRef,
    pub target: PlayerRef,
    pub kind: RequestKind,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl TpaRequest {
    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        clock.now() >= self.expires_at
    }

    pub fn remaining_seconds(&self, clock: &dyn Clock) -> u64 {
        ceil_secs(self.expires_at.saturating_duration_since(clock.now()))
    }

    /// (traveller, anchor) for this request.
    pub fn travel_pair(&self) -> (&PlayerRef, &PlayerRef) {
        match self.kind {
            RequestKind::ToTarget => (&self.requester, &self.target),
            RequestKind::ToRequester => (&self.target, &self.requester),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(TpaRequest),
    SelfRequest,
    AlreadyPending,
}

impl CreateOutcome {
    pub fn into_result(self) -> Result<TpaRequest, TeleportError> {
        match self {
            CreateOutcome::Created(request) => Ok(request),
            CreateOutcome::SelfRequest => Err(TeleportError::SelfRequest),
            CreateOutcome::AlreadyPending => Err(TeleportError::AlreadyPending),
        }
    }
}

pub struct TeleportRequestBroker {
    clock: Arc<dyn Clock>,
    timeout: Duration,
    /// Creation order; later entries are more recent.
    pending: Mutex<Vec<TpaRequest>>,
}

impl TeleportRequestBroker {
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            clock,
            timeout,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn create(
        &self,
        requester: &PlayerRef,
        target: &PlayerRef,
        kind: RequestKind,
    ) -> CreateOutcome {
        if requester.id == target.id {
            return CreateOutcome::SelfRequest;
        }
        let now = self.clock.now();
        let mut pending = lock(&self.pending);
        if let Some(index) = pending
            .iter()
            .position(|r| r.requester.id == requester.id && r.target.id == target.id)
        {
            if now < pending[index].expires_at {
                return CreateOutcome::AlreadyPending;
            }
            pending.remove(index);
        }
        let request = TpaRequest {
            requester: requester.clone(),
            target: target.clone(),
            kind,
            created_at: now,
            expires_at: now.saturating_add(self.timeout),
        };
        pending.push(request.clone());
        tracing::debug!(
            requester = %requester.id,
            target = %target.id,
            kind = ?kind,
            "teleport request created"
        );
        CreateOutcome::Created(request)
    }

    /// Consume the most recent request addressed to `target`, expired or not.
    pub fn accept(&self, target: PlayerId) -> Option<TpaRequest> {
        self.take_latest(|r| r.target.id == target)
    }

    pub fn accept_from(&self, target: PlayerId, requester: PlayerId) -> Option<TpaRequest> {
        self.take_latest(|r| r.target.id == target && r.requester.id == requester)
    }

    pub fn deny(&self, target: PlayerId) -> Option<TpaRequest> {
        self.take_latest(|r| r.target.id == target)
    }

    pub fn deny_from(&self, target: PlayerId, requester: PlayerId) -> Option<TpaRequest> {
        self.take_latest(|r| r.target.id == target && r.requester.id == requester)
    }

    /// Put back a request taken by `accept` that could not be honoured yet.
    /// Keeps creation order; dropped if the pair has a newer request.
    pub fn restore(&self, request: TpaRequest) -> bool {
        let mut pending = lock(&self.pending);
        if pending
            .iter()
            .any(|r| r.requester.id == request.requester.id && r.target.id == request.target.id)
        {
            return false;
        }
        let index = pending
            .iter()
            .position(|r| r.created_at > request.created_at)
            .unwrap_or(pending.len());
        pending.insert(index, request);
        true
    }

    /// Live requests addressed to `target`, oldest first.
    pub fn pending_for(&self, target: PlayerId) -> Vec<TpaRequest> {
        let now = self.clock.now();
        lock(&self.pending)
            .iter()
            .filter(|r| r.target.id == target && now < r.expires_at)
            .cloned()
            .collect()
    }

    pub fn has_pending(&self, target: PlayerId) -> bool {
        let now = self.clock.now();
        lock(&self.pending)
            .iter()
            .any(|r| r.target.id == target && now < r.expires_at)
    }

    pub fn cancel_outgoing(&self, requester: PlayerId) -> usize {
        self.remove_where(|r| r.requester.id == requester)
    }

    pub fn cancel_incoming(&self, target: PlayerId) -> usize {
        self.remove_where(|r| r.target.id == target)
    }

    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = self.remove_where(|r| now >= r.expires_at);
        if removed > 0 {
            tracing::debug!(removed, "expired teleport requests swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }

    fn take_latest(&self, matches: impl Fn(&TpaRequest) -> bool) -> Option<TpaRequest> {
        let mut pending = lock(&self.pending);
        let index = pending.iter().rposition(|r| matches(r))?;
        Some(pending.remove(index))
    }

    fn remove_where(&self, matches: impl Fn(&TpaRequest) -> bool) -> usize {
        let mut pending = lock(&self.pending);
        let before = pending.len();
        pending.retain(|r| !matches(r));
        before - pending.len()
    }
}
