use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;
use crate::models::notification::UserId;

/// Why a push did not reach a live session. Never surfaced to the caller of
/// `deliver`; the notification is already persisted when this happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("recipient has no live session")]
    Offline,
    #[error("session closed")]
    Closed,
    #[error("push timed out")]
    TimedOut,
}

/// Sending half of one live session. The socket's writer task owns the
/// receiving half.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tx,
        }
    }

    /// Create a handle plus the queue its writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue an event, waiting at most `timeout` for queue space.
    pub async fn push(&self, event: ServerEvent, timeout: Duration) -> Result<(), DeliveryError> {
        match tokio::time::timeout(timeout, self.tx.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::TimedOut),
        }
    }
}

/// User identity → the single live session for that user.
///
/// Cheap to clone; clones share the same map. Every operation is one atomic
/// map operation, so no lock is ever held across a store call or a push.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<DashMap<UserId, SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last bind wins. Returns the evicted handle, if any; the old socket is
    /// not closed here, it just stops receiving pushes.
    pub fn bind(&self, user: UserId, session: SessionHandle) -> Option<SessionHandle> {
        let previous = self.sessions.insert(user.clone(), session);
        if let Some(prev) = &previous {
            tracing::info!(user = %user, session = %prev.session_id(), "registry: evicted previous session");
        }
        previous
    }

    /// Unconditional removal. No-op when the user has no binding.
    pub fn unbind(&self, user: &UserId) -> Option<SessionHandle> {
        self.sessions.remove(user).map(|(_, session)| session)
    }

    /// Remove the binding only if it still points at `session_id`. Used on
    /// disconnect so a late close from an evicted socket leaves its
    /// replacement in place.
    pub fn unbind_session(&self, user: &UserId, session_id: Uuid) -> bool {
        self.sessions
            .remove_if(user, |_, session| session.session_id() == session_id)
            .is_some()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.sessions.contains_key(user)
    }

    pub fn lookup(&self, user: &UserId) -> Option<SessionHandle> {
        self.sessions.get(user).map(|entry| entry.value().clone())
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    /// Push to the user's live session, if any. A closed session is unbound
    /// on the way out; a timed-out one stays bound.
    pub async fn push(
        &self,
        user: &UserId,
        event: ServerEvent,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        let session = self.lookup(user).ok_or(DeliveryError::Offline)?;
        let result = session.push(event, timeout).await;
        if result == Err(DeliveryError::Closed) {
            self.unbind_session(user, session.session_id());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    #[test]
    fn test_bind_lookup_unbind() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = SessionHandle::channel(4);
        let sid = handle.session_id();

        assert!(!registry.is_online(&user("u1")));
        assert!(registry.bind(user("u1"), handle).is_none());
        assert!(registry.is_online(&user("u1")));
        assert_eq!(registry.lookup(&user("u1")).unwrap().session_id(), sid);
        assert_eq!(registry.online_count(), 1);

        assert!(registry.unbind(&user("u1")).is_some());
        assert!(!registry.is_online(&user("u1")));
        // idempotent
        assert!(registry.unbind(&user("u1")).is_none());
    }

    #[test]
    fn test_rebind_evicts_previous_session() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = SessionHandle::channel(4);
        let (second, _rx2) = SessionHandle::channel(4);
        let first_id = first.session_id();
        let second_id = second.session_id();

        registry.bind(user("u1"), first);
        let evicted = registry.bind(user("u1"), second).unwrap();
        assert_eq!(evicted.session_id(), first_id);
        assert_eq!(registry.lookup(&user("u1")).unwrap().session_id(), second_id);
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = SessionHandle::channel(4);
        let (second, _rx2) = SessionHandle::channel(4);
        let first_id = first.session_id();
        let second_id = second.session_id();

        registry.bind(user("u1"), first);
        registry.bind(user("u1"), second);

        assert!(!registry.unbind_session(&user("u1"), first_id));
        assert!(registry.is_online(&user("u1")));
        assert!(registry.unbind_session(&user("u1"), second_id));
        assert!(!registry.is_online(&user("u1")));
    }

    #[tokio::test]
    async fn test_push_reaches_bound_session() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = SessionHandle::channel(4);
        registry.bind(user("u1"), handle);

        registry
            .push(&user("u1"), ServerEvent::UnreadCount { count: 3 }, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(ServerEvent::UnreadCount { count: 3 }));
    }

    #[tokio::test]
    async fn test_push_offline() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .push(&user("ghost"), ServerEvent::UnreadCount { count: 0 }, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::Offline);
    }

    #[tokio::test]
    async fn test_push_to_closed_session_unbinds_it() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = SessionHandle::channel(4);
        registry.bind(user("u1"), handle);
        drop(rx);

        let err = registry
            .push(&user("u1"), ServerEvent::UnreadCount { count: 1 }, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::Closed);
        assert!(!registry.is_online(&user("u1")));
    }

    #[tokio::test]
    async fn test_push_to_full_queue_times_out_without_unbinding() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = SessionHandle::channel(1);
        registry.bind(user("u1"), handle);

        registry
            .push(&user("u1"), ServerEvent::UnreadCount { count: 1 }, TIMEOUT)
            .await
            .unwrap();
        let err = registry
            .push(&user("u1"), ServerEvent::UnreadCount { count: 2 }, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::TimedOut);
        assert!(registry.is_online(&user("u1")));
    }
}
