use std::{collections::HashMap, sync::Arc};

use agora_core::UserStub;
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use super::core::ConnectionControl;

/// Non-owning view of one live connection held by the registry: the
/// authenticated user seated on it (if any), its outbox, and the control
/// signal that tells its write pump to shut down.
#[derive(Debug)]
pub(crate) struct Member {
    pub(crate) user: Option<UserStub>,
    pub(crate) outbox: mpsc::Sender<String>,
    pub(crate) control: watch::Sender<ConnectionControl>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum DeliveryError {
    #[error("connection is not registered")]
    NotRegistered,
    #[error("connection outbox is unavailable, peer evicted")]
    Evicted,
}

/// Process-wide directory of live connections. Mutation and broadcast
/// iteration run under the write half of one `RwLock`; read-only queries
/// share the read half.
#[derive(Clone)]
pub(crate) struct Registry {
    members: Arc<RwLock<HashMap<Uuid, Member>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            members: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Adds a connection. Re-registering a live identity is a no-op.
    pub(crate) async fn register(&self, connection_id: Uuid, member: Member) {
        let mut members = self.members.write().await;
        members.entry(connection_id).or_insert(member);
    }

    pub(crate) async fn unregister(&self, connection_id: Uuid) {
        let mut members = self.members.write().await;
        members.remove(&connection_id);
    }

    /// Re-seats the user identity on a live connection (login/logout).
    pub(crate) async fn set_user(&self, connection_id: Uuid, user: Option<UserStub>) {
        let mut members = self.members.write().await;
        if let Some(member) = members.get_mut(&connection_id) {
            member.user = user;
        }
    }

    pub(crate) async fn is_live(&self, connection_id: Uuid) -> bool {
        self.members.read().await.contains_key(&connection_id)
    }

    /// First live connection seated with the given user, if any.
    pub(crate) async fn find_by_user(&self, user_id: i64) -> Option<Uuid> {
        let members = self.members.read().await;
        members
            .iter()
            .find(|(_, member)| member.user.as_ref().is_some_and(|user| user.id == user_id))
            .map(|(connection_id, _)| *connection_id)
    }

    /// Snapshot of every authenticated connection, keyed by user id.
    pub(crate) async fn list_online(&self) -> HashMap<i64, Uuid> {
        let members = self.members.read().await;
        members
            .iter()
            .filter_map(|(connection_id, member)| {
                member.user.as_ref().map(|user| (user.id, *connection_id))
            })
            .collect()
    }

    pub(crate) async fn user_of(&self, connection_id: Uuid) -> Option<UserStub> {
        let members = self.members.read().await;
        members.get(&connection_id).and_then(|m| m.user.clone())
    }

    /// Enqueues the payload onto every member's outbox without blocking.
    /// A member whose outbox is full or closed is treated as dead: it is
    /// evicted and its write pump is signalled to terminate. Returns the
    /// number of successful deliveries.
    #[allow(dead_code)]
    pub(crate) async fn broadcast(&self, payload: &str) -> usize {
        let mut delivered = 0_usize;
        let mut members = self.members.write().await;
        members.retain(|connection_id, member| {
            match member.outbox.try_send(payload.to_owned()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!(
                        event = "registry.evict",
                        connection_id = %connection_id,
                        "slow or dead consumer evicted during broadcast"
                    );
                    let _ = member.control.send(ConnectionControl::Close);
                    false
                }
            }
        });
        delivered
    }

    /// Enqueues the payload onto one member's outbox without blocking,
    /// with the same full-queue-means-dead eviction policy as broadcast.
    pub(crate) async fn send_to(
        &self,
        connection_id: Uuid,
        payload: String,
    ) -> Result<(), DeliveryError> {
        let mut members = self.members.write().await;
        let Some(member) = members.get(&connection_id) else {
            return Err(DeliveryError::NotRegistered);
        };
        match member.outbox.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(
                    event = "registry.evict",
                    connection_id = %connection_id,
                    "slow or dead consumer evicted during direct send"
                );
                let _ = member.control.send(ConnectionControl::Close);
                members.remove(&connection_id);
                Err(DeliveryError::Evicted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use agora_core::UserStub;
    use tokio::sync::{mpsc, watch};
    use uuid::Uuid;

    use super::{DeliveryError, Member, Registry};
    use crate::server::core::ConnectionControl;

    fn member(
        user: Option<UserStub>,
        queue: usize,
    ) -> (
        Member,
        mpsc::Receiver<String>,
        watch::Receiver<ConnectionControl>,
    ) {
        let (outbox, outbox_rx) = mpsc::channel(queue);
        let (control, control_rx) = watch::channel(ConnectionControl::Open);
        (
            Member {
                user,
                outbox,
                control,
            },
            outbox_rx,
            control_rx,
        )
    }

    fn stub(id: i64, name: &str) -> UserStub {
        UserStub {
            id,
            name: name.to_owned(),
        }
    }

    #[tokio::test]
    async fn online_count_tracks_registrations_minus_unregistrations() {
        let registry = Registry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let anonymous = Uuid::new_v4();

        let (m1, _rx1, _c1) = member(Some(stub(1, "ada")), 4);
        let (m2, _rx2, _c2) = member(Some(stub(2, "brin")), 4);
        let (m3, _rx3, _c3) = member(None, 4);
        registry.register(first, m1).await;
        registry.register(second, m2).await;
        registry.register(anonymous, m3).await;

        assert_eq!(registry.list_online().await.len(), 2);

        registry.unregister(second).await;
        assert_eq!(registry.list_online().await.len(), 1);
        registry.unregister(second).await;
        assert_eq!(registry.list_online().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_the_existing_member() {
        let registry = Registry::new();
        let id = Uuid::new_v4();
        let (original, _rx1, _c1) = member(Some(stub(1, "ada")), 4);
        let (imposter, _rx2, _c2) = member(Some(stub(9, "mallory")), 4);

        registry.register(id, original).await;
        registry.register(id, imposter).await;

        assert_eq!(registry.user_of(id).await, Some(stub(1, "ada")));
    }

    #[tokio::test]
    async fn find_by_user_scans_seated_identities() {
        let registry = Registry::new();
        let id = Uuid::new_v4();
        let (m, _rx, _c) = member(Some(stub(7, "gus")), 4);
        registry.register(id, m).await;

        assert_eq!(registry.find_by_user(7).await, Some(id));
        assert_eq!(registry.find_by_user(8).await, None);
    }

    #[tokio::test]
    async fn broadcast_evicts_exactly_the_saturated_member() {
        let registry = Registry::new();
        let healthy = Uuid::new_v4();
        let stalled = Uuid::new_v4();

        let (healthy_member, mut healthy_rx, _hc) = member(Some(stub(1, "ada")), 4);
        let (stalled_member, _stalled_rx, mut stalled_control) = member(Some(stub(2, "brin")), 1);
        registry.register(healthy, healthy_member).await;
        registry.register(stalled, stalled_member).await;

        // Saturate the stalled member's outbox.
        registry
            .send_to(stalled, String::from("backlog"))
            .await
            .unwrap();

        let delivered = registry.broadcast("presence-update").await;

        assert_eq!(delivered, 1);
        assert!(registry.is_live(healthy).await);
        assert!(!registry.is_live(stalled).await);
        assert_eq!(healthy_rx.recv().await.as_deref(), Some("presence-update"));
        assert_eq!(*stalled_control.borrow_and_update(), ConnectionControl::Close);
    }

    #[tokio::test]
    async fn send_to_unknown_connection_reports_not_registered() {
        let registry = Registry::new();
        let result = registry.send_to(Uuid::new_v4(), String::from("x")).await;
        assert_eq!(result.unwrap_err(), DeliveryError::NotRegistered);
    }

    #[tokio::test]
    async fn send_to_full_outbox_evicts_and_reports() {
        let registry = Registry::new();
        let id = Uuid::new_v4();
        let (m, _rx, mut control_rx) = member(Some(stub(3, "cleo")), 1);
        registry.register(id, m).await;

        registry.send_to(id, String::from("first")).await.unwrap();
        let result = registry.send_to(id, String::from("second")).await;

        assert_eq!(result.unwrap_err(), DeliveryError::Evicted);
        assert!(!registry.is_live(id).await);
        assert_eq!(*control_rx.borrow_and_update(), ConnectionControl::Close);
    }

    #[tokio::test]
    async fn set_user_reseats_identity() {
        let registry = Registry::new();
        let id = Uuid::new_v4();
        let (m, _rx, _c) = member(None, 4);
        registry.register(id, m).await;
        assert!(registry.list_online().await.is_empty());

        registry.set_user(id, Some(stub(5, "eve"))).await;
        assert_eq!(registry.find_by_user(5).await, Some(id));

        registry.set_user(id, None).await;
        assert_eq!(registry.find_by_user(5).await, None);
    }
}
