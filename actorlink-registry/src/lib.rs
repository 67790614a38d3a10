//! The actor identity registry (C4): `ActorId -> ActorRecord`, with
//! secondary indices by declared type and by owning peer, all kept
//! consistent under one lock so a caller never observes the primary map and
//! an index disagree.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use actorlink_wire::error::TransportError;
use actorlink_wire::ids::{ActorId, PeerId};

/// A type-erased local actor instance. Callers downcast with
/// [`ActorKind::as_local`] against the concrete type their dispatch table
/// expects.
pub type LocalInstance = Arc<dyn Any + Send + Sync>;

/// Whether a record names an instance this process owns, or a handle to one
/// living on a connected peer.
#[derive(Clone)]
pub enum ActorKind {
    Local(LocalInstance),
    Remote(PeerId),
}

impl ActorKind {
    pub fn as_local(&self) -> Option<&LocalInstance> {
        match self {
            ActorKind::Local(instance) => Some(instance),
            ActorKind::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<PeerId> {
        match self {
            ActorKind::Remote(peer_id) => Some(*peer_id),
            ActorKind::Local(_) => None,
        }
    }

    fn discriminant_eq(&self, other: &ActorKind) -> bool {
        matches!((self, other), (ActorKind::Local(_), ActorKind::Local(_)) | (ActorKind::Remote(_), ActorKind::Remote(_)))
    }
}

impl fmt::Debug for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorKind::Local(_) => write!(f, "Local(..)"),
            ActorKind::Remote(peer_id) => write!(f, "Remote({peer_id})"),
        }
    }
}

/// One entry in the registry.
#[derive(Clone, Debug)]
pub struct ActorRecord {
    pub id: ActorId,
    pub kind: ActorKind,
    pub type_tag: String,
    pub registered_at: Instant,
}

struct Inner {
    records: HashMap<ActorId, ActorRecord>,
    by_type: HashMap<String, HashSet<ActorId>>,
    by_peer: HashMap<PeerId, HashSet<ActorId>>,
}

impl Inner {
    fn insert(&mut self, record: ActorRecord) {
        self.by_type.entry(record.type_tag.clone()).or_default().insert(record.id);
        if let Some(peer_id) = record.kind.as_remote() {
            self.by_peer.entry(peer_id).or_default().insert(record.id);
        }
        self.records.insert(record.id, record);
    }

    fn remove(&mut self, id: ActorId) -> Option<ActorRecord> {
        let record = self.records.remove(&id)?;
        if let Some(ids) = self.by_type.get_mut(&record.type_tag) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_type.remove(&record.type_tag);
            }
        }
        if let Some(peer_id) = record.kind.as_remote() {
            if let Some(ids) = self.by_peer.get_mut(&peer_id) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_peer.remove(&peer_id);
                }
            }
        }
        Some(record)
    }
}

/// Maps actor identity to local instance or remote proxy handle.
///
/// Registration is idempotent when the same id is registered again under
/// the same kind; registering an id under a different kind than it already
/// holds is rejected with [`TransportError::InvalidData`] rather than
/// silently overwriting the conflicting record.
pub struct ActorRegistry {
    inner: Mutex<Inner>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        ActorRegistry { inner: Mutex::new(Inner { records: HashMap::new(), by_type: HashMap::new(), by_peer: HashMap::new() }) }
    }

    pub fn register_local(&self, id: ActorId, type_tag: impl Into<String>, instance: LocalInstance) -> Result<(), TransportError> {
        self.register(ActorRecord { id, kind: ActorKind::Local(instance), type_tag: type_tag.into(), registered_at: Instant::now() })
    }

    pub fn register_remote(&self, id: ActorId, peer_id: PeerId, type_tag: impl Into<String>) -> Result<(), TransportError> {
        self.register(ActorRecord {
            id,
            kind: ActorKind::Remote(peer_id),
            type_tag: type_tag.into(),
            registered_at: Instant::now(),
        })
    }

    fn register(&self, record: ActorRecord) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.records.get(&record.id) {
            if existing.kind.discriminant_eq(&record.kind) {
                return Ok(());
            }
            return Err(TransportError::InvalidData);
        }
        inner.insert(record);
        Ok(())
    }

    pub fn find(&self, id: ActorId) -> Option<ActorRecord> {
        self.inner.lock().records.get(&id).cloned()
    }

    pub fn get_all_of_type(&self, type_tag: &str) -> Vec<ActorRecord> {
        let inner = self.inner.lock();
        inner.by_type.get(type_tag).into_iter().flatten().filter_map(|id| inner.records.get(id).cloned()).collect()
    }

    pub fn unregister(&self, id: ActorId) -> Option<ActorRecord> {
        self.inner.lock().remove(id)
    }

    /// Evict all remote records owned by `peer_id`, returning their ids.
    pub fn unregister_peer(&self, peer_id: PeerId) -> Vec<ActorId> {
        let mut inner = self.inner.lock();
        let ids: Vec<ActorId> = inner.by_peer.get(&peer_id).into_iter().flatten().copied().collect();
        for id in &ids {
            inner.remove(*id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_find_local() {
        let registry = ActorRegistry::new();
        let id = ActorId::from_u128(1);
        registry.register_local(id, "Thermostat", Arc::new(42u32)).unwrap();
        let record = registry.find(id).unwrap();
        assert_eq!(record.type_tag, "Thermostat");
        assert!(record.kind.as_local().is_some());
    }

    #[test]
    fn register_local_is_idempotent() {
        let registry = ActorRegistry::new();
        let id = ActorId::from_u128(1);
        registry.register_local(id, "Thermostat", Arc::new(1u32)).unwrap();
        registry.register_local(id, "Thermostat", Arc::new(1u32)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_kind_is_rejected() {
        let registry = ActorRegistry::new();
        let id = ActorId::from_u128(1);
        registry.register_local(id, "Thermostat", Arc::new(1u32)).unwrap();
        let result = registry.register_remote(id, PeerId::from_u128(99), "Thermostat");
        assert_eq!(result, Err(TransportError::InvalidData));
    }

    #[test]
    fn get_all_of_type_returns_matching_records() {
        let registry = ActorRegistry::new();
        registry.register_local(ActorId::from_u128(1), "Thermostat", Arc::new(1u32)).unwrap();
        registry.register_local(ActorId::from_u128(2), "Thermostat", Arc::new(2u32)).unwrap();
        registry.register_local(ActorId::from_u128(3), "Doorbell", Arc::new(3u32)).unwrap();

        let mut ids: Vec<u128> = registry.get_all_of_type("Thermostat").into_iter().map(|r| r.id.as_u128()).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn unregister_peer_evicts_all_its_remotes() {
        let registry = ActorRegistry::new();
        let peer = PeerId::from_u128(50);
        registry.register_remote(ActorId::from_u128(1), peer, "Thermostat").unwrap();
        registry.register_remote(ActorId::from_u128(2), peer, "Doorbell").unwrap();
        registry.register_local(ActorId::from_u128(3), "Thermostat", Arc::new(3u32)).unwrap();

        let mut evicted = registry.unregister_peer(peer);
        evicted.sort_by_key(|id| id.as_u128());
        assert_eq!(evicted.iter().map(|id| id.as_u128()).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(registry.len(), 1);
        assert!(registry.find(ActorId::from_u128(3)).is_some());
    }

    #[test]
    fn unregister_removes_from_secondary_indices() {
        let registry = ActorRegistry::new();
        let id = ActorId::from_u128(1);
        registry.register_local(id, "Thermostat", Arc::new(1u32)).unwrap();
        registry.unregister(id);
        assert!(registry.find(id).is_none());
        assert!(registry.get_all_of_type("Thermostat").is_empty());
    }
}
