//! The pending call table (C5): tracks outstanding client-side RPCs by
//! `call_id`, with a per-peer FIFO used to attribute unkeyed link errors to
//! the oldest in-flight call (sec5's best-effort ordering policy).

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use actorlink_codec::CallResult;
use actorlink_wire::error::TransportError;
use actorlink_wire::ids::{CallId, PeerId};

/// What a pending call eventually resolves to.
pub type CallOutcome = Result<CallResult, TransportError>;

struct Inner {
    pending: HashMap<CallId, (PeerId, oneshot::Sender<CallOutcome>)>,
    peer_fifo: HashMap<PeerId, VecDeque<CallId>>,
    /// Outcomes for a `cancel`/`resolve` that raced ahead of the matching
    /// `store` (sec4.5's "pending-call race").
    pre_resolved: HashMap<CallId, CallOutcome>,
}

/// Owns all outstanding client-side calls. Every operation below locks the
/// whole table once, so the three indices never disagree.
pub struct PendingCallTable {
    inner: Mutex<Inner>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        PendingCallTable { inner: Mutex::new(Inner { pending: HashMap::new(), peer_fifo: HashMap::new(), pre_resolved: HashMap::new() }) }
    }

    /// Register a new pending call, returning a receiver for its outcome.
    /// If `cancel` or `resolve` already ran for this `call_id` before this
    /// call to `store`, the receiver resolves immediately with that
    /// outcome instead of waiting.
    pub fn store(&self, call_id: CallId, peer_id: PeerId) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if let Some(outcome) = inner.pre_resolved.remove(&call_id) {
            let _ = tx.send(outcome);
            return rx;
        }
        inner.pending.insert(call_id, (peer_id, tx));
        inner.peer_fifo.entry(peer_id).or_default().push_back(call_id);
        rx
    }

    /// Resolve a pending call with its outcome. Returns `false` if no call
    /// with this id was pending (it may have already timed out).
    pub fn resolve(&self, call_id: CallId, outcome: CallOutcome) -> bool {
        let mut inner = self.inner.lock();
        let Some((peer_id, tx)) = inner.pending.remove(&call_id) else {
            return false;
        };
        remove_from_fifo(&mut inner.peer_fifo, peer_id, call_id);
        let _ = tx.send(outcome);
        true
    }

    /// Cancel a pending call with a transport-face error. If the call
    /// hasn't been `store`d yet, records a pre-resolution so the race is
    /// resolved correctly either way.
    pub fn cancel(&self, call_id: CallId, error: TransportError) {
        let mut inner = self.inner.lock();
        match inner.pending.remove(&call_id) {
            Some((peer_id, tx)) => {
                remove_from_fifo(&mut inner.peer_fifo, peer_id, call_id);
                let _ = tx.send(Err(error));
            }
            None => {
                inner.pre_resolved.insert(call_id, Err(error));
            }
        }
    }

    /// Cancel the oldest in-flight call for `peer_id`. Used to attribute a
    /// link error with no call id of its own.
    pub fn cancel_oldest_for_peer(&self, peer_id: PeerId, error: TransportError) -> bool {
        let mut inner = self.inner.lock();
        let Some(call_id) = inner.peer_fifo.get_mut(&peer_id).and_then(VecDeque::pop_front) else {
            return false;
        };
        if inner.peer_fifo.get(&peer_id).is_some_and(VecDeque::is_empty) {
            inner.peer_fifo.remove(&peer_id);
        }
        match inner.pending.remove(&call_id) {
            Some((_, tx)) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Cancel every pending call for `peer_id`. Used on disconnect.
    /// Returns the number of calls actually cancelled.
    pub fn cancel_all_for_peer(&self, peer_id: PeerId, error: TransportError) -> usize {
        let mut inner = self.inner.lock();
        let Some(queue) = inner.peer_fifo.remove(&peer_id) else { return 0 };
        let mut cancelled = 0;
        for call_id in queue {
            if let Some((_, tx)) = inner.pending.remove(&call_id) {
                let _ = tx.send(Err(error.clone()));
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn pending_count_for_peer(&self, peer_id: PeerId) -> usize {
        self.inner.lock().peer_fifo.get(&peer_id).map_or(0, VecDeque::len)
    }
}

impl Default for PendingCallTable {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_from_fifo(fifo: &mut HashMap<PeerId, VecDeque<CallId>>, peer_id: PeerId, call_id: CallId) {
    if let Some(queue) = fifo.get_mut(&peer_id) {
        queue.retain(|id| *id != call_id);
        if queue.is_empty() {
            fifo.remove(&peer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actorlink_wire::ids::Id128;

    #[tokio::test]
    async fn resolve_delivers_the_outcome() {
        let table = PendingCallTable::new();
        let call_id = Id128::from_u128(1);
        let rx = table.store(call_id, Id128::from_u128(100));
        assert!(table.resolve(call_id, Ok(CallResult::Void)));
        assert_eq!(rx.await.unwrap(), Ok(CallResult::Void));
    }

    #[tokio::test]
    async fn cancel_before_store_is_a_pre_resolution() {
        let table = PendingCallTable::new();
        let call_id = Id128::from_u128(1);
        table.cancel(call_id, TransportError::Disconnected);
        let rx = table.store(call_id, Id128::from_u128(100));
        assert_eq!(rx.await.unwrap(), Err(TransportError::Disconnected));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_oldest_for_peer_pops_fifo_head() {
        let table = PendingCallTable::new();
        let peer = Id128::from_u128(100);
        let rx1 = table.store(Id128::from_u128(1), peer);
        let _rx2 = table.store(Id128::from_u128(2), peer);

        assert!(table.cancel_oldest_for_peer(peer, TransportError::RpcFailed("link error".into())));
        assert_eq!(rx1.await.unwrap(), Err(TransportError::RpcFailed("link error".into())));
        assert_eq!(table.pending_count(), 1);
        assert_eq!(table.pending_count_for_peer(peer), 1);
    }

    #[tokio::test]
    async fn cancel_all_for_peer_resolves_every_call() {
        let table = PendingCallTable::new();
        let peer = Id128::from_u128(100);
        let other_peer = Id128::from_u128(200);
        let rx1 = table.store(Id128::from_u128(1), peer);
        let rx2 = table.store(Id128::from_u128(2), peer);
        let rx3 = table.store(Id128::from_u128(3), other_peer);

        table.cancel_all_for_peer(peer, TransportError::Disconnected);
        assert_eq!(rx1.await.unwrap(), Err(TransportError::Disconnected));
        assert_eq!(rx2.await.unwrap(), Err(TransportError::Disconnected));
        assert_eq!(table.pending_count(), 1);
        drop(rx3);
    }

    #[tokio::test]
    async fn resolve_unknown_call_id_is_a_no_op() {
        let table = PendingCallTable::new();
        assert!(!table.resolve(Id128::from_u128(99), Ok(CallResult::Void)));
    }
}
