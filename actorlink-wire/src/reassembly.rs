//! Inbound reassembly of fragmented packets into complete messages.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::ids::{MsgId, PeerId};
use crate::packet::Packet;

struct Entry {
    peer_id: PeerId,
    total: u16,
    received: HashMap<u16, Packet>,
    start_time: Instant,
}

impl Entry {
    fn is_complete(&self) -> bool {
        self.received.len() == self.total as usize
    }

    fn concat_payload(&self) -> Bytes {
        let mut buf = Vec::new();
        for seq in 0..self.total {
            buf.extend_from_slice(&self.received[&seq].payload);
        }
        Bytes::from(buf)
    }
}

/// Error returned when a packet cannot be accepted into the reassembly
/// table (as opposed to simply not yet completing a message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyError {
    /// A later packet for this `msg_id` declared a different `total` than
    /// an earlier one; the whole group is treated as corrupt and dropped.
    InconsistentTotal,
}

impl std::fmt::Display for ReassemblyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReassemblyError::InconsistentTotal => write!(f, "packet total disagreed with an in-progress reassembly group"),
        }
    }
}

impl std::error::Error for ReassemblyError {}

/// Tracks in-progress message reassembly, keyed by `msg_id`.
///
/// Ownership is exclusive: nothing outside this type reaches into its
/// internal map. A background caller is expected to call `gc` on an
/// interval to discard stale partial messages.
pub struct ReassemblyTable {
    entries: Mutex<HashMap<MsgId, Entry>>,
    timeout: Duration,
}

impl ReassemblyTable {
    pub fn new(timeout: Duration) -> Self {
        ReassemblyTable { entries: Mutex::new(HashMap::new()), timeout }
    }

    /// Insert one packet received from `peer_id`. Returns `Ok(Some(payload))`
    /// once the message is complete (and removes the entry), `Ok(None)`
    /// while still pending, or `Err` if the packet is inconsistent with an
    /// existing entry.
    pub fn insert(&self, peer_id: PeerId, packet: Packet) -> Result<Option<Bytes>, ReassemblyError> {
        let msg_id = packet.msg_id;
        let mut entries = self.entries.lock();

        let is_complete = {
            let entry = entries.entry(msg_id).or_insert_with(|| Entry {
                peer_id,
                total: packet.total,
                received: HashMap::new(),
                start_time: Instant::now(),
            });

            if entry.total != packet.total {
                entries.remove(&msg_id);
                return Err(ReassemblyError::InconsistentTotal);
            }

            entry.received.insert(packet.seq, packet);
            entry.is_complete()
        };

        if is_complete {
            let entry = entries.remove(&msg_id).expect("entry just inserted under this key");
            return Ok(Some(entry.concat_payload()));
        }
        Ok(None)
    }

    /// Discard every in-progress entry attributed to `peer_id`. Called on
    /// peer disconnect.
    pub fn evict_peer(&self, peer_id: PeerId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.peer_id != peer_id);
        before - entries.len()
    }

    /// Discard any entry older than the configured timeout.
    ///
    /// Returns the number of entries discarded, for logging/metrics.
    pub fn gc(&self) -> usize {
        let mut entries = self.entries.lock();
        let timeout = self.timeout;
        let before = entries.len();
        entries.retain(|_, entry| entry.start_time.elapsed() < timeout);
        before - entries.len()
    }

    /// Number of in-progress (incomplete) messages currently tracked.
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn contains(&self, msg_id: MsgId) -> bool {
        self.entries.lock().contains_key(&msg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::fragment;
    use crate::ids::Id128;

    const PEER: PeerId = Id128::from_u128(0xee);

    #[test]
    fn incomplete_group_returns_none() {
        let table = ReassemblyTable::new(Duration::from_secs(30));
        let packets = fragment(Id128::from_u128(1), b"0123456789", 28);
        assert!(table.insert(PEER, packets[0].clone()).unwrap().is_none());
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn out_of_order_insertion_completes_on_last_packet() {
        let table = ReassemblyTable::new(Duration::from_secs(30));
        let packets = fragment(Id128::from_u128(2), b"0123456789", 28);
        assert!(table.insert(PEER, packets[2].clone()).unwrap().is_none());
        assert!(table.insert(PEER, packets[0].clone()).unwrap().is_none());
        let result = table.insert(PEER, packets[1].clone()).unwrap().unwrap();
        assert_eq!(result.as_ref(), b"0123456789");
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn gc_discards_stale_entries() {
        let table = ReassemblyTable::new(Duration::from_millis(10));
        let packets = fragment(Id128::from_u128(3), b"0123456789", 28);
        table.insert(PEER, packets[0].clone()).unwrap();
        table.insert(PEER, packets[1].clone()).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let discarded = table.gc();
        assert_eq!(discarded, 1);
        assert_eq!(table.pending_count(), 0);
        // The missing third packet never completes the message.
        assert!(!table.contains(Id128::from_u128(3)));
    }

    #[test]
    fn inconsistent_total_is_rejected() {
        let table = ReassemblyTable::new(Duration::from_secs(30));
        let packets = fragment(Id128::from_u128(4), b"0123456789", 28);
        table.insert(PEER, packets[0].clone()).unwrap();

        let mut bad = packets[1].clone();
        bad.total = 99;
        assert_eq!(table.insert(PEER, bad), Err(ReassemblyError::InconsistentTotal));
    }

    #[test]
    fn evict_peer_discards_only_that_peers_entries() {
        let table = ReassemblyTable::new(Duration::from_secs(30));
        let other = Id128::from_u128(0xff);
        let a = fragment(Id128::from_u128(5), b"0123456789", 28);
        let b = fragment(Id128::from_u128(6), b"0123456789", 28);
        table.insert(PEER, a[0].clone()).unwrap();
        table.insert(other, b[0].clone()).unwrap();

        assert_eq!(table.evict_peer(PEER), 1);
        assert_eq!(table.pending_count(), 1);
        assert!(!table.contains(Id128::from_u128(5)));
        assert!(table.contains(Id128::from_u128(6)));
    }
}
