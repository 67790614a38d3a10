//! Fragmentation transport (C2): packs/unpacks framed packets over a link,
//! reassembles inbound fragments into complete envelopes, enforces a
//! reassembly deadline per in-progress message, and tracks per-peer MTU.
//!
//! This sits directly on top of [`crate::link`] and owns exactly two kinds
//! of state: the [`ReassemblyTable`] and a per-peer MTU cache. Nothing
//! outside this module reaches into either.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{LinkError, TransportError};
use crate::fragment::{fragment, DEFAULT_MTU};
use crate::ids::{IdMinter, MsgId, PeerId};
use crate::metrics::TransportMetrics;
use crate::packet::Packet;
use crate::reassembly::ReassemblyTable;

/// Tuning knobs for the retry/backoff and garbage-collection behavior. A
/// thin slice of the full runtime configuration (C9); the rest doesn't
/// concern this layer.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    pub reassembly_timeout: Duration,
    pub cleanup_interval: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            reassembly_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(10),
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// The single-packet send primitive a transport is layered over. Bound to
/// one peer; implemented by wrapping a [`crate::link::CentralLink::write_value`]
/// or [`crate::link::PeripheralLink::update_value`] call for a specific
/// characteristic and peer.
pub trait PacketWriter: Send + Sync {
    fn write_packet(&self, bytes: Bytes) -> BoxFuture<'_, Result<(), LinkError>>;
}

struct PeerMtu {
    values: Mutex<HashMap<PeerId, usize>>,
}

impl PeerMtu {
    fn new() -> Self {
        PeerMtu { values: Mutex::new(HashMap::new()) }
    }

    fn get(&self, peer_id: PeerId) -> usize {
        self.values.lock().get(&peer_id).copied().unwrap_or(DEFAULT_MTU)
    }

    fn set(&self, peer_id: PeerId, mtu: usize) {
        self.values.lock().insert(peer_id, mtu);
    }

    fn has(&self, peer_id: PeerId) -> bool {
        self.values.lock().contains_key(&peer_id)
    }

    fn evict(&self, peer_id: PeerId) {
        self.values.lock().remove(&peer_id);
    }
}

/// Owns reassembly state and per-peer MTU, and drives the retry/backoff
/// policy for outbound writes.
pub struct FragmentationTransport {
    config: TransportConfig,
    reassembly: ReassemblyTable,
    mtu: PeerMtu,
    minter: IdMinter,
    metrics: Arc<TransportMetrics>,
}

impl FragmentationTransport {
    pub fn new(config: TransportConfig) -> Self {
        FragmentationTransport {
            reassembly: ReassemblyTable::new(config.reassembly_timeout),
            mtu: PeerMtu::new(),
            minter: IdMinter::new(),
            metrics: Arc::new(TransportMetrics::new()),
            config,
        }
    }

    pub fn metrics(&self) -> Arc<TransportMetrics> {
        self.metrics.clone()
    }

    pub fn mtu_for(&self, peer_id: PeerId) -> usize {
        self.mtu.get(peer_id)
    }

    pub fn has_mtu(&self, peer_id: PeerId) -> bool {
        self.mtu.has(peer_id)
    }

    pub fn set_mtu(&self, peer_id: PeerId, mtu: usize) {
        self.mtu.set(peer_id, mtu);
    }

    /// Evict every piece of state this transport owns for `peer_id`:
    /// cached MTU and any in-progress reassembly entries. Called on peer
    /// disconnect.
    pub fn evict_peer(&self, peer_id: PeerId) {
        self.mtu.evict(peer_id);
        self.reassembly.evict_peer(peer_id);
    }

    /// Fragment `payload` and write each packet through `writer`, retrying
    /// a failing packet up to `max_retry_attempts` times with doubling
    /// backoff starting at `retry_delay`. Aborts the whole message on the
    /// first packet that exhausts its retries.
    pub async fn send(&self, writer: &dyn PacketWriter, peer_id: PeerId, payload: &[u8]) -> Result<(), TransportError> {
        let msg_id = self.minter.mint();
        self.send_with_msg_id(writer, peer_id, msg_id, payload).await
    }

    /// Same as [`Self::send`], but lets the caller pick `msg_id` (used when
    /// replying with a response envelope that must carry the same
    /// `call_id`-derived grouping as a synthesized error response).
    pub async fn send_with_msg_id(
        &self,
        writer: &dyn PacketWriter,
        peer_id: PeerId,
        msg_id: MsgId,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mtu = self.mtu_for(peer_id);
        let packets = fragment(msg_id, payload, mtu);
        self.metrics.inc_messages_fragmented();

        for packet in packets {
            self.write_with_retry(writer, packet).await?;
        }
        Ok(())
    }

    async fn write_with_retry(&self, writer: &dyn PacketWriter, packet: Packet) -> Result<(), TransportError> {
        let encoded = packet.encode();
        let mut delay = self.config.retry_delay;
        let mut last_err = None;

        for attempt in 0..self.config.max_retry_attempts {
            if attempt > 0 {
                self.metrics.inc_retry_attempts();
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match writer.write_packet(encoded.clone()).await {
                Ok(()) => {
                    self.metrics.inc_packets_sent();
                    return Ok(());
                }
                Err(err) => last_err = Some(err),
            }
        }

        self.metrics.inc_write_failures();
        let err = last_err.unwrap_or(TransportError::RpcFailed("write retries exhausted".into()));
        tracing::warn!(target: "transport", msg_id = %packet.msg_id, seq = packet.seq, attempts = self.config.max_retry_attempts, error = %err, "retry attempts exhausted, dropping packet");
        Err(err)
    }

    /// Feed one inbound chunk. Tries it first as a fragmentation packet;
    /// returns `Ok(Some(payload))` once its message is complete, `Ok(None)`
    /// while still assembling, or `Err` if the chunk parses as a packet but
    /// is otherwise inconsistent with an in-progress group. A chunk that
    /// doesn't parse as a packet at all is delivered as-is, a single raw
    /// message -- the backward path for senders that never fragment.
    pub fn receive(&self, peer_id: PeerId, raw: &[u8]) -> Result<Option<Bytes>, TransportError> {
        let packet = match Packet::decode(raw) {
            Ok(packet) => packet,
            Err(_) => {
                self.metrics.inc_packets_received();
                return Ok(Some(Bytes::copy_from_slice(raw)));
            }
        };
        self.metrics.inc_packets_received();
        match self.reassembly.insert(peer_id, packet) {
            Ok(Some(payload)) => {
                self.metrics.inc_messages_reassembled();
                Ok(Some(payload))
            }
            Ok(None) => Ok(None),
            Err(_) => Err(TransportError::InvalidData),
        }
    }

    /// Discard stale reassembly entries. Intended to be driven by a
    /// background task on `cleanup_interval`; returns the count discarded
    /// for logging.
    pub fn gc_reassembly(&self) -> usize {
        let discarded = self.reassembly.gc();
        if discarded > 0 {
            self.metrics.inc_reassembly_timeouts_by(discarded as u64);
            tracing::warn!(target: "transport", discarded, "reassembly entries timed out");
        }
        discarded
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.config.cleanup_interval
    }

    /// Spawn a background task that calls [`Self::gc_reassembly`] on
    /// `cleanup_interval` for as long as `transport` is alive. The returned
    /// handle aborts the task when dropped.
    pub fn spawn_gc_task(transport: Arc<FragmentationTransport>) -> tokio::task::JoinHandle<()> {
        let interval = transport.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                transport.gc_reassembly();
            }
        })
    }
}
