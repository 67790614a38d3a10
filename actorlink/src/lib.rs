//! A transport-agnostic actor RPC runtime over a BLE-style datagram link.
//!
//! This crate is the embedder-facing facade over the four layers that do
//! the actual work: [`actorlink_wire`] (link + fragmentation transport),
//! [`actorlink_codec`] (envelopes + wire codec), [`actorlink_registry`]
//! (actor identity), and [`actorlink_runtime`] (pending calls, proxies,
//! the kernel). [`Runtime`] wires all four together; most applications
//! only need this module.

use std::sync::Arc;
use std::time::Duration;

use actorlink_wire::ids::{rpc_characteristic_id_for_type, service_id_for_type, ActorId, PeerId};
use actorlink_wire::link::{AdvertisementData, CentralLink, PeripheralLink, ServiceMetadata};
use actorlink_wire::sim::{SimCentral, SimHub, SimPeripheral};
use actorlink_wire::transport::{FragmentationTransport, TransportConfig};

pub use actorlink_codec::{CallResult, Encoding, InvocationEnvelope, ResponseEnvelope, RuntimeError};
pub use actorlink_registry::{ActorKind, ActorRecord, LocalInstance};
pub use actorlink_runtime::{Handler, Kernel, Proxy, ProxyManager, RuntimeConfig, RuntimeMetricsSnapshot};
pub use actorlink_wire::error::TransportError;
pub use actorlink_wire::ids::Id128;
pub use actorlink_wire::metrics::TransportMetricsSnapshot;

/// A consistent point-in-time read of every counter this crate tracks:
/// packet-level counters from the transport, call- and proxy-level
/// counters from the kernel (sec4.10).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transport: TransportMetricsSnapshot,
    pub runtime: RuntimeMetricsSnapshot,
}

/// A fully wired actor runtime: kernel, transport, and link, for one node
/// on the network. Construct with [`Runtime::in_memory`] for tests and
/// demos backed by [`actorlink_wire::sim`]; embedders targeting real
/// hardware build a [`Kernel`] directly over their own link
/// implementation instead.
pub struct Runtime {
    kernel: Arc<Kernel>,
    transport: Arc<FragmentationTransport>,
}

impl Runtime {
    /// Wire a node to the shared in-process simulated link, acting as
    /// both peripheral and central roles under `node_id`.
    pub fn in_memory(hub: Arc<SimHub>, node_id: PeerId, config: RuntimeConfig) -> Self {
        let peripheral: Arc<dyn PeripheralLink> = Arc::new(SimPeripheral::new(hub.clone(), node_id));
        let central: Arc<dyn CentralLink> = Arc::new(SimCentral::new(hub, node_id));
        let transport = Arc::new(FragmentationTransport::new(TransportConfig {
            reassembly_timeout: config.reassembly_timeout,
            cleanup_interval: config.cleanup_interval,
            max_retry_attempts: config.max_retry_attempts,
            retry_delay: config.retry_delay,
        }));
        let kernel = Arc::new(Kernel::new(config, transport.clone(), Some(peripheral), Some(central)));
        Runtime { kernel, transport }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Start the background reassembly garbage collector. The returned
    /// handle aborts the task on drop.
    pub fn spawn_gc(&self) -> tokio::task::JoinHandle<()> {
        FragmentationTransport::spawn_gc_task(self.transport.clone())
    }

    /// Start the background tasks that pump inbound link events (write
    /// requests on the peripheral side, value updates on the central
    /// side) into the kernel's dispatch and pending-call machinery. Must
    /// be called once per `Runtime` before `call`/remote invocations can
    /// make progress.
    pub fn spawn_event_pumps(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.kernel.spawn_event_pumps()
    }

    /// Register a local instance of `type_tag`, assigning it a fresh id.
    pub fn publish(&self, type_tag: impl Into<String>, instance: LocalInstance) -> ActorId {
        let id = self.kernel.assign_id();
        let type_tag = type_tag.into();
        self.kernel.ready(id, type_tag, instance).expect("freshly assigned id cannot already be registered");
        id
    }

    /// Register a method implementation, reachable as `"type_tag.method"`.
    pub fn handle(&self, type_tag: &str, method: &str, handler: Handler) {
        self.kernel.register_handler(format!("{type_tag}.{method}"), handler);
    }

    /// Advertise a previously `publish`ed type so remote nodes can
    /// discover it.
    pub async fn advertise(&self, type_tag: &str) -> Result<(), TransportError> {
        let service_id = service_id_for_type(type_tag);
        let rpc_char = rpc_characteristic_id_for_type(type_tag);
        let service = ServiceMetadata::rpc_service(service_id, rpc_char);
        let advertisement = AdvertisementData { service_ids: vec![service_id], local_name: None };
        self.kernel.start_advertising(service, advertisement).await
    }

    /// Scan for and connect to every peer currently advertising
    /// `type_tag`, registering each as a remote actor.
    pub async fn discover(&self, type_tag: &str, scan_timeout: Duration) -> Vec<ActorId> {
        let service_id = service_id_for_type(type_tag);
        self.kernel.discover(service_id, type_tag, scan_timeout).await
    }

    /// Call `method` on a remote actor and await its result.
    pub async fn call(&self, actor_id: ActorId, type_tag: &str, method: &str, args: Vec<u8>) -> Result<CallResult, TransportError> {
        self.kernel.remote_call(actor_id, format!("{type_tag}.{method}"), args).await
    }

    pub async fn disconnect(&self, peer_id: PeerId) {
        self.kernel.disconnect(peer_id).await;
    }

    /// A consistent point-in-time read of every counter this runtime
    /// tracks, combining the transport's packet-level metrics with the
    /// kernel's call- and proxy-level metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot { transport: self.transport.metrics().snapshot(), runtime: self.kernel.metrics() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> Handler {
        Arc::new(|_instance, args| Box::pin(async move { Ok(args) }))
    }

    #[tokio::test]
    async fn publish_advertise_discover_and_call_round_trip() {
        let hub = SimHub::new();
        let server_id = Id128::from_u128(1);
        let client_id = Id128::from_u128(2);

        let server = Runtime::in_memory(hub.clone(), server_id, RuntimeConfig::default());
        server.publish("Echo", Arc::new(()));
        server.handle("Echo", "reflect", echo_handler());
        server.advertise("Echo").await.unwrap();
        let _server_pumps = server.spawn_event_pumps();

        let client = Runtime::in_memory(hub, client_id, RuntimeConfig::default());
        let _client_pumps = client.spawn_event_pumps();

        let found = client.discover("Echo", Duration::from_millis(500)).await;
        assert_eq!(found, vec![server_id]);

        let result = client.call(server_id, "Echo", "reflect", vec![9, 9, 9]).await.unwrap();
        assert_eq!(result, CallResult::Success(vec![9, 9, 9]));

        let snapshot = client.metrics();
        assert_eq!(snapshot.runtime.calls_completed, 1);
        assert_eq!(snapshot.runtime.proxies_active, 1);
    }

    #[tokio::test]
    async fn calling_a_locally_published_actor_dispatches_without_any_link_traffic() {
        let hub = SimHub::new();
        let node = Runtime::in_memory(hub, Id128::from_u128(1), RuntimeConfig::default());
        let actor_id = node.publish("Echo", Arc::new(()));
        node.handle("Echo", "reflect", echo_handler());
        // No advertise, no discover, no event pumps: a local call never
        // touches the link.
        let result = node.call(actor_id, "Echo", "reflect", vec![1, 2, 3]).await.unwrap();
        assert_eq!(result, CallResult::Success(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn calling_an_undiscovered_actor_fails_without_panicking() {
        let hub = SimHub::new();
        let client = Runtime::in_memory(hub, Id128::from_u128(1), RuntimeConfig::default());
        let result = client.call(Id128::from_u128(42), "Echo", "reflect", vec![]).await;
        assert_eq!(result, Err(TransportError::ActorNotFound(Id128::from_u128(42))));
    }
}
