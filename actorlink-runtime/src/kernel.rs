//! The actor system kernel (C7): the one type an embedder constructs,
//! tying configuration, identity, pending calls, proxies, and the
//! fragmentation transport together behind a small call surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::Mutex;

use actorlink_codec::{CallResult, Encoding, InvocationEnvelope, ResponseEnvelope, RuntimeError};
use actorlink_registry::{ActorRegistry, LocalInstance};
use actorlink_wire::error::{LinkError, TransportError};
use actorlink_wire::ids::{ActorId, IdMinter, PeerId, ServiceId};
use actorlink_wire::link::{AdvertisementData, CentralLink, PeripheralLink, ServiceMetadata, WriteType};
use actorlink_wire::transport::{FragmentationTransport, PacketWriter};

use crate::config::RuntimeConfig;
use crate::metrics::{RuntimeMetrics, RuntimeMetricsSnapshot};
use crate::pending::PendingCallTable;
use crate::proxy::ProxyManager;

/// A registered method implementation: takes the local instance and the
/// decoded argument bytes, returns the encoded result or a runtime-face
/// error. Keyed by `"TypeName.methodName"` in the kernel's dispatch table.
pub type Handler = Arc<dyn Fn(LocalInstance, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, RuntimeError>> + Send + Sync>;

struct CentralWriter {
    central: Arc<dyn CentralLink>,
    peer_id: PeerId,
    characteristic: actorlink_wire::ids::CharacteristicId,
}

impl PacketWriter for CentralWriter {
    fn write_packet(&self, bytes: Bytes) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(self.central.write_value(self.peer_id, self.characteristic, bytes, WriteType::WithResponse))
    }
}

struct PeripheralWriter {
    peripheral: Arc<dyn PeripheralLink>,
    peer_id: PeerId,
    characteristic: actorlink_wire::ids::CharacteristicId,
}

impl PacketWriter for PeripheralWriter {
    fn write_packet(&self, bytes: Bytes) -> BoxFuture<'_, Result<(), LinkError>> {
        let to = Some(vec![self.peer_id]);
        Box::pin(async move {
            self.peripheral.update_value(bytes, self.characteristic, to).await?;
            Ok(())
        })
    }
}

/// Ties identity, registry, pending calls, proxies and transport into the
/// single call surface an embedder drives.
pub struct Kernel {
    config: RuntimeConfig,
    registry: ActorRegistry,
    pending: PendingCallTable,
    proxies: ProxyManager,
    transport: Arc<FragmentationTransport>,
    minter: IdMinter,
    peripheral: Option<Arc<dyn PeripheralLink>>,
    central: Option<Arc<dyn CentralLink>>,
    handlers: Mutex<HashMap<String, Handler>>,
    encoding: Encoding,
    metrics: RuntimeMetrics,
}

impl Kernel {
    pub fn new(
        config: RuntimeConfig,
        transport: Arc<FragmentationTransport>,
        peripheral: Option<Arc<dyn PeripheralLink>>,
        central: Option<Arc<dyn CentralLink>>,
    ) -> Self {
        Kernel {
            config,
            registry: ActorRegistry::new(),
            pending: PendingCallTable::new(),
            proxies: ProxyManager::new(),
            transport,
            minter: IdMinter::new(),
            peripheral,
            central,
            handlers: Mutex::new(HashMap::new()),
            encoding: Encoding::Postcard,
            metrics: RuntimeMetrics::new(),
        }
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// A consistent point-in-time read of call and proxy counters.
    pub fn metrics(&self) -> RuntimeMetricsSnapshot {
        self.metrics.snapshot(self.proxies.active_count())
    }

    pub fn assign_id(&self) -> ActorId {
        self.minter.mint()
    }

    /// Register a local instance under a freshly assigned id and make it
    /// reachable by incoming invocations addressed to `type_tag`.
    pub fn ready(&self, id: ActorId, type_tag: impl Into<String>, instance: LocalInstance) -> Result<(), TransportError> {
        self.registry.register_local(id, type_tag, instance)
    }

    /// Remove a local actor. Does not notify connected peers; callers that
    /// need graceful resignation should do so at a higher layer first.
    pub fn resign(&self, id: ActorId) -> Option<actorlink_registry::ActorRecord> {
        self.registry.unregister(id)
    }

    /// Register a method implementation under `"TypeName.methodName"`.
    pub fn register_handler(&self, target: impl Into<String>, handler: Handler) {
        self.handlers.lock().insert(target.into(), handler);
    }

    /// Begin advertising a local service so centrals can discover it.
    pub async fn start_advertising(&self, service: ServiceMetadata, advertisement: AdvertisementData) -> Result<(), TransportError> {
        let peripheral = self.peripheral.as_ref().ok_or(TransportError::OperationNotSupported)?;
        peripheral.add_service(service).await?;
        peripheral.start_advertising(advertisement).await
    }

    /// Scan for peers advertising `service_id`, connect to each, and
    /// register the ones that complete discovery as remote actors (using
    /// the peer's own id as its `ActorId`).
    pub async fn discover(&self, service_id: ServiceId, type_tag: &str, scan_timeout: Duration) -> Vec<PeerId> {
        let Some(central) = self.central.as_ref() else { return Vec::new() };
        let mut found = Vec::new();
        let mut discovered = central.scan_for(vec![service_id], scan_timeout);
        while let Some(hit) = discovered.next().await {
            let peer_id = hit.peer_id;
            let setup = self
                .proxies
                .setup_proxy(central.as_ref(), &self.transport, peer_id, service_id, self.config.connection_timeout)
                .await;
            if setup.is_ok() && self.registry.register_remote(peer_id, peer_id, type_tag).is_ok() {
                tracing::info!(target: "connection", peer = %peer_id, type_tag, "discovered and registered remote actor");
                found.push(peer_id);
            } else if let Err(err) = setup {
                tracing::warn!(target: "connection", peer = %peer_id, type_tag, error = %err, "discovery hit failed setup");
            }
        }
        found
    }

    /// Tear down a remote peer: cancel its pending calls, drop its proxy,
    /// evict its registry records and transport state, and disconnect.
    pub async fn disconnect(&self, peer_id: PeerId) {
        let cancelled = self.pending.cancel_all_for_peer(peer_id, TransportError::Disconnected);
        self.metrics.inc_calls_cancelled_by(cancelled as u64);
        tracing::info!(target: "connection", peer = %peer_id, cancelled, "disconnecting peer");
        self.registry.unregister_peer(peer_id);
        if let Some(central) = self.central.as_ref() {
            self.proxies.teardown(central.as_ref(), &self.transport, peer_id).await;
        }
    }

    /// Invoke `target` on `actor_id` and await its result, bounded by
    /// `config.rpc_timeout`. If `actor_id` resolves to a local instance,
    /// dispatches in-process through [`Self::dispatch_locally`] and never
    /// touches the link; a local and a remote call share the same
    /// envelope/codec path either way.
    pub async fn remote_call(&self, actor_id: ActorId, target: impl Into<String>, args: Vec<u8>) -> Result<CallResult, TransportError> {
        let target = target.into();
        let record = self.registry.find(actor_id).ok_or(TransportError::ActorNotFound(actor_id))?;

        if record.kind.as_local().is_some() {
            let call_id = self.minter.mint();
            let envelope = InvocationEnvelope::new(call_id, None, actor_id, target.clone(), args);
            let response = self.dispatch_locally(&envelope).await;
            return match response.result {
                CallResult::Failure(err) => {
                    self.metrics.inc_calls_completed();
                    tracing::error!(target: "rpc", call_id = %call_id, method = %target, error = %err, "local dispatch failed");
                    Err(err.into())
                }
                other => {
                    self.metrics.inc_calls_completed();
                    tracing::debug!(target: "rpc", call_id = %call_id, method = %target, "local call completed");
                    Ok(other)
                }
            };
        }

        let peer_id = record.kind.as_remote().ok_or(TransportError::InvalidData)?;
        let proxy = self.proxies.get(peer_id).ok_or(TransportError::Disconnected)?;
        let central = self.central.as_ref().ok_or(TransportError::OperationNotSupported)?;

        let call_id = self.minter.mint();
        let envelope = InvocationEnvelope::new(call_id, None, actor_id, target.clone(), args);
        let encoded = envelope.encode(self.encoding).map_err(TransportError::from)?;

        let rx = self.pending.store(call_id, peer_id);
        let writer = CentralWriter { central: central.clone(), peer_id, characteristic: proxy.rpc_characteristic };
        if let Err(err) = self.transport.send_with_msg_id(&writer, peer_id, call_id, &encoded).await {
            self.pending.cancel(call_id, err.clone());
            self.metrics.inc_calls_cancelled_by(1);
            tracing::warn!(target: "rpc", call_id = %call_id, method = %target, peer = %peer_id, error = %err, "send failed, call cancelled");
            return Err(err);
        }

        match tokio::time::timeout(self.config.rpc_timeout, rx).await {
            Ok(Ok(outcome)) => {
                self.metrics.inc_calls_completed();
                tracing::debug!(target: "rpc", call_id = %call_id, method = %target, peer = %peer_id, "remote call completed");
                outcome
            }
            Ok(Err(_)) => {
                self.metrics.inc_calls_cancelled_by(1);
                tracing::warn!(target: "rpc", call_id = %call_id, method = %target, peer = %peer_id, "pending call dropped without resolution");
                Err(TransportError::Disconnected)
            }
            Err(_) => {
                self.pending.cancel(call_id, TransportError::ConnectionTimeout);
                self.metrics.inc_calls_timed_out();
                tracing::warn!(target: "rpc", call_id = %call_id, method = %target, peer = %peer_id, timeout = ?self.config.rpc_timeout, "rpc timed out");
                Err(TransportError::ConnectionTimeout)
            }
        }
    }

    /// Feed one raw inbound packet received on the peripheral role
    /// (`WriteRequestReceived`). Reassembles, decodes as an invocation,
    /// dispatches locally, and writes back a response.
    pub async fn handle_invocation_packet(&self, peer_id: PeerId, characteristic: actorlink_wire::ids::CharacteristicId, raw: &[u8]) {
        let payload = match self.transport.receive(peer_id, raw) {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(target: "transport", peer = %peer_id, error = %err, "dropping unreassemblable invocation chunk");
                return;
            }
        };

        let envelope = match InvocationEnvelope::decode(self.encoding, &payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(target: "rpc", peer = %peer_id, error = %err, "failed to decode invocation envelope");
                return;
            }
        };

        let response = self.dispatch_locally(&envelope).await;

        let Some(peripheral) = self.peripheral.clone() else { return };
        let Ok(encoded) = response.encode(self.encoding) else { return };
        let writer = PeripheralWriter { peripheral, peer_id, characteristic };
        let _ = self.transport.send_with_msg_id(&writer, peer_id, envelope.call_id, &encoded).await;
    }

    async fn dispatch_locally(&self, envelope: &InvocationEnvelope) -> ResponseEnvelope {
        let Some(record) = self.registry.find(envelope.recipient_id) else {
            tracing::error!(target: "actor_system", actor_id = %envelope.recipient_id, method = %envelope.target, "dispatch target not found in registry");
            return ResponseEnvelope::failure(envelope.call_id, RuntimeError::ActorNotFound(envelope.recipient_id.to_string()));
        };
        let Some(instance) = record.kind.as_local().cloned() else {
            tracing::error!(target: "actor_system", actor_id = %envelope.recipient_id, method = %envelope.target, "dispatch target resolved to a remote record");
            return ResponseEnvelope::failure(envelope.call_id, RuntimeError::ActorNotFound(envelope.recipient_id.to_string()));
        };
        let handler = self.handlers.lock().get(&envelope.target).cloned();
        let Some(handler) = handler else {
            tracing::error!(target: "actor_system", actor_id = %envelope.recipient_id, method = %envelope.target, "no handler registered for method");
            return ResponseEnvelope::failure(envelope.call_id, RuntimeError::MethodNotFound(envelope.target.clone()));
        };

        match handler(instance, envelope.args.clone()).await {
            Ok(bytes) if bytes.is_empty() => ResponseEnvelope::void(envelope.call_id),
            Ok(bytes) => ResponseEnvelope::success(envelope.call_id, bytes),
            Err(err) => {
                tracing::error!(target: "actor_system", actor_id = %envelope.recipient_id, method = %envelope.target, error = %err, "handler returned an error");
                ResponseEnvelope::failure(envelope.call_id, err)
            }
        }
    }

    /// Spawn the background tasks that pump this kernel's own peripheral
    /// and central event streams into [`Self::handle_invocation_packet`]
    /// and [`Self::handle_response_packet`]. Returns one handle per role
    /// that is actually wired; the caller owns their lifetime.
    pub fn spawn_event_pumps(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(peripheral) = self.peripheral.clone() {
            let kernel = self.clone();
            let mut events = peripheral.events();
            handles.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let actorlink_wire::link::PeripheralEvent::WriteRequestReceived { peer, characteristic, data } = event {
                        kernel.handle_invocation_packet(peer, characteristic, &data).await;
                    }
                }
            }));
        }

        if let Some(central) = self.central.clone() {
            let kernel = self.clone();
            let mut events = central.events();
            handles.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let actorlink_wire::link::CentralEvent::CharacteristicValueUpdated { peer, data, .. } = event {
                        kernel.handle_response_packet(peer, &data);
                    }
                }
            }));
        }

        handles
    }

    /// Feed one raw inbound packet received on the central role
    /// (`CharacteristicValueUpdated`). Reassembles, decodes as a response,
    /// and resolves the matching pending call.
    pub fn handle_response_packet(&self, peer_id: PeerId, raw: &[u8]) {
        let payload = match self.transport.receive(peer_id, raw) {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(target: "transport", peer = %peer_id, error = %err, "dropping unreassemblable response chunk");
                return;
            }
        };
        let envelope = match ResponseEnvelope::decode(self.encoding, &payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(target: "rpc", peer = %peer_id, error = %err, "failed to decode response envelope");
                return;
            }
        };
        let outcome = match envelope.result {
            CallResult::Failure(err) => Err(err.into()),
            other => Ok(other),
        };
        self.pending.resolve(envelope.call_id, outcome);
    }
}
