//! Peer/proxy manager (C6): the discover -> connect -> discover service ->
//! enable notifications -> negotiate MTU -> register transaction, and its
//! inverse teardown.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use actorlink_wire::error::TransportError;
use actorlink_wire::fragment::DEFAULT_MTU;
use actorlink_wire::ids::{CharacteristicId, PeerId, ServiceId};
use actorlink_wire::link::{CentralLink, WriteType};
use actorlink_wire::transport::FragmentationTransport;

/// A live connection to a remote actor's RPC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proxy {
    pub peer_id: PeerId,
    pub rpc_characteristic: CharacteristicId,
}

/// Owns every active [`Proxy`]. Created only after all discovery and
/// notification-enable steps succeed (sec4.6); torn down as a unit.
pub struct ProxyManager {
    proxies: Mutex<HashMap<PeerId, Proxy>>,
}

impl ProxyManager {
    pub fn new() -> Self {
        ProxyManager { proxies: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, peer_id: PeerId) -> Option<Proxy> {
        self.proxies.lock().get(&peer_id).copied()
    }

    pub fn is_connected(&self, peer_id: PeerId) -> bool {
        self.proxies.lock().contains_key(&peer_id)
    }

    pub fn active_count(&self) -> usize {
        self.proxies.lock().len()
    }

    fn insert(&self, proxy: Proxy) {
        self.proxies.lock().insert(proxy.peer_id, proxy);
    }

    pub fn remove(&self, peer_id: PeerId) -> Option<Proxy> {
        self.proxies.lock().remove(&peer_id)
    }

    /// Run the three-phase connection transaction for a peer known to
    /// advertise `service_id`. On success, registers and returns the new
    /// proxy. On any failure, disconnects and leaves no trace in this
    /// manager, the transport's MTU cache, or reassembly state.
    ///
    /// Idempotent: a peer that already has an active proxy is returned
    /// as-is without repeating discovery.
    pub async fn setup_proxy(
        &self,
        central: &dyn CentralLink,
        transport: &FragmentationTransport,
        peer_id: PeerId,
        service_id: ServiceId,
        connection_timeout: Duration,
    ) -> Result<Proxy, TransportError> {
        if let Some(existing) = self.get(peer_id) {
            return Ok(existing);
        }

        central.connect(peer_id, connection_timeout).await?;
        tracing::debug!(target: "connection", peer = %peer_id, "connected, beginning discovery");

        match self.discover_and_enable(central, transport, peer_id, service_id).await {
            Ok(proxy) => {
                self.insert(proxy);
                tracing::info!(target: "connection", peer = %peer_id, characteristic = %proxy.rpc_characteristic, "proxy established");
                Ok(proxy)
            }
            Err(err) => {
                let _ = central.disconnect(peer_id).await;
                transport.evict_peer(peer_id);
                tracing::warn!(target: "connection", peer = %peer_id, error = %err, "discovery failed, rolled back");
                Err(err)
            }
        }
    }

    async fn discover_and_enable(
        &self,
        central: &dyn CentralLink,
        transport: &FragmentationTransport,
        peer_id: PeerId,
        service_id: ServiceId,
    ) -> Result<Proxy, TransportError> {
        let mtu = central.max_write_value_length(peer_id, WriteType::WithResponse).unwrap_or(DEFAULT_MTU);
        transport.set_mtu(peer_id, mtu);

        let services = central.discover_services(peer_id, Some(vec![service_id])).await?;
        if services.is_empty() {
            return Err(TransportError::ServiceNotFound(service_id));
        }

        let characteristics = central.discover_characteristics(service_id, peer_id, None).await?;
        let rpc_characteristic =
            characteristics.first().ok_or(TransportError::CharacteristicNotFound(CharacteristicId::ZERO))?.id;

        central.set_notify_value(true, rpc_characteristic, peer_id).await?;

        Ok(Proxy { peer_id, rpc_characteristic })
    }

    /// Inverse of `setup_proxy`: evict the proxy and the transport state
    /// tied to this peer, then command the link to disconnect.
    pub async fn teardown(&self, central: &dyn CentralLink, transport: &FragmentationTransport, peer_id: PeerId) {
        self.remove(peer_id);
        transport.evict_peer(peer_id);
        let _ = central.disconnect(peer_id).await;
        tracing::info!(target: "connection", peer = %peer_id, "proxy torn down");
    }
}

impl Default for ProxyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actorlink_wire::ids::{rpc_characteristic_id_for_type, service_id_for_type};
    use actorlink_wire::link::{AdvertisementData, PeripheralLink, ServiceMetadata};
    use actorlink_wire::sim::{SimCentral, SimHub, SimPeripheral};
    use actorlink_wire::transport::TransportConfig;
    use actorlink_wire::ids::Id128;

    #[tokio::test]
    async fn setup_proxy_succeeds_against_a_well_formed_peripheral() {
        let hub = SimHub::new();
        let service_id = service_id_for_type("Thermostat");
        let rpc_char = rpc_characteristic_id_for_type("Thermostat");
        let peer = Id128::from_u128(1);

        let peripheral = SimPeripheral::new(hub.clone(), peer);
        peripheral.add_service(ServiceMetadata::rpc_service(service_id, rpc_char)).await.unwrap();
        peripheral.start_advertising(AdvertisementData { service_ids: vec![service_id], local_name: None }).await.unwrap();

        let central = SimCentral::new(hub.clone(), Id128::from_u128(2));
        let transport = FragmentationTransport::new(TransportConfig::default());
        let manager = ProxyManager::new();

        let proxy = manager.setup_proxy(&central, &transport, peer, service_id, Duration::from_millis(200)).await.unwrap();
        assert_eq!(proxy.peer_id, peer);
        assert_eq!(proxy.rpc_characteristic, rpc_char);
        assert!(manager.is_connected(peer));
        assert!(transport.has_mtu(peer));
    }

    #[tokio::test]
    async fn setup_proxy_rejects_a_peer_without_the_service() {
        let hub = SimHub::new();
        let peer = Id128::from_u128(1);
        let _peripheral = SimPeripheral::new(hub.clone(), peer); // no services registered

        let central = SimCentral::new(hub.clone(), Id128::from_u128(2));
        let transport = FragmentationTransport::new(TransportConfig::default());
        let manager = ProxyManager::new();

        let result = manager.setup_proxy(&central, &transport, peer, service_id_for_type("Thermostat"), Duration::from_millis(200)).await;
        assert!(matches!(result, Err(TransportError::ServiceNotFound(_))));
        assert!(!manager.is_connected(peer));
        assert!(!transport.has_mtu(peer));
    }

    #[tokio::test]
    async fn setup_proxy_is_idempotent() {
        let hub = SimHub::new();
        let service_id = service_id_for_type("Thermostat");
        let rpc_char = rpc_characteristic_id_for_type("Thermostat");
        let peer = Id128::from_u128(1);
        let peripheral = SimPeripheral::new(hub.clone(), peer);
        peripheral.add_service(ServiceMetadata::rpc_service(service_id, rpc_char)).await.unwrap();

        let central = SimCentral::new(hub.clone(), Id128::from_u128(2));
        let transport = FragmentationTransport::new(TransportConfig::default());
        let manager = ProxyManager::new();

        let first = manager.setup_proxy(&central, &transport, peer, service_id, Duration::from_millis(200)).await.unwrap();
        let second = manager.setup_proxy(&central, &transport, peer, service_id, Duration::from_millis(200)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test]
    async fn teardown_clears_proxy_and_transport_state() {
        let hub = SimHub::new();
        let service_id = service_id_for_type("Thermostat");
        let rpc_char = rpc_characteristic_id_for_type("Thermostat");
        let peer = Id128::from_u128(1);
        let peripheral = SimPeripheral::new(hub.clone(), peer);
        peripheral.add_service(ServiceMetadata::rpc_service(service_id, rpc_char)).await.unwrap();

        let central = SimCentral::new(hub.clone(), Id128::from_u128(2));
        let transport = FragmentationTransport::new(TransportConfig::default());
        let manager = ProxyManager::new();
        manager.setup_proxy(&central, &transport, peer, service_id, Duration::from_millis(200)).await.unwrap();

        manager.teardown(&central, &transport, peer).await;
        assert!(!manager.is_connected(peer));
        assert!(!transport.has_mtu(peer));
    }
}
