//! An in-process, simulated link implementing both [`PeripheralLink`] and
//! [`CentralLink`] over in-memory channels.
//!
//! The concrete BLE driver is out of scope for this crate (sec1); this is
//! the reference transport everything else is built and tested against. It
//! follows the same "driver runs independently, callbacks become channel
//! messages" shape a real adapter would (sec9), even though there is no
//! real callback-based driver underneath -- so the kernel code above it
//! exercises the identical code paths it would against real hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::error::LinkError;
use crate::fault::{FaultAction, FaultInjector};
use crate::fragment::DEFAULT_MTU;
use crate::ids::{CharacteristicId, PeerId, ServiceId};
use crate::metrics::TransportMetrics;
use crate::link::{
    AdvertisementData, CentralEvent, CentralLink, CharMetadata, Discovered, LinkState,
    PeripheralEvent, PeripheralLink, ServiceMetadata, WriteType,
};

struct NodeState {
    services: Vec<ServiceMetadata>,
    advertisement: Option<AdvertisementData>,
    advertising: bool,
    /// characteristic -> set of connection ids subscribed to notifications.
    subscribers: HashMap<CharacteristicId, HashSet<PeerId>>,
    /// connection id -> channel delivering events back to that central.
    connections: HashMap<PeerId, mpsc::UnboundedSender<CentralEvent>>,
    peripheral_events: mpsc::UnboundedSender<PeripheralEvent>,
    /// GATT-style last-value cache, updated by `update_value` and served
    /// back by a central's `read_value`.
    values: HashMap<CharacteristicId, Bytes>,
}

/// Shared world state every simulated peripheral/central handle is a view
/// onto.
pub struct SimHub {
    nodes: Mutex<HashMap<PeerId, NodeState>>,
}

impl SimHub {
    pub fn new() -> Arc<Self> {
        Arc::new(SimHub { nodes: Mutex::new(HashMap::new()) })
    }
}

/// A peripheral-role handle bound to one node in a [`SimHub`].
pub struct SimPeripheral {
    hub: Arc<SimHub>,
    peer_id: PeerId,
    advertising: AtomicBool,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeripheralEvent>>>,
    state_tx: mpsc::UnboundedSender<PeripheralEvent>,
}

impl SimPeripheral {
    pub fn new(hub: Arc<SimHub>, peer_id: PeerId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.nodes.lock().insert(
            peer_id,
            NodeState {
                services: Vec::new(),
                advertisement: None,
                advertising: false,
                subscribers: HashMap::new(),
                connections: HashMap::new(),
                peripheral_events: tx.clone(),
                values: HashMap::new(),
            },
        );
        SimPeripheral { hub, peer_id, advertising: AtomicBool::new(false), events_rx: Mutex::new(Some(rx)), state_tx: tx }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

impl PeripheralLink for SimPeripheral {
    fn initialize(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async { Ok(()) })
    }

    fn wait_powered_on(&self) -> BoxFuture<'_, LinkState> {
        Box::pin(async { LinkState::PoweredOn })
    }

    fn add_service(&self, service: ServiceMetadata) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async move {
            let mut nodes = self.hub.nodes.lock();
            let node = nodes.get_mut(&self.peer_id).ok_or(LinkError::BluetoothUnavailable)?;
            node.services.push(service);
            Ok(())
        })
    }

    fn start_advertising(&self, data: AdvertisementData) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async move {
            let mut nodes = self.hub.nodes.lock();
            let node = nodes.get_mut(&self.peer_id).ok_or(LinkError::BluetoothUnavailable)?;
            node.advertisement = Some(data);
            node.advertising = true;
            self.advertising.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn stop_advertising(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async move {
            let mut nodes = self.hub.nodes.lock();
            if let Some(node) = nodes.get_mut(&self.peer_id) {
                node.advertising = false;
            }
            self.advertising.store(false, Ordering::Release);
            Ok(())
        })
    }

    fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::Acquire)
    }

    fn update_value(
        &self,
        data: Bytes,
        characteristic: CharacteristicId,
        to: Option<Vec<PeerId>>,
    ) -> BoxFuture<'_, Result<bool, LinkError>> {
        Box::pin(async move {
            let mut nodes = self.hub.nodes.lock();
            let node = nodes.get_mut(&self.peer_id).ok_or(LinkError::BluetoothUnavailable)?;
            node.values.insert(characteristic, data.clone());
            let targets: Vec<PeerId> = match to {
                Some(list) => list,
                None => node.subscribers.get(&characteristic).map(|s| s.iter().copied().collect()).unwrap_or_default(),
            };
            for target in targets {
                if let Some(sender) = node.connections.get(&target) {
                    let _ = sender.send(CentralEvent::CharacteristicValueUpdated {
                        peer: self.peer_id,
                        characteristic,
                        data: data.clone(),
                        error: None,
                    });
                }
            }
            Ok(true)
        })
    }

    fn events(&self) -> BoxStream<'static, PeripheralEvent> {
        let rx = self.events_rx.lock().take().expect("SimPeripheral::events() called more than once");
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

/// A central-role handle. Each handle gets its own connection identity so a
/// peripheral can address notifications to it independently of other
/// centrals.
pub struct SimCentral {
    hub: Arc<SimHub>,
    connection_id: PeerId,
    scan_service_filter: Mutex<Option<Vec<ServiceId>>>,
    fault_injector: Option<Arc<FaultInjector>>,
    fault_metrics: Option<Arc<TransportMetrics>>,
    events_tx: mpsc::UnboundedSender<CentralEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<CentralEvent>>>,
}

impl SimCentral {
    pub fn new(hub: Arc<SimHub>, connection_id: PeerId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        SimCentral {
            hub,
            connection_id,
            scan_service_filter: Mutex::new(None),
            fault_injector: None,
            fault_metrics: None,
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        }
    }

    /// Attach a fault injector to perturb this central's outbound writes.
    pub fn with_fault_injector(mut self, injector: Arc<FaultInjector>) -> Self {
        self.fault_injector = Some(injector);
        self
    }

    /// Count every fault the injector actually triggers against `metrics`,
    /// typically the same [`TransportMetrics`] the owning
    /// [`crate::transport::FragmentationTransport`] reports through.
    pub fn with_fault_metrics(mut self, metrics: Arc<TransportMetrics>) -> Self {
        self.fault_metrics = Some(metrics);
        self
    }
}

impl CentralLink for SimCentral {
    fn scan_for(&self, service_ids: Vec<ServiceId>, timeout: Duration) -> BoxStream<'static, Discovered> {
        *self.scan_service_filter.lock() = Some(service_ids.clone());
        let hub = self.hub.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                {
                    let nodes = hub.nodes.lock();
                    for (peer_id, node) in nodes.iter() {
                        if !node.advertising || seen.contains(peer_id) {
                            continue;
                        }
                        let Some(advertisement) = &node.advertisement else { continue };
                        let matches = service_ids.is_empty() || service_ids.iter().any(|id| advertisement.service_ids.contains(id));
                        if matches {
                            seen.insert(*peer_id);
                            if tx.send(Discovered { peer_id: *peer_id, advertisement: advertisement.clone() }).is_err() {
                                return;
                            }
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    fn stop_scan(&self) {
        // The scan task tears itself down on timeout or receiver drop; an
        // explicit stop just means the caller drops the stream early.
    }

    fn connect(&self, peer_id: PeerId, timeout: Duration) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                {
                    let mut nodes = self.hub.nodes.lock();
                    if let Some(node) = nodes.get_mut(&peer_id) {
                        node.connections.insert(self.connection_id, self.events_tx.clone());
                        let _ = self.events_tx.send(CentralEvent::PeripheralConnected(peer_id));
                        return Ok(());
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(LinkError::ConnectionTimeout);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    }

    fn disconnect(&self, peer_id: PeerId) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async move {
            let mut nodes = self.hub.nodes.lock();
            if let Some(node) = nodes.get_mut(&peer_id) {
                node.connections.remove(&self.connection_id);
                for subs in node.subscribers.values_mut() {
                    subs.remove(&self.connection_id);
                }
            }
            Ok(())
        })
    }

    fn discover_services(
        &self,
        peer_id: PeerId,
        filter: Option<Vec<ServiceId>>,
    ) -> BoxFuture<'_, Result<Vec<ServiceMetadata>, LinkError>> {
        Box::pin(async move {
            let nodes = self.hub.nodes.lock();
            let node = nodes.get(&peer_id).ok_or(LinkError::Disconnected)?;
            if !node.connections.contains_key(&self.connection_id) {
                return Err(LinkError::Disconnected);
            }
            let services: Vec<ServiceMetadata> = node
                .services
                .iter()
                .filter(|s| filter.as_ref().is_none_or(|f| f.contains(&s.id)))
                .cloned()
                .collect();
            Ok(services)
        })
    }

    fn discover_characteristics(
        &self,
        service: ServiceId,
        peer_id: PeerId,
        filter: Option<Vec<CharacteristicId>>,
    ) -> BoxFuture<'_, Result<Vec<CharMetadata>, LinkError>> {
        Box::pin(async move {
            let nodes = self.hub.nodes.lock();
            let node = nodes.get(&peer_id).ok_or(LinkError::Disconnected)?;
            let service = node.services.iter().find(|s| s.id == service).ok_or(LinkError::ServiceNotFound(service))?;
            let chars: Vec<CharMetadata> = service
                .characteristics
                .iter()
                .filter(|c| filter.as_ref().is_none_or(|f| f.contains(&c.id)))
                .cloned()
                .collect();
            Ok(chars)
        })
    }

    fn write_value(
        &self,
        peer_id: PeerId,
        characteristic: CharacteristicId,
        data: Bytes,
        _write_type: WriteType,
    ) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async move {
            if let Some(injector) = &self.fault_injector {
                match injector.check() {
                    FaultAction::Pass => {}
                    FaultAction::Drop => {
                        if let Some(metrics) = &self.fault_metrics {
                            metrics.inc_faults_injected();
                        }
                        return Ok(()); // accepted by the driver, never arrives
                    }
                    FaultAction::QueueFull => {
                        if let Some(metrics) = &self.fault_metrics {
                            metrics.inc_faults_injected();
                        }
                        return Err(LinkError::RpcFailed("link queue full".into()));
                    }
                    FaultAction::Delay(d) => {
                        if let Some(metrics) = &self.fault_metrics {
                            metrics.inc_faults_injected();
                        }
                        tokio::time::sleep(d).await;
                    }
                }
            }

            let nodes = self.hub.nodes.lock();
            let node = nodes.get(&peer_id).ok_or(LinkError::Disconnected)?;
            if !node.connections.contains_key(&self.connection_id) {
                return Err(LinkError::Disconnected);
            }
            node.peripheral_events
                .send(PeripheralEvent::WriteRequestReceived { peer: self.connection_id, characteristic, data })
                .map_err(|_| LinkError::Disconnected)?;
            Ok(())
        })
    }

    fn read_value(&self, characteristic: CharacteristicId, peer_id: PeerId) -> BoxFuture<'_, Result<Bytes, LinkError>> {
        Box::pin(async move {
            let nodes = self.hub.nodes.lock();
            let node = nodes.get(&peer_id).ok_or(LinkError::Disconnected)?;
            if !node.connections.contains_key(&self.connection_id) {
                return Err(LinkError::Disconnected);
            }
            node.values.get(&characteristic).cloned().ok_or(LinkError::CharacteristicNotFound(characteristic))
        })
    }

    fn set_notify_value(
        &self,
        enabled: bool,
        characteristic: CharacteristicId,
        peer_id: PeerId,
    ) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async move {
            let mut nodes = self.hub.nodes.lock();
            let node = nodes.get_mut(&peer_id).ok_or(LinkError::Disconnected)?;
            if !node.connections.contains_key(&self.connection_id) {
                return Err(LinkError::Disconnected);
            }
            let subs = node.subscribers.entry(characteristic).or_default();
            if enabled {
                subs.insert(self.connection_id);
                drop(nodes);
                // Mirror a real stack's Subscribed notification to the peripheral side.
                let nodes = self.hub.nodes.lock();
                if let Some(node) = nodes.get(&peer_id) {
                    let _ = node.peripheral_events.send(PeripheralEvent::Subscribed { peer: self.connection_id, characteristic });
                }
            } else {
                subs.remove(&self.connection_id);
            }
            Ok(())
        })
    }

    fn max_write_value_length(&self, peer_id: PeerId, _write_type: WriteType) -> Option<usize> {
        let nodes = self.hub.nodes.lock();
        let node = nodes.get(&peer_id)?;
        node.connections.contains_key(&self.connection_id).then_some(DEFAULT_MTU)
    }

    fn events(&self) -> BoxStream<'static, CentralEvent> {
        let rx = self.events_rx.lock().take().expect("SimCentral::events() called more than once");
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}
