//! The link abstraction (C1): a uniform, transport-agnostic interface over
//! a peripheral (server) and a central (client) role.
//!
//! Both roles are modeled as message-sequential actors: each operation runs
//! to its first suspension point under exclusive access to the link's
//! internal state, and all state changes are observed through an event
//! stream rather than a callback. The concrete BLE driver behind either
//! role is out of scope for this crate; [`sim`](crate::sim) ships an
//! in-process implementation so the rest of the stack can be built and
//! tested without one.

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

use crate::error::LinkError;
use crate::ids::{CharacteristicId, PeerId, ServiceId};

/// Power/availability state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl LinkState {
    /// Terminal states the link will never recover from on its own.
    pub fn is_terminal_unusable(self) -> bool {
        matches!(self, LinkState::Unsupported | LinkState::Unauthorized)
    }

    pub fn is_usable(self) -> bool {
        matches!(self, LinkState::PoweredOn)
    }
}

bitflags::bitflags! {
    /// Properties a characteristic can advertise.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharProperties: u8 {
        const WRITE = 0b01;
        const NOTIFY = 0b10;
    }
}

/// Metadata for one characteristic within a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharMetadata {
    pub id: CharacteristicId,
    pub properties: CharProperties,
}

/// Metadata for one service, as advertised by a peripheral or discovered by
/// a central.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMetadata {
    pub id: ServiceId,
    pub characteristics: Vec<CharMetadata>,
}

impl ServiceMetadata {
    /// Build the canonical single-characteristic RPC service for an actor
    /// type: one service id, one characteristic with write+notify.
    pub fn rpc_service(service_id: ServiceId, rpc_characteristic: CharacteristicId) -> Self {
        ServiceMetadata {
            id: service_id,
            characteristics: vec![CharMetadata {
                id: rpc_characteristic,
                properties: CharProperties::WRITE | CharProperties::NOTIFY,
            }],
        }
    }
}

/// Data advertised by a peripheral while scanning is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementData {
    pub service_ids: Vec<ServiceId>,
    pub local_name: Option<String>,
}

/// One scan hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub peer_id: PeerId,
    pub advertisement: AdvertisementData,
}

/// How a write should be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// Events emitted by a peripheral-role link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    StateChanged(LinkState),
    WriteRequestReceived { peer: PeerId, characteristic: CharacteristicId, data: Bytes },
    Subscribed { peer: PeerId, characteristic: CharacteristicId },
    Unsubscribed { peer: PeerId, characteristic: CharacteristicId },
    ReadyToUpdate,
}

/// Events emitted by a central-role link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    StateChanged(LinkState),
    PeripheralDiscovered(Discovered),
    PeripheralConnected(PeerId),
    PeripheralDisconnected { peer: PeerId, error: Option<LinkError> },
    CharacteristicValueUpdated { peer: PeerId, characteristic: CharacteristicId, data: Bytes, error: Option<LinkError> },
}

/// The peripheral (server) role of a link.
pub trait PeripheralLink: Send + Sync {
    /// Acquire driver resources. Must be safe to call more than once;
    /// calls after the first are no-ops.
    fn initialize(&self) -> BoxFuture<'_, Result<(), LinkError>>;

    /// Resolve once the link reaches a usable state or a terminal unusable
    /// one.
    fn wait_powered_on(&self) -> BoxFuture<'_, LinkState>;

    /// Register one service and its characteristics. Must be called before
    /// `start_advertising`.
    fn add_service(&self, service: ServiceMetadata) -> BoxFuture<'_, Result<(), LinkError>>;

    fn start_advertising(&self, data: AdvertisementData) -> BoxFuture<'_, Result<(), LinkError>>;

    fn stop_advertising(&self) -> BoxFuture<'_, Result<(), LinkError>>;

    fn is_advertising(&self) -> bool;

    /// Notify the listed subscribers (or all subscribers of `characteristic`
    /// when `to` is `None`). Returns `false` if the driver's send queue is
    /// currently saturated; the caller should wait for `ReadyToUpdate` and
    /// retry.
    fn update_value(
        &self,
        data: Bytes,
        characteristic: CharacteristicId,
        to: Option<Vec<PeerId>>,
    ) -> BoxFuture<'_, Result<bool, LinkError>>;

    /// Subscribe to this peripheral's event stream.
    fn events(&self) -> BoxStream<'static, PeripheralEvent>;
}

/// The central (client) role of a link.
pub trait CentralLink: Send + Sync {
    fn scan_for(&self, service_ids: Vec<ServiceId>, timeout: Duration) -> BoxStream<'static, Discovered>;

    fn stop_scan(&self);

    fn connect(&self, peer_id: PeerId, timeout: Duration) -> BoxFuture<'_, Result<(), LinkError>>;

    fn disconnect(&self, peer_id: PeerId) -> BoxFuture<'_, Result<(), LinkError>>;

    fn discover_services(
        &self,
        peer_id: PeerId,
        filter: Option<Vec<ServiceId>>,
    ) -> BoxFuture<'_, Result<Vec<ServiceMetadata>, LinkError>>;

    fn discover_characteristics(
        &self,
        service: ServiceId,
        peer_id: PeerId,
        filter: Option<Vec<CharacteristicId>>,
    ) -> BoxFuture<'_, Result<Vec<CharMetadata>, LinkError>>;

    fn write_value(
        &self,
        peer_id: PeerId,
        characteristic: CharacteristicId,
        data: Bytes,
        write_type: WriteType,
    ) -> BoxFuture<'_, Result<(), LinkError>>;

    /// Read the current value of `characteristic` on `peer_id`. Most RPC
    /// traffic rides `update_value` notifications instead; this is for
    /// characteristics the peer doesn't push, or a one-shot poll.
    fn read_value(&self, characteristic: CharacteristicId, peer_id: PeerId) -> BoxFuture<'_, Result<Bytes, LinkError>>;

    fn set_notify_value(
        &self,
        enabled: bool,
        characteristic: CharacteristicId,
        peer_id: PeerId,
    ) -> BoxFuture<'_, Result<(), LinkError>>;

    /// `None` if the peer isn't connected.
    fn max_write_value_length(&self, peer_id: PeerId, write_type: WriteType) -> Option<usize>;

    fn events(&self) -> BoxStream<'static, CentralEvent>;
}
