//! Transport-agnostic link abstraction and fragmentation transport.
//!
//! This crate owns C1 (the link trait pair) and C2 (packet framing,
//! reassembly, per-peer MTU, retry policy), plus the fault injector (C11)
//! and atomic metrics (C10) that sit alongside them. Everything above the
//! link -- invocation encoding, actor registries, call correlation -- lives
//! in sibling crates.

pub mod error;
pub mod fault;
pub mod fragment;
pub mod ids;
pub mod link;
pub mod metrics;
pub mod packet;
pub mod reassembly;
pub mod sim;
pub mod transport;

pub use error::{LinkError, TransportError};
pub use fault::{FaultAction, FaultInjector};
pub use fragment::{fragment, payload_size_for_mtu, DEFAULT_MTU};
pub use ids::{
    rpc_characteristic_id_for_type, service_id_for_type, ActorId, CallId, CharacteristicId, Id128, IdMinter, MsgId,
    PeerId, ServiceId,
};
pub use link::{
    AdvertisementData, CentralEvent, CentralLink, CharMetadata, CharProperties, Discovered, LinkState, PeripheralEvent,
    PeripheralLink, ServiceMetadata, WriteType,
};
pub use metrics::{TransportMetrics, TransportMetricsSnapshot};
pub use packet::{Packet, PacketParseError};
pub use reassembly::{ReassemblyError, ReassemblyTable};
pub use sim::{SimCentral, SimHub, SimPeripheral};
pub use transport::{FragmentationTransport, PacketWriter, TransportConfig};
