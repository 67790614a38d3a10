//! 128-bit identifiers used throughout the runtime.
//!
//! `ActorId` and `CallId`/`MsgId` are minted locally from a monotonic counter
//! folded through a hasher so that ids stay well distributed under bursty
//! creation without pulling in an external RNG crate. `ServiceId` and
//! `CharacteristicId` are the opposite: deterministic, derived from a type's
//! declared name so that two independently compiled peers agree on them.

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A 128-bit opaque identifier.
///
/// Used for actor identity, call correlation, and message grouping. The
/// wire representation is always 16 bytes, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id128(u128);

impl Id128 {
    pub const ZERO: Id128 = Id128(0);

    pub const fn from_u128(v: u128) -> Self {
        Id128(v)
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Id128(u128::from_be_bytes(bytes))
    }

    /// Derive a deterministic id from a stable namespace + name pair.
    ///
    /// Both sides of a connection must use the same (namespace, name) input
    /// to end up with matching service/characteristic ids.
    pub fn derive(namespace: &str, name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(namespace.as_bytes());
        hasher.update(&[0u8]); // separator, avoids "ab"+"c" == "a"+"bc" collisions
        hasher.update(name.as_bytes());
        let hash = hasher.finalize();
        let bytes: [u8; 16] = hash.as_bytes()[0..16].try_into().expect("32 >= 16 bytes");
        Id128(u128::from_be_bytes(bytes))
    }
}

impl fmt::Debug for Id128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Display for Id128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Identifies a single actor instance. Stable for the lifetime of the actor;
/// when the actor is remote, this doubles as the link-layer peer identifier.
pub type ActorId = Id128;

/// Identifies a peer connection at the link layer. Aliased to `ActorId`
/// because in this design the remote actor's id and its owning peer's id
/// are the same value.
pub type PeerId = Id128;

/// Identifies the GATT-style service a given actor type advertises.
pub type ServiceId = Id128;

/// Identifies the single RPC characteristic carried by a service.
pub type CharacteristicId = Id128;

/// Correlates an outbound call with its eventual response.
pub type CallId = Id128;

/// Groups the fragments of one envelope during reassembly.
pub type MsgId = Id128;

/// Suffix appended to a type's declared name when deriving its RPC
/// characteristic id, so the characteristic never collides with the
/// service id derived from the bare type name.
pub const RPC_CHARACTERISTIC_SUFFIX: &str = "__rpc__";

/// Derive the service id for an actor type from its declared name.
pub fn service_id_for_type(type_name: &str) -> ServiceId {
    Id128::derive("actorlink.service", type_name)
}

/// Derive the RPC characteristic id for an actor type from its declared name.
pub fn rpc_characteristic_id_for_type(type_name: &str) -> CharacteristicId {
    Id128::derive("actorlink.characteristic", &format!("{type_name}{RPC_CHARACTERISTIC_SUFFIX}"))
}

/// Mints fresh, locally-unique 128-bit ids (actor ids, call ids, message ids).
///
/// Not cryptographically random: a monotonic counter is hashed through
/// `RandomState`, which is enough to avoid collisions within one process's
/// lifetime without depending on an external RNG crate.
pub struct IdMinter {
    counter: AtomicU64,
    random_state: RandomState,
    salt: u64,
}

impl IdMinter {
    pub fn new() -> Self {
        let random_state = RandomState::new();
        // Fold a throwaway value through the fresh RandomState to get a
        // process-specific salt without needing a wall-clock read.
        let mut hasher = random_state.build_hasher();
        (&random_state as *const RandomState as usize).hash(&mut hasher);
        IdMinter {
            counter: AtomicU64::new(0),
            random_state,
            salt: hasher.finish(),
        }
    }

    pub fn mint(&self) -> Id128 {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = self.random_state.build_hasher();
        counter.hash(&mut hasher);
        let high = hasher.finish() ^ self.salt;

        let mut hasher = self.random_state.build_hasher();
        (counter ^ 0xA5A5_A5A5_A5A5_A5A5).hash(&mut hasher);
        let low = hasher.finish() ^ self.salt.rotate_left(32);

        Id128(((high as u128) << 64) | (low as u128))
    }
}

impl Default for IdMinter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_distinct() {
        let minter = IdMinter::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(minter.mint()));
        }
    }

    #[test]
    fn derived_ids_are_stable() {
        let a = service_id_for_type("Thermostat");
        let b = service_id_for_type("Thermostat");
        assert_eq!(a, b);
    }

    #[test]
    fn service_and_characteristic_ids_differ() {
        let service = service_id_for_type("Thermostat");
        let characteristic = rpc_characteristic_id_for_type("Thermostat");
        assert_ne!(service, characteristic);
    }

    #[test]
    fn different_type_names_derive_different_ids() {
        assert_ne!(service_id_for_type("Thermostat"), service_id_for_type("Doorbell"));
    }

    #[test]
    fn id128_byte_roundtrip() {
        let id = Id128::from_u128(0x1234_5678_9abc_def0_1122_3344_5566_7788);
        let bytes = id.to_be_bytes();
        assert_eq!(Id128::from_be_bytes(bytes), id);
    }
}
