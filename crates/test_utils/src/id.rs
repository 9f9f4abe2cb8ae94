//! Test utilities associated with ids.

use crate::random_bytes;
use bytes::Bytes;
use tanuki_api::{Id, PeerId, RecordKey, ID_BYTES};

/// Create a random id.
pub fn random_id() -> Id {
    Id(Bytes::from(random_bytes(ID_BYTES)))
}

/// Create a random peer id.
pub fn random_peer_id() -> PeerId {
    PeerId(random_id())
}

/// Create a record key with random components.
pub fn random_record_key() -> RecordKey {
    RecordKey {
        location: random_id(),
        domain: random_id(),
        content: random_id(),
        version: random_id(),
    }
}
