//! Types dealing with peer and record identity.

use crate::{TnkError, TnkResult};

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

/// Number of bytes in an identity value (160 bits).
pub const ID_BYTES: usize = 20;

/// Base fixed-width identity type meant for newtyping.
/// You probably want [PeerId] or a [RecordKey] component.
///
/// In tanuki these bytes are ONLY the raw 160-bit hash or public key of
/// the identity being tracked, without prefix or suffix. The `From`
/// conversions do not validate the width, use [Id::checked] where input
/// comes from outside the process.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Id(#[serde(with = "crate::serde_bytes_hex")] pub bytes::Bytes);

imp_deref!(Id, bytes::Bytes);
imp_from!(Id, bytes::Bytes, b => Id(b));
imp_from!(Id, [u8; ID_BYTES], b => Id(bytes::Bytes::copy_from_slice(&b)));

impl Id {
    /// Construct an id, checking the fixed 160 bit width.
    pub fn checked(b: bytes::Bytes) -> TnkResult<Self> {
        if b.len() != ID_BYTES {
            return Err(TnkError::other(format!(
                "id must be {ID_BYTES} bytes, got {}",
                b.len()
            )));
        }
        Ok(Self(b))
    }

    /// The all-zero id.
    pub fn zero() -> Self {
        const ZERO: [u8; ID_BYTES] = [0; ID_BYTES];
        Self(bytes::Bytes::from_static(&ZERO))
    }

    /// True if every byte of this id is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

fn hex_fmt(
    b: &bytes::Bytes,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    for byte in b.iter() {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        hex_fmt(&self.0, f)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        hex_fmt(&self.0, f)
    }
}

/// Identifies a peer both as a network address key and as a position in
/// the data key space.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(pub Id);

imp_deref!(PeerId, Id);
imp_from!(PeerId, bytes::Bytes, b => PeerId(Id(b)));
imp_from!(PeerId, Id, b => PeerId(b));
imp_from!(PeerId, [u8; ID_BYTES], b => PeerId(Id::from(b)));

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl PeerId {
    /// The all-zero peer id. Requests addressed to it are resolved
    /// against this node's own identity by the dispatcher's self-ping
    /// shortcut.
    pub fn zero() -> Self {
        Self(Id::zero())
    }

    /// True if every byte of this peer id is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

/// Identifies one unique stored item in the dht key space.
///
/// Ordered lexicographically by component, in field order. The location
/// component decides which peers are responsible for the item.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct RecordKey {
    /// Key-space location the item is stored under.
    pub location: Id,
    /// Domain within the location.
    pub domain: Id,
    /// Content id within the domain.
    pub content: Id,
    /// Version of the content.
    pub version: Id,
}

impl RecordKey {
    /// Construct a record key with zero domain, content and version
    /// components. Useful for addressing a whole location.
    pub fn at_location(location: Id) -> Self {
        Self {
            location,
            domain: Id::zero(),
            content: Id::zero(),
            version: Id::zero(),
        }
    }
}
