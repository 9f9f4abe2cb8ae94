#![deny(missing_docs)]
//! Tanuki API contains the tanuki module traits and the basic types
//! required to define the api of those traits.
//!
//! If you want a production-ready node engine, please see the
//! tanuki_core crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Shared boxed future type.
///
/// A shared future can be observed again by a later caller without
/// restarting the underlying work, which is how still-in-flight request
/// slots survive across quorum rounds. Anything traveling through this
/// alias must be `Clone`, which is why [TnkError] implements `Clone`.
pub type ShareFut<T> = futures::future::Shared<BoxFut<'static, T>>;

pub(crate) mod serde_bytes_hex {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    pub fn serialize<S>(
        b: &bytes::Bytes,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut out = String::with_capacity(b.len() * 2);
        for byte in b.iter() {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0f) as usize] as char);
        }
        serializer.serialize_str(&out)
    }

    fn hex_val(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            b'A'..=b'F' => Some(c - b'A' + 10),
            _ => None,
        }
    }

    pub fn deserialize<'de, D, T: From<bytes::Bytes>>(
        deserializer: D,
    ) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: &'de str = serde::Deserialize::deserialize(deserializer)?;
        let b = s.as_bytes();
        if b.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length hex string"));
        }
        let mut v = Vec::with_capacity(b.len() / 2);
        for pair in b.chunks(2) {
            let hi = hex_val(pair[0])
                .ok_or_else(|| serde::de::Error::custom("invalid hex digit"))?;
            let lo = hex_val(pair[1])
                .ok_or_else(|| serde::de::Error::custom("invalid hex digit"))?;
            v.push((hi << 4) | lo);
        }
        Ok(bytes::Bytes::from(v).into())
    }
}

pub mod builder;
pub use builder::Builder;

pub mod config;
pub use config::{Config, ModConfig};

pub mod dispatch;
pub use dispatch::*;

mod error;
pub use error::*;

pub mod id;
pub use id::{Id, PeerId, RecordKey, ID_BYTES};

mod message;
pub use message::*;

mod peer;
pub use peer::*;

pub mod quorum;
pub use quorum::*;
