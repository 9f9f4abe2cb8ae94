#![deny(missing_docs)]
//! Tanuki p2p / dht quorum request engine.
//!
//! The api traits are defined in the tanuki_api crate. This crate
//! provides the production module implementations plus the in-process
//! concurrency primitives they are built on.

use tanuki_api::*;

/// Construct a production-ready default builder.
///
/// - `dispatch` - The default dispatch module is
///   [factories::CoreDispatchFactory].
/// - `quorum` - The default quorum module is
///   [factories::CoreQuorumFactory].
pub fn default_builder() -> Builder {
    Builder {
        config: Config::default(),
        dispatch: factories::CoreDispatchFactory::create(),
        quorum: factories::CoreQuorumFactory::create(),
    }
}

pub mod factories;

pub mod fork_join;

pub mod range_lock;
