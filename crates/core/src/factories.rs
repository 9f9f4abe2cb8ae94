//! Factories for generating instances of Tanuki modules.

pub mod core_dispatch;
pub use core_dispatch::CoreDispatchFactory;

pub mod core_quorum;
pub use core_quorum::CoreQuorumFactory;
