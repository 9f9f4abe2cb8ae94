//! Builder-related types.

use crate::*;
use std::sync::Arc;

/// The general Tanuki builder.
/// This contains both configuration and factory instances,
/// allowing construction of runtime module instances.
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the builder.
    pub config: crate::config::Config,

    /// The [dispatch::DispatchFactory] to be used for creating
    /// [dispatch::Dispatch] instances.
    pub dispatch: dispatch::DynDispatchFactory,

    /// The [quorum::QuorumFactory] to be used for creating
    /// [quorum::Quorum] instances.
    pub quorum: quorum::DynQuorumFactory,
}

impl Builder {
    /// Construct a default config given the configured module factories.
    /// Note, this should be called before freezing the Builder instance
    /// in an Arc<>.
    pub fn set_default_config(&mut self) -> TnkResult<()> {
        let Self {
            config,
            dispatch,
            quorum,
        } = self;

        dispatch.default_config(config)?;
        quorum.default_config(config)?;

        Ok(())
    }

    /// Freeze the builder so module factories can be invoked against it.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}
