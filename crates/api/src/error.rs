//! Tanuki error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The core tanuki error type. This type is used in all external
/// tanuki apis as well as internally in some modules.
///
/// This type is required to implement `Clone` so that per-peer results
/// can flow through shared futures, which require the entire `Result`
/// to be `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TnkError {
    /// Generic tanuki internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// A deadline elapsed before the other side answered.
    #[error("timeout: {ctx}")]
    Timeout {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },
}

impl TnkError {
    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct a timeout error.
    pub fn timeout<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Timeout {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// True if this error is a [TnkError::Timeout].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// The core tanuki result type.
pub type TnkResult<T> = Result<T, TnkError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            "bla (src: None)",
            TnkError::other("bla").to_string().as_str(),
        );
        assert_eq!(
            "foo (src: bar)",
            TnkError::other_src("foo", std::io::Error::other("bar"))
                .to_string()
                .as_str(),
        );
        assert_eq!(
            "timeout: no answer within 3 s",
            TnkError::timeout("no answer within 3 s").to_string().as_str(),
        );
    }

    #[test]
    fn timeout_check() {
        assert!(TnkError::timeout("t").is_timeout());
        assert!(!TnkError::other("o").is_timeout());
    }

    #[test]
    fn ensure_error_type_is_send_and_sync() {
        fn ensure<T: std::fmt::Display + Send + Sync>(_t: T) {}
        ensure(TnkError::other("bla"));
    }
}
