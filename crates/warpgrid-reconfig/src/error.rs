//! Error types for the reconfiguration proxy.

use thiserror::Error;

/// Result type alias for proxied calls.
pub type ReconfigResult<T> = Result<T, ReconfigError>;

/// Errors surfaced by a proxied call.
#[derive(Debug, Error)]
pub enum ReconfigError {
    /// The proxy is invalid; no further calls succeed.
    #[error("resource instance {0} is not valid")]
    ResourceInvalid(String),

    /// The backing pool was reconfigured under the call. Retryable.
    #[error("pool {0} was reconfigured while the call was in flight")]
    Reconfigured(String),

    /// A failure wrapped by an intermediate layer.
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        source: Box<ReconfigError>,
    },

    #[error("lookup of {identity} failed: {reason}")]
    Lookup { identity: String, reason: String },

    /// Failure reported by the backing resource itself.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ReconfigError {
    /// Wrap `self` in one more layer of context.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Self::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Peel off up to `levels` layers of [`ReconfigError::Wrapped`].
    pub fn unwrap_levels(self, levels: usize) -> Self {
        let mut err = self;
        for _ in 0..levels {
            match err {
                Self::Wrapped { source, .. } => err = *source,
                other => return other,
            }
        }
        err
    }

    pub fn is_reconfigured(&self) -> bool {
        matches!(self, Self::Reconfigured(_))
    }
}
