//! Error types shared by the store and resolution layers.

use thiserror::Error;

/// Errors from store access and identity resolution.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A user or key store operation failed.
    #[error("Store operation failed: {0}")]
    Store(String),

    /// The identity draft carries no external subject identifier.
    #[error("Identity draft has no subject")]
    MissingSubject,

    /// A federation link write would violate the one-link-per-provider
    /// invariant.
    #[error("Conflicting federation link for provider {provider_alias}")]
    LinkConflict {
        /// Provider alias the conflicting link belongs to.
        provider_alias: String,
    },
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
