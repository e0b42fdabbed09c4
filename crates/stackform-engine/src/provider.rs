//! Provider abstraction
//!
//! A provider is the remote API behind the engine: one create/read/update/
//! delete operation set, dispatched per resource type via the instance
//! address. Providers are assumed to create idempotently given a
//! client-supplied token and to signal "not found" as `Ok(None)` on read.

use async_trait::async_trait;
use stackform_core::{Attributes, InstanceAddr};
use thiserror::Error;

/// Remote failure classes
///
/// `Transient` covers throttling and network hiccups and is retried with
/// backoff; `Terminal` covers validation, permission and quota failures and
/// is never retried.
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("terminal remote error: {0}")]
    Terminal(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// What the provider reports back for a live resource
#[derive(Debug, Clone)]
pub struct RemoteObject {
    /// Provider-assigned identifier
    pub remote_id: String,

    /// Current attributes, including computed ones
    pub attributes: Attributes,
}

/// Remote API for managed resources
///
/// All attribute values handed to a provider are fully resolved; the engine
/// never passes a reference expression or an unknown through this boundary.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Provider name for logs and diagnostics
    fn name(&self) -> &str;

    /// Create a resource. `idempotency_token` is stable across retries of
    /// the same attempt so a timed-out create is safe to repeat.
    async fn create(
        &self,
        addr: &InstanceAddr,
        attributes: &Attributes,
        idempotency_token: &str,
    ) -> RemoteResult<RemoteObject>;

    /// Read current remote attributes; `Ok(None)` means the resource no
    /// longer exists.
    async fn read(&self, addr: &InstanceAddr, remote_id: &str) -> RemoteResult<Option<RemoteObject>>;

    /// Update a resource in place.
    async fn update(
        &self,
        addr: &InstanceAddr,
        remote_id: &str,
        attributes: &Attributes,
    ) -> RemoteResult<RemoteObject>;

    /// Delete a resource. Deleting an already-gone resource is not an error.
    async fn delete(&self, addr: &InstanceAddr, remote_id: &str) -> RemoteResult<()>;
}
