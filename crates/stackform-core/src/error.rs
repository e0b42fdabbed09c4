//! Configuration error types
//!
//! All of these are fatal: they describe a model that must not reach a
//! provider, so they surface before any remote call.

use crate::address::{InstanceAddr, ResourceAddr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate resource address: {0}")]
    DuplicateResource(ResourceAddr),

    #[error("unknown reference in {from} (attribute '{attribute}'): {reference} does not match any instance")]
    UnknownReference {
        from: InstanceAddr,
        attribute: String,
        reference: String,
    },

    #[error("unknown depends_on target in {from}: {target}")]
    UnknownDependency {
        from: ResourceAddr,
        target: ResourceAddr,
    },

    #[error("dependency cycle detected: {path}")]
    DependencyCycle {
        /// Rendered chain, e.g. `a -> b -> a`
        path: String,
        /// The participating instances, first repeated at the end
        chain: Vec<InstanceAddr>,
    },
}

impl ConfigError {
    pub(crate) fn cycle(chain: Vec<InstanceAddr>) -> Self {
        let path = chain
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        ConfigError::DependencyCycle { path, chain }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
