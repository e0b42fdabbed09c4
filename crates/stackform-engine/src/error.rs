//! Engine error types

use crate::provider::RemoteError;
use stackform_core::{ConfigError, InstanceAddr};
use stackform_state::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("no schema registered for resource type '{0}'")]
    UnknownSchema(String),

    #[error(
        "plan is stale: state serial is {current} but the plan was computed at serial {planned}; re-plan before applying"
    )]
    StalePlan { planned: u64, current: u64 },

    #[error("remote state drift detected for {addr}: {detail}; re-plan before applying")]
    Drift { addr: InstanceAddr, detail: String },

    #[error("remote operation failed for {addr}: {source}")]
    Remote {
        addr: InstanceAddr,
        source: RemoteError,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
