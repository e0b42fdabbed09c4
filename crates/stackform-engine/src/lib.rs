//! Stackform provisioning engine
//!
//! Takes a resolved resource model, diffs it against recorded state, and
//! applies the resulting plan against a provider in dependency order.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 stackform-engine                   │
//! │  ┌────────────┐  ┌──────────┐  ┌──────────────┐  │
//! │  │ DiffEngine  │─▶│   Plan   │─▶│   Executor    │  │
//! │  └─────┬──────┘  └──────────┘  └──────┬───────┘  │
//! │        │ state snapshot               │ commits   │
//! └────────┼──────────────────────────────┼──────────┘
//!          ▼                              ▼
//!    stackform-state                ResourceProvider
//! ```
//!
//! The provider side is a trait with per-type CRUD operations; concrete
//! providers live outside this crate. See [`build_plan`] and
//! [`Executor::apply`] for the two entry points.

pub mod diff;
pub mod error;
pub mod executor;
pub mod plan;
pub mod provider;
pub mod retry;
pub mod run;
pub mod schema;

// Re-exports
pub use diff::{destroy_diff, diff_instance, ActionKind, AttrDiff, InstanceDiff};
pub use error::{EngineError, Result};
pub use executor::{Executor, InstanceStatus};
pub use plan::{build_destroy_plan, build_plan, verify_remote, Plan, PlanAction, PlanSummary};
pub use provider::{RemoteError, RemoteObject, RemoteResult, ResourceProvider};
pub use retry::{with_retry, RetryConfig};
pub use run::{CancelHandle, RunContext, RunOutcome, RunReport};
pub use schema::{ReplaceStrategy, ResourceSchema, SchemaRegistry};
