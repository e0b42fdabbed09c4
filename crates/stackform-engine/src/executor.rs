//! Plan execution
//!
//! Runs a plan batch by batch: every instance in a batch whose dependencies
//! all succeeded is dispatched concurrently (bounded by a semaphore), and
//! the executor blocks at the batch boundary until each one resolves. State
//! is committed durably per instance immediately on success, so a retry
//! resumes from accurate per-instance status.

use crate::diff::ActionKind;
use crate::error::{EngineError, Result};
use crate::plan::{build_plan, Plan, PlanAction};
use crate::provider::ResourceProvider;
use crate::retry::{with_retry, RetryConfig};
use crate::run::{RunContext, RunOutcome, RunReport};
use crate::schema::{ReplaceStrategy, SchemaRegistry};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use stackform_core::{content_hash, substitute, Attributes, InstanceAddr, OutputMap, ResourceModel, Value};
use stackform_state::{Result as StateResult, StateEntry, StateStore};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

const DEFAULT_PARALLELISM: usize = 10;

/// Per-instance execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    /// Never started because a dependency failed
    Blocked,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::InProgress => write!(f, "in progress"),
            InstanceStatus::Succeeded => write!(f, "succeeded"),
            InstanceStatus::Failed => write!(f, "failed"),
            InstanceStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Applies plans against a provider, committing state per instance
pub struct Executor {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<StateStore>,
    retry: RetryConfig,
    parallelism: usize,
}

impl Executor {
    pub fn new(provider: Arc<dyn ResourceProvider>, store: Arc<StateStore>) -> Self {
        Self {
            provider,
            store,
            retry: RetryConfig::default(),
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Plan against current state and apply immediately. Fatal planning or
    /// staleness errors produce an `Aborted` report with nothing mutated.
    pub async fn converge(
        &self,
        model: &ResourceModel,
        registry: &SchemaRegistry,
        ctx: &RunContext,
    ) -> RunReport {
        match build_plan(model, registry, &self.store).await {
            Ok(plan) => match self.apply(&plan, ctx).await {
                Ok(report) => report,
                Err(err) => RunReport::aborted(ctx.run_id, err.to_string()),
            },
            Err(err) => RunReport::aborted(ctx.run_id, err.to_string()),
        }
    }

    /// Apply a previously computed plan.
    ///
    /// The plan is re-validated against the store's serial first; a stale
    /// plan aborts before any remote call.
    pub async fn apply(&self, plan: &Plan, ctx: &RunContext) -> Result<RunReport> {
        plan.validate_against(self.store.serial().await)?;
        self.sweep_deposed().await?;

        let outputs = Mutex::new(self.store.snapshot().await.outputs());
        let semaphore = Semaphore::new(self.parallelism);

        let mut statuses: BTreeMap<InstanceAddr, InstanceStatus> = plan
            .actions()
            .map(|a| (a.addr().clone(), InstanceStatus::Pending))
            .collect();
        let mut errors: BTreeMap<InstanceAddr, String> = BTreeMap::new();

        for batch in &plan.batches {
            let mut dispatch: Vec<&PlanAction> = Vec::new();

            for action in batch {
                let addr = action.addr().clone();
                if action.kind() == ActionKind::NoOp {
                    statuses.insert(addr, InstanceStatus::Succeeded);
                    continue;
                }
                if let Some(dep) = action.deps.iter().find(|&d| {
                    matches!(
                        statuses.get(d),
                        Some(InstanceStatus::Failed | InstanceStatus::Blocked)
                    )
                }) {
                    tracing::warn!(instance = %addr, dependency = %dep, "blocked by failed dependency");
                    statuses.insert(addr, InstanceStatus::Blocked);
                    continue;
                }
                if ctx.is_cancelled() {
                    // Stays pending; a later run picks it up.
                    continue;
                }
                if action.deps.iter().any(|d| {
                    matches!(
                        statuses.get(d),
                        Some(InstanceStatus::Pending | InstanceStatus::InProgress)
                    )
                }) {
                    // Producer never ran (cancellation earlier in the run).
                    continue;
                }
                statuses.insert(addr, InstanceStatus::InProgress);
                dispatch.push(action);
            }

            if dispatch.is_empty() {
                continue;
            }

            let results = join_all(
                dispatch
                    .iter()
                    .map(|action| self.execute_action(action, &outputs, &semaphore, ctx)),
            )
            .await;

            for (action, result) in dispatch.iter().zip(results) {
                match result {
                    Ok(status) => {
                        statuses.insert(action.addr().clone(), status);
                    }
                    Err(message) => {
                        tracing::warn!(instance = %action.addr(), "instance failed: {message}");
                        statuses.insert(action.addr().clone(), InstanceStatus::Failed);
                        errors.insert(action.addr().clone(), message);
                    }
                }
            }
        }

        let outcome = if statuses.values().all(|s| *s == InstanceStatus::Succeeded) {
            RunOutcome::Success
        } else {
            RunOutcome::PartialFailure
        };
        tracing::info!(run = %ctx.run_id, outcome = %outcome, "run complete");

        Ok(RunReport {
            run_id: ctx.run_id,
            outcome,
            statuses,
            errors,
            abort_reason: None,
        })
    }

    /// Finish any replacement teardown an earlier run left behind: delete
    /// every recorded deposed object and clear its marker on success.
    async fn sweep_deposed(&self) -> Result<()> {
        for entry in self.store.snapshot().await.iter() {
            let Some(deposed_id) = entry.deposed_id.clone() else {
                continue;
            };
            tracing::info!(instance = %entry.addr, deposed = %deposed_id, "finishing deferred teardown");
            with_retry(&self.retry, "delete", || {
                self.provider.delete(&entry.addr, &deposed_id)
            })
            .await
            .map_err(|source| EngineError::Remote {
                addr: entry.addr.clone(),
                source,
            })?;
            self.clear_deposed(&entry.addr, &deposed_id).await?;
        }
        Ok(())
    }

    /// Run one action behind a semaphore permit. Returns the resulting
    /// status: `Succeeded`, or `Pending` when cancellation was observed
    /// while the action was still queued for a permit.
    async fn execute_action(
        &self,
        action: &PlanAction,
        outputs: &Mutex<OutputMap>,
        semaphore: &Semaphore,
        ctx: &RunContext,
    ) -> std::result::Result<InstanceStatus, String> {
        let _permit = semaphore.acquire().await.map_err(|e| e.to_string())?;
        let addr = action.addr().clone();

        // A permit-queued instance has not been dispatched yet; it must
        // not start once cancellation is observed.
        if ctx.is_cancelled() {
            tracing::debug!(run = %ctx.run_id, instance = %addr, "cancelled while queued");
            return Ok(InstanceStatus::Pending);
        }

        // Finalize provisional values now that upstream outputs exist.
        let desired = match &action.desired {
            Some(raw) => {
                let known = outputs.lock().await.clone();
                let resolved = substitute(raw, &known);
                if resolved.values().any(Value::contains_unknown) {
                    return Err(
                        "attributes still unresolved after dependencies applied".to_string()
                    );
                }
                Some(resolved)
            }
            None => None,
        };

        tracing::info!(run = %ctx.run_id, action = %action.kind(), instance = %addr, "applying");

        match action.kind() {
            ActionKind::NoOp => {}
            ActionKind::Create => {
                let attrs = desired.ok_or_else(|| "create without desired attributes".to_string())?;
                self.create_instance(&addr, &attrs, &action.deps, None, outputs).await?;
            }
            ActionKind::Update => {
                let attrs = desired.ok_or_else(|| "update without desired attributes".to_string())?;
                self.update_instance(&addr, &attrs, &action.deps, outputs).await?;
            }
            ActionKind::Replace => {
                let attrs =
                    desired.ok_or_else(|| "replace without desired attributes".to_string())?;
                match action.strategy {
                    ReplaceStrategy::DestroyBeforeCreate => {
                        tracing::info!(instance = %addr, "destroying before re-create");
                        self.destroy_instance(&addr, outputs).await?;
                        tracing::info!(instance = %addr, "creating replacement");
                        self.create_instance(&addr, &attrs, &action.deps, None, outputs).await?;
                    }
                    ReplaceStrategy::CreateBeforeDestroy => {
                        // The displaced id is recorded on the new entry
                        // before the delete, so an interrupted teardown is
                        // finished by the next run instead of leaking.
                        let old_id = self.store.get(&addr).await.map(|e| e.remote_id);
                        tracing::info!(instance = %addr, "creating replacement");
                        self.create_instance(&addr, &attrs, &action.deps, old_id.clone(), outputs)
                            .await?;
                        if let Some(old_id) = old_id {
                            tracing::info!(instance = %addr, "destroying displaced object");
                            with_retry(&self.retry, "delete", || {
                                self.provider.delete(&addr, &old_id)
                            })
                            .await
                            .map_err(|e| e.to_string())?;
                            self.clear_deposed(&addr, &old_id)
                                .await
                                .map_err(|e| e.to_string())?;
                        }
                    }
                }
            }
            ActionKind::Destroy => self.destroy_instance(&addr, outputs).await?,
        }
        Ok(InstanceStatus::Succeeded)
    }

    async fn create_instance(
        &self,
        addr: &InstanceAddr,
        attrs: &Attributes,
        deps: &[InstanceAddr],
        deposed_id: Option<String>,
        outputs: &Mutex<OutputMap>,
    ) -> std::result::Result<(), String> {
        // Token stays stable across retries so a timed-out create is safe
        // to repeat.
        let token = Uuid::new_v4().to_string();
        let remote = with_retry(&self.retry, "create", || {
            self.provider.create(addr, attrs, &token)
        })
        .await
        .map_err(|e| e.to_string())?;

        let hash = content_hash(attrs)
            .ok_or_else(|| "unresolved attributes at apply time".to_string())?;
        let mut entry = StateEntry::new(addr.clone(), remote.remote_id, remote.attributes, hash)
            .with_configuration(attrs.clone())
            .with_dependencies(deps.to_vec());
        entry.deposed_id = deposed_id;
        let outs = entry.outputs();
        self.store.commit(entry).await.map_err(|e| e.to_string())?;
        outputs.lock().await.insert(addr.clone(), outs);
        Ok(())
    }

    async fn clear_deposed(&self, addr: &InstanceAddr, deposed_id: &str) -> StateResult<()> {
        if let Some(mut entry) = self.store.get(addr).await {
            if entry.deposed_id.as_deref() == Some(deposed_id) {
                entry.deposed_id = None;
                self.store.commit(entry).await?;
            }
        }
        Ok(())
    }

    async fn update_instance(
        &self,
        addr: &InstanceAddr,
        attrs: &Attributes,
        deps: &[InstanceAddr],
        outputs: &Mutex<OutputMap>,
    ) -> std::result::Result<(), String> {
        let prior = self
            .store
            .get(addr)
            .await
            .ok_or_else(|| "no state entry for update".to_string())?;
        let remote = with_retry(&self.retry, "update", || {
            self.provider.update(addr, &prior.remote_id, attrs)
        })
        .await
        .map_err(|e| e.to_string())?;

        let hash = content_hash(attrs)
            .ok_or_else(|| "unresolved attributes at apply time".to_string())?;
        let mut entry = StateEntry::new(addr.clone(), remote.remote_id, remote.attributes, hash)
            .with_configuration(attrs.clone())
            .with_dependencies(deps.to_vec());
        entry.created_at = prior.created_at;
        let outs = entry.outputs();
        self.store.commit(entry).await.map_err(|e| e.to_string())?;
        outputs.lock().await.insert(addr.clone(), outs);
        Ok(())
    }

    async fn destroy_instance(
        &self,
        addr: &InstanceAddr,
        outputs: &Mutex<OutputMap>,
    ) -> std::result::Result<(), String> {
        let Some(prior) = self.store.get(addr).await else {
            // Nothing recorded; already gone.
            return Ok(());
        };
        with_retry(&self.retry, "delete", || {
            self.provider.delete(addr, &prior.remote_id)
        })
        .await
        .map_err(|e| e.to_string())?;
        self.store.remove(addr).await.map_err(|e| e.to_string())?;
        outputs.lock().await.remove(addr);
        Ok(())
    }
}
