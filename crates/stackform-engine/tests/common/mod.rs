//! Shared test fixtures: an in-memory recording provider and the network
//! topology used across the integration tests

use async_trait::async_trait;
use stackform_core::{Attributes, InstanceAddr, Resource, ResourceModel, Value};
use stackform_engine::{
    CancelHandle, RemoteError, RemoteObject, RemoteResult, ResourceProvider, ResourceSchema,
    SchemaRegistry,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory provider that records every operation in dispatch order
#[derive(Default)]
pub struct MockProvider {
    counter: AtomicU64,
    ops: Mutex<Vec<String>>,
    fail_terminal: Mutex<HashSet<String>>,
    fail_transient: Mutex<BTreeMap<String, u32>>,
    fail_delete: Mutex<HashSet<String>>,
    cancel_on_create: Mutex<Option<(String, CancelHandle)>>,
    objects: Mutex<BTreeMap<String, Attributes>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on this instance fail terminally
    pub fn fail_terminally(&self, addr: &str) {
        self.fail_terminal.lock().unwrap().insert(addr.to_string());
    }

    /// Make the next `times` operations on this instance fail transiently
    pub fn fail_transiently(&self, addr: &str, times: u32) {
        self.fail_transient
            .lock()
            .unwrap()
            .insert(addr.to_string(), times);
    }

    /// Make only delete fail terminally for this instance; create and
    /// update stay healthy
    pub fn fail_delete_terminally(&self, addr: &str) {
        self.fail_delete.lock().unwrap().insert(addr.to_string());
    }

    /// Drop every injected failure for this instance
    pub fn clear_failures(&self, addr: &str) {
        self.fail_terminal.lock().unwrap().remove(addr);
        self.fail_transient.lock().unwrap().remove(addr);
        self.fail_delete.lock().unwrap().remove(addr);
    }

    /// Cancel the run from inside this instance's create call, simulating
    /// an operator interrupt while the call is in flight
    pub fn cancel_during_create(&self, addr: &str, handle: CancelHandle) {
        *self.cancel_on_create.lock().unwrap() = Some((addr.to_string(), handle));
    }

    pub fn recorded_ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    /// Index of the first recorded op containing `needle`
    pub fn op_index(&self, needle: &str) -> Option<usize> {
        self.ops.lock().unwrap().iter().position(|op| op.contains(needle))
    }

    /// Overwrite a live remote object's attribute, simulating out-of-band
    /// change
    pub fn mutate_object(&self, remote_id: &str, attr: &str, value: Value) {
        if let Some(attrs) = self.objects.lock().unwrap().get_mut(remote_id) {
            attrs.insert(attr.to_string(), value);
        }
    }

    pub fn remove_object(&self, remote_id: &str) {
        self.objects.lock().unwrap().remove(remote_id);
    }

    fn next_id(&self, type_name: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{type_name}-{n}")
    }

    fn check_failures(&self, addr: &InstanceAddr) -> RemoteResult<()> {
        let key = addr.to_string();
        if self.fail_terminal.lock().unwrap().contains(&key) {
            return Err(RemoteError::Terminal(format!("permission denied for {key}")));
        }
        let mut transient = self.fail_transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transient(format!("throttled: {key}")));
            }
        }
        Ok(())
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl ResourceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(
        &self,
        addr: &InstanceAddr,
        attributes: &Attributes,
        _idempotency_token: &str,
    ) -> RemoteResult<RemoteObject> {
        self.check_failures(addr)?;
        let remote_id = self.next_id(&addr.resource.type_name);
        self.record(format!("create {addr} {remote_id}"));

        if let Some((target, handle)) = self.cancel_on_create.lock().unwrap().as_ref() {
            if *target == addr.to_string() {
                handle.cancel();
            }
        }

        let mut attrs = attributes.clone();
        attrs.insert("arn".into(), Value::String(format!("arn:mock:{remote_id}")));
        self.objects
            .lock()
            .unwrap()
            .insert(remote_id.clone(), attrs.clone());
        Ok(RemoteObject {
            remote_id,
            attributes: attrs,
        })
    }

    async fn read(
        &self,
        _addr: &InstanceAddr,
        remote_id: &str,
    ) -> RemoteResult<Option<RemoteObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(remote_id)
            .map(|attrs| RemoteObject {
                remote_id: remote_id.to_string(),
                attributes: attrs.clone(),
            }))
    }

    async fn update(
        &self,
        addr: &InstanceAddr,
        remote_id: &str,
        attributes: &Attributes,
    ) -> RemoteResult<RemoteObject> {
        self.check_failures(addr)?;
        self.record(format!("update {addr} {remote_id}"));

        let mut attrs = attributes.clone();
        attrs.insert("arn".into(), Value::String(format!("arn:mock:{remote_id}")));
        self.objects
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), attrs.clone());
        Ok(RemoteObject {
            remote_id: remote_id.to_string(),
            attributes: attrs,
        })
    }

    async fn delete(&self, addr: &InstanceAddr, remote_id: &str) -> RemoteResult<()> {
        let key = addr.to_string();
        if self.fail_delete.lock().unwrap().contains(&key) {
            return Err(RemoteError::Terminal(format!("delete denied for {key}")));
        }
        self.check_failures(addr)?;
        self.record(format!("delete {addr} {remote_id}"));
        self.objects.lock().unwrap().remove(remote_id);
        Ok(())
    }
}

/// Type schemas used by the tests: network and platform resources with
/// their update-vs-replace policies
pub fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(ResourceSchema::new("vpc").replace_on("cidr"))
        .with(
            ResourceSchema::new("subnet")
                .replace_on("cidr")
                .replace_on("vpc_id"),
        )
        .with(ResourceSchema::new("cluster").replace_on("name"))
        .with(
            ResourceSchema::new("node_group")
                .replace_on("instance_type")
                .create_before_destroy(),
        )
        .with(ResourceSchema::new("database"))
        .with(ResourceSchema::new("bucket").replace_on("name"))
}

/// VPC with two subnets and a cluster spanning both
pub fn network_model() -> ResourceModel {
    let mut model = ResourceModel::new();
    model
        .add(Resource::new("vpc", "main").attr("cidr", "10.0.0.0/16"))
        .unwrap();
    model
        .add(
            Resource::new("subnet", "a")
                .attr("cidr", "10.0.1.0/24")
                .attr("vpc_id", Value::reference("vpc", "main", "id")),
        )
        .unwrap();
    model
        .add(
            Resource::new("subnet", "b")
                .attr("cidr", "10.0.2.0/24")
                .attr("vpc_id", Value::reference("vpc", "main", "id")),
        )
        .unwrap();
    model
        .add(
            Resource::new("cluster", "app").attr("name", "app").attr(
                "subnet_ids",
                Value::List(vec![
                    Value::reference("subnet", "a", "id"),
                    Value::reference("subnet", "b", "id"),
                ]),
            ),
        )
        .unwrap();
    model
}
