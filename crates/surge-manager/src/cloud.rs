//! The provisioning-client contract and a scripted test double.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use surge_core::InstanceRecord;

/// Result type alias for provisioning operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Provisioning failures.
///
/// `AlreadyActive`/`NotActive` are the idempotency errors the
/// coordinator absorbs; the rest are transient and retried on the next
/// reconciliation tick.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("template {0} is already activated")]
    AlreadyActive(String),

    #[error("template {0} is not activated")]
    NotActive(String),

    #[error("provisioning rejected: {0}")]
    Rejected(String),

    #[error("cloud unavailable: {0}")]
    Unavailable(String),
}

/// Cloud provisioning client.
///
/// `list` order is the instance ordering the coordinator trims from
/// the tail of when scaling down.
pub trait CloudProvider: Send + Sync {
    /// Prepare a template for launching (first-time activation).
    fn bless(&self, template: &str) -> CloudResult<()>;

    /// Return a template to its unmanaged state.
    fn unbless(&self, template: &str) -> CloudResult<()>;

    /// Launch one instance from a template.
    fn launch(&self, template: &str) -> CloudResult<InstanceRecord>;

    /// Delete one instance.
    fn delete(&self, instance_id: &str) -> CloudResult<()>;

    /// Instances launched from a template, in launch order.
    fn list(&self, template: &str) -> CloudResult<Vec<InstanceRecord>>;
}

#[derive(Default)]
struct MockState {
    blessed: HashSet<String>,
    instances: Vec<(String, InstanceRecord)>,
    counter: u32,
    ops: Vec<String>,
    bless_always_duplicate: bool,
    launches_fail: bool,
    lists_fail: bool,
}

/// Scripted in-process provisioner for tests.
///
/// Records every call in order so tests can assert sequencing (for
/// example that instance deletion precedes template deactivation).
#[derive(Default)]
pub struct MockCloud {
    state: Mutex<MockState>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `bless` report the duplicate-activation error.
    pub fn with_duplicate_bless(self) -> Self {
        self.lock().bless_always_duplicate = true;
        self
    }

    /// Toggle launch failures.
    pub fn fail_launches(&self, on: bool) {
        self.lock().launches_fail = on;
    }

    /// Toggle list failures.
    pub fn fail_lists(&self, on: bool) {
        self.lock().lists_fail = on;
    }

    /// Every call made so far, e.g. `"delete i-2"`.
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    /// Seed a pre-existing instance (as if launched before this
    /// manager started).
    pub fn seed_instance(&self, template: &str) -> InstanceRecord {
        let mut state = self.lock();
        state.counter += 1;
        let record = InstanceRecord {
            id: format!("i-{}", state.counter),
            addresses: vec![format!("10.1.0.{}", state.counter)],
        };
        state.instances.push((template.to_string(), record.clone()));
        record
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CloudProvider for MockCloud {
    fn bless(&self, template: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.ops.push(format!("bless {template}"));
        if state.bless_always_duplicate || !state.blessed.insert(template.to_string()) {
            return Err(CloudError::AlreadyActive(template.to_string()));
        }
        Ok(())
    }

    fn unbless(&self, template: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.ops.push(format!("unbless {template}"));
        if state.blessed.remove(template) {
            Ok(())
        } else {
            Err(CloudError::NotActive(template.to_string()))
        }
    }

    fn launch(&self, template: &str) -> CloudResult<InstanceRecord> {
        let mut state = self.lock();
        state.ops.push(format!("launch {template}"));
        if state.launches_fail {
            return Err(CloudError::Rejected("launch disabled".to_string()));
        }
        state.counter += 1;
        let record = InstanceRecord {
            id: format!("i-{}", state.counter),
            addresses: vec![format!("10.1.0.{}", state.counter)],
        };
        state.instances.push((template.to_string(), record.clone()));
        Ok(record)
    }

    fn delete(&self, instance_id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.ops.push(format!("delete {instance_id}"));
        let before = state.instances.len();
        state.instances.retain(|(_, r)| r.id != instance_id);
        if state.instances.len() == before {
            return Err(CloudError::Rejected(format!(
                "unknown instance {instance_id}"
            )));
        }
        Ok(())
    }

    fn list(&self, template: &str) -> CloudResult<Vec<InstanceRecord>> {
        let state = self.lock();
        if state.lists_fail {
            return Err(CloudError::Unavailable("list disabled".to_string()));
        }
        Ok(state
            .instances
            .iter()
            .filter(|(t, _)| t == template)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_list_delete_cycle() {
        let cloud = MockCloud::new();
        cloud.bless("tmpl").unwrap();

        let a = cloud.launch("tmpl").unwrap();
        let b = cloud.launch("tmpl").unwrap();
        assert_eq!(
            cloud.list("tmpl").unwrap().iter().map(|r| &r.id).collect::<Vec<_>>(),
            vec![&a.id, &b.id]
        );

        cloud.delete(&a.id).unwrap();
        assert_eq!(cloud.list("tmpl").unwrap().len(), 1);
    }

    #[test]
    fn double_bless_reports_duplicate() {
        let cloud = MockCloud::new();
        cloud.bless("tmpl").unwrap();
        assert!(matches!(
            cloud.bless("tmpl"),
            Err(CloudError::AlreadyActive(_))
        ));
    }

    #[test]
    fn ops_record_call_order() {
        let cloud = MockCloud::new();
        cloud.bless("t").unwrap();
        let a = cloud.launch("t").unwrap();
        cloud.delete(&a.id).unwrap();
        cloud.unbless("t").unwrap();
        assert_eq!(
            cloud.ops(),
            vec!["bless t", "launch t", "delete i-1", "unbless t"]
        );
    }
}
