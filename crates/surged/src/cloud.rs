//! In-process provisioner for standalone mode.
//!
//! Synthesizes instance records instead of talking to a real cloud,
//! and announces each new instance's address on the coordination
//! store's new-ips path so the full rendezvous cycle runs end to end
//! in a single process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use surge_core::InstanceRecord;
use surge_manager::{paths, CloudError, CloudProvider, CoordStore};

#[derive(Default)]
struct DevState {
    blessed: HashSet<String>,
    instances: Vec<(String, InstanceRecord)>,
    counter: u32,
}

/// Simulated cloud backing `surged standalone`.
pub struct DevCloud {
    store: Arc<dyn CoordStore>,
    state: Mutex<DevState>,
}

impl DevCloud {
    pub fn new(store: Arc<dyn CoordStore>) -> Self {
        Self {
            store,
            state: Mutex::new(DevState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DevState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CloudProvider for DevCloud {
    fn bless(&self, template: &str) -> Result<(), CloudError> {
        let mut state = self.lock();
        if !state.blessed.insert(template.to_string()) {
            return Err(CloudError::AlreadyActive(template.to_string()));
        }
        info!(%template, "template activated");
        Ok(())
    }

    fn unbless(&self, template: &str) -> Result<(), CloudError> {
        let mut state = self.lock();
        if !state.blessed.remove(template) {
            return Err(CloudError::NotActive(template.to_string()));
        }
        info!(%template, "template deactivated");
        Ok(())
    }

    fn launch(&self, template: &str) -> Result<InstanceRecord, CloudError> {
        let record = {
            let mut state = self.lock();
            state.counter += 1;
            let record = InstanceRecord {
                id: format!("dev-{}", state.counter),
                addresses: vec![format!("10.0.0.{}", state.counter)],
            };
            state.instances.push((template.to_string(), record.clone()));
            record
        };
        info!(%template, instance = %record.id, "instance launched");

        // A real agent on the instance would announce its address once
        // it boots; here the boot is instantaneous.
        for address in &record.addresses {
            if let Err(e) = self.store.write(&paths::new_ip(address), b"") {
                warn!(%address, error = %e, "could not announce instance address");
            }
        }
        Ok(record)
    }

    fn delete(&self, instance_id: &str) -> Result<(), CloudError> {
        let mut state = self.lock();
        let before = state.instances.len();
        state.instances.retain(|(_, r)| r.id != instance_id);
        if state.instances.len() == before {
            return Err(CloudError::Rejected(format!(
                "unknown instance {instance_id}"
            )));
        }
        info!(instance = %instance_id, "instance deleted");
        Ok(())
    }

    fn list(&self, template: &str) -> Result<Vec<InstanceRecord>, CloudError> {
        Ok(self
            .lock()
            .instances
            .iter()
            .filter(|(t, _)| t == template)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
