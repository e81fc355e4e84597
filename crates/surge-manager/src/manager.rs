//! The coordinator loop and its external handle.
//!
//! One thread owns the endpoint table. Watch callbacks, the periodic
//! tick, and front-end nudges all arrive as [`ReconcileRequest`]
//! messages on a single-consumer mailbox; the loop re-arms each
//! one-shot watch while processing the message it produced, using the
//! re-registration's return value as the freshest view of the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use surge_calc as calc;
use surge_core::{EndpointConfig, EndpointState, ManagerConfig};
use surge_eventlog::{Entry, LogStore, RingLog, Severity};
use surge_pool::{PoolConfig, WorkerPool};

use crate::cloud::CloudProvider;
use crate::endpoint::Endpoint;
use crate::error::{ManagerError, ManagerResult};
use crate::events::{self, manager_event_kinds};
use crate::paths;
use crate::store::CoordStore;

/// Load-balancer registration hook, invoked off the coordinator loop
/// whenever an endpoint's confirmed address set grows.
pub trait LbHook: Send + Sync {
    fn endpoint_updated(&self, name: &str, addresses: &[String]);
}

/// No-op hook for deployments without a load-balancer integration.
pub struct NullLbHook;

impl LbHook for NullLbHook {
    fn endpoint_updated(&self, _name: &str, _addresses: &[String]) {}
}

/// Mailbox messages consumed by the coordinator loop.
#[derive(Debug)]
pub enum ReconcileRequest {
    /// Endpoint membership changed (payload is the fired watch's view;
    /// the loop re-reads on processing).
    EndpointSet(Vec<String>),
    /// One endpoint's configuration bytes changed (`None`: deleted).
    EndpointConfig {
        name: String,
        data: Option<Vec<u8>>,
    },
    /// New addresses were announced for rendezvous.
    NewIps(Vec<String>),
    /// Periodic convergence pass.
    Tick,
    Shutdown,
}

/// The endpoint coordinator.
pub struct ScaleManager {
    id: Uuid,
    config: ManagerConfig,
    store: Arc<dyn CoordStore>,
    cloud: Arc<dyn CloudProvider>,
    lb: Arc<dyn LbHook>,
    pool: WorkerPool,
    events: RingLog,
    endpoints: HashMap<String, Endpoint>,
    /// Rendezvous interest: endpoint -> outstanding launches awaiting
    /// an address announcement.
    ip_interest: HashMap<String, u32>,
    tx: Sender<ReconcileRequest>,
    rx: Receiver<ReconcileRequest>,
}

impl ScaleManager {
    pub fn new(
        config: ManagerConfig,
        store: Arc<dyn CoordStore>,
        cloud: Arc<dyn CloudProvider>,
        lb: Arc<dyn LbHook>,
        log_store: Arc<dyn LogStore>,
    ) -> ManagerResult<Self> {
        let events = RingLog::new(config.eventlog_capacity, manager_event_kinds(), log_store)
            .map_err(|e| ManagerError::EventLog(e.to_string()))?;
        let pool = WorkerPool::new(PoolConfig {
            max_workers: config.pool.max_workers,
            max_pending: config.pool.max_pending,
        });
        let (tx, rx) = unbounded();
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            store,
            cloud,
            lb,
            pool,
            events,
            endpoints: HashMap::new(),
            ip_interest: HashMap::new(),
            tx,
            rx,
        })
    }

    /// Handle for front-ends and tests; cheap to clone.
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            tx: self.tx.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
        }
    }

    /// Register the root watches and adopt the current endpoint set.
    pub fn serve(&mut self) -> ManagerResult<()> {
        info!(manager = %self.id, "coordinator starting");
        let announced = self.arm_new_ips_watch()?;
        let names = self.arm_endpoints_watch()?;
        self.apply_endpoint_set(names);
        self.match_new_ips(announced);
        Ok(())
    }

    /// Consume the mailbox until shutdown, self-ticking when idle.
    pub fn run(&mut self) {
        let tick = Duration::from_secs(self.config.tick_interval_secs.max(1));
        loop {
            match self.rx.recv_timeout(tick) {
                Ok(req) => {
                    if !self.process(req) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.process(ReconcileRequest::Tick);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(manager = %self.id, "coordinator stopped");
    }

    /// Process everything currently queued without blocking. Returns
    /// false once a shutdown request was seen.
    pub fn drain(&mut self) -> bool {
        while let Ok(req) = self.rx.try_recv() {
            if !self.process(req) {
                return false;
            }
        }
        true
    }

    fn process(&mut self, req: ReconcileRequest) -> bool {
        match req {
            ReconcileRequest::EndpointSet(_) => match self.arm_endpoints_watch() {
                Ok(names) => self.apply_endpoint_set(names),
                Err(e) => warn!(error = %e, "could not re-arm endpoint membership watch"),
            },
            ReconcileRequest::EndpointConfig { name, data } => {
                self.apply_endpoint_config(&name, data);
            }
            ReconcileRequest::NewIps(_) => match self.arm_new_ips_watch() {
                Ok(ips) => self.match_new_ips(ips),
                Err(e) => warn!(error = %e, "could not re-arm address announcement watch"),
            },
            ReconcileRequest::Tick => self.tick(),
            ReconcileRequest::Shutdown => return false,
        }
        true
    }

    // ── Watch registration ──────────────────────────────────────────

    fn arm_endpoints_watch(&self) -> ManagerResult<Vec<String>> {
        let tx = self.tx.clone();
        let names = self.store.watch_children(
            &paths::endpoints(),
            Box::new(move |children| {
                let _ = tx.send(ReconcileRequest::EndpointSet(children));
            }),
        )?;
        Ok(names)
    }

    fn arm_new_ips_watch(&self) -> ManagerResult<Vec<String>> {
        let tx = self.tx.clone();
        let ips = self.store.watch_children(
            &paths::new_ips(),
            Box::new(move |children| {
                let _ = tx.send(ReconcileRequest::NewIps(children));
            }),
        )?;
        Ok(ips)
    }

    fn arm_config_watch(&mut self, name: &str) {
        let Some(ep) = self.endpoints.get(name) else {
            return;
        };
        if ep.watch_armed {
            return;
        }
        let tx = self.tx.clone();
        let watched = name.to_string();
        let result = self.store.watch_contents(
            &paths::endpoint(name),
            Box::new(move |data| {
                let _ = tx.send(ReconcileRequest::EndpointConfig {
                    name: watched,
                    data,
                });
            }),
        );
        match result {
            Ok(_) => {
                if let Some(ep) = self.endpoints.get_mut(name) {
                    ep.watch_armed = true;
                }
            }
            Err(e) => warn!(endpoint = %name, error = %e, "could not arm configuration watch"),
        }
    }

    // ── Membership ──────────────────────────────────────────────────

    fn apply_endpoint_set(&mut self, names: Vec<String>) {
        debug!(?names, tracked = self.endpoints.len(), "endpoint membership");

        for name in &names {
            if !self.endpoints.contains_key(name) {
                info!(endpoint = %name, manager = %self.id, "adopting endpoint");
                self.endpoints
                    .insert(name.clone(), Endpoint::new(name.clone()));
                self.try_manage(name);
            }
        }

        let gone: Vec<String> = self
            .endpoints
            .keys()
            .filter(|n| !names.contains(*n))
            .cloned()
            .collect();
        for name in gone {
            self.release_endpoint(&name);
        }
    }

    /// Drive a `Managing` endpoint towards `Managed`. Transient store
    /// failures leave it in `Managing` for the next tick to retry.
    fn try_manage(&mut self, name: &str) {
        let Some(mut ep) = self.endpoints.remove(name) else {
            return;
        };

        if ep.config.is_none() && !ep.faulted {
            match self.store.read(&paths::endpoint(name)) {
                Ok(Some(bytes)) => match EndpointConfig::from_slice(&bytes) {
                    Ok(config) => ep.config = Some(config),
                    Err(e) => {
                        warn!(endpoint = %name, error = %e, "endpoint configuration rejected");
                        ep.faulted = true;
                        self.log_event(Severity::Error, events::CONFIG_ERROR, 0, 0);
                    }
                },
                Ok(None) => {
                    warn!(endpoint = %name, "endpoint node has no configuration");
                    ep.faulted = true;
                    self.log_event(Severity::Error, events::CONFIG_ERROR, 0, 0);
                }
                Err(e) => {
                    warn!(endpoint = %name, error = %e, "could not read endpoint configuration");
                    self.endpoints.insert(name.to_string(), ep);
                    return;
                }
            }
        }

        // First-time activation, recorded in the store so a restarted
        // manager adopting the same endpoint does not re-activate.
        match self.store.read(&paths::endpoint_managed(name)) {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Some(config) = ep.config.clone() {
                    self.activate_template(name, &config);
                }
                if let Err(e) = self.store.write(&paths::endpoint_managed(name), b"true") {
                    warn!(endpoint = %name, error = %e, "could not write managed marker");
                    self.endpoints.insert(name.to_string(), ep);
                    return;
                }
            }
            Err(e) => {
                warn!(endpoint = %name, error = %e, "could not read managed marker");
                self.endpoints.insert(name.to_string(), ep);
                return;
            }
        }

        ep.state = EndpointState::Managed;
        info!(endpoint = %name, "endpoint managed");
        self.log_event(Severity::Info, events::ENDPOINT_MANAGED, ep.instances.len() as u32, 0);
        self.endpoints.insert(name.to_string(), ep);
        self.arm_config_watch(name);
        self.converge(name);
    }

    fn activate_template(&self, name: &str, config: &EndpointConfig) {
        info!(endpoint = %name, template = %config.template_id, "activating instance template");
        let template = config.template_id.clone();
        match self.cloud_call(move |cloud| cloud.bless(&template)) {
            Ok(()) => {}
            Err(e) => {
                // Duplicate-activation errors are expected here; either
                // way adoption proceeds and convergence retries later.
                warn!(endpoint = %name, error = %e, "template activation failed, continuing");
                self.log_event(Severity::Warn, events::PROVISION_ERROR, 0, 0);
            }
        }
    }

    /// Unmanage: every instance goes before the template is
    /// deactivated, then local and store-side bookkeeping is cleared.
    fn release_endpoint(&mut self, name: &str) {
        let Some(mut ep) = self.endpoints.remove(name) else {
            return;
        };
        ep.state = EndpointState::Unmanaging;
        info!(endpoint = %name, manager = %self.id, "releasing endpoint");

        let mut deleted = 0u32;
        if let Some(config) = ep.config.clone() {
            let template = config.template_id.clone();
            let instances = match self.cloud_call(move |cloud| cloud.list(&template)) {
                Ok(list) => list,
                Err(e) => {
                    warn!(endpoint = %name, error = %e,
                        "listing failed during release, using last known instances");
                    ep.instances.clone()
                }
            };

            for record in instances.iter().rev() {
                let id = record.id.clone();
                match self.cloud_call(move |cloud| cloud.delete(&id)) {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        warn!(endpoint = %name, instance = %record.id, error = %e,
                            "instance deletion failed during release");
                        self.log_event(Severity::Warn, events::PROVISION_ERROR, 0, 0);
                    }
                }
            }

            let template = config.template_id.clone();
            if let Err(e) = self.cloud_call(move |cloud| cloud.unbless(&template)) {
                // Not-active is the idempotent twin of duplicate
                // activation; absorbed the same way.
                warn!(endpoint = %name, error = %e, "template deactivation failed");
            }
        }

        if let Err(e) = self.store.delete(&paths::confirmed_ips(name)) {
            warn!(endpoint = %name, error = %e, "could not clear confirmed addresses");
        }
        self.ip_interest.remove(name);
        self.log_event(Severity::Info, events::ENDPOINT_UNMANAGED, deleted, 0);
    }

    // ── Configuration updates ───────────────────────────────────────

    fn apply_endpoint_config(&mut self, name: &str, data: Option<Vec<u8>>) {
        {
            let Some(ep) = self.endpoints.get_mut(name) else {
                return;
            };
            if ep.state == EndpointState::Unmanaging {
                return;
            }
            ep.watch_armed = false;
        }
        self.arm_config_watch(name);

        let Some(bytes) = data else {
            // Node deleted; the membership watch drives the release.
            return;
        };

        let parsed = EndpointConfig::from_slice(&bytes);
        {
            let Some(ep) = self.endpoints.get_mut(name) else {
                return;
            };
            match parsed {
                Ok(config) => {
                    info!(endpoint = %name, "endpoint configuration updated");
                    ep.config = Some(config);
                    ep.faulted = false;
                }
                Err(e) => {
                    warn!(endpoint = %name, error = %e, "endpoint configuration rejected");
                    ep.faulted = true;
                    self.log_event(Severity::Error, events::CONFIG_ERROR, 0, 0);
                    return;
                }
            }
        }
        self.converge(name);
    }

    // ── Convergence ─────────────────────────────────────────────────

    fn tick(&mut self) {
        let names: Vec<String> = self.endpoints.keys().cloned().collect();
        for name in names {
            match self.endpoints.get(&name).map(|e| e.state) {
                Some(EndpointState::Managing) => self.try_manage(&name),
                Some(EndpointState::Managed) => self.converge(&name),
                _ => {}
            }
        }
    }

    /// One convergence pass for one endpoint: recompute the target
    /// range and move the instance count towards it, one action at a
    /// time, re-reading the count between actions.
    fn converge(&mut self, name: &str) {
        let Some(ep) = self.endpoints.get(name) else {
            return;
        };
        if ep.state != EndpointState::Managed || ep.faulted {
            return;
        }
        let Some(config) = ep.config.clone() else {
            return;
        };

        let averages = calc::aggregate(&self.read_samples(name));

        let mut count = match self.refresh_instances(name, &config) {
            Some(count) => count,
            None => return,
        };

        let range = match Endpoint::target_range(&config, &averages, count) {
            Ok(range) => range,
            Err(e) => {
                warn!(endpoint = %name, error = %e, "scaling policy rejected, pausing endpoint");
                if let Some(ep) = self.endpoints.get_mut(name) {
                    ep.faulted = true;
                }
                self.log_event(Severity::Error, events::CONFIG_ERROR, 0, 0);
                return;
            }
        };

        let Some(target) = Endpoint::select_target(count, range) else {
            debug!(endpoint = %name, count, range.min = range.0, range.max = range.1,
                "instance count within ideal range");
            return;
        };
        debug!(endpoint = %name, count, target, "converging instance count");

        let mut actions = 0;
        while count < target && actions < config.ramp_limit {
            if !self.launch_one(name, &config, count, target) {
                break;
            }
            actions += 1;
            count = match self.refresh_instances(name, &config) {
                Some(count) => count,
                None => break,
            };
        }
        while count > target && actions < config.ramp_limit {
            if !self.delete_tail(name, &config, count, target) {
                break;
            }
            actions += 1;
            count = match self.refresh_instances(name, &config) {
                Some(count) => count,
                None => break,
            };
        }
    }

    /// Metric samples reported for the endpoint; lossy by design, so
    /// anything unreadable degrades to "no samples".
    fn read_samples(&self, name: &str) -> Vec<HashMap<String, Value>> {
        match self.store.read(&paths::endpoint_metrics(name)) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                debug!(endpoint = %name, error = %e, "unreadable metric samples");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(endpoint = %name, error = %e, "could not read metric samples");
                Vec::new()
            }
        }
    }

    /// Re-list the endpoint's instances and cache them. `None` means
    /// the listing failed and the caller should give up until the next
    /// tick.
    fn refresh_instances(&mut self, name: &str, config: &EndpointConfig) -> Option<u32> {
        let template = config.template_id.clone();
        match self.cloud_call(move |cloud| cloud.list(&template)) {
            Ok(list) => {
                let count = list.len() as u32;
                if let Some(ep) = self.endpoints.get_mut(name) {
                    ep.instances = list;
                }
                Some(count)
            }
            Err(e) => {
                warn!(endpoint = %name, error = %e, "instance listing failed, will retry");
                self.log_event(Severity::Warn, events::PROVISION_ERROR, 0, 0);
                None
            }
        }
    }

    fn launch_one(&mut self, name: &str, config: &EndpointConfig, count: u32, target: u32) -> bool {
        // Register rendezvous interest before the instance exists so
        // its address announcement cannot race past us.
        *self.ip_interest.entry(name.to_string()).or_insert(0) += 1;

        let template = config.template_id.clone();
        match self.cloud_call(move |cloud| cloud.launch(&template)) {
            Ok(record) => {
                info!(endpoint = %name, instance = %record.id, target, "launched instance");
                if let Some(ep) = self.endpoints.get_mut(name) {
                    ep.instances.push(record);
                }
                self.log_event(Severity::Info, events::INSTANCE_LAUNCHED, count + 1, target);
                true
            }
            Err(e) => {
                self.drop_interest(name);
                warn!(endpoint = %name, error = %e, "instance launch failed, will retry");
                self.log_event(Severity::Warn, events::PROVISION_ERROR, 0, 0);
                false
            }
        }
    }

    fn delete_tail(&mut self, name: &str, _config: &EndpointConfig, count: u32, target: u32) -> bool {
        let victim = self
            .endpoints
            .get(name)
            .and_then(|e| e.instances.last().cloned());
        let Some(victim) = victim else {
            return false;
        };

        let id = victim.id.clone();
        match self.cloud_call(move |cloud| cloud.delete(&id)) {
            Ok(()) => {
                info!(endpoint = %name, instance = %victim.id, target, "deleted instance");
                if let Some(ep) = self.endpoints.get_mut(name) {
                    ep.instances.pop();
                }
                // The instance's confirmed addresses go with it.
                for addr in &victim.addresses {
                    if let Err(e) = self.store.delete(&paths::confirmed_ip(name, addr)) {
                        warn!(endpoint = %name, %addr, error = %e,
                            "could not drop confirmed address");
                    }
                }
                self.log_event(
                    Severity::Info,
                    events::INSTANCE_DELETED,
                    count.saturating_sub(1),
                    target,
                );
                true
            }
            Err(e) => {
                warn!(endpoint = %name, instance = %victim.id, error = %e,
                    "instance deletion failed, will retry");
                self.log_event(Severity::Warn, events::PROVISION_ERROR, 0, 0);
                false
            }
        }
    }

    // ── IP rendezvous ───────────────────────────────────────────────

    /// Match announced addresses against interested endpoints. A match
    /// is confirmed in the store, then the announcement is deleted —
    /// the deletion is the at-most-once acknowledgment.
    fn match_new_ips(&mut self, ips: Vec<String>) {
        if ips.is_empty() || self.ip_interest.is_empty() {
            return;
        }
        debug!(?ips, interested = self.ip_interest.len(), "matching announced addresses");

        // Refresh the interested endpoints' address books first; the
        // launch that registered interest usually predates the cache.
        let interested: Vec<String> = self.ip_interest.keys().cloned().collect();
        for name in &interested {
            let Some(config) = self.endpoints.get(name).and_then(|e| e.config.clone()) else {
                continue;
            };
            let template = config.template_id.clone();
            if let Ok(list) = self.cloud_call(move |cloud| cloud.list(&template))
                && let Some(ep) = self.endpoints.get_mut(name)
            {
                ep.instances = list;
            }
        }

        for ip in ips {
            let owner = interested
                .iter()
                .find(|name| {
                    self.ip_interest.get(*name).is_some_and(|n| *n > 0)
                        && self
                            .endpoints
                            .get(*name)
                            .is_some_and(|e| e.addresses().contains(&ip))
                })
                .cloned();
            let Some(name) = owner else {
                continue;
            };
            info!(endpoint = %name, %ip, "confirmed new instance address");

            if let Err(e) = self.store.write(&paths::confirmed_ip(&name, &ip), b"") {
                warn!(endpoint = %name, %ip, error = %e, "could not record confirmed address");
                continue;
            }
            if let Err(e) = self.store.delete(&paths::new_ip(&ip)) {
                warn!(%ip, error = %e, "could not acknowledge announcement");
            }
            self.drop_interest(&name);
            let waiting = self.ip_interest.get(&name).copied().unwrap_or(0);
            self.log_event(Severity::Info, events::IP_CONFIRMED, waiting, 0);
            self.notify_lb(&name);
        }
    }

    fn drop_interest(&mut self, name: &str) {
        if let Some(n) = self.ip_interest.get_mut(name) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.ip_interest.remove(name);
            }
        }
    }

    fn notify_lb(&self, name: &str) {
        let addresses = match self.store.list_children(&paths::confirmed_ips(name)) {
            Ok(list) => list,
            Err(e) => {
                warn!(endpoint = %name, error = %e, "could not list confirmed addresses");
                return;
            }
        };
        let lb = self.lb.clone();
        let name = name.to_string();
        // Fire-and-forget; the hook is external and must not stall the
        // loop.
        if let Err(e) = self.pool.submit(move || lb.endpoint_updated(&name, &addresses)) {
            warn!(error = %e, "load balancer notification dropped");
        }
    }

    // ── Dispatch helpers ────────────────────────────────────────────

    /// Run a provisioning call on the worker pool and wait for it.
    fn cloud_call<T, F>(&self, f: F) -> ManagerResult<T>
    where
        F: FnOnce(&dyn CloudProvider) -> Result<T, crate::cloud::CloudError> + Send + 'static,
        T: Send + 'static,
    {
        let cloud = self.cloud.clone();
        let job = self
            .pool
            .submit(move || f(cloud.as_ref()))
            .map_err(|e| ManagerError::Pool(e.to_string()))?;
        Ok(job.join()?)
    }

    /// Append to the ring log off the loop thread. The log's own
    /// failures are reported through tracing only — an audit-trail
    /// hiccup must not stall reconciliation.
    fn log_event(&self, severity: Severity, kind: &'static str, arg1: u32, arg2: u32) {
        let events = self.events.clone();
        let submitted = self.pool.submit(move || {
            if let Err(e) = events.append(severity, kind, arg1, arg2) {
                tracing::error!(error = %e, kind, "event log append failed");
            }
        });
        if let Err(e) = submitted {
            warn!(error = %e, kind, "event log write dropped");
        }
    }
}

/// Clonable front-end handle: store writes plus mailbox nudges. The
/// loop reacts to the writes through its own watches.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: Sender<ReconcileRequest>,
    store: Arc<dyn CoordStore>,
    events: RingLog,
}

impl ManagerHandle {
    /// Register (or replace) an endpoint's configuration.
    pub fn create_endpoint(&self, name: &str, config: &EndpointConfig) -> ManagerResult<()> {
        let bytes =
            serde_json::to_vec(config).map_err(|e| ManagerError::Config(e.to_string()))?;
        self.store.write(&paths::endpoint(name), &bytes)?;
        Ok(())
    }

    /// Update an endpoint's configuration.
    pub fn update_endpoint(&self, name: &str, config: &EndpointConfig) -> ManagerResult<()> {
        self.create_endpoint(name, config)
    }

    /// Remove an endpoint; the coordinator tears its instances down.
    pub fn remove_endpoint(&self, name: &str) -> ManagerResult<()> {
        self.store.delete(&paths::endpoint(name))?;
        Ok(())
    }

    /// Names of every registered endpoint.
    pub fn list_endpoints(&self) -> ManagerResult<Vec<String>> {
        Ok(self.store.list_children(&paths::endpoints())?)
    }

    /// Rendered audit-log entries.
    pub fn log_entries(&self, since: Option<f64>, limit: Option<usize>) -> Vec<Entry> {
        self.events.query(since, limit)
    }

    /// Ask the loop for an immediate convergence pass.
    pub fn tick(&self) {
        let _ = self.tx.send(ReconcileRequest::Tick);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ReconcileRequest::Shutdown);
    }
}
