//! The per-endpoint record and the pure parts of convergence.

use std::collections::HashMap;

use surge_calc::{self as calc, CalcError};
use surge_core::{EndpointConfig, EndpointState, InstanceRecord};

/// In-memory record of one tracked endpoint.
///
/// The coordinator loop owns these exclusively; the store remains the
/// durable source of truth for configuration and the managed marker.
#[derive(Debug)]
pub struct Endpoint {
    pub name: String,
    /// `None` until configuration has been read and parsed.
    pub config: Option<EndpointConfig>,
    pub state: EndpointState,
    /// Set on configuration errors; convergence skips a faulted
    /// endpoint until a good configuration arrives.
    pub faulted: bool,
    /// Whether a one-shot watch on the config path is outstanding.
    pub watch_armed: bool,
    /// Instances as of the last provisioning list, in list order.
    pub instances: Vec<InstanceRecord>,
}

impl Endpoint {
    pub fn new(name: String) -> Self {
        Self {
            name,
            config: None,
            state: EndpointState::Managing,
            faulted: false,
            watch_armed: false,
            instances: Vec::new(),
        }
    }

    /// All addresses across the known instances.
    pub fn addresses(&self) -> Vec<String> {
        InstanceRecord::addresses_of(&self.instances)
    }

    /// The instance-count range to converge into this tick: the ideal
    /// range from the policy, clamped to the configured floor/ceiling.
    /// A policy that contributes nothing leaves the configured band.
    pub fn target_range(
        config: &EndpointConfig,
        averages: &HashMap<String, f64>,
        instance_count: u32,
    ) -> Result<(u32, u32), CalcError> {
        let ideal = calc::ideal_range(&config.rules, averages, instance_count)?;
        Ok(match ideal {
            Some(range) => {
                calc::clamp_to_config(range, config.min_instances, config.max_instances)
            }
            None => (config.min_instances, config.max_instances),
        })
    }

    /// Pick the tick's target count: nothing to do inside the range,
    /// otherwise the midpoint of it.
    pub fn select_target(current: u32, range: (u32, u32)) -> Option<u32> {
        if current >= range.0 && current <= range.1 {
            None
        } else {
            Some(((u64::from(range.0) + u64::from(range.1)) / 2) as u32)
        }
    }
}
