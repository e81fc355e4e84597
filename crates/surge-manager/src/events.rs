//! The coordinator's declared event kinds.
//!
//! Type codes are assigned by position in [`manager_event_kinds`], so
//! the order here is part of the on-disk format — append new kinds at
//! the end.

use surge_eventlog::EventKind;

pub const ENDPOINT_MANAGED: &str = "endpoint-managed";
pub const ENDPOINT_UNMANAGED: &str = "endpoint-unmanaged";
pub const INSTANCE_LAUNCHED: &str = "instance-launched";
pub const INSTANCE_DELETED: &str = "instance-deleted";
pub const CONFIG_ERROR: &str = "config-error";
pub const PROVISION_ERROR: &str = "provision-error";
pub const IP_CONFIRMED: &str = "ip-confirmed";

/// The ordered event-kind registry handed to the ring log.
pub fn manager_event_kinds() -> Vec<EventKind> {
    vec![
        EventKind::new(ENDPOINT_MANAGED, |count, _| {
            format!("Endpoint under management ({count} instances)")
        }),
        EventKind::new(ENDPOINT_UNMANAGED, |count, _| {
            format!("Endpoint released ({count} instances deleted)")
        }),
        EventKind::new(INSTANCE_LAUNCHED, |count, target| {
            format!("Launched instance ({count} running, target {target})")
        }),
        EventKind::new(INSTANCE_DELETED, |count, target| {
            format!("Deleted instance ({count} running, target {target})")
        }),
        EventKind::new(CONFIG_ERROR, |_, _| {
            "Endpoint configuration rejected".to_string()
        }),
        EventKind::new(PROVISION_ERROR, |_, _| {
            "Provisioning call failed".to_string()
        }),
        EventKind::new(IP_CONFIRMED, |waiting, _| {
            format!("Confirmed new instance address ({waiting} still awaited)")
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_unique_and_ordered() {
        let kinds = manager_event_kinds();
        let names: Vec<_> = kinds.iter().map(|k| k.name).collect();
        assert_eq!(names[0], ENDPOINT_MANAGED);
        assert_eq!(names.len(), 7);
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn formatters_render() {
        let kinds = manager_event_kinds();
        let launched = kinds
            .iter()
            .find(|k| k.name == INSTANCE_LAUNCHED)
            .unwrap();
        assert_eq!(
            (launched.format)(3, 5),
            "Launched instance (3 running, target 5)"
        );
    }
}
