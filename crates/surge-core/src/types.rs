//! Domain types shared across the surge crates.

use serde::{Deserialize, Serialize};

/// Name of a load-balanced logical service (store-path segment).
pub type EndpointId = String;

/// Provisioning-side identifier of a running instance.
pub type InstanceId = String;

/// Identifier of the instance template an endpoint launches from.
pub type TemplateId = String;

/// A provisioned instance as reported by the cloud collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    /// Addresses the instance is reachable on, in provider order.
    pub addresses: Vec<String>,
}

/// Lifecycle state of a tracked endpoint.
///
/// An endpoint that is not tracked at all is unmanaged; the record is
/// created on the `Managing` transition and dropped after `Unmanaging`
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    Managing,
    Managed,
    Unmanaging,
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndpointState::Managing => "managing",
            EndpointState::Managed => "managed",
            EndpointState::Unmanaging => "unmanaging",
        };
        f.write_str(s)
    }
}

impl InstanceRecord {
    /// Flatten the instance's addresses, in provider order.
    pub fn addresses_of(instances: &[InstanceRecord]) -> Vec<String> {
        instances
            .iter()
            .flat_map(|i| i.addresses.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_flatten_in_order() {
        let instances = vec![
            InstanceRecord {
                id: "i-1".to_string(),
                addresses: vec!["10.0.0.1".to_string(), "172.16.0.1".to_string()],
            },
            InstanceRecord {
                id: "i-2".to_string(),
                addresses: vec!["10.0.0.2".to_string()],
            },
        ];
        assert_eq!(
            InstanceRecord::addresses_of(&instances),
            vec!["10.0.0.1", "172.16.0.1", "10.0.0.2"]
        );
    }

    #[test]
    fn endpoint_state_display() {
        assert_eq!(EndpointState::Managing.to_string(), "managing");
        assert_eq!(EndpointState::Managed.to_string(), "managed");
        assert_eq!(EndpointState::Unmanaging.to_string(), "unmanaging");
    }
}
