// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Management labels.
//!
//! Every workload launched by the control plane carries these labels. They are
//! the only link between a running container and the environment it serves,
//! and the only way a restarted control plane can find its workloads again.

use std::collections::HashMap;

/// Marks a workload as owned by this control plane.
pub const MANAGED_LABEL: &str = "webarena.managed";
/// Environment instance id.
pub const ENV_ID_LABEL: &str = "webarena.env_id";
/// Environment type name.
pub const ENV_NAME_LABEL: &str = "webarena.env_name";

/// Value of [`MANAGED_LABEL`] on owned workloads.
pub const MANAGED_VALUE: &str = "true";

/// Label selector matching every managed workload.
pub fn management_selector() -> (&'static str, &'static str) {
    (MANAGED_LABEL, MANAGED_VALUE)
}

/// Typed view of the management labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedLabels {
    /// Environment instance id.
    pub env_id: String,
    /// Environment type name.
    pub env_name: String,
}

impl ManagedLabels {
    /// Create labels for an instance.
    pub fn new(env_id: impl Into<String>, env_name: impl Into<String>) -> Self {
        Self {
            env_id: env_id.into(),
            env_name: env_name.into(),
        }
    }

    /// Render as the label map attached at launch.
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (MANAGED_LABEL.to_string(), MANAGED_VALUE.to_string()),
            (ENV_ID_LABEL.to_string(), self.env_id.clone()),
            (ENV_NAME_LABEL.to_string(), self.env_name.clone()),
        ])
    }

    /// Parse labels read back from the runtime.
    ///
    /// Returns `None` unless the workload is marked managed and carries a
    /// non-empty id and name. Such workloads are not ours to adopt.
    pub fn from_map(labels: &HashMap<String, String>) -> Option<Self> {
        if labels.get(MANAGED_LABEL).map(String::as_str) != Some(MANAGED_VALUE) {
            return None;
        }
        let env_id = labels.get(ENV_ID_LABEL).filter(|v| !v.is_empty())?;
        let env_name = labels.get(ENV_NAME_LABEL).filter(|v| !v.is_empty())?;
        Some(Self::new(env_id.clone(), env_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let labels = ManagedLabels::new("env_0badf00d", "reddit");
        assert_eq!(ManagedLabels::from_map(&labels.to_map()), Some(labels));
    }

    #[test]
    fn test_missing_id_is_not_ours() {
        let mut map = ManagedLabels::new("env_1", "reddit").to_map();
        map.remove(ENV_ID_LABEL);
        assert_eq!(ManagedLabels::from_map(&map), None);
    }

    #[test]
    fn test_empty_name_is_not_ours() {
        let mut map = ManagedLabels::new("env_1", "reddit").to_map();
        map.insert(ENV_NAME_LABEL.to_string(), String::new());
        assert_eq!(ManagedLabels::from_map(&map), None);
    }

    #[test]
    fn test_unmanaged_is_not_ours() {
        let mut map = ManagedLabels::new("env_1", "reddit").to_map();
        map.insert(MANAGED_LABEL.to_string(), "false".to_string());
        assert_eq!(ManagedLabels::from_map(&map), None);
    }
}
