//! Capacity configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::Namespace;

/// Default overall capacity of a namespace.
pub const DEFAULT_OVERALL_CAPACITY: u64 = 50;

/// Default capacity ceiling of a single group.
pub const DEFAULT_PER_GROUP_CAPACITY: u64 = 15;

/// Default tag key used to group streams.
pub const DEFAULT_GROUPING_TAG_KEY: &str = "customer_id";

/// Capacity limits applied to one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Ceiling on the sum of all weights in the namespace.
    pub overall_capacity: u64,

    /// Ceiling on the sum of weights within one group.
    pub per_group_capacity: u64,

    /// Tag key whose value partitions streams into groups.
    pub grouping_tag_key: String,
}

impl GlobalConfig {
    pub fn new(
        overall_capacity: u64,
        per_group_capacity: u64,
        grouping_tag_key: impl Into<String>,
    ) -> Self {
        Self {
            overall_capacity,
            per_group_capacity,
            grouping_tag_key: grouping_tag_key.into(),
        }
    }

    /// Effective ceiling of a single group.
    pub fn group_capacity(&self) -> u64 {
        self.per_group_capacity.min(self.overall_capacity)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.grouping_tag_key.trim().is_empty() {
            return Err(EngineError::Config(
                "grouping_tag_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_OVERALL_CAPACITY,
            DEFAULT_PER_GROUP_CAPACITY,
            DEFAULT_GROUPING_TAG_KEY,
        )
    }
}

/// Default configuration plus per-namespace overrides.
#[derive(Debug, Clone, Default)]
pub struct GuardConfigs {
    default: GlobalConfig,
    overrides: HashMap<Namespace, GlobalConfig>,
}

impl GuardConfigs {
    pub fn new(default: GlobalConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Adds or replaces the configuration of one namespace.
    pub fn with_override(mut self, namespace: Namespace, config: GlobalConfig) -> Self {
        self.overrides.insert(namespace, config);
        self
    }

    /// Returns the configuration in force for a namespace.
    pub fn get(&self, namespace: &Namespace) -> &GlobalConfig {
        self.overrides.get(namespace).unwrap_or(&self.default)
    }

    pub fn default_config(&self) -> &GlobalConfig {
        &self.default
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    /// Validates the default and every override.
    pub fn validate(&self) -> EngineResult<()> {
        self.default.validate()?;
        for (namespace, config) in &self.overrides {
            config
                .validate()
                .map_err(|e| EngineError::Config(format!("{namespace}: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_capacity_is_bounded_by_overall() {
        let config = GlobalConfig::new(10, 15, "customer_id");
        assert_eq!(config.group_capacity(), 10);

        let config = GlobalConfig::default();
        assert_eq!(config.group_capacity(), 15);
    }

    #[test]
    fn test_empty_grouping_key_is_rejected() {
        let config = GlobalConfig::new(50, 15, " ");
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_override_lookup_falls_back_to_default() {
        let ns = Namespace::new("guard", "prod");
        let configs = GuardConfigs::new(GlobalConfig::default())
            .with_override(ns.clone(), GlobalConfig::new(100, 30, "tenant"));

        assert_eq!(configs.get(&ns).overall_capacity, 100);
        assert_eq!(
            configs.get(&Namespace::new("guard", "dev")),
            &GlobalConfig::default()
        );
        assert_eq!(configs.override_count(), 1);
    }

    #[test]
    fn test_invalid_override_names_namespace() {
        let ns = Namespace::new("guard", "prod");
        let configs = GuardConfigs::default().with_override(ns, GlobalConfig::new(1, 1, ""));

        let err = configs.validate().unwrap_err();
        assert!(err.to_string().contains("guard/prod"));
    }
}
