//! Read-only registry of configured Commvault targets.

use crate::config::{Settings, TargetConfig};
use std::collections::BTreeMap;

/// Target name to configuration lookup, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: BTreeMap<String, TargetConfig>,
}

impl TargetRegistry {
    /// Build a registry from already validated targets.
    pub fn new(targets: impl IntoIterator<Item = TargetConfig>) -> Self {
        Self {
            targets: targets
                .into_iter()
                .map(|target| (target.name.clone(), target))
                .collect(),
        }
    }

    /// Build the registry from loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.targets.values().cloned())
    }

    /// Names of every configured target, sorted.
    pub fn list_targets(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Look up a target by name.
    pub fn get(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.get(name)
    }

    /// Iterate over all target configurations.
    pub fn iter(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
