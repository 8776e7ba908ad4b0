use std::collections::HashSet;

use crate::error::{DeployError, DeployResult};
use crate::target::TargetDescriptor;

/// Identifier that selects every registered target.
pub const ALL: &str = "all";

/// Immutable, ordered set of deployable targets.
///
/// Order is registration order, so `all` runs and their reports are
/// reproducible.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<TargetDescriptor>,
}

impl TargetRegistry {
    /// Build a registry, rejecting duplicate ids or ports.
    ///
    /// # Errors
    /// Returns [`DeployError::Config`] when an id is empty, reserved, or
    /// duplicated, or when two targets share a port.
    pub fn new(targets: Vec<TargetDescriptor>) -> DeployResult<Self> {
        let mut ids = HashSet::new();
        let mut ports = HashSet::new();

        for target in &targets {
            if target.id.is_empty() || target.id == ALL {
                return Err(DeployError::Config(format!(
                    "invalid target id '{}'",
                    target.id
                )));
            }
            if !ids.insert(target.id.as_str()) {
                return Err(DeployError::Config(format!(
                    "duplicate target id '{}'",
                    target.id
                )));
            }
            if !ports.insert(target.port) {
                return Err(DeployError::Config(format!(
                    "port {} is used by more than one target (second: '{}')",
                    target.port, target.id
                )));
            }
        }

        Ok(Self { targets })
    }

    /// Resolve an identifier to the targets it selects.
    ///
    /// `all` selects every target in registration order; anything else must
    /// name exactly one target. Case and surrounding whitespace are ignored.
    ///
    /// # Errors
    /// Returns [`DeployError::UnknownTarget`] listing the valid identifiers.
    pub fn resolve(&self, identifier: &str) -> DeployResult<Vec<&TargetDescriptor>> {
        let name = identifier.trim().to_lowercase();
        if name == ALL {
            return Ok(self.targets.iter().collect());
        }
        self.get(&name)
            .map(|t| vec![t])
            .ok_or_else(|| DeployError::UnknownTarget {
                name,
                available: self.ids().join(", "),
            })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TargetDescriptor> {
        self.targets.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetDescriptor> {
        self.targets.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
