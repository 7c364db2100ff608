//! EK-PAR - Parameter Registry
//!
//! Flat index from fully qualified parameter name to its location in the
//! component tree. Populated while the tree is built; read-only afterwards.

use crate::types::*;
use std::collections::HashMap;

/// Location of a parameter inside a [`ComponentTree`](crate::component::ComponentTree)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterAddress {
    /// Owning component
    pub component: ComponentId,
    /// Position in the component's parameter list
    pub index: usize,
}

/// Full-name index of every registered parameter
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    entries: HashMap<String, ParameterAddress>,
}

impl ParameterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter under its full name
    ///
    /// Names are unique for the lifetime of the registry.
    pub fn register(&mut self, full_name: String, address: ParameterAddress) -> Result<()> {
        if self.entries.contains_key(&full_name) {
            tracing::warn!(name = %full_name, "duplicate parameter registration");
            return Err(Error::AlreadyExists);
        }
        tracing::trace!(name = %full_name, component = address.component.index(), "parameter registered");
        self.entries.insert(full_name, address);
        Ok(())
    }

    /// Location of a parameter
    pub fn lookup(&self, full_name: &str) -> Option<ParameterAddress> {
        self.entries.get(full_name).copied()
    }

    /// Registered full names, in no particular order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No parameters registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every registration
    #[cfg(any(test, feature = "test-util"))]
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
