//! Which products depend on which.
//!
//! A dependent is recorded as an empty subkey named after the child under
//! the parent's `Dependents` key. A product with dependents cannot be
//! removed without an explicit override.

use log::debug;

use super::locations::{dependency_key, dependents_key};
use super::{RegistryError, RegistryStore};
use crate::product::ProductId;

pub struct DependencyRegistry<'a> {
    store: &'a dyn RegistryStore,
}

impl<'a> DependencyRegistry<'a> {
    pub fn new(store: &'a dyn RegistryStore) -> Self {
        Self { store }
    }

    /// Create the product's own dependency key.
    pub fn create_entry(&self, id: &ProductId) -> Result<(), RegistryError> {
        self.store.create_key(&dependency_key(id))
    }

    /// Delete the product's dependency key, including its dependents.
    pub fn delete_entry(&self, id: &ProductId) -> Result<(), RegistryError> {
        self.store.delete_key_recursive(&dependency_key(id))
    }

    pub fn add_dependency(&self, parent: &ProductId, child: &ProductId) -> Result<(), RegistryError> {
        debug!("Recording {} as dependent of {}", child, parent);
        self.store
            .create_key(&format!(r"{}\{}", dependents_key(parent), child))
    }

    pub fn remove_dependency(
        &self,
        parent: &ProductId,
        child: &ProductId,
    ) -> Result<(), RegistryError> {
        debug!("Removing {} as dependent of {}", child, parent);
        self.store
            .delete_key_recursive(&format!(r"{}\{}", dependents_key(parent), child))
    }

    /// Number of dependents; a product without a `Dependents` key has none.
    pub fn has_dependents(&self, id: &ProductId) -> Result<usize, RegistryError> {
        match self.store.num_subkeys(&dependents_key(id)) {
            Ok(count) => Ok(count),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }
}
