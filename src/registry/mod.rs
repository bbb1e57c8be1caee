//! Registry-backed install state.
//!
//! All persistent state besides the manifests lives in a hierarchical
//! key/value store with a machine-wide and a per-user root: the real Windows
//! registry, or a JSON file per root elsewhere. [`ScopedRegistry`] picks the
//! root for an [`InstallScope`] and falls back to the user root when the
//! machine root is not accessible.

pub mod dependencies;
mod file;
pub mod locations;
#[cfg(windows)]
mod windows;

use std::fmt;
use std::io;

use log::debug;
use thiserror::Error;

pub use dependencies::DependencyRegistry;
pub use file::FileRegistry;
#[cfg(windows)]
pub use windows::WindowsRegistry;

/// Which root holds a product's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InstallScope {
    #[default]
    User,
    Machine,
}

impl fmt::Display for InstallScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallScope::User => f.write_str("user"),
            InstallScope::Machine => f.write_str("machine"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry key or value {0} not found")]
    NotFound(String),

    #[error("access denied to registry key {0}")]
    AccessDenied(String),

    #[error("registry operation on {key} failed: {source}")]
    Other {
        key: String,
        #[source]
        source: io::Error,
    },
}

impl RegistryError {
    pub fn from_io(key: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => RegistryError::NotFound(key.to_string()),
            io::ErrorKind::PermissionDenied => RegistryError::AccessDenied(key.to_string()),
            _ => RegistryError::Other {
                key: key.to_string(),
                source: err,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, RegistryError::AccessDenied(_))
    }
}

/// Hierarchical key/value store; keys are `\`-separated paths.
#[cfg_attr(test, mockall::automock)]
pub trait RegistryStore {
    fn read_string(&self, key: &str, name: &str) -> Result<String, RegistryError>;
    /// Creates the key when missing.
    fn write_string(&self, key: &str, name: &str, value: &str) -> Result<(), RegistryError>;
    /// Creates the key when missing.
    fn write_dword(&self, key: &str, name: &str, value: u32) -> Result<(), RegistryError>;
    /// Create a key and its missing ancestors.
    fn create_key(&self, key: &str) -> Result<(), RegistryError>;
    /// Number of direct subkeys; `NotFound` when the key is missing.
    fn num_subkeys(&self, key: &str) -> Result<usize, RegistryError>;
    /// Delete a key with everything under it; `NotFound` when missing.
    fn delete_key_recursive(&self, key: &str) -> Result<(), RegistryError>;
}

/// The machine and user stores of one system.
pub struct ScopedRegistry<'a> {
    machine: Box<dyn RegistryStore + 'a>,
    user: Box<dyn RegistryStore + 'a>,
}

impl<'a> ScopedRegistry<'a> {
    pub fn new(machine: Box<dyn RegistryStore + 'a>, user: Box<dyn RegistryStore + 'a>) -> Self {
        Self { machine, user }
    }

    /// View of the registry for `scope`, with the fallback policy applied.
    pub fn root(&self, scope: InstallScope) -> RegistryRoot<'_> {
        RegistryRoot {
            scope,
            machine: self.machine.as_ref(),
            user: self.user.as_ref(),
        }
    }
}

/// A [`RegistryStore`] for one scope.
///
/// User scope only touches the user store. Machine scope goes to the machine
/// store first and retries under the user store when a write or delete is
/// denied, or when a read finds nothing or is denied. A delete that finds
/// nothing on the machine store is retried too.
pub struct RegistryRoot<'r> {
    scope: InstallScope,
    machine: &'r dyn RegistryStore,
    user: &'r dyn RegistryStore,
}

impl RegistryRoot<'_> {
    fn with_fallback<T>(
        &self,
        retry: impl Fn(&RegistryError) -> bool,
        op: impl Fn(&dyn RegistryStore) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        match self.scope {
            InstallScope::User => op(self.user),
            InstallScope::Machine => match op(self.machine) {
                Err(e) if retry(&e) => {
                    debug!("Machine registry: {}; using the user registry", e);
                    op(self.user)
                }
                other => other,
            },
        }
    }

    fn read<T>(
        &self,
        op: impl Fn(&dyn RegistryStore) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        self.with_fallback(|e| e.is_not_found() || e.is_access_denied(), op)
    }

    fn write<T>(
        &self,
        op: impl Fn(&dyn RegistryStore) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        self.with_fallback(RegistryError::is_access_denied, op)
    }
}

impl RegistryStore for RegistryRoot<'_> {
    fn read_string(&self, key: &str, name: &str) -> Result<String, RegistryError> {
        self.read(|store| store.read_string(key, name))
    }

    fn write_string(&self, key: &str, name: &str, value: &str) -> Result<(), RegistryError> {
        self.write(|store| store.write_string(key, name, value))
    }

    fn write_dword(&self, key: &str, name: &str, value: u32) -> Result<(), RegistryError> {
        self.write(|store| store.write_dword(key, name, value))
    }

    fn create_key(&self, key: &str) -> Result<(), RegistryError> {
        self.write(|store| store.create_key(key))
    }

    fn num_subkeys(&self, key: &str) -> Result<usize, RegistryError> {
        self.read(|store| store.num_subkeys(key))
    }

    fn delete_key_recursive(&self, key: &str) -> Result<(), RegistryError> {
        self.with_fallback(
            |e| e.is_not_found() || e.is_access_denied(),
            |store| store.delete_key_recursive(key),
        )
    }
}
