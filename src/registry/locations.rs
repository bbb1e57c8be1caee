//! Where a product's records live inside a registry root.

use std::path::PathBuf;

use super::{RegistryError, RegistryStore};
use crate::product::ProductId;

pub const UNINSTALL_ROOT: &str = r"Software\Microsoft\Windows\CurrentVersion\Uninstall";
pub const DEPENDENCIES_ROOT: &str = r"Software\Classes\Installer\Dependencies";
pub const DEPENDENTS_SUBKEY: &str = "Dependents";

pub const VALUE_MANIFEST_PATH: &str = "LogFileName";
pub const VALUE_INSTALL_DIR: &str = "InstallDir";
pub const VALUE_SYSTEM_COMPONENT: &str = "SystemComponent";

pub fn uninstall_key(id: &ProductId) -> String {
    format!(r"{}\{}", UNINSTALL_ROOT, id)
}

pub fn dependency_key(id: &ProductId) -> String {
    format!(r"{}\{}", DEPENDENCIES_ROOT, id)
}

pub fn dependents_key(id: &ProductId) -> String {
    format!(r"{}\{}", dependency_key(id), DEPENDENTS_SUBKEY)
}

/// Values recorded under the uninstall key of an installed product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallEntry {
    pub manifest_path: PathBuf,
    pub install_dir: PathBuf,
}

pub fn read_manifest_path(
    store: &dyn RegistryStore,
    id: &ProductId,
) -> Result<PathBuf, RegistryError> {
    store
        .read_string(&uninstall_key(id), VALUE_MANIFEST_PATH)
        .map(PathBuf::from)
}

pub fn read_install_dir(
    store: &dyn RegistryStore,
    id: &ProductId,
) -> Result<PathBuf, RegistryError> {
    store
        .read_string(&uninstall_key(id), VALUE_INSTALL_DIR)
        .map(PathBuf::from)
}

/// Record the manifest and install directory; hidden from the system's
/// "installed programs" list.
pub fn write_uninstall_entry(
    store: &dyn RegistryStore,
    id: &ProductId,
    entry: &UninstallEntry,
) -> Result<(), RegistryError> {
    let key = uninstall_key(id);
    store.write_string(
        &key,
        VALUE_MANIFEST_PATH,
        &entry.manifest_path.to_string_lossy(),
    )?;
    store.write_string(&key, VALUE_INSTALL_DIR, &entry.install_dir.to_string_lossy())?;
    store.write_dword(&key, VALUE_SYSTEM_COMPONENT, 1)
}

pub fn delete_uninstall_entry(store: &dyn RegistryStore, id: &ProductId) -> Result<(), RegistryError> {
    store.delete_key_recursive(&uninstall_key(id))
}
