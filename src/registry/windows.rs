//! The Windows registry as a [`RegistryStore`].

use std::io;

use winreg::RegKey;
use winreg::enums::{
    HKEY, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_ALL_ACCESS, KEY_READ, KEY_WOW64_64KEY,
};

use super::{RegistryError, RegistryStore};

/// One hive of the native registry, always in the 64-bit view.
pub struct WindowsRegistry {
    hive: HKEY,
}

impl WindowsRegistry {
    pub fn new(hive: HKEY) -> Self {
        Self { hive }
    }

    fn root(&self) -> RegKey {
        RegKey::predef(self.hive)
    }

    pub fn machine() -> Self {
        Self::new(HKEY_LOCAL_MACHINE)
    }

    pub fn user() -> Self {
        Self::new(HKEY_CURRENT_USER)
    }

    fn open(&self, key: &str) -> Result<RegKey, RegistryError> {
        self.root()
            .open_subkey_with_flags(key, KEY_READ | KEY_WOW64_64KEY)
            .map_err(|e| RegistryError::from_io(key, e))
    }

    fn create(&self, key: &str) -> Result<RegKey, RegistryError> {
        self.root()
            .create_subkey_with_flags(key, KEY_ALL_ACCESS | KEY_WOW64_64KEY)
            .map(|(created, _)| created)
            .map_err(|e| RegistryError::from_io(key, e))
    }
}

impl RegistryStore for WindowsRegistry {
    fn read_string(&self, key: &str, name: &str) -> Result<String, RegistryError> {
        self.open(key)?
            .get_value::<String, _>(name)
            .map_err(|e| RegistryError::from_io(&format!("{}\\{}", key, name), e))
    }

    fn write_string(&self, key: &str, name: &str, value: &str) -> Result<(), RegistryError> {
        self.create(key)?
            .set_value(name, &value.to_string())
            .map_err(|e| RegistryError::from_io(key, e))
    }

    fn write_dword(&self, key: &str, name: &str, value: u32) -> Result<(), RegistryError> {
        self.create(key)?
            .set_value(name, &value)
            .map_err(|e| RegistryError::from_io(key, e))
    }

    fn create_key(&self, key: &str) -> Result<(), RegistryError> {
        self.create(key).map(|_| ())
    }

    fn num_subkeys(&self, key: &str) -> Result<usize, RegistryError> {
        let info = self
            .open(key)?
            .query_info()
            .map_err(|e| RegistryError::from_io(key, e))?;
        Ok(info.sub_keys as usize)
    }

    fn delete_key_recursive(&self, key: &str) -> Result<(), RegistryError> {
        let trimmed = key.trim_end_matches('\\');
        let (parent, name) = match trimmed.rsplit_once('\\') {
            Some((parent, name)) => (
                self.root()
                    .open_subkey_with_flags(parent, KEY_ALL_ACCESS | KEY_WOW64_64KEY)
                    .map_err(|e| RegistryError::from_io(parent, e))?,
                name,
            ),
            None => (self.root(), trimmed),
        };
        match parent.delete_subkey_all(name) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RegistryError::NotFound(key.to_string()))
            }
            Err(e) => Err(RegistryError::from_io(key, e)),
        }
    }
}
