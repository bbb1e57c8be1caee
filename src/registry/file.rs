//! JSON file standing in for one registry root.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{RegistryError, RegistryStore};
use crate::runtime::Runtime;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    keys: BTreeMap<String, BTreeMap<String, RegistryValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum RegistryValue {
    String(String),
    Dword(u32),
}

/// Registry root persisted as a JSON document.
///
/// Key paths are case-insensitive and `\` separated, like the Windows
/// registry. Each operation reads the file and writes it back through a
/// temporary file, so a crash never leaves a truncated document.
pub struct FileRegistry<'a, R: Runtime> {
    runtime: &'a R,
    path: PathBuf,
}

impl<'a, R: Runtime> FileRegistry<'a, R> {
    pub fn new(runtime: &'a R, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: path.into(),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<RegistryDocument, RegistryError> {
        match self.runtime.read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(RegistryDocument::default()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| RegistryError::Other {
                key: self.location(),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RegistryDocument::default()),
            Err(e) => Err(RegistryError::from_io(&self.location(), e)),
        }
    }

    fn save(&self, document: &RegistryDocument) -> Result<(), RegistryError> {
        let text = serde_json::to_string_pretty(document).map_err(|e| RegistryError::Other {
            key: self.location(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;

        let mut temp = self.path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let result = self
            .path
            .parent()
            .map_or(Ok(()), |parent| self.runtime.create_dir_all(parent))
            .and_then(|()| self.runtime.write(&temp, text.as_bytes()))
            .and_then(|()| self.runtime.rename(&temp, &self.path));
        result.map_err(|e| RegistryError::from_io(&self.location(), e))
    }

    fn update(
        &self,
        change: impl FnOnce(&mut RegistryDocument) -> Result<(), RegistryError>,
    ) -> Result<(), RegistryError> {
        let mut document = self.load()?;
        change(&mut document)?;
        self.save(&document)
    }
}

fn canonical_key(key: &str) -> String {
    key.split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\\")
        .to_lowercase()
}

fn subtree_prefix(key: &str) -> String {
    format!("{}\\", key)
}

fn insert_with_ancestors(document: &mut RegistryDocument, key: &str) {
    let mut prefix = String::new();
    for part in key.split('\\') {
        if !prefix.is_empty() {
            prefix.push('\\');
        }
        prefix.push_str(part);
        document.keys.entry(prefix.clone()).or_default();
    }
}

impl<R: Runtime> FileRegistry<'_, R> {
    fn write_value(&self, key: &str, name: &str, value: RegistryValue) -> Result<(), RegistryError> {
        let key = canonical_key(key);
        self.update(|document| {
            insert_with_ancestors(document, &key);
            document
                .keys
                .entry(key)
                .or_default()
                .insert(name.to_string(), value);
            Ok(())
        })
    }
}

impl<R: Runtime> RegistryStore for FileRegistry<'_, R> {
    fn read_string(&self, key: &str, name: &str) -> Result<String, RegistryError> {
        let key = canonical_key(key);
        let document = self.load()?;
        let values = document
            .keys
            .get(&key)
            .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
        match values.get(name) {
            Some(RegistryValue::String(value)) => Ok(value.clone()),
            Some(RegistryValue::Dword(_)) => Err(RegistryError::Other {
                key: format!("{}\\{}", key, name),
                source: io::Error::new(io::ErrorKind::InvalidData, "value is not a string"),
            }),
            None => Err(RegistryError::NotFound(format!("{}\\{}", key, name))),
        }
    }

    fn write_string(&self, key: &str, name: &str, value: &str) -> Result<(), RegistryError> {
        self.write_value(key, name, RegistryValue::String(value.to_string()))
    }

    fn write_dword(&self, key: &str, name: &str, value: u32) -> Result<(), RegistryError> {
        self.write_value(key, name, RegistryValue::Dword(value))
    }

    fn create_key(&self, key: &str) -> Result<(), RegistryError> {
        let key = canonical_key(key);
        self.update(|document| {
            insert_with_ancestors(document, &key);
            Ok(())
        })
    }

    fn num_subkeys(&self, key: &str) -> Result<usize, RegistryError> {
        let key = canonical_key(key);
        let document = self.load()?;
        if !document.keys.contains_key(&key) {
            return Err(RegistryError::NotFound(key));
        }
        let prefix = subtree_prefix(&key);
        Ok(document
            .keys
            .keys()
            .filter_map(|candidate| candidate.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('\\'))
            .count())
    }

    fn delete_key_recursive(&self, key: &str) -> Result<(), RegistryError> {
        let key = canonical_key(key);
        self.update(|document| {
            if !document.keys.contains_key(&key) {
                return Err(RegistryError::NotFound(key.clone()));
            }
            let prefix = subtree_prefix(&key);
            document
                .keys
                .retain(|candidate, _| candidate != &key && !candidate.starts_with(&prefix));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_values() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let registry = FileRegistry::new(&runtime, dir.path().join("state").join("registry.json"));

        registry
            .write_string(r"Software\Uninstall\ABC", "InstallDir", "/opt/abc")
            .unwrap();
        registry
            .write_dword(r"Software\Uninstall\ABC", "SystemComponent", 1)
            .unwrap();

        assert_eq!(
            registry
                .read_string(r"SOFTWARE\uninstall\abc\", "InstallDir")
                .unwrap(),
            "/opt/abc"
        );
        assert!(registry
            .read_string(r"Software\Uninstall\ABC", "Missing")
            .unwrap_err()
            .is_not_found());
        assert!(registry
            .read_string(r"Software\Uninstall\Other", "InstallDir")
            .unwrap_err()
            .is_not_found());
        assert!(!dir.path().join("state").join("registry.json.tmp").exists());
    }

    #[test]
    fn test_reading_dword_as_string_fails() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let registry = FileRegistry::new(&runtime, dir.path().join("registry.json"));
        registry.write_dword("K", "Flag", 1).unwrap();

        assert!(matches!(
            registry.read_string("K", "Flag"),
            Err(RegistryError::Other { .. })
        ));
    }

    #[test]
    fn test_num_subkeys_counts_direct_children() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let registry = FileRegistry::new(&runtime, dir.path().join("registry.json"));

        registry.create_key(r"Deps\ABC\Dependents\Child1").unwrap();
        registry
            .create_key(r"Deps\ABC\Dependents\Child2\Nested")
            .unwrap();
        registry.create_key(r"Deps\ABCD\Dependents\Other").unwrap();

        assert_eq!(registry.num_subkeys(r"Deps\ABC\Dependents").unwrap(), 2);
        assert_eq!(registry.num_subkeys(r"Deps").unwrap(), 2);
        assert!(registry.num_subkeys(r"Deps\XYZ").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_key_recursive() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let registry = FileRegistry::new(&runtime, dir.path().join("registry.json"));

        registry.create_key(r"Deps\ABC\Dependents\Child1").unwrap();
        registry.create_key(r"Deps\ABCD").unwrap();

        registry.delete_key_recursive(r"Deps\ABC").unwrap();
        assert!(registry.num_subkeys(r"Deps\ABC").unwrap_err().is_not_found());
        // Sibling with a common name prefix survives
        assert_eq!(registry.num_subkeys(r"Deps\ABCD").unwrap(), 0);

        assert!(registry
            .delete_key_recursive(r"Deps\ABC")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_permission_denied_maps_to_access_denied() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .returning(|_| Err(io::Error::from(io::ErrorKind::PermissionDenied)));

        let registry = FileRegistry::new(&runtime, "/var/lib/setupkeep/registry.json");
        assert!(registry.read_string("K", "V").unwrap_err().is_access_denied());
    }

    #[test]
    fn test_write_denied_maps_to_access_denied() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .returning(|_| Err(io::Error::from(io::ErrorKind::NotFound)));
        runtime
            .expect_create_dir_all()
            .returning(|_| Err(io::Error::from(io::ErrorKind::PermissionDenied)));

        let registry = FileRegistry::new(&runtime, "/var/lib/setupkeep/registry.json");
        assert!(registry.create_key("K").unwrap_err().is_access_denied());
    }

    #[test]
    fn test_corrupt_document_is_reported() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();

        let registry = FileRegistry::new(&runtime, &path);
        assert!(matches!(
            registry.read_string("K", "V"),
            Err(RegistryError::Other { .. })
        ));
    }
}
