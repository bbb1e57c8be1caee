use anyhow::Result;
use log::debug;

use std::path::PathBuf;

use super::paths::{REGISTRY_FILE_NAME, default_manifest_dir, state_root};
use crate::{
    application::LifecycleContext,
    archive::ArchiveExtractorImpl,
    interrupt::Interrupt,
    registry::{FileRegistry, InstallScope, ScopedRegistry},
    runtime::Runtime,
};

/// Settings shared by every command of one invocation.
pub struct Config<R: Runtime> {
    pub runtime: R,
    pub scope: InstallScope,
    /// Replaces the system locations for manifests and registry files
    pub root: Option<PathBuf>,
    pub manifest_dir: PathBuf,
}

impl<R: Runtime> Config<R> {
    pub fn new(
        runtime: R,
        scope: InstallScope,
        root: Option<PathBuf>,
        data_dir: Option<PathBuf>,
        data_dir_name: Option<String>,
    ) -> Result<Self> {
        let manifest_dir = match data_dir {
            Some(dir) => dir,
            None => default_manifest_dir(&runtime, scope, root.as_deref(), data_dir_name.as_deref())?,
        };
        debug!("Using manifest directory {}", manifest_dir.display());

        Ok(Self {
            runtime,
            scope,
            root,
            manifest_dir,
        })
    }

    /// Registry stores for both scopes.
    ///
    /// On Windows this is the system registry unless a root is given; the
    /// root (and every other platform) uses one JSON file per scope.
    pub fn registry(&self) -> Result<ScopedRegistry<'_>> {
        #[cfg(windows)]
        {
            use crate::registry::WindowsRegistry;
            if self.root.is_none() {
                return Ok(ScopedRegistry::new(
                    Box::new(WindowsRegistry::machine()),
                    Box::new(WindowsRegistry::user()),
                ));
            }
        }

        let machine = state_root(&self.runtime, InstallScope::Machine, self.root.as_deref())?;
        let user = state_root(&self.runtime, InstallScope::User, self.root.as_deref())?;
        Ok(ScopedRegistry::new(
            Box::new(FileRegistry::new(&self.runtime, machine.join(REGISTRY_FILE_NAME))),
            Box::new(FileRegistry::new(&self.runtime, user.join(REGISTRY_FILE_NAME))),
        ))
    }

    pub fn extractor(&self) -> ArchiveExtractorImpl<'_, R> {
        ArchiveExtractorImpl::new(&self.runtime)
    }

    pub fn context(&self, interrupt: Interrupt) -> LifecycleContext {
        LifecycleContext {
            scope: self.scope,
            manifest_dir: self.manifest_dir.clone(),
            interrupt,
        }
    }
}
