use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

use crate::registry::InstallScope;
use crate::runtime::Runtime;

pub const APP_DIR_NAME: &str = "setupkeep";
pub const DEFAULT_MANIFEST_DIR_NAME: &str = "manifests";
pub const REGISTRY_FILE_NAME: &str = "registry.json";

/// Directory holding the state of one scope: manifests and, off Windows,
/// the registry file.
///
/// With an explicit `root`, each scope gets its own subdirectory so both
/// can live under one test or staging directory.
#[tracing::instrument(skip(runtime))]
pub fn state_root<R: Runtime>(
    runtime: &R,
    scope: InstallScope,
    root: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root.join(scope_dir_name(scope)));
    }

    let dir = match scope {
        InstallScope::User => runtime
            .data_local_dir()
            .context("Could not find the local data directory")?
            .join(APP_DIR_NAME),
        InstallScope::Machine => system_state_root(runtime),
    };
    debug!("Using {} state directory {}", scope, dir.display());
    Ok(dir)
}

/// Default manifest directory for `scope`.
pub fn default_manifest_dir<R: Runtime>(
    runtime: &R,
    scope: InstallScope,
    root: Option<&Path>,
    dir_name: Option<&str>,
) -> Result<PathBuf> {
    Ok(state_root(runtime, scope, root)?.join(dir_name.unwrap_or(DEFAULT_MANIFEST_DIR_NAME)))
}

fn scope_dir_name(scope: InstallScope) -> &'static str {
    match scope {
        InstallScope::User => "user",
        InstallScope::Machine => "machine",
    }
}

#[cfg(target_os = "macos")]
fn system_state_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from("/Library/Application Support").join(APP_DIR_NAME)
}

#[cfg(target_os = "windows")]
fn system_state_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from(r"C:\ProgramData").join(APP_DIR_NAME)
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn system_state_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from("/var/lib").join(APP_DIR_NAME)
}
