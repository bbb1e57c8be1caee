//! Install, repair and remove workflows.
//!
//! Every workflow runs the same sequence of steps, skipping the ones its
//! action does not need:
//!
//! 1. check dependents (repair, remove)
//! 2. read the previous manifest and snapshot reference counts
//! 3. extract (install, repair)
//! 4. remove orphaned files (repair, remove)
//! 5. delete or write the manifest and registry records
//!
//! Nothing is changed on disk or in the registry before step 3.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::archive::{ExtractionEvents, Extractor, entry_destination};
use crate::error::{LifecycleError, Result};
use crate::interrupt::Interrupt;
use crate::manifest::{GlobalRefCounter, ManifestReader, ManifestWriter, manifest_path, read_manifest};
use crate::product::ProductId;
use crate::progress::{PhaseHandle, PhasedProgress, Processing, ProgressSink};
use crate::registry::locations::{
    UninstallEntry, delete_uninstall_entry, read_install_dir, read_manifest_path,
    write_uninstall_entry,
};
use crate::registry::{DependencyRegistry, InstallScope, RegistryError, RegistryStore, ScopedRegistry};
use crate::removal::{RemovalOptions, RemovalScheduler};
use crate::runtime::{Runtime, normalize_path, path_key};

const WEIGHT_REGISTRY: u64 = 1;
const WEIGHT_READ_LISTS: u64 = 2;
const WEIGHT_EXTRACT: u64 = 100;
const WEIGHT_REMOVE_FILES: u64 = 100;
const WEIGHT_REMOVE_FLUSH: u64 = 5;
const WEIGHT_REMOVE_CLEANUP: u64 = 1;
const WEIGHT_WRITE_LIST: u64 = 1;
const WEIGHT_FINISH: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Repair,
    Remove,
}

impl Action {
    pub fn extracts(self) -> bool {
        matches!(self, Action::Install | Action::Repair)
    }

    pub fn removes(self) -> bool {
        matches!(self, Action::Repair | Action::Remove)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Install => f.write_str("install"),
            Action::Repair => f.write_str("repair"),
            Action::Remove => f.write_str("remove"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleOptions {
    /// Destination of the extracted files
    pub output_dir: Option<PathBuf>,
    pub archives: Vec<PathBuf>,
    /// Manifest-format list of generated files, relative to the output directory
    pub artifacts: Option<PathBuf>,
    pub ignore_dependents: bool,
    pub mark_for_reboot: bool,
    pub skip_global_refcount: bool,
    pub remove_output_dir: bool,
    pub require_list: bool,
}

/// Values resolved once per process and shared by every step.
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    pub scope: InstallScope,
    pub manifest_dir: PathBuf,
    pub interrupt: Interrupt,
}

/// What a finished workflow did.
#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub install_dir: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub extracted: usize,
    pub removed: usize,
    /// Orphans kept because another product still lists them
    pub kept_shared: usize,
    pub pending_reboot: Vec<PathBuf>,
}

struct Phases {
    registry: PhaseHandle,
    read_lists: PhaseHandle,
    extract: PhaseHandle,
    remove_files: PhaseHandle,
    remove_flush: PhaseHandle,
    remove_cleanup: PhaseHandle,
    write_list: PhaseHandle,
    finish: PhaseHandle,
}

impl Phases {
    fn plan(progress: &mut PhasedProgress<'_>, action: Action) -> Self {
        let removing = |weight| if action.removes() { weight } else { 0 };
        let extracting = |weight| if action.extracts() { weight } else { 0 };
        Self {
            registry: progress.add_phase(removing(WEIGHT_REGISTRY)),
            read_lists: progress.add_phase(WEIGHT_READ_LISTS),
            extract: progress.add_phase(extracting(WEIGHT_EXTRACT)),
            remove_files: progress.add_phase(removing(WEIGHT_REMOVE_FILES)),
            remove_flush: progress.add_phase(removing(WEIGHT_REMOVE_FLUSH)),
            remove_cleanup: progress.add_phase(removing(WEIGHT_REMOVE_CLEANUP)),
            write_list: progress.add_phase(extracting(WEIGHT_WRITE_LIST)),
            finish: progress.add_phase(extracting(WEIGHT_FINISH)),
        }
    }
}

struct OutputDirs {
    target: Option<PathBuf>,
    recorded: Option<PathBuf>,
}

struct PreviousManifest {
    path: PathBuf,
    files: Vec<PathBuf>,
}

/// Turns extraction events into the ordered list of extracted paths.
pub(crate) struct ExtractionRecorder<'p> {
    progress: &'p mut dyn ProgressSink,
    files: Vec<PathBuf>,
    seen: HashSet<String>,
}

impl<'p> ExtractionRecorder<'p> {
    pub(crate) fn new(progress: &'p mut dyn ProgressSink) -> Self {
        Self {
            progress,
            files: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub(crate) fn into_files(self) -> Vec<PathBuf> {
        self.files
    }
}

impl ExtractionEvents for ExtractionRecorder<'_> {
    fn set_total(&mut self, total: u64) {
        self.progress.set_total(total);
    }

    fn set_completed(&mut self, completed: u64) -> Processing {
        self.progress.set_completed(completed)
    }

    fn entry_extracted(&mut self, path: &Path) {
        let normalized = normalize_path(path);
        if self.seen.insert(path_key(&normalized)) {
            self.files.push(normalized);
        }
    }
}

fn cancelled_if(processing: Processing) -> Result<()> {
    match processing {
        Processing::Continue => Ok(()),
        Processing::Cancel => Err(LifecycleError::Cancelled),
    }
}

/// Normalize and drop repeated entries, keeping the first occurrence.
fn unique_paths(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .map(|path| normalize_path(&path))
        .filter(|path| seen.insert(path_key(path)))
        .collect()
}

pub struct LifecycleOrchestrator<'a, R: Runtime, E: Extractor> {
    runtime: &'a R,
    registry: &'a ScopedRegistry<'a>,
    extractor: &'a E,
    context: LifecycleContext,
}

impl<'a, R: Runtime, E: Extractor> LifecycleOrchestrator<'a, R, E> {
    pub fn new(
        runtime: &'a R,
        registry: &'a ScopedRegistry<'a>,
        extractor: &'a E,
        context: LifecycleContext,
    ) -> Self {
        Self {
            runtime,
            registry,
            extractor,
            context,
        }
    }

    pub fn install(
        &self,
        id: &ProductId,
        options: &LifecycleOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<LifecycleReport> {
        self.run(Action::Install, id, options, progress)
    }

    pub fn repair(
        &self,
        id: &ProductId,
        options: &LifecycleOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<LifecycleReport> {
        self.run(Action::Repair, id, options, progress)
    }

    pub fn remove(
        &self,
        id: &ProductId,
        options: &LifecycleOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<LifecycleReport> {
        self.run(Action::Remove, id, options, progress)
    }

    #[tracing::instrument(skip(self, options, progress), fields(id = %id))]
    pub fn run(
        &self,
        action: Action,
        id: &ProductId,
        options: &LifecycleOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<LifecycleReport> {
        info!("Starting {} of {} ({} scope)", action, id, self.context.scope);
        Self::validate(action, options)?;

        let store = self.registry.root(self.context.scope);
        let dirs = self.resolve_output_dirs(action, id, options, &store)?;

        let mut progress = PhasedProgress::new(progress, self.context.interrupt.clone());
        let phases = Phases::plan(&mut progress, action);
        let mut report = LifecycleReport {
            install_dir: dirs.target.clone().or_else(|| dirs.recorded.clone()),
            ..Default::default()
        };

        if action.removes() {
            let mut phase = progress.phase(phases.registry);
            phase.set_total(1);
            self.check_dependents(&store, id, options)?;
            cancelled_if(phase.set_completed(1))?;
        }

        let (counter, previous) = {
            let mut phase = progress.phase(phases.read_lists);
            phase.set_total(2);
            let mut counter = (action.removes() && !options.skip_global_refcount)
                .then(|| GlobalRefCounter::build(self.runtime, &self.context.manifest_dir));
            cancelled_if(phase.set_completed(1))?;

            let previous = self.load_previous(action, id, options, &store)?;
            if let (Some(counter), Some(previous)) = (counter.as_mut(), previous.as_ref()) {
                self.count_own_manifest(counter, &previous.path);
            }
            cancelled_if(phase.set_completed(2))?;
            (counter, previous)
        };
        let previous_files = previous
            .as_ref()
            .map(|previous| previous.files.clone())
            .unwrap_or_default();

        let mut new_files = Vec::new();
        if let (true, Some(target)) = (action.extracts(), dirs.target.as_deref()) {
            let mut phase = progress.phase(phases.extract);
            let mut recorder = ExtractionRecorder::new(&mut phase);
            self.extractor
                .extract(&options.archives, target, &mut recorder)?;
            new_files = recorder.into_files();
            report.extracted = new_files.len();
            info!("Extracted {} entries to {}", new_files.len(), target.display());

            if let Some(artifacts) = &options.artifacts {
                new_files = unique_paths(new_files.into_iter().chain(self.read_artifacts(artifacts, target)));
            }
        }

        let new_keys: HashSet<String> = new_files.iter().map(|path| path_key(path)).collect();
        let orphans: Vec<PathBuf> = previous_files
            .into_iter()
            .filter(|path| !new_keys.contains(&path_key(path)))
            .collect();

        let mut surviving = orphans.clone();
        let mut removal_failure = None;
        if action.removes() {
            let mut counter = counter;
            let mut scheduler = RemovalScheduler::new(
                self.runtime,
                RemovalOptions {
                    mark_for_reboot: options.mark_for_reboot,
                },
            );

            let mut scheduled = Vec::with_capacity(orphans.len());
            {
                let mut phase = progress.phase(phases.remove_files);
                phase.set_total(orphans.len() as u64);
                for (done, orphan) in orphans.iter().enumerate() {
                    let owned_elsewhere = counter
                        .as_mut()
                        .is_some_and(|counter| counter.dec_file_ref(orphan) > 0);
                    if owned_elsewhere {
                        debug!("{} is still used by another product", orphan.display());
                        report.kept_shared += 1;
                    } else {
                        scheduler.schedule_remove(orphan);
                        scheduled.push(orphan.clone());
                    }
                    cancelled_if(phase.set_completed(done as u64 + 1))?;
                }
            }

            if let Some(old_dir) = Self::output_dir_to_remove(action, &dirs, options) {
                info!("Removing output directory {}", old_dir.display());
                scheduler.schedule_remove(&old_dir);
            }

            {
                let mut phase = progress.phase(phases.remove_flush);
                cancelled_if(scheduler.flush_delayed(&mut phase))?;
            }

            let deleted = scheduler.really_deleted();
            surviving = scheduled
                .into_iter()
                .filter(|path| !deleted.contains(&path_key(path)))
                .collect();
            report.removed = orphans.len() - report.kept_shared - surviving.len();
            report.pending_reboot = scheduler.pending_reboot().to_vec();
            removal_failure = scheduler.take_failure();
            if !surviving.is_empty() {
                warn!("{} file(s) could not be removed", surviving.len());
            }
        }

        let mut registry_failure = None;
        if action.removes() {
            let mut phase = progress.phase(phases.remove_cleanup);
            phase.set_total(2);
            if action == Action::Remove {
                if let Some(previous) = &previous {
                    self.delete_manifest_file(&previous.path);
                }
                phase.set_completed(1);
                registry_failure = self.delete_registry_entries(&store, id);
            }
            phase.set_completed(2);
        }

        if let (true, Some(target)) = (action.extracts(), dirs.target.as_deref()) {
            let path = manifest_path(&self.context.manifest_dir, id);
            let manifest_error =
                |e| LifecycleError::io(format!("Failed to write manifest {}", path.display()), e);

            let mut phase = progress.phase(phases.write_list);
            phase.set_total(1);
            let mut writer = ManifestWriter::create(self.runtime, &path).map_err(manifest_error)?;
            writer
                .add_entries(new_files.iter().chain(surviving.iter()))
                .map_err(manifest_error)?;
            writer.flush().map_err(manifest_error)?;
            phase.set_completed(1);

            let mut phase = progress.phase(phases.finish);
            phase.set_total(1);
            let entry = UninstallEntry {
                manifest_path: path.clone(),
                install_dir: target.to_path_buf(),
            };
            let recorded = write_uninstall_entry(&store, id, &entry)
                .and_then(|()| DependencyRegistry::new(&store).create_entry(id));
            if let Err(source) = recorded {
                writer.discard();
                return Err(LifecycleError::Partial {
                    message: format!(
                        "Files in {} were updated but {} could not be registered",
                        target.display(),
                        id
                    ),
                    source,
                });
            }
            writer.commit().map_err(manifest_error)?;
            phase.set_completed(1);

            if let Some(previous) = &previous
                && path_key(&previous.path) != path_key(&path)
            {
                self.delete_manifest_file(&previous.path);
            }
            report.manifest_path = Some(path);
        }

        if let Some(failure) = removal_failure {
            return Err(LifecycleError::io(
                format!("Failed to remove {}", failure.path.display()),
                failure.source,
            ));
        }
        if let Some(err) = registry_failure {
            return Err(err);
        }

        info!("Finished {} of {}", action, id);
        Ok(report)
    }

    fn validate(action: Action, options: &LifecycleOptions) -> Result<()> {
        if action.extracts() && options.archives.is_empty() {
            return Err(LifecycleError::Argument(format!(
                "At least one archive is required to {}",
                action
            )));
        }
        if action == Action::Install && options.output_dir.is_none() {
            return Err(LifecycleError::Argument(
                "An output directory is required to install".into(),
            ));
        }
        Ok(())
    }

    fn absolute(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            return Ok(normalize_path(path));
        }
        let cwd = self
            .runtime
            .current_dir()
            .map_err(|e| LifecycleError::io("Failed to get current directory", e))?;
        Ok(normalize_path(&cwd.join(path)))
    }

    fn resolve_output_dirs(
        &self,
        action: Action,
        id: &ProductId,
        options: &LifecycleOptions,
        store: &dyn RegistryStore,
    ) -> Result<OutputDirs> {
        let requested = match options.output_dir.as_deref() {
            Some(dir) => Some(self.absolute(dir)?),
            None => None,
        };

        let recorded = if action == Action::Install {
            None
        } else {
            match read_install_dir(store, id) {
                Ok(dir) => Some(normalize_path(&dir)),
                Err(e) if e.is_not_found() => None,
                Err(e) => {
                    warn!("Failed to read install directory of {}: {}", id, e);
                    None
                }
            }
        };

        let target = match action {
            Action::Install => requested,
            Action::Repair => requested.or_else(|| recorded.clone()),
            Action::Remove => recorded.clone(),
        };

        match (&target, action) {
            (None, Action::Repair) => Err(LifecycleError::Argument(format!(
                "No installation directory recorded for {}; pass an output directory",
                id
            ))),
            (None, Action::Remove) => {
                warn!("No installation directory recorded for {}", id);
                Ok(OutputDirs { target, recorded })
            }
            _ => Ok(OutputDirs { target, recorded }),
        }
    }

    /// The directory `--remove-output-dir` applies to, if any.
    fn output_dir_to_remove(
        action: Action,
        dirs: &OutputDirs,
        options: &LifecycleOptions,
    ) -> Option<PathBuf> {
        if !options.remove_output_dir {
            return None;
        }
        let recorded = dirs.recorded.as_ref()?;
        match (action, dirs.target.as_ref()) {
            (Action::Remove, _) => Some(recorded.clone()),
            (Action::Repair, Some(target)) if path_key(target) != path_key(recorded) => {
                Some(recorded.clone())
            }
            _ => None,
        }
    }

    fn check_dependents(
        &self,
        store: &dyn RegistryStore,
        id: &ProductId,
        options: &LifecycleOptions,
    ) -> Result<()> {
        if options.ignore_dependents {
            debug!("Ignoring dependents of {}", id);
            return Ok(());
        }
        let count = match DependencyRegistry::new(store).has_dependents(id) {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to check dependents of {}: {}", id, e);
                0
            }
        };
        if count > 0 {
            return Err(LifecycleError::DependencyBlocked {
                id: id.to_string(),
                count,
            });
        }
        Ok(())
    }

    fn load_previous(
        &self,
        action: Action,
        id: &ProductId,
        options: &LifecycleOptions,
        store: &dyn RegistryStore,
    ) -> Result<Option<PreviousManifest>> {
        let path = match read_manifest_path(store, id) {
            Ok(path) => path,
            Err(e) => {
                debug!("No manifest recorded for {}: {}", id, e);
                manifest_path(&self.context.manifest_dir, id)
            }
        };

        match read_manifest(self.runtime, &path) {
            Ok(files) => {
                debug!("Read {} entries from {}", files.len(), path.display());
                Ok(Some(PreviousManifest {
                    path,
                    files: unique_paths(files),
                }))
            }
            Err(e) => match action {
                Action::Install => {
                    debug!("No previous manifest at {}: {}", path.display(), e);
                    Ok(None)
                }
                Action::Remove if options.require_list => Err(LifecycleError::io(
                    format!("Failed to read manifest {}", path.display()),
                    e,
                )),
                Action::Repair | Action::Remove => {
                    warn!("Failed to read manifest {}: {}", path.display(), e);
                    Ok(None)
                }
            },
        }
    }

    /// Make sure the product's own manifest is part of the reference counts,
    /// even when it lives outside the manifest directory.
    fn count_own_manifest(&self, counter: &mut GlobalRefCounter, manifest: &Path) {
        let in_manifest_dir = manifest
            .parent()
            .is_some_and(|parent| path_key(parent) == path_key(&self.context.manifest_dir));
        if in_manifest_dir {
            return;
        }
        if let Err(e) = counter.add_manifest(self.runtime, manifest) {
            warn!("Failed to count {}: {}", manifest.display(), e);
        }
    }

    fn read_artifacts(&self, artifacts: &Path, target: &Path) -> Vec<PathBuf> {
        let reader = match ManifestReader::open(self.runtime, artifacts) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Failed to read artifacts list {}: {}", artifacts.display(), e);
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for entry in reader {
            match entry {
                Ok(entry) => match entry_destination(target, &entry) {
                    Ok(Some(path)) => entries.push(normalize_path(&path)),
                    Ok(None) => {}
                    Err(_) => warn!(
                        "Skipping artifact {} outside {}",
                        entry.display(),
                        target.display()
                    ),
                },
                Err(e) => {
                    warn!("Failed to read artifacts list {}: {}", artifacts.display(), e);
                    break;
                }
            }
        }
        debug!("Tracking {} artifact(s)", entries.len());
        entries
    }

    fn delete_manifest_file(&self, path: &Path) {
        match self.runtime.remove_file(path) {
            Ok(()) => debug!("Deleted manifest {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete manifest {}: {}", path.display(), e),
        }
    }

    fn delete_registry_entries(
        &self,
        store: &dyn RegistryStore,
        id: &ProductId,
    ) -> Option<LifecycleError> {
        let results: [(&str, std::result::Result<(), RegistryError>); 2] = [
            ("dependency", DependencyRegistry::new(store).delete_entry(id)),
            ("uninstall", delete_uninstall_entry(store, id)),
        ];

        let mut failure = None;
        for (what, result) in results {
            match result {
                Ok(()) => debug!("Deleted {} entry of {}", what, id),
                Err(e) if e.is_not_found() => debug!("No {} entry for {}", what, id),
                Err(e) => {
                    warn!("Failed to delete {} entry of {}: {}", what, id, e);
                    failure.get_or_insert(e);
                }
            }
        }

        failure.map(|source| LifecycleError::Partial {
            message: format!("Files of {} were removed but its registry entries remain", id),
            source,
        })
    }
}
