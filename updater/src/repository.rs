//! On-disk package repositories. Each package owns one directory with a
//! version directory per installed version and three symbolic links naming
//! the active (`stable`), candidate (`experiment`) and last-active
//! (`previous`) versions:
//!
//! ```text
//! <root>/<package>/
//!     stable      -> <root>/<package>/<version>
//!     experiment  -> <root>/<package>/<version>   (optional)
//!     previous    -> <root>/<package>/<version>   (optional)
//!     <version>/
//!     locks/
//! ```
//!
//! Pointer changes are atomic renames, so an external reader resolving
//! `stable` observes the old or the new version, never a missing link. Every
//! mutating operation holds an exclusive advisory file lock and starts with a
//! reconciliation sweep that removes anything a crashed predecessor left
//! behind.

use crate::defaults::STAGING_DIR_PREFIX;
use fs::directory_manager::{DirectoryManagementError, DirectoryManager, DirectoryManagerFs};
use fs::file_lock::{ExclusiveFileLock, FileLockError};
use fs::symlink_swapper::{AtomicSymlinkSwapper, SymlinkError, SymlinkSwapper};
use std::collections::HashSet;
use std::fs::{remove_file, rename};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument, warn};

const STABLE_LINK: &str = "stable";
const EXPERIMENT_LINK: &str = "experiment";
const PREVIOUS_LINK: &str = "previous";
const LOCKS_DIR: &str = "locks";
const OP_LOCK_FILE: &str = "op.lock";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("package `{0}` is already installed")]
    AlreadyInstalled(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid version `{0}`: {1}")]
    InvalidVersion(String, &'static str),

    #[error("invalid package name `{0}`")]
    InvalidPackageName(String),

    #[error("another operation holds the repository lock")]
    LockBusy,

    #[error("acquiring repository lock: {0}")]
    Lock(FileLockError),

    #[error("staging directory is not on the repository filesystem")]
    StagingNotColocated,

    #[error("directory management error: {0}")]
    Directory(#[from] DirectoryManagementError),

    #[error("symlink error: {0}")]
    Symlink(#[from] SymlinkError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// The set of package repositories under one root directory.
pub struct Repositories {
    root: PathBuf,
}

impl Repositories {
    /// Opens the repositories root, creating it if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        DirectoryManagerFs.create(&root)?;
        Ok(Self { root })
    }

    /// Staging directories must live under this root so their final rename
    /// into a package directory never crosses a filesystem boundary.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Typed accessor for one package repository. The repository directory
    /// is not required to exist yet.
    pub fn get(&self, package: &str) -> Result<Repository, RepositoryError> {
        validate_package_name(package)?;
        Ok(Repository {
            path: self.root.join(package),
            package: package.to_string(),
        })
    }

    /// First-time install of a package: imports the staged tree as `version`
    /// and points `stable` at it.
    pub fn create(
        &self,
        package: &str,
        version: &str,
        staging: &Path,
    ) -> Result<(), RepositoryError> {
        self.get(package)?.create(version, staging)
    }

    /// Startup garbage collection: sweeps every package repository and
    /// removes staging directories left behind by a crashed run. Call before
    /// issuing installs; packages whose lock is busy are skipped.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn cleanup(&self) -> Result<(), RepositoryError> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(path = %entry.path().display(), "unexpected entry in repository root");
                continue;
            };
            if name.starts_with(STAGING_DIR_PREFIX) {
                warn!(path = %entry.path().display(), "removing stale staging directory");
                DirectoryManagerFs.delete(&entry.path())?;
                continue;
            }
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(repository) = self.get(name) else {
                warn!(path = %entry.path().display(), "unexpected directory in repository root");
                continue;
            };
            match repository.lock() {
                Ok(_guard) => repository.reconcile()?,
                Err(RepositoryError::LockBusy) => {
                    debug!(package = name, "repository busy, skipping cleanup");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// One package repository. All mutating operations serialize on the
/// package's advisory file lock; reads are single `readlink` calls and may
/// run concurrently with writers.
#[derive(Debug)]
pub struct Repository {
    package: String,
    path: PathBuf,
}

impl Repository {
    pub fn name(&self) -> &str {
        &self.package
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version currently named by `stable`, if the package is installed.
    pub fn stable_version(&self) -> Result<Option<String>, RepositoryError> {
        self.link_version(STABLE_LINK)
    }

    pub fn experiment_version(&self) -> Result<Option<String>, RepositoryError> {
        self.link_version(EXPERIMENT_LINK)
    }

    pub fn previous_version(&self) -> Result<Option<String>, RepositoryError> {
        self.link_version(PREVIOUS_LINK)
    }

    fn create(&self, version: &str, staging: &Path) -> Result<(), RepositoryError> {
        validate_version(version)?;
        let _lock = self.lock()?;
        self.reconcile()?;
        if self.link_version(STABLE_LINK)?.is_some() {
            return Err(RepositoryError::AlreadyInstalled(self.package.clone()));
        }
        self.import_version(version, staging)?;
        self.swap_link(STABLE_LINK, version)?;
        debug!(package = %self.package, version, "created package repository");
        Ok(())
    }

    /// Stages `version` as the experiment. Setting the version that is
    /// already the experiment is a no-op; the staged tree is discarded.
    pub fn set_experiment(&self, version: &str, staging: &Path) -> Result<(), RepositoryError> {
        validate_version(version)?;
        let _lock = self.lock()?;
        self.reconcile()?;
        let stable = self.link_version(STABLE_LINK)?.ok_or_else(|| {
            RepositoryError::InvalidState("no stable version is installed".to_string())
        })?;
        if stable == version {
            return Err(RepositoryError::InvalidVersion(
                version.to_string(),
                "version is already the stable version",
            ));
        }
        let displaced = self.link_version(EXPERIMENT_LINK)?;
        if displaced.as_deref() == Some(version) {
            debug!(package = %self.package, version, "experiment already set");
            DirectoryManagerFs.delete(staging)?;
            return Ok(());
        }
        self.import_version(version, staging)?;
        self.swap_link(EXPERIMENT_LINK, version)?;
        // Retrying the version `previous` names hands its directory over to
        // the experiment pointer. The links alias until the removal below so
        // the directory is referenced at every intermediate state; the sweep
        // completes the handoff if a crash lands in between.
        if self.link_version(PREVIOUS_LINK)?.as_deref() == Some(version) {
            remove_file(self.path.join(PREVIOUS_LINK))?;
        }
        if let Some(displaced) = displaced {
            self.delete_version_if_unreferenced(&displaced)?;
        }
        debug!(package = %self.package, version, "experiment set");
        Ok(())
    }

    /// Makes the current experiment the new stable. Pointers move in an
    /// order (`previous`, then `stable`, then dropping `experiment`) that
    /// keeps a valid stable at every intermediate state.
    pub fn promote_experiment(&self) -> Result<(), RepositoryError> {
        let _lock = self.lock()?;
        self.reconcile()?;
        let stable = self.link_version(STABLE_LINK)?.ok_or_else(|| {
            RepositoryError::InvalidState("no stable version is installed".to_string())
        })?;
        let experiment = self.link_version(EXPERIMENT_LINK)?.ok_or_else(|| {
            RepositoryError::InvalidState("no experiment version to promote".to_string())
        })?;
        self.swap_link(PREVIOUS_LINK, &stable)?;
        self.swap_link(STABLE_LINK, &experiment)?;
        remove_file(self.path.join(EXPERIMENT_LINK))?;
        self.gc_unreferenced()?;
        debug!(
            package = %self.package,
            stable = %experiment,
            previous = %stable,
            "experiment promoted"
        );
        Ok(())
    }

    /// Abandons the experiment, if any. Idempotent.
    pub fn delete_experiment(&self) -> Result<(), RepositoryError> {
        let _lock = self.lock()?;
        self.reconcile()?;
        let Some(experiment) = self.link_version(EXPERIMENT_LINK)? else {
            return Ok(());
        };
        remove_file(self.path.join(EXPERIMENT_LINK))?;
        self.delete_version_if_unreferenced(&experiment)?;
        debug!(
            package = %self.package,
            version = %experiment,
            "experiment deleted"
        );
        Ok(())
    }

    /// Reverts `stable` to the version named by `previous`.
    pub fn rollback(&self) -> Result<(), RepositoryError> {
        let _lock = self.lock()?;
        self.reconcile()?;
        let previous = self.link_version(PREVIOUS_LINK)?.ok_or_else(|| {
            RepositoryError::InvalidState("no previous version to roll back to".to_string())
        })?;
        self.swap_link(STABLE_LINK, &previous)?;
        remove_file(self.path.join(PREVIOUS_LINK))?;
        self.gc_unreferenced()?;
        debug!(package = %self.package, stable = %previous, "rolled back");
        Ok(())
    }

    fn lock(&self) -> Result<ExclusiveFileLock, RepositoryError> {
        let locks = self.path.join(LOCKS_DIR);
        DirectoryManagerFs.create(&locks)?;
        ExclusiveFileLock::acquire(&locks.join(OP_LOCK_FILE)).map_err(|e| match e {
            FileLockError::Busy(_) => RepositoryError::LockBusy,
            other => RepositoryError::Lock(other),
        })
    }

    fn link_version(&self, link: &str) -> Result<Option<String>, RepositoryError> {
        let target = AtomicSymlinkSwapper.read_target(&self.path.join(link))?;
        Ok(target
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned()))
    }

    /// Moves the staged tree into place as the `version` directory. Version
    /// directories are immutable: if one already exists the staged tree is
    /// discarded. An empty staged tree is rejected; an image with no payload
    /// ends up here, not as an installed version.
    fn import_version(&self, version: &str, staging: &Path) -> Result<(), RepositoryError> {
        let dest = self.path.join(version);
        if dest.exists() {
            DirectoryManagerFs.delete(staging)?;
            return Ok(());
        }
        if std::fs::read_dir(staging)?.next().is_none() {
            return Err(RepositoryError::InvalidState(
                "staging directory is empty".to_string(),
            ));
        }
        rename(staging, &dest).map_err(|e| {
            if e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32) {
                RepositoryError::StagingNotColocated
            } else {
                RepositoryError::Io(e)
            }
        })
    }

    fn swap_link(&self, link: &str, version: &str) -> Result<(), RepositoryError> {
        AtomicSymlinkSwapper.swap(&self.path.join(version), &self.path.join(link))?;
        Ok(())
    }

    fn referenced_versions(&self) -> Result<HashSet<String>, RepositoryError> {
        let mut referenced = HashSet::new();
        for link in [STABLE_LINK, EXPERIMENT_LINK, PREVIOUS_LINK] {
            if let Some(version) = self.link_version(link)? {
                referenced.insert(version);
            }
        }
        Ok(referenced)
    }

    fn delete_version_if_unreferenced(&self, version: &str) -> Result<(), RepositoryError> {
        if self.referenced_versions()?.contains(version) {
            return Ok(());
        }
        debug!(
            package = %self.package,
            version, "garbage collecting version directory"
        );
        DirectoryManagerFs.delete(&self.path.join(version))?;
        Ok(())
    }

    /// Crash recovery, run under the lock before every transition. Repairs
    /// pointer duplicates an interrupted promote can leave, then removes
    /// version directories referenced by no pointer and stale swap links.
    fn reconcile(&self) -> Result<(), RepositoryError> {
        let stable = self.link_version(STABLE_LINK)?;
        if stable.is_some() {
            if self.link_version(PREVIOUS_LINK)? == stable {
                remove_file(self.path.join(PREVIOUS_LINK))?;
            }
            if self.link_version(EXPERIMENT_LINK)? == stable {
                remove_file(self.path.join(EXPERIMENT_LINK))?;
            }
        }
        // `previous` aliasing the experiment is an interrupted handoff of the
        // previous version's directory to the experiment pointer; dropping
        // `previous` completes it.
        let experiment = self.link_version(EXPERIMENT_LINK)?;
        if experiment.is_some() && self.link_version(PREVIOUS_LINK)? == experiment {
            remove_file(self.path.join(PREVIOUS_LINK))?;
        }
        self.gc_unreferenced()
    }

    fn gc_unreferenced(&self) -> Result<(), RepositoryError> {
        let referenced = self.referenced_versions()?;
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if matches!(name, STABLE_LINK | EXPERIMENT_LINK | PREVIOUS_LINK | LOCKS_DIR) {
                continue;
            }
            if name.starts_with('.') {
                // Swap links left by an interrupted pointer change.
                if entry.file_type()?.is_symlink() {
                    remove_file(entry.path())?;
                }
                continue;
            }
            if entry.file_type()?.is_dir() && !referenced.contains(name) {
                debug!(
                    package = %self.package,
                    version = name,
                    "garbage collecting orphaned version directory"
                );
                DirectoryManagerFs.delete(&entry.path())?;
            }
        }
        Ok(())
    }
}

fn validate_package_name(package: &str) -> Result<(), RepositoryError> {
    let invalid = package.is_empty()
        || package.starts_with('.')
        || package.contains(['/', '\0'])
        || matches!(package, STABLE_LINK | EXPERIMENT_LINK | PREVIOUS_LINK | LOCKS_DIR);
    if invalid {
        return Err(RepositoryError::InvalidPackageName(package.to_string()));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<(), RepositoryError> {
    if version.is_empty() {
        return Err(RepositoryError::InvalidVersion(
            version.to_string(),
            "version is empty",
        ));
    }
    if version.starts_with('.') || version.contains(['/', '\0']) {
        return Err(RepositoryError::InvalidVersion(
            version.to_string(),
            "version is not a valid directory name",
        ));
    }
    if matches!(
        version,
        STABLE_LINK | EXPERIMENT_LINK | PREVIOUS_LINK | LOCKS_DIR
    ) {
        return Err(RepositoryError::InvalidVersion(
            version.to_string(),
            "version name is reserved",
        ));
    }
    Ok(())
}
