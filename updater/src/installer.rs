//! Top-level install transactions. Every operation either fully succeeds or
//! leaves the repository unchanged: downloads and extraction run against a
//! scratch staging directory before the repository lock is ever taken, and
//! the staged tree is deleted on any failure.

use crate::catalog::{CatalogClient, CatalogError, Package};
use crate::defaults::STAGING_DIR_PREFIX;
use crate::package::downloader::{DownloadError, ImageDownloader};
use crate::package::extract::{extract_package_layers, ExtractError};
use crate::repository::{Repositories, RepositoryError};
use crate::utils::cancellation::CancellationToken;
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("download: {0}")]
    Download(#[from] DownloadError),

    #[error("extract: {0}")]
    Extract(#[from] ExtractError),

    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error("creating staging directory: {0}")]
    Staging(std::io::Error),
}

/// Orchestrates package installs: catalog lookup, image fetch, extraction
/// into staging, repository transition. Operations on distinct packages may
/// run in parallel; operations on one package serialize on the repository's
/// file lock.
pub struct Installer<D: ImageDownloader> {
    repositories: Repositories,
    catalog: Arc<CatalogClient>,
    downloader: D,
}

impl<D: ImageDownloader> Installer<D> {
    pub fn new(repositories: Repositories, catalog: Arc<CatalogClient>, downloader: D) -> Self {
        Self {
            repositories,
            catalog,
            downloader,
        }
    }

    /// First-time install of `package` at `version` into the stable slot.
    #[instrument(skip(self, cancellation))]
    pub fn install_stable(
        &self,
        cancellation: &CancellationToken,
        package: &str,
        version: &str,
    ) -> Result<(), InstallerError> {
        let entry = self.catalog.get_package(cancellation, package, version)?;
        let staging = self.stage(&entry)?;
        self.repositories.create(package, version, staging.path())?;
        info!(package, version, "installed stable version");
        Ok(())
    }

    /// Installs `version` into the experiment slot of an installed package.
    #[instrument(skip(self, cancellation))]
    pub fn install_experiment(
        &self,
        cancellation: &CancellationToken,
        package: &str,
        version: &str,
    ) -> Result<(), InstallerError> {
        let entry = self.catalog.get_package(cancellation, package, version)?;
        let staging = self.stage(&entry)?;
        self.repositories
            .get(package)?
            .set_experiment(version, staging.path())?;
        info!(package, version, "installed experiment version");
        Ok(())
    }

    /// Promotes the running experiment to stable. No download is involved.
    #[instrument(skip(self))]
    pub fn promote_experiment(&self, package: &str) -> Result<(), InstallerError> {
        self.repositories.get(package)?.promote_experiment()?;
        info!(package, "promoted experiment");
        Ok(())
    }

    /// Abandons the running experiment. No download is involved.
    #[instrument(skip(self))]
    pub fn uninstall_experiment(&self, package: &str) -> Result<(), InstallerError> {
        self.repositories.get(package)?.delete_experiment()?;
        info!(package, "uninstalled experiment");
        Ok(())
    }

    /// Reverts stable to the previous version.
    #[instrument(skip(self))]
    pub fn rollback(&self, package: &str) -> Result<(), InstallerError> {
        self.repositories.get(package)?.rollback()?;
        info!(package, "rolled back to previous version");
        Ok(())
    }

    /// Installs the default version of every package that has no stable
    /// version yet. Blocks until the catalog has been received.
    pub fn bootstrap_defaults(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<(), InstallerError> {
        let mut defaults: Vec<(&String, &String)> = self.catalog.default_versions().iter().collect();
        defaults.sort();
        for (package, version) in defaults {
            if self.repositories.get(package)?.stable_version()?.is_some() {
                debug!(package = %package, "package already installed, skipping bootstrap");
                continue;
            }
            self.install_stable(cancellation, package, version)?;
        }
        Ok(())
    }

    /// Fetches and verifies the image, then extracts its payload into a
    /// fresh staging directory on the repository filesystem. The directory is
    /// deleted on drop unless a repository transition moved it into place.
    fn stage(&self, entry: &Package) -> Result<TempDir, InstallerError> {
        let image = self.downloader.fetch(entry)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_DIR_PREFIX)
            .tempdir_in(self.repositories.root())
            .map_err(InstallerError::Staging)?;
        extract_package_layers(&image, staging.path())?;
        Ok(staging)
    }
}
