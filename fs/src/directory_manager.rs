use super::utils::{validate_path, FsError};
use std::fs::{remove_dir_all, DirBuilder};
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DirectoryManagementError {
    #[error("cannot create directory `{0}`: {1}")]
    Create(String, io::Error),

    #[error("cannot delete directory `{0}`: {1}")]
    Delete(String, io::Error),

    #[error("invalid directory: {0}")]
    InvalidDirectory(#[from] FsError),
}

pub trait DirectoryManager {
    /// Creates the directory and any missing parents.
    fn create(&self, path: &Path) -> Result<(), DirectoryManagementError>;

    /// Deletes the directory and its contents. A missing directory is not an
    /// error.
    fn delete(&self, path: &Path) -> Result<(), DirectoryManagementError>;
}

pub struct DirectoryManagerFs;

impl DirectoryManager for DirectoryManagerFs {
    fn create(&self, path: &Path) -> Result<(), DirectoryManagementError> {
        validate_path(path)?;
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(target_family = "unix")]
        {
            use std::os::unix::fs::DirBuilderExt;
            use std::os::unix::fs::PermissionsExt;
            builder.mode(crate::utils::package_directory_permissions().mode());
        }
        builder
            .create(path)
            .map_err(|e| DirectoryManagementError::Create(path.display().to_string(), e))
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn delete(&self, path: &Path) -> Result<(), DirectoryManagementError> {
        validate_path(path)?;
        if !path.exists() {
            return Ok(());
        }
        remove_dir_all(path)
            .map_err(|e| DirectoryManagementError::Delete(path.display().to_string(), e))
    }
}
