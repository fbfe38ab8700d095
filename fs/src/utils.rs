use std::fs::Permissions;
#[cfg(target_family = "unix")]
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("invalid path: `{0}`")]
    InvalidPath(String),

    #[error("parent directory references disallowed in path `{0}`")]
    ParentDirDisallowed(String),
}

/// Rejects paths that are not valid unicode or that contain `..` components.
pub fn validate_path(path: &Path) -> Result<(), FsError> {
    if path.to_str().is_none() {
        return Err(FsError::InvalidPath(format!(
            "{} is not valid unicode",
            path.to_string_lossy()
        )));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(FsError::ParentDirDisallowed(
            path.to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

/// Installed package trees must be traversable by the service user, not only
/// by the updater.
#[cfg(target_family = "unix")]
pub fn package_directory_permissions() -> Permissions {
    Permissions::from_mode(0o755)
}

#[cfg(target_family = "unix")]
pub fn lock_file_permissions() -> Permissions {
    Permissions::from_mode(0o644)
}

#[cfg(target_family = "windows")]
pub fn package_directory_permissions() -> Permissions {
    unimplemented!()
}

#[cfg(target_family = "windows")]
pub fn lock_file_permissions() -> Permissions {
    unimplemented!()
}
