use std::fs::{remove_file, rename};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum SymlinkError {
    #[error("symlink `{0}` has no parent directory")]
    NoParent(String),

    #[error("symlink name `{0}` is not valid")]
    InvalidName(String),

    #[error("cannot replace symlink `{0}`: {1}")]
    Replace(String, io::Error),

    #[error("cannot read symlink `{0}`: {1}")]
    Read(String, io::Error),
}

/// Replaces and inspects symbolic links without ever exposing a state where
/// the link name is absent.
pub trait SymlinkSwapper {
    /// Points `link` at `target`, atomically replacing any previous link.
    fn swap(&self, target: &Path, link: &Path) -> Result<(), SymlinkError>;

    /// Returns the target of `link`, or `None` if the link does not exist.
    fn read_target(&self, link: &Path) -> Result<Option<PathBuf>, SymlinkError>;
}

/// Swaps links with a `rename(2)` over a temporary sibling link. The rename
/// is atomic at the name level, so concurrent readers resolve either the old
/// or the new target.
pub struct AtomicSymlinkSwapper;

impl AtomicSymlinkSwapper {
    /// Name of the temporary sibling link used during a swap of `link_name`.
    /// Exposed so sweepers can recognize remnants of an interrupted swap.
    pub fn swap_file_name(link_name: &str) -> String {
        format!(".{link_name}.swap")
    }
}

impl SymlinkSwapper for AtomicSymlinkSwapper {
    #[instrument(skip_all, fields(link = %link.display(), target = %target.display()))]
    fn swap(&self, target: &Path, link: &Path) -> Result<(), SymlinkError> {
        let parent = link
            .parent()
            .ok_or_else(|| SymlinkError::NoParent(link.display().to_string()))?;
        let name = link
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SymlinkError::InvalidName(link.display().to_string()))?;

        let staged = parent.join(Self::swap_file_name(name));
        let replace_err = |e| SymlinkError::Replace(link.display().to_string(), e);

        // A leftover staged link from an interrupted swap is replaced.
        match remove_file(&staged) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(replace_err(e)),
        }
        #[cfg(target_family = "unix")]
        std::os::unix::fs::symlink(target, &staged).map_err(replace_err)?;
        #[cfg(target_family = "windows")]
        std::os::windows::fs::symlink_dir(target, &staged).map_err(replace_err)?;

        rename(&staged, link).map_err(replace_err)
    }

    fn read_target(&self, link: &Path) -> Result<Option<PathBuf>, SymlinkError> {
        match link.read_link() {
            Ok(target) => Ok(Some(target)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SymlinkError::Read(link.display().to_string(), e)),
        }
    }
}
