use crate::defaults::{PACKAGE_LAYER_MEDIA_TYPE, PACKAGE_MAX_SIZE};
use crate::package::image::PackageImage;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::EntryType;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("package payload exceeds the {0} byte budget")]
    PayloadTooLarge(u64),

    #[error("malicious package payload: {0}")]
    PayloadMalicious(String),

    #[error("reading payload layer: {0}")]
    Layer(#[from] std::io::Error),
}

/// Extracts every package-payload layer of `image` into `dir`.
///
/// Layers whose media type is not [`PACKAGE_LAYER_MEDIA_TYPE`] are ignored,
/// and an image without any payload layer extracts to nothing. The
/// uncompressed payload is bounded by [`PACKAGE_MAX_SIZE`] across all layers.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn extract_package_layers(image: &PackageImage, dir: &Path) -> Result<(), ExtractError> {
    let mut budget = PACKAGE_MAX_SIZE;
    for layer in image.layers() {
        if layer.media_type() != PACKAGE_LAYER_MEDIA_TYPE {
            debug!(
                media_type = layer.media_type(),
                "skipping non-payload layer"
            );
            continue;
        }
        extract_tar(layer.uncompressed()?, dir, &mut budget)?;
    }
    Ok(())
}

fn extract_tar(reader: impl Read, dir: &Path, budget: &mut u64) -> Result<(), ExtractError> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;

        let size = entry.header().size()?;
        *budget = budget
            .checked_sub(size)
            .ok_or(ExtractError::PayloadTooLarge(PACKAGE_MAX_SIZE))?;

        let relative = sanitize_entry_path(&entry.path()?)?;
        let Some(relative) = relative else {
            continue; // archive root
        };
        let dest = dir.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&dest)?;
            }
            EntryType::Regular => {
                ensure_parent_in_tree(&dest, dir)?;
                entry.unpack(&dest)?;
            }
            EntryType::Symlink => {
                let target = entry.link_name()?.ok_or_else(|| {
                    ExtractError::PayloadMalicious(format!(
                        "symlink entry `{}` has no target",
                        relative.display()
                    ))
                })?;
                check_symlink_in_tree(&relative, &target)?;
                ensure_parent_in_tree(&dest, dir)?;
                #[cfg(target_family = "unix")]
                std::os::unix::fs::symlink(&*target, &dest)?;
            }
            other => {
                return Err(ExtractError::PayloadMalicious(format!(
                    "unsupported entry type {:?} for `{}`",
                    other,
                    relative.display()
                )));
            }
        }
    }
    Ok(())
}

/// Validates a tar entry path and strips the leading `./`. Returns `None`
/// for the archive root entry.
fn sanitize_entry_path(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::PayloadMalicious(format!(
                    "entry path `{}` escapes the package tree",
                    path.display()
                )));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(clean))
}

/// A symlink entry may only point inside the package tree. The check is
/// lexical over the link's location and its target.
fn check_symlink_in_tree(relative: &Path, target: &Path) -> Result<(), ExtractError> {
    let malicious = || {
        ExtractError::PayloadMalicious(format!(
            "symlink `{}` -> `{}` escapes the package tree",
            relative.display(),
            target.display()
        ))
    };

    if target.is_absolute() {
        return Err(malicious());
    }
    // Depth of the link's parent directory inside the tree.
    let mut depth = relative.components().count().saturating_sub(1) as i64;
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(malicious());
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return Err(malicious()),
        }
    }
    Ok(())
}

/// Creates the destination's parent directory and verifies it resolved
/// inside `dir`. This catches traversal through symlinks created by earlier
/// entries, which a lexical path check cannot see.
fn ensure_parent_in_tree(dest: &Path, dir: &Path) -> Result<(), ExtractError> {
    let parent = dest.parent().unwrap_or(dir);
    std::fs::create_dir_all(parent)?;
    let resolved = parent.canonicalize()?;
    if !resolved.starts_with(dir.canonicalize()?) {
        return Err(ExtractError::PayloadMalicious(format!(
            "entry `{}` resolves outside the package tree",
            dest.display()
        )));
    }
    Ok(())
}
