//! Filesystem primitives shared by the updater crates.
//!
//! Everything here is deliberately small: directory creation and deletion,
//! atomic symlink replacement, and advisory file locking. The higher-level
//! repository semantics live in the consumers of this crate.

pub mod directory_manager;
pub mod file_lock;
pub mod symlink_swapper;
pub mod utils;
