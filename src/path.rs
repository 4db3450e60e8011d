// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the snapshot store of a workspace lives, and find the
//! workspace root that owns a given path.

use std::path::{Path, PathBuf};

/// Name of the hidden snapshot store directory at the workspace root.
pub const STORE_DIR: &str = ".gitnest";

/// Determine absolute path to the snapshot store of a workspace root.
///
/// Does not check if the path returned actually exists.
pub fn store_dir(root: impl AsRef<Path>) -> PathBuf {
    root.as_ref().join(STORE_DIR)
}

/// Find the workspace root that owns `start`.
///
/// Checks `start` itself first, then each of its parent directories, for a
/// snapshot store entry. Mimics how Git discovers its repository from a
/// subdirectory.
///
/// # Errors
///
/// - Return [`NoRootFound`] if neither `start` nor any of its parents
///   contain a snapshot store.
pub fn discover_root(start: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start.as_ref();
    for candidate in start.ancestors() {
        if store_dir(candidate).is_dir() {
            return Ok(candidate.to_path_buf());
        }
    }

    Err(NoRootFound {
        start: start.to_path_buf(),
    })
}

/// Neither the path nor any of its parents contain a snapshot store.
#[derive(Clone, Debug, thiserror::Error)]
#[error("'{}' is not a gitnest workspace (or any of the parent directories)", start.display())]
pub struct NoRootFound {
    pub start: PathBuf,
}

/// Friendly result alias :3
pub type Result<T, E = NoRootFound> = std::result::Result<T, E>;
