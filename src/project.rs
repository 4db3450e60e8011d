// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project configuration extraction.
//!
//! A __project__ is a directory at the top-level of a workspace that is an
//! independently managed Git repository. Gitnest does not care about the
//! content of a project. The only thing it tracks is the project's
//! repository-local configuration, captured as a __configuration blob__.
//!
//! # Canonical Form
//!
//! Two projects whose configurations are logically identical must produce
//! byte-identical blobs, no matter how their config files happen to be
//! formatted on disk. To get there, extraction never copies raw file bytes.
//! The configuration is parsed through libgit2, and its entries are
//! re-serialized in a fixed shape: sections sorted by name, keys sorted
//! within their section, multi-value keys kept in file order. Diffs between
//! blobs therefore reflect only semantic changes.
//!
//! A repository without a config file is treated as having an empty one,
//! which is also how Git itself behaves.

use git2::{Config, Repository};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Canonical serialized configuration of a project at a point in time.
///
/// Immutable once produced. Two blobs are equal iff their bytes are equal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigBlob(Vec<u8>);

impl ConfigBlob {
    /// Construct blob from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The blob of a project with no configuration at all.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// View blob as text for rendering.
    pub fn to_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

/// A project inside a workspace.
///
/// Identified by its directory name relative to the workspace root. A
/// project is only valid when its directory can be opened as a Git
/// repository without searching parent directories, matching what
/// `git -C <path> status` would accept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    name: String,
    path: PathBuf,
    gitdir: PathBuf,
}

impl Project {
    /// Open an existing project by name.
    ///
    /// # Errors
    ///
    /// - Return [`ExtractError::InvalidProject`] if the project directory
    ///   is not an openable repository.
    pub fn open(root: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let path = root.as_ref().join(&name);
        let repository = Repository::open(&path).map_err(|err| ExtractError::InvalidProject {
            path: path.clone(),
            source: err,
        })?;

        Ok(Self {
            name,
            gitdir: repository.path().to_path_buf(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extract the project's configuration as a canonical blob.
    ///
    /// Read-only. A missing config file yields the empty blob.
    ///
    /// # Errors
    ///
    /// - Return [`ExtractError::ReadConfig`] if the config file exists but
    ///   cannot be parsed.
    pub fn config(&self) -> Result<ConfigBlob> {
        let config_path = self.gitdir.join("config");
        if !config_path.exists() {
            debug!("no config file at {:?}, treating as empty", config_path.display());
            return Ok(ConfigBlob::empty());
        }

        let config = Config::open(&config_path).map_err(|err| ExtractError::ReadConfig {
            path: config_path.clone(),
            source: err,
        })?;

        let mut raw = Vec::new();
        let mut entries = config.entries(None).map_err(|err| ExtractError::ReadConfig {
            path: config_path.clone(),
            source: err,
        })?;
        while let Some(entry) = entries.next() {
            let entry = entry.map_err(|err| ExtractError::ReadConfig {
                path: config_path.clone(),
                source: err,
            })?;
            let name = String::from_utf8_lossy(entry.name_bytes()).into_owned();
            let value = entry.value().map(str::to_owned);
            raw.push((name, value));
        }

        Ok(ConfigBlob::new(canonicalize(&raw)))
    }

    /// Write a configuration blob back onto disk, recreating the project
    /// if necessary.
    ///
    /// Creates the project directory when missing, and initializes it as a
    /// repository when it is not one yet, so that a deleted project can be
    /// brought back from its last snapshot.
    ///
    /// # Errors
    ///
    /// - Return [`RestoreError::NotADirectory`] if the target path exists
    ///   but is not a directory that could hold a repository.
    /// - Return [`RestoreError::Init`] if repository creation fails.
    /// - Return [`RestoreError::WriteConfig`] if the blob cannot be written.
    pub fn set_config(
        root: impl AsRef<Path>,
        name: impl Into<String>,
        blob: &ConfigBlob,
    ) -> Result<Self, RestoreError> {
        let name = name.into();
        let path = root.as_ref().join(&name);
        if path.exists() && !path.is_dir() {
            return Err(RestoreError::NotADirectory { path });
        }

        mkdirp::mkdirp(&path).map_err(|err| RestoreError::WriteConfig {
            path: path.clone(),
            source: err,
        })?;
        let repository = match Repository::open(&path) {
            Ok(repository) => repository,
            Err(_) => Repository::init(&path).map_err(|err| RestoreError::Init {
                path: path.clone(),
                source: err,
            })?,
        };

        let config_path = repository.path().join("config");
        std::fs::write(&config_path, blob.as_bytes()).map_err(|err| {
            RestoreError::WriteConfig {
                path: config_path,
                source: err,
            }
        })?;

        Ok(Self {
            name,
            gitdir: repository.path().to_path_buf(),
            path,
        })
    }
}

// Entry names come out of libgit2 as "section.key" or
// "section.subsection.key", with section and key already lowercased and the
// subsection preserved verbatim (it may itself contain dots).
fn split_entry_name(name: &str) -> (String, Option<String>, String) {
    let (section, rest) = match name.split_once('.') {
        Some(parts) => parts,
        None => return (name.to_owned(), None, String::new()),
    };
    match rest.rsplit_once('.') {
        Some((subsection, key)) => (
            section.to_owned(),
            Some(subsection.to_owned()),
            key.to_owned(),
        ),
        None => (section.to_owned(), None, rest.to_owned()),
    }
}

fn canonicalize(entries: &[(String, Option<String>)]) -> Vec<u8> {
    let mut sections: BTreeMap<(String, Option<String>), Vec<(String, Option<String>)>> =
        BTreeMap::new();
    for (name, value) in entries {
        let (section, subsection, key) = split_entry_name(name);
        sections
            .entry((section, subsection))
            .or_default()
            .push((key, value.clone()));
    }

    let mut out = String::new();
    for ((section, subsection), mut pairs) in sections {
        match &subsection {
            // Subsection names keep their case and may hold any character,
            // so quote and escape them the way git-config does.
            Some(subsection) => {
                let escaped = subsection.replace('\\', r"\\").replace('"', r#"\""#);
                out.push_str(&format!("[{section} \"{escaped}\"]\n"));
            }
            None => out.push_str(&format!("[{section}]\n")),
        }

        // Stable sort keeps multi-value entries in file order.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in pairs {
            match value.as_deref() {
                Some("") => out.push_str(&format!("\t{key} =\n")),
                Some(value) => out.push_str(&format!("\t{key} = {value}\n")),
                None => out.push_str(&format!("\t{key}\n")),
            }
        }
    }

    out.into_bytes()
}

/// Configuration extraction error types.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Path does not refer to an openable repository.
    #[error("'{}' is not a gitnest project", path.display())]
    InvalidProject {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// Configuration exists but cannot be read or parsed.
    #[error("failed to read configuration of '{}'", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },
}

/// Restore-to-disk error types.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// Target path exists but cannot hold a repository.
    #[error("cannot restore '{}': target exists and is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Repository recreation fails.
    #[error("failed to recreate repository at '{}'", path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// Blob cannot be written back to disk.
    #[error("failed to write configuration to '{}'", path.display())]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = ExtractError> = std::result::Result<T, E>;
