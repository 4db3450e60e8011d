// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace command engine.
//!
//! A __workspace__ is a root directory holding any number of project
//! repositories plus the snapshot store that tracks their configurations.
//! This module turns operator intents into transactions against the store:
//!
//! - `status` and `diff` read and classify, never mutate.
//! - `add`, `rm` validate every named project up front, then apply the
//!   whole update set as one store commit. Either everything named lands
//!   in a single transition, or nothing does.
//! - `restore` writes last committed blobs back onto disk, recreating
//!   project directories when needed.
//! - `init` creates the store and immediately tracks the store's own
//!   directory as the first project, so the meta-repository watches
//!   itself.
//!
//! The workspace is an explicit handle value. Nothing here touches global
//! state, which allows multiple roots per process and swapping the store
//! backend behind the [`Snapshots`] seam.

use crate::{
    path::{discover_root, store_dir, STORE_DIR},
    project::{ConfigBlob, ExtractError, Project, RestoreError},
    reconcile::{self, Change, ReconcileError, Status},
    store::{Git2Store, LockMode, Snapshots, StoreError},
};

use similar::TextDiff;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Handle over one workspace root and its snapshot store.
pub struct Workspace<S = Git2Store>
where
    S: Snapshots,
{
    root: PathBuf,
    store: S,
}

impl Workspace<Git2Store> {
    /// Initialize a new workspace at target root.
    ///
    /// Creates the snapshot store, then performs an implicit `add` of the
    /// store's own directory as the first tracked project.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::AlreadyInitialized`] if a store already
    ///   exists at the root.
    #[instrument(skip(root), level = "debug")]
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let store_path = store_dir(&root);
        if store_path.exists() {
            return Err(WorkspaceError::AlreadyInitialized { path: store_path });
        }

        let store = Git2Store::create(&store_path)?;
        let mut workspace = Self { root, store };

        let _lock = workspace.store.lock(LockMode::Exclusive)?;
        let blob = Project::open(&workspace.root, STORE_DIR)?.config()?;
        let mut updates = BTreeMap::new();
        updates.insert(STORE_DIR.to_owned(), Some(blob));
        workspace
            .store
            .commit(updates, &format!("Add {STORE_DIR}"))?;
        info!("initialized workspace at {:?}", workspace.root.display());

        Ok(workspace)
    }

    /// Open the workspace at target root.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NoStore`] if the root has no snapshot
    ///   store.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let store_path = store_dir(&root);
        if !store_path.is_dir() {
            return Err(WorkspaceError::NoStore { path: root });
        }
        let store = Git2Store::open(&store_path)?;

        Ok(Self { root, store })
    }

    /// Open the workspace that owns `start`, searching parent directories.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        let root = discover_root(start)?;
        Self::open(root)
    }
}

impl<S> Workspace<S>
where
    S: Snapshots,
{
    /// Construct a workspace over an explicit store backend.
    pub fn with_store(root: impl Into<PathBuf>, store: S) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Names of all currently tracked projects.
    pub fn tracked(&self) -> Result<BTreeSet<String>> {
        Ok(self.store.list_tracked()?)
    }

    /// Classified state of every tracked and untracked project. No
    /// mutation.
    pub fn status(&self) -> Result<Status> {
        let _lock = self.store.lock(LockMode::Shared)?;
        Ok(reconcile::reconcile(&self.root, &self.store)?)
    }

    /// Render textual differences between snapshots and live
    /// configuration.
    ///
    /// With no names, every Modified and Deleted project is rendered.
    /// Explicitly named projects additionally get a forced compare when
    /// untracked, showing their whole current blob as an addition.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotFound`] if an explicitly named
    ///   project exists neither on disk nor in the store.
    pub fn diff(&self, names: &[String]) -> Result<Vec<ProjectDiff>> {
        let _lock = self.store.lock(LockMode::Shared)?;
        let status = reconcile::reconcile(&self.root, &self.store)?;

        let mut diffs = Vec::new();
        if names.is_empty() {
            for record in status.records() {
                match &record.change {
                    Change::Modified { old, new } => {
                        diffs.push(ProjectDiff::render(&record.name, old, new));
                    }
                    Change::Deleted { old } => {
                        diffs.push(ProjectDiff::render(&record.name, old, &ConfigBlob::empty()));
                    }
                    _ => {}
                }
            }
            return Ok(diffs);
        }

        for name in names {
            let record = status.records().iter().find(|record| &record.name == name);
            match record.map(|record| &record.change) {
                Some(Change::Modified { old, new }) => {
                    diffs.push(ProjectDiff::render(name, old, new));
                }
                Some(Change::Deleted { old }) => {
                    diffs.push(ProjectDiff::render(name, old, &ConfigBlob::empty()));
                }
                Some(Change::Untracked) => {
                    // Forced compare: everything the project currently has
                    // shows up as an addition.
                    let new = Project::open(&self.root, name)?.config()?;
                    diffs.push(ProjectDiff::render(name, &ConfigBlob::empty(), &new));
                }
                Some(Change::Unchanged) => debug!("'{name}' unchanged, nothing to render"),
                None => return Err(WorkspaceError::NotFound { name: name.clone() }),
            }
        }

        Ok(diffs)
    }

    /// Begin or refresh tracking of the named projects.
    ///
    /// Every name must resolve to a valid on-disk project before anything
    /// is committed. All blobs land in one store transaction. Returns the
    /// new commit id, or `None` when every named blob already matched its
    /// snapshot (a no-op, not an error).
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotFound`] if a named project is missing
    ///   or invalid on disk.
    #[instrument(skip(self), level = "debug")]
    pub fn add(&mut self, names: &[String]) -> Result<Option<String>> {
        let _lock = self.store.lock(LockMode::Exclusive)?;
        let tracked = self.store.list_tracked()?;

        let mut updates = BTreeMap::new();
        let mut parts = Vec::new();
        for name in names {
            let project = Project::open(&self.root, name).map_err(|err| match err {
                ExtractError::InvalidProject { .. } => WorkspaceError::NotFound {
                    name: name.clone(),
                },
                err => WorkspaceError::Extract(err),
            })?;
            let verb = if tracked.contains(name) { "Update" } else { "Add" };
            parts.push(format!("{verb} {name}"));
            updates.insert(name.clone(), Some(project.config()?));
        }

        match self.store.commit(updates, &parts.join("; ")) {
            Ok(id) => Ok(Some(id)),
            Err(StoreError::NoChanges) => {
                info!("snapshots already up to date, nothing committed");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Stop tracking the named projects. Does not touch their on-disk
    /// directories.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotTracked`] if a named project has no
    ///   snapshot; nothing is committed in that case.
    #[instrument(skip(self), level = "debug")]
    pub fn rm(&mut self, names: &[String]) -> Result<String> {
        let _lock = self.store.lock(LockMode::Exclusive)?;
        let tracked = self.store.list_tracked()?;

        let mut updates = BTreeMap::new();
        let mut parts = Vec::new();
        for name in names {
            if !tracked.contains(name) {
                return Err(WorkspaceError::NotTracked { name: name.clone() });
            }
            parts.push(format!("Remove {name}"));
            updates.insert(name.clone(), None);
        }

        Ok(self.store.commit(updates, &parts.join("; "))?)
    }

    /// Write the last committed blob of each named project back onto
    /// disk, recreating directories and repositories as needed.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotTracked`] if a named project has no
    ///   snapshot; nothing is written in that case.
    /// - Return [`WorkspaceError::Restore`] if a target cannot be safely
    ///   rewritten.
    #[instrument(skip(self), level = "debug")]
    pub fn restore(&self, names: &[String]) -> Result<()> {
        let _lock = self.store.lock(LockMode::Exclusive)?;
        let tracked = self.store.list_tracked()?;
        for name in names {
            if !tracked.contains(name) {
                return Err(WorkspaceError::NotTracked { name: name.clone() });
            }
        }

        for name in names {
            let blob = self.store.latest(name)?.unwrap_or_default();
            Project::set_config(&self.root, name, &blob)?;
            info!("restored '{name}' from its last snapshot");
        }

        Ok(())
    }
}

/// Rendered difference for one project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectDiff {
    pub name: String,
    pub text: String,
}

impl ProjectDiff {
    fn render(name: &str, old: &ConfigBlob, new: &ConfigBlob) -> Self {
        let old_text = old.to_text();
        let new_text = new.to_text();
        let diff = TextDiff::from_lines(old_text.as_ref(), new_text.as_ref());
        let text = diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{name}"), &format!("b/{name}"))
            .to_string();

        Self {
            name: name.to_owned(),
            text,
        }
    }
}

/// All possible error types for workspace commands.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Named project missing or invalid on disk.
    #[error("'{name}' is not a project in this workspace")]
    NotFound { name: String },

    /// Named project has no snapshot in the store.
    #[error("'{name}' is not being tracked")]
    NotTracked { name: String },

    /// Workspace root already holds a snapshot store.
    #[error("workspace already initialized at '{}'", path.display())]
    AlreadyInitialized { path: PathBuf },

    /// Workspace root holds no snapshot store.
    #[error("'{}' is not a gitnest workspace", path.display())]
    NoStore { path: PathBuf },

    /// No workspace found in the path or any of its parents.
    #[error(transparent)]
    NoRoot(#[from] crate::path::NoRootFound),

    /// Snapshot store interaction fails.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration extraction fails.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Restore-to-disk fails.
    #[error(transparent)]
    Restore(#[from] RestoreError),

    /// Reconciliation fails.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Friendly result alias :3
type Result<T, E = WorkspaceError> = std::result::Result<T, E>;
