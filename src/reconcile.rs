// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace reconciliation.
//!
//! The reconciler computes the three-way relationship between the snapshot
//! store's last committed blob per project, the live configuration
//! extracted from each project on disk, and the directory listing of the
//! workspace root. Every project name seen in either the store or the
//! listing receives exactly one classification:
//!
//! - __Untracked__: on disk, never committed. Existence alone qualifies;
//!   whether the entry is a valid repository only matters once the
//!   operator decides to track it.
//! - __Modified__: tracked, on disk, and the live blob differs from the
//!   last committed one.
//! - __Deleted__: tracked, but the directory is gone or no longer a valid
//!   repository. The project stays tracked until an explicit removal, so
//!   it can be restored from its last snapshot.
//! - __Unchanged__: tracked and byte-identical to the last snapshot.
//!
//! Classification is a pure function of (tracked, on disk, blobs equal).
//! Output is ordered by name, so two runs against unchanged disk and store
//! state produce identical results.

use crate::{
    path::STORE_DIR,
    project::{ConfigBlob, ExtractError, Project},
    store::{Snapshots, StoreError},
};

use std::{collections::BTreeSet, path::Path};
use tracing::debug;

/// Classification of one project, carrying the blobs involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Untracked,
    Modified { old: ConfigBlob, new: ConfigBlob },
    Deleted { old: ConfigBlob },
    Unchanged,
}

impl Change {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Untracked => Kind::Untracked,
            Self::Modified { .. } => Kind::Modified,
            Self::Deleted { .. } => Kind::Deleted,
            Self::Unchanged => Kind::Unchanged,
        }
    }
}

/// Classification without payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Untracked,
    Modified,
    Deleted,
    Unchanged,
}

/// Classify a project from the three facts that determine its state.
///
/// Total: any combination maps to exactly one classification. The equality
/// flag only matters for tracked projects that are present on disk.
pub fn classify(tracked: bool, on_disk: bool, blobs_equal: bool) -> Kind {
    match (tracked, on_disk, blobs_equal) {
        (false, _, _) => Kind::Untracked,
        (true, false, _) => Kind::Deleted,
        (true, true, false) => Kind::Modified,
        (true, true, true) => Kind::Unchanged,
    }
}

/// One classified project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeRecord {
    pub name: String,
    pub change: Change,
}

/// Classified state of a whole workspace, ordered by project name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    records: Vec<ChangeRecord>,
}

impl Status {
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Records of one classification, in name order.
    pub fn of_kind(&self, kind: Kind) -> impl Iterator<Item = &ChangeRecord> {
        self.records
            .iter()
            .filter(move |record| record.change.kind() == kind)
    }

    /// Whether any tracked project drifted from its snapshot.
    pub fn has_changes(&self) -> bool {
        self.records
            .iter()
            .any(|record| matches!(record.change.kind(), Kind::Modified | Kind::Deleted))
    }

    /// Whether the store tracks anything at all.
    pub fn tracks_anything(&self) -> bool {
        self.records
            .iter()
            .any(|record| record.change.kind() != Kind::Untracked)
    }
}

/// Compute the classified state of a workspace.
///
/// Blobs are extracted fresh on every call; nothing is cached and nothing
/// is written.
///
/// # Errors
///
/// - Return [`ReconcileError::Store`] if the snapshot store cannot be read.
/// - Return [`ReconcileError::Extract`] if a project's configuration
///   exists but cannot be parsed.
/// - Return [`ReconcileError::ListRoot`] if the workspace root cannot be
///   listed.
pub fn reconcile<S: Snapshots>(root: impl AsRef<Path>, store: &S) -> Result<Status> {
    let root = root.as_ref();
    let tracked = store.list_tracked()?;
    let on_disk = list_root(root)?;

    let mut records = Vec::new();
    for name in on_disk.union(&tracked) {
        let change = classify_one(
            root,
            name,
            tracked.contains(name),
            on_disk.contains(name),
            store,
        )?;
        debug!("classified '{name}' as {:?}", change.kind());
        records.push(ChangeRecord {
            name: name.clone(),
            change,
        });
    }

    Ok(Status { records })
}

fn classify_one<S: Snapshots>(
    root: &Path,
    name: &str,
    tracked: bool,
    on_disk: bool,
    store: &S,
) -> Result<Change> {
    if !tracked {
        return Ok(Change::Untracked);
    }

    let old = store.latest(name)?.unwrap_or_default();
    if !on_disk {
        return Ok(Change::Deleted { old });
    }

    let new = match Project::open(root, name).and_then(|project| project.config()) {
        Ok(blob) => blob,
        // A tracked directory that stopped being a repository counts as
        // deleted, same as a missing one.
        Err(ExtractError::InvalidProject { .. }) => return Ok(Change::Deleted { old }),
        Err(err) => return Err(err.into()),
    };

    if new == old {
        Ok(Change::Unchanged)
    } else {
        Ok(Change::Modified { old, new })
    }
}

fn list_root(root: &Path) -> Result<BTreeSet<String>> {
    let entries = std::fs::read_dir(root).map_err(|err| ReconcileError::ListRoot {
        path: root.to_path_buf(),
        source: err,
    })?;

    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|err| ReconcileError::ListRoot {
            path: root.to_path_buf(),
            source: err,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name != STORE_DIR {
            names.insert(name);
        }
    }

    Ok(names)
}

/// Reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Snapshot store interaction fails.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration extraction fails for a present project.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Workspace root cannot be listed.
    #[error("failed to list workspace root '{}'", path.display())]
    ListRoot {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = ReconcileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use git2::Repository;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;
    use std::collections::BTreeMap;

    #[test_case(false, false, false, Kind::Untracked; "never tracked and missing")]
    #[test_case(false, true, false, Kind::Untracked; "on disk but never tracked")]
    #[test_case(false, true, true, Kind::Untracked; "equality ignored when untracked")]
    #[test_case(true, false, false, Kind::Deleted; "tracked but gone")]
    #[test_case(true, false, true, Kind::Deleted; "equality ignored when gone")]
    #[test_case(true, true, false, Kind::Modified; "tracked and drifted")]
    #[test_case(true, true, true, Kind::Unchanged; "tracked and identical")]
    #[test]
    fn classify_is_total(tracked: bool, on_disk: bool, blobs_equal: bool, expect: Kind) {
        pretty_assertions::assert_eq!(classify(tracked, on_disk, blobs_equal), expect);
    }

    fn track(store: &mut MemoryStore, name: &str, blob: ConfigBlob) {
        let mut updates = BTreeMap::new();
        updates.insert(name.to_owned(), Some(blob));
        store.commit(updates, &format!("Add {name}")).unwrap();
    }

    fn kinds(status: &Status) -> Vec<(String, Kind)> {
        status
            .records()
            .iter()
            .map(|record| (record.name.clone(), record.change.kind()))
            .collect()
    }

    #[sealed_test]
    fn untracked_by_existence_alone() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        Repository::init(root.join("proj1"))?;
        std::fs::create_dir(root.join("not_a_repo"))?;
        std::fs::write(root.join("stray_file"), "blah")?;
        std::fs::create_dir(root.join(STORE_DIR))?;

        let store = MemoryStore::new();
        let status = reconcile(&root, &store)?;
        assert_eq!(
            kinds(&status),
            vec![
                ("not_a_repo".to_owned(), Kind::Untracked),
                ("proj1".to_owned(), Kind::Untracked),
                ("stray_file".to_owned(), Kind::Untracked),
            ]
        );

        Ok(())
    }

    #[sealed_test]
    fn tracked_states_cover_all_transitions() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let mut store = MemoryStore::new();

        // Unchanged.
        Repository::init(root.join("clean"))?;
        track(&mut store, "clean", Project::open(&root, "clean")?.config()?);

        // Modified.
        let drifted = Repository::init(root.join("drifted"))?;
        track(&mut store, "drifted", Project::open(&root, "drifted")?.config()?);
        drifted.remote("backup", "git@example.com:backup.git")?;

        // Deleted: directory gone entirely.
        Repository::init(root.join("gone"))?;
        track(&mut store, "gone", Project::open(&root, "gone")?.config()?);
        std::fs::remove_dir_all(root.join("gone"))?;

        // Deleted: directory present but no longer a repository.
        Repository::init(root.join("husk"))?;
        track(&mut store, "husk", Project::open(&root, "husk")?.config()?);
        std::fs::remove_dir_all(root.join("husk").join(".git"))?;

        let status = reconcile(&root, &store)?;
        assert_eq!(
            kinds(&status),
            vec![
                ("clean".to_owned(), Kind::Unchanged),
                ("drifted".to_owned(), Kind::Modified),
                ("gone".to_owned(), Kind::Deleted),
                ("husk".to_owned(), Kind::Deleted),
            ]
        );
        assert!(status.has_changes());
        assert!(status.tracks_anything());

        Ok(())
    }

    #[sealed_test]
    fn reconcile_is_idempotent() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let mut store = MemoryStore::new();
        Repository::init(root.join("proj1"))?;
        let tracked = Repository::init(root.join("proj2"))?;
        track(&mut store, "proj2", Project::open(&root, "proj2")?.config()?);
        tracked.remote("backup", "git@example.com:backup.git")?;

        let first = reconcile(&root, &store)?;
        let second = reconcile(&root, &store)?;
        assert_eq!(first, second);

        Ok(())
    }

    #[sealed_test]
    fn deleted_record_carries_last_blob() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let mut store = MemoryStore::new();
        Repository::init(root.join("proj1"))?;
        let blob = Project::open(&root, "proj1")?.config()?;
        track(&mut store, "proj1", blob.clone());
        std::fs::remove_dir_all(root.join("proj1"))?;

        let status = reconcile(&root, &store)?;
        assert_eq!(
            status.records(),
            &[ChangeRecord {
                name: "proj1".to_owned(),
                change: Change::Deleted { old: blob },
            }]
        );

        Ok(())
    }
}
