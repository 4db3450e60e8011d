// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot store management and manipulation.
//!
//! The __snapshot store__ is the meta-repository of a workspace. It maps
//! each tracked project name to that project's last committed configuration
//! blob, and keeps the full history of every blob it ever committed. On
//! disk it is an ordinary Git repository living in a hidden directory at
//! the workspace root, whose work tree holds one file per tracked project.
//!
//! # Store Invariants
//!
//! - The work tree always mirrors the latest commit. Mutations go through
//!   a single commit followed by a forced checkout, so no uncommitted
//!   state persists between commands.
//! - A commit applies its whole update set as one transaction. Updates are
//!   staged in an in-memory index and nothing becomes observable unless
//!   the one underlying commit succeeds.
//! - A commit whose resulting tree is identical to the current head is
//!   rejected with [`StoreError::NoChanges`] instead of recording an empty
//!   transition.
//!
//! # Locking
//!
//! The store is the only shared mutable resource, so every mutating
//! command holds an exclusive advisory file lock for the duration of
//! extraction plus commit, while read-only commands hold a shared one.
//! Lock acquisition waits a bounded amount of time and then fails with
//! [`StoreError::Locked`]. There are no silent retries beyond that bound.

use crate::project::ConfigBlob;

use git2::{
    build::CheckoutBuilder, ErrorCode, IndexEntry, IndexTime, ObjectType, Repository,
    RepositoryInitOptions, Signature, Sort, Tree,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    thread::sleep,
    time::Duration,
};
use tracing::{debug, info, instrument};

const LOCK_FILE: &str = "gitnest.lock";
const LOCK_ATTEMPTS: u32 = 50;
const LOCK_RETRY: Duration = Duration::from_millis(100);

/// Layer of indirection for snapshot store access.
///
/// The command engine only ever talks to this capability interface, which
/// keeps it testable against [`MemoryStore`] without touching a real
/// repository.
pub trait Snapshots {
    /// Last committed blob for a project, or none if it was never tracked.
    fn latest(&self, name: &str) -> Result<Option<ConfigBlob>>;

    /// Names of all currently tracked projects.
    fn list_tracked(&self) -> Result<BTreeSet<String>>;

    /// Atomically apply a set of puts (`Some` blob) and removals (`None`)
    /// as one transaction, returning the new commit id.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NoChanges`] if the update set leaves the
    ///   store exactly as it was.
    fn commit(
        &mut self,
        updates: BTreeMap<String, Option<ConfigBlob>>,
        message: &str,
    ) -> Result<String>;

    /// Lazily walk the commits that introduced or changed a project's
    /// blob, newest first. Finite; call again to restart.
    fn history(
        &self,
        name: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<(String, ConfigBlob)>> + '_>>;

    /// Acquire the store lock in the given mode.
    fn lock(&self, mode: LockMode) -> Result<StoreLock>;
}

/// Snapshot store access through libgit2.
pub struct Git2Store {
    repository: Repository,
}

impl Git2Store {
    /// Initialize a new snapshot store at target path.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Git2`] if repository creation fails.
    #[instrument(skip(path), level = "debug")]
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        info!("initialize snapshot store at {:?}", path.as_ref().display());
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repository = Repository::init_opts(path.as_ref(), &opts)?;

        Ok(Self { repository })
    }

    /// Open existing snapshot store at target path.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidStore`] if the path is not an
    ///   openable store repository.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repository =
            Repository::open(path.as_ref()).map_err(|err| StoreError::InvalidStore {
                path: path.as_ref().to_path_buf(),
                source: err,
            })?;

        Ok(Self { repository })
    }

    fn head_tree(&self) -> Result<Option<Tree<'_>>> {
        match self.repository.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?.tree()?)),
            Err(err)
                if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn blob_in(&self, tree: &Tree<'_>, name: &str) -> Result<Option<ConfigBlob>> {
        match tree.get_name(name) {
            Some(entry) if entry.kind() == Some(ObjectType::Blob) => {
                let blob = self.repository.find_blob(entry.id())?;
                Ok(Some(ConfigBlob::new(blob.content())))
            }
            _ => Ok(None),
        }
    }

    // INVARIANT: Always provide a usable signature.
    //   - repo.signature() fails on machines without user.name/user.email.
    fn signature(&self) -> Result<Signature<'static>> {
        match self.repository.signature() {
            Ok(signature) => Ok(signature),
            Err(_) => Ok(Signature::now("gitnest", "gitnest@localhost")?),
        }
    }
}

impl Snapshots for Git2Store {
    fn latest(&self, name: &str) -> Result<Option<ConfigBlob>> {
        match self.head_tree()? {
            Some(tree) => self.blob_in(&tree, name),
            None => Ok(None),
        }
    }

    fn list_tracked(&self) -> Result<BTreeSet<String>> {
        let mut tracked = BTreeSet::new();
        if let Some(tree) = self.head_tree()? {
            for entry in tree.iter() {
                if entry.kind() == Some(ObjectType::Blob) {
                    tracked.insert(String::from_utf8_lossy(entry.name_bytes()).into_owned());
                }
            }
        }

        Ok(tracked)
    }

    #[instrument(skip(self, updates), level = "debug")]
    fn commit(
        &mut self,
        updates: BTreeMap<String, Option<ConfigBlob>>,
        message: &str,
    ) -> Result<String> {
        let mut index = self.repository.index()?;
        for (name, blob) in &updates {
            match blob {
                Some(blob) => {
                    debug!("stage blob for '{name}'");
                    let entry = IndexEntry {
                        ctime: IndexTime::new(0, 0),
                        mtime: IndexTime::new(0, 0),
                        dev: 0,
                        ino: 0,
                        mode: 0o100644,
                        uid: 0,
                        gid: 0,
                        file_size: blob.as_bytes().len() as u32,
                        id: self.repository.blob(blob.as_bytes())?,
                        flags: 0,
                        flags_extended: 0,
                        path: name.clone().into_bytes(),
                    };
                    index.add_frombuffer(&entry, blob.as_bytes())?;
                }
                None => {
                    debug!("stage removal of '{name}'");
                    index.remove_path(Path::new(name))?;
                }
            }
        }

        // INVARIANT: Nothing observable changes before this one commit.
        let tree_id = index.write_tree()?;
        if let Some(head_tree) = self.head_tree()? {
            if head_tree.id() == tree_id {
                return Err(StoreError::NoChanges);
            }
        }
        let tree = self.repository.find_tree(tree_id)?;
        let signature = self.signature()?;
        let mut parents = Vec::new();
        if let Some(oid) = self.repository.head().ok().and_then(|head| head.target()) {
            parents.push(self.repository.find_commit(oid)?);
        }
        let parents = parents.iter().collect::<Vec<_>>();
        let oid = self
            .repository
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        index.write()?;

        // Mirror the work tree onto the new head, dropping stray files.
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        self.repository.checkout_head(Some(&mut checkout))?;

        info!("committed {oid}: {message}");
        Ok(oid.to_string())
    }

    fn history(
        &self,
        name: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<(String, ConfigBlob)>> + '_>> {
        let mut revwalk = self.repository.revwalk()?;
        match revwalk.push_head() {
            Ok(()) => {}
            Err(err)
                if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) =>
            {
                return Ok(Box::new(std::iter::empty()));
            }
            Err(err) => return Err(err.into()),
        }
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let repository = &self.repository;
        let name = name.to_owned();
        Ok(Box::new(revwalk.filter_map(move |oid| {
            let lookup = || -> Result<Option<(String, ConfigBlob)>> {
                let oid = oid?;
                let commit = repository.find_commit(oid)?;
                let tree = commit.tree()?;
                let entry = match tree.get_name(&name) {
                    Some(entry) => entry,
                    None => return Ok(None),
                };

                // Only commits that introduced or changed the blob count.
                let parent_entry_id = commit
                    .parents()
                    .next()
                    .and_then(|parent| parent.tree().ok())
                    .and_then(|tree| tree.get_name(&name).map(|entry| entry.id()));
                if parent_entry_id == Some(entry.id()) {
                    return Ok(None);
                }

                let blob = repository.find_blob(entry.id())?;
                Ok(Some((oid.to_string(), ConfigBlob::new(blob.content()))))
            };
            lookup().transpose()
        })))
    }

    fn lock(&self, mode: LockMode) -> Result<StoreLock> {
        StoreLock::acquire(self.repository.path().join(LOCK_FILE), mode)
    }
}

/// In-memory snapshot store.
///
/// Same observable semantics as [`Git2Store`], including no-op detection,
/// minus persistence and locking. Backs the unit tests of everything that
/// sits above the [`Snapshots`] seam.
#[derive(Debug, Default)]
pub struct MemoryStore {
    commits: Vec<(String, BTreeMap<String, Option<ConfigBlob>>)>,
    latest: BTreeMap<String, ConfigBlob>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Snapshots for MemoryStore {
    fn latest(&self, name: &str) -> Result<Option<ConfigBlob>> {
        Ok(self.latest.get(name).cloned())
    }

    fn list_tracked(&self) -> Result<BTreeSet<String>> {
        Ok(self.latest.keys().cloned().collect())
    }

    fn commit(
        &mut self,
        updates: BTreeMap<String, Option<ConfigBlob>>,
        message: &str,
    ) -> Result<String> {
        let mut next = self.latest.clone();
        for (name, blob) in &updates {
            match blob {
                Some(blob) => {
                    next.insert(name.clone(), blob.clone());
                }
                None => {
                    next.remove(name);
                }
            }
        }
        if next == self.latest {
            return Err(StoreError::NoChanges);
        }

        let id = format!("memory-{}", self.commits.len() + 1);
        debug!("committed {id}: {message}");
        self.commits.push((id.clone(), updates));
        self.latest = next;
        Ok(id)
    }

    fn history(
        &self,
        name: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<(String, ConfigBlob)>> + '_>> {
        let items = self
            .commits
            .iter()
            .rev()
            .filter_map(|(id, updates)| {
                updates
                    .get(name)
                    .and_then(|blob| blob.as_ref())
                    .map(|blob| Ok((id.clone(), blob.clone())))
            })
            .collect::<Vec<_>>();

        Ok(Box::new(items.into_iter()))
    }

    fn lock(&self, _mode: LockMode) -> Result<StoreLock> {
        Ok(StoreLock::unlocked())
    }
}

/// Store lock acquisition mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Read-only commands; many may hold it at once.
    Shared,

    /// Mutating commands; held for the duration of extraction plus commit.
    Exclusive,
}

/// Held store lock. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: Option<File>,
}

impl StoreLock {
    fn acquire(path: PathBuf, mode: LockMode) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| StoreError::Io {
                path: path.clone(),
                source: err,
            })?;

        // INVARIANT: Qualify through fs2. std::fs::File grew same-named
        // inherent lock methods, and those would win name resolution.
        for _ in 0..LOCK_ATTEMPTS {
            let result = match mode {
                LockMode::Exclusive => fs2::FileExt::try_lock_exclusive(&file),
                LockMode::Shared => fs2::FileExt::try_lock_shared(&file),
            };
            if result.is_ok() {
                return Ok(Self { file: Some(file) });
            }
            sleep(LOCK_RETRY);
        }

        Err(StoreError::Locked { path })
    }

    fn unlocked() -> Self {
        Self { file: None }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
        }
    }
}

/// All possible error types for snapshot store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Lock file cannot be opened.
    #[error("failed to access snapshot store lock at '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Lock contention outlasted the bounded wait.
    #[error("snapshot store is locked by another process (lock file '{}')", path.display())]
    Locked { path: PathBuf },

    /// Commit would record no transition.
    #[error("nothing to commit, snapshot store already up to date")]
    NoChanges,

    /// Path does not refer to a usable store repository.
    #[error("'{}' is not a gitnest snapshot store", path.display())]
    InvalidStore {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = StoreError> = std::result::Result<T, E>;
