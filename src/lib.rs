// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Track the configuration of many Git repositories in one place.
//!
//! Gitnest watches a __workspace__: a root directory whose subdirectories
//! are independently managed Git repositories, called __projects__. For
//! every tracked project it snapshots the repository-local configuration
//! into a hidden meta-repository at the workspace root, the
//! __snapshot store__. Status, diff, add, remove, and restore then work
//! over configurations the way Git itself works over file content.
//!
//! Only configuration is tracked. Project content, branches, and history
//! stay entirely under the project's own control.

pub mod path;
pub mod project;
pub mod reconcile;
pub mod store;
pub mod sync;
pub mod workspace;

pub use crate::{
    project::{ConfigBlob, Project},
    reconcile::{Change, ChangeRecord, Kind, Status},
    store::{Git2Store, LockMode, MemoryStore, Snapshots},
    workspace::{ProjectDiff, Workspace, WorkspaceError},
};
