// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use gitnest::{
    path::STORE_DIR,
    project::Project,
    reconcile::Kind,
    store::Snapshots,
    workspace::{Workspace, WorkspaceError},
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::collections::BTreeSet;

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

fn names_of_kind(workspace: &Workspace, kind: Kind) -> Result<Vec<String>> {
    Ok(workspace
        .status()?
        .of_kind(kind)
        .map(|record| record.name.clone())
        .collect())
}

#[sealed_test]
fn init_self_tracks_the_store() -> Result<()> {
    let root = std::env::current_dir()?;
    let workspace = Workspace::init(&root)?;

    let expect = [STORE_DIR.to_owned()].into_iter().collect::<BTreeSet<_>>();
    assert_eq!(workspace.tracked()?, expect);
    assert_eq!(names_of_kind(&workspace, Kind::Unchanged)?, vec![STORE_DIR]);

    let again = Workspace::init(&root);
    assert!(matches!(
        again,
        Err(WorkspaceError::AlreadyInitialized { .. })
    ));

    Ok(())
}

#[sealed_test]
fn status_reports_untracked_projects() -> Result<()> {
    let root = std::env::current_dir()?;
    RepoFixture::new(root.join("proj1"))?;
    let workspace = Workspace::init(&root)?;

    let status = workspace.status()?;
    assert_eq!(names_of_kind(&workspace, Kind::Untracked)?, vec!["proj1"]);
    assert!(!status.has_changes());

    Ok(())
}

#[sealed_test]
fn add_records_the_extracted_blob() -> Result<()> {
    let root = std::env::current_dir()?;
    let fixture = RepoFixture::new(root.join("proj1"))?;
    fixture.add_remote("origin", "git@example.com:proj1.git")?;
    let mut workspace = Workspace::init(&root)?;

    workspace.add(&names(&["proj1"]))?;
    let latest = workspace.store().latest("proj1")?;
    assert_eq!(latest, Some(Project::open(&root, "proj1")?.config()?));

    // Clean status: nothing untracked, nothing drifted.
    let status = workspace.status()?;
    assert_eq!(status.of_kind(Kind::Untracked).count(), 0);
    assert!(!status.has_changes());

    Ok(())
}

#[sealed_test]
fn modified_project_shows_in_status_and_diff() -> Result<()> {
    let root = std::env::current_dir()?;
    let fixture = RepoFixture::new(root.join("proj1"))?;
    let mut workspace = Workspace::init(&root)?;
    workspace.add(&names(&["proj1"]))?;

    fixture.add_remote("upstream", "git@example.com:upstream.git")?;
    assert_eq!(names_of_kind(&workspace, Kind::Modified)?, vec!["proj1"]);

    let diffs = workspace.diff(&[])?;
    assert_eq!(diffs.len(), 1);
    assert!(diffs[0].text.contains(r#"+[remote "upstream"]"#));
    assert!(diffs[0]
        .text
        .contains("+\turl = git@example.com:upstream.git"));

    Ok(())
}

#[sealed_test]
fn deleted_project_restores_from_snapshot() -> Result<()> {
    let root = std::env::current_dir()?;
    let fixture = RepoFixture::new(root.join("proj1"))?;
    fixture.add_remote("origin", "git@example.com:proj1.git")?;
    let mut workspace = Workspace::init(&root)?;
    workspace.add(&names(&["proj1"]))?;

    std::fs::remove_dir_all(root.join("proj1"))?;
    assert_eq!(names_of_kind(&workspace, Kind::Deleted)?, vec!["proj1"]);

    workspace.restore(&names(&["proj1"]))?;
    let status = workspace.status()?;
    assert!(!status.has_changes());
    let blob = Project::open(&root, "proj1")?.config()?;
    assert!(blob.to_text().contains(r#"[remote "origin"]"#));

    Ok(())
}

#[sealed_test]
fn rm_untracks_without_touching_disk() -> Result<()> {
    let root = std::env::current_dir()?;
    RepoFixture::new(root.join("proj1"))?;
    let mut workspace = Workspace::init(&root)?;
    workspace.add(&names(&["proj1"]))?;

    workspace.rm(&names(&["proj1"]))?;
    assert_eq!(names_of_kind(&workspace, Kind::Untracked)?, vec!["proj1"]);
    assert!(root.join("proj1").join(".git").is_dir());

    Ok(())
}

#[sealed_test]
fn status_is_idempotent() -> Result<()> {
    let root = std::env::current_dir()?;
    let fixture = RepoFixture::new(root.join("proj1"))?;
    RepoFixture::new(root.join("proj2"))?;
    let mut workspace = Workspace::init(&root)?;
    workspace.add(&names(&["proj1"]))?;
    fixture.add_remote("backup", "git@example.com:backup.git")?;

    assert_eq!(workspace.status()?, workspace.status()?);

    Ok(())
}

#[sealed_test]
fn failed_add_leaves_store_untouched() -> Result<()> {
    let root = std::env::current_dir()?;
    RepoFixture::new(root.join("proj1"))?;
    let mut workspace = Workspace::init(&root)?;

    let before = workspace.tracked()?;
    let result = workspace.add(&names(&["proj1", "ghost"]));
    assert!(matches!(
        result,
        Err(WorkspaceError::NotFound { name }) if name == "ghost"
    ));
    assert_eq!(workspace.tracked()?, before);

    Ok(())
}

#[sealed_test]
fn repeated_add_is_a_noop() -> Result<()> {
    let root = std::env::current_dir()?;
    RepoFixture::new(root.join("proj1"))?;
    let mut workspace = Workspace::init(&root)?;

    assert!(workspace.add(&names(&["proj1"]))?.is_some());
    assert_eq!(workspace.add(&names(&["proj1"]))?, None);

    let history = workspace
        .store()
        .history("proj1")?
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(history.len(), 1);

    Ok(())
}

#[sealed_test]
fn discover_finds_workspace_from_project_subdirectory() -> Result<()> {
    let root = std::env::current_dir()?;
    RepoFixture::new(root.join("proj1"))?;
    Workspace::init(&root)?;

    let workspace = Workspace::discover(root.join("proj1"))?;
    assert_eq!(workspace.root(), root);

    let nowhere = Workspace::discover("/");
    assert!(matches!(nowhere, Err(WorkspaceError::NoRoot(_))));

    Ok(())
}

#[sealed_test]
fn restore_rejects_untracked_names() -> Result<()> {
    let root = std::env::current_dir()?;
    RepoFixture::new(root.join("proj1"))?;
    let workspace = Workspace::init(&root)?;

    let result = workspace.restore(&names(&["proj1"]));
    assert!(matches!(result, Err(WorkspaceError::NotTracked { .. })));

    Ok(())
}
