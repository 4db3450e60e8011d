// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Periodic maintenance sweep over project repositories.
//!
//! The sweep is informational. It walks every project repository under a
//! root, optionally fetches and prunes all of their remotes, and reports
//! stray state to the log: projects without an `origin` remote, local
//! branches, stashed changes, and untracked files. It never mutates the
//! snapshot store.
//!
//! An optional __sync spec__ file describes the remotes each project is
//! expected to have. The sweep compares the expectation against what is
//! observed and logs any drift. It does not rewrite remotes; fixing drift
//! stays an operator decision.

use crate::path::STORE_DIR;

use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Options controlling one maintenance sweep.
#[derive(Clone, Debug, Default)]
pub struct SyncOptions {
    /// Glob pattern; projects whose name does not match are skipped.
    pub pattern: Option<String>,

    /// Run `git fetch --all --tags --prune` in every project.
    pub fetch: bool,

    /// Expected remotes to compare against.
    pub spec: Option<SyncSpec>,
}

/// What one project looked like during a sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectReport {
    pub name: String,

    /// URL of the `origin` remote, if the project has one.
    pub origin: Option<String>,

    /// All remotes with their fetch and push URLs.
    pub remotes: BTreeMap<String, RemoteSpec>,

    pub branches: Vec<String>,
    pub stashes: usize,
    pub untracked: Vec<String>,

    /// Whether the fetch ran and succeeded.
    pub fetched: bool,
}

/// Sweep every project repository under `root`.
///
/// Entries that cannot be opened as repositories are skipped with a debug
/// log. Fetch failures are logged as warnings and do not abort the sweep.
/// Reports are returned in name order and mirrored to the log.
///
/// # Errors
///
/// - Return [`SyncError::Pattern`] if the name filter is not a valid glob.
/// - Return [`SyncError::ListRoot`] if the root cannot be listed.
/// - Return [`SyncError::Syscall`] if the git binary cannot be spawned.
#[instrument(skip(root, options), level = "debug")]
pub fn sweep(root: impl AsRef<Path>, options: &SyncOptions) -> Result<Vec<ProjectReport>> {
    let root = root.as_ref();
    let pattern = options
        .pattern
        .as_deref()
        .map(Pattern::new)
        .transpose()?;

    let mut names = Vec::new();
    let entries = std::fs::read_dir(root).map_err(|err| SyncError::ListRoot {
        path: root.to_path_buf(),
        source: err,
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::ListRoot {
            path: root.to_path_buf(),
            source: err,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == STORE_DIR {
            continue;
        }
        if let Some(pattern) = &pattern {
            if !pattern.matches(&name) {
                debug!("[{name}] ignoring, does not match pattern");
                continue;
            }
        }
        names.push(name);
    }
    names.sort();

    let bar = if options.fetch {
        let bar = ProgressBar::new(names.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
            )?
            .progress_chars("-Cco."),
        );
        Some(bar)
    } else {
        None
    };

    let mut reports = Vec::new();
    for name in names {
        let path = root.join(&name);
        let mut repository = match git2::Repository::open(&path) {
            Ok(repository) => repository,
            Err(err) => {
                debug!("[{name}] not a repository, skipping: {err}");
                continue;
            }
        };

        let mut fetched = false;
        if options.fetch {
            if let Some(bar) = &bar {
                bar.set_message(name.clone());
            }
            match git_fetch(&path)? {
                Ok(output) => {
                    fetched = true;
                    if !output.is_empty() {
                        info!("[{name}] fetched updates:\n{output}");
                    }
                }
                Err(output) => warn!("[{name}] fetch failed:\n{output}"),
            }
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }

        let mut report = probe(&mut repository, &name)?;
        report.fetched = fetched;
        log_report(&report);
        reports.push(report);
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if let Some(spec) = &options.spec {
        for warning in spec_drift(spec, &reports) {
            warn!("{warning}");
        }
    }

    Ok(reports)
}

fn probe(repository: &mut git2::Repository, name: &str) -> Result<ProjectReport> {
    let mut remotes = BTreeMap::new();
    for remote_name in repository.remotes()?.iter().flatten() {
        let remote = repository.find_remote(remote_name)?;
        let fetch = remote.url().map(str::to_owned);
        // Git falls back to the fetch URL when no push URL is set.
        let push = remote.pushurl().map(str::to_owned).or_else(|| fetch.clone());
        remotes.insert(remote_name.to_owned(), RemoteSpec { fetch, push });
    }
    let origin = remotes
        .get("origin")
        .and_then(|remote| remote.fetch.clone());

    let mut branches = Vec::new();
    for branch in repository.branches(Some(git2::BranchType::Local))? {
        let (branch, _) = branch?;
        if let Some(branch_name) = branch.name()? {
            branches.push(branch_name.to_owned());
        }
    }

    let mut stashes = 0;
    repository.stash_foreach(|_, _, _| {
        stashes += 1;
        true
    })?;

    // Bare repositories have no work tree to hold untracked files.
    let mut untracked = Vec::new();
    if !repository.is_bare() {
        let mut status_opts = git2::StatusOptions::new();
        status_opts.include_untracked(true);
        for entry in repository.statuses(Some(&mut status_opts))?.iter() {
            if entry.status().contains(git2::Status::WT_NEW) {
                if let Some(path) = entry.path() {
                    untracked.push(path.to_owned());
                }
            }
        }
    }

    Ok(ProjectReport {
        name: name.to_owned(),
        origin,
        remotes,
        branches,
        stashes,
        untracked,
        fetched: false,
    })
}

fn log_report(report: &ProjectReport) {
    let name = &report.name;
    match &report.origin {
        Some(url) => debug!("[{name}] origin at {url}"),
        None => warn!("[{name}] no origin remote"),
    }
    if !report.branches.is_empty() {
        info!("[{name}] local branches: {}", report.branches.join(", "));
    }
    if report.stashes > 0 {
        info!("[{name}] {} stashed change(s)", report.stashes);
    }
    if !report.untracked.is_empty() {
        info!("[{name}] untracked files: {}", report.untracked.join(", "));
    }
}

/// Compare expected remotes against observed state.
///
/// Pure; returns one human-readable warning per drift. The nesting mirrors
/// the levels at which drift can occur: project, remote, then URL mode.
pub fn spec_drift(spec: &SyncSpec, reports: &[ProjectReport]) -> Vec<String> {
    let observed: BTreeMap<&str, &ProjectReport> = reports
        .iter()
        .map(|report| (report.name.as_str(), report))
        .collect();

    let mut warnings = Vec::new();
    for report in reports {
        if !spec.projects.contains_key(&report.name) {
            warnings.push(format!("[{}] unexpected project", report.name));
        }
    }

    for (name, project) in &spec.projects {
        let report = match observed.get(name.as_str()) {
            Some(report) => report,
            None => {
                warnings.push(format!("[{name}] expected project is missing"));
                continue;
            }
        };

        for remote in report.remotes.keys() {
            if !project.remotes.contains_key(remote) {
                warnings.push(format!("[{name}] [{remote}] unexpected remote"));
            }
        }

        for (remote, expected) in &project.remotes {
            let found = match report.remotes.get(remote) {
                Some(found) => found,
                None => {
                    warnings.push(format!("[{name}] [{remote}] expected remote is missing"));
                    continue;
                }
            };

            for (mode, expected_url, found_url) in [
                ("fetch", &expected.fetch, &found.fetch),
                ("push", &expected.push, &found.push),
            ] {
                match (expected_url, found_url) {
                    (Some(expected_url), Some(found_url)) if expected_url != found_url => {
                        warnings.push(format!(
                            "[{name}] [{remote}] [{mode}] expected '{expected_url}', found '{found_url}'"
                        ));
                    }
                    (Some(expected_url), None) => {
                        warnings.push(format!(
                            "[{name}] [{remote}] [{mode}] expected '{expected_url}', found none"
                        ));
                    }
                    _ => {}
                }
            }
        }
    }

    warnings
}

// Returns Ok(output) on success, Err(output) on a non-zero exit, and only
// fails the sweep when the binary itself cannot be run.
fn git_fetch(path: &Path) -> Result<std::result::Result<String, String>> {
    let mut args: Vec<OsString> = vec!["-C".into(), path.as_os_str().to_os_string()];
    args.extend(["fetch", "--all", "--tags", "--prune"].map(OsString::from));

    let output = Command::new("git").args(args).output()?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();
    if !stdout.is_empty() {
        message.push_str(&stdout);
    }
    if !stderr.is_empty() {
        message.push_str(&stderr);
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message);

    if output.status.success() {
        Ok(Ok(message))
    } else {
        Ok(Err(message))
    }
}

/// Sync spec layout.
///
/// Lists the remotes each project under the root is expected to carry.
/// Project and remote names map to their expected fetch and push URLs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncSpec {
    /// Projects root this spec describes. Supports shell expansion.
    pub root: Option<PathBuf>,

    /// Expected projects keyed by directory name.
    #[serde(default, rename = "project")]
    pub projects: BTreeMap<String, ProjectSpec>,
}

impl SyncSpec {
    /// Load and parse a sync spec file.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::ReadSpec`] if the file cannot be read.
    /// - Return [`SyncError::Spec`] if its contents cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|err| SyncError::ReadSpec {
                path: path.as_ref().to_path_buf(),
                source: err,
            })?;
        Ok(content.parse()?)
    }
}

impl FromStr for SyncSpec {
    type Err = SyncSpecError;

    fn from_str(data: &str) -> std::result::Result<Self, Self::Err> {
        let mut spec: SyncSpec = toml::de::from_str(data).map_err(SyncSpecError::Deserialize)?;

        // INVARIANT: Perform shell expansion on the root field.
        if let Some(root) = spec.root {
            spec.root = Some(PathBuf::from(
                shellexpand::full(root.to_string_lossy().as_ref())
                    .map_err(SyncSpecError::ShellExpansion)?
                    .into_owned(),
            ));
        }

        Ok(spec)
    }
}

impl Display for SyncSpec {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(SyncSpecError::Serialize)?
                .as_str(),
        )
    }
}

/// Expected remotes of one project.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProjectSpec {
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteSpec>,
}

/// Expected fetch and push URLs of one remote.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteSpec {
    pub fetch: Option<String>,
    pub push: Option<String>,
}

/// Sync spec parsing error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncSpecError {
    /// Failed to deserialize spec.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize spec.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on spec.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<SyncSpecError> for FmtError {
    fn from(_: SyncSpecError) -> Self {
        FmtError
    }
}

/// All possible error types for maintenance sweeps.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Name filter is not a valid glob pattern.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Projects root cannot be listed.
    #[error("failed to list projects root '{}'", path.display())]
    ListRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Spec file cannot be read.
    #[error("failed to read sync spec at '{}'", path.display())]
    ReadSpec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Spec file cannot be parsed.
    #[error(transparent)]
    Spec(#[from] SyncSpecError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    Style(#[from] indicatif::style::TemplateError),

    /// The git binary cannot be invoked.
    #[error(transparent)]
    Syscall(#[from] std::io::Error),
}

/// Friendly result alias :3
type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah/projects")])]
    fn deserialize_sync_spec() -> anyhow::Result<()> {
        let result: SyncSpec = r#"
            root = "$BLAH"

            [project.proj1.remotes.origin]
            fetch = "git@example.com:proj1.git"
            push = "git@example.com:proj1.git"

            [project.proj2.remotes.mirror]
            fetch = "https://example.com/proj2.git"
        "#
        .parse()?;

        assert_eq!(result.root, Some(PathBuf::from("/home/blah/projects")));
        assert_eq!(
            result.projects["proj1"].remotes["origin"].fetch.as_deref(),
            Some("git@example.com:proj1.git")
        );
        assert_eq!(result.projects["proj2"].remotes["mirror"].push, None);

        Ok(())
    }

    #[test]
    fn serialize_sync_spec() {
        let mut spec = SyncSpec::default();
        let mut remotes = BTreeMap::new();
        remotes.insert(
            "origin".to_owned(),
            RemoteSpec {
                fetch: Some("git@example.com:proj1.git".to_owned()),
                push: Some("git@example.com:proj1.git".to_owned()),
            },
        );
        spec.projects
            .insert("proj1".to_owned(), ProjectSpec { remotes });

        let result = spec.to_string();
        let expect = indoc! {r#"
            [project.proj1.remotes.origin]
            fetch = "git@example.com:proj1.git"
            push = "git@example.com:proj1.git"
        "#};
        assert_eq!(result, expect);
    }

    #[sealed_test]
    fn sweep_reports_stray_state() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let repository = Repository::init(root.join("proj1"))?;
        repository.remote("origin", "git@example.com:proj1.git")?;
        std::fs::write(root.join("proj1").join("stray.txt"), "blah")?;
        std::fs::create_dir(root.join("not_a_repo"))?;

        let reports = sweep(&root, &SyncOptions::default())?;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "proj1");
        assert_eq!(reports[0].origin.as_deref(), Some("git@example.com:proj1.git"));
        assert_eq!(reports[0].branches, Vec::<String>::new());
        assert_eq!(reports[0].stashes, 0);
        assert_eq!(reports[0].untracked, vec!["stray.txt".to_owned()]);
        assert!(!reports[0].fetched);

        Ok(())
    }

    #[sealed_test]
    fn sweep_honors_name_pattern() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        Repository::init(root.join("proj1"))?;
        Repository::init(root.join("other"))?;

        let options = SyncOptions {
            pattern: Some("proj*".to_owned()),
            ..Default::default()
        };
        let reports = sweep(&root, &options)?;
        let names = reports.iter().map(|report| report.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["proj1"]);

        Ok(())
    }

    #[test]
    fn spec_drift_flags_every_level() {
        let spec: SyncSpec = indoc! {r#"
            [project.proj1.remotes.origin]
            fetch = "git@example.com:proj1.git"

            [project.ghost.remotes.origin]
            fetch = "git@example.com:ghost.git"
        "#}
        .parse()
        .unwrap();

        let mut remotes = BTreeMap::new();
        remotes.insert(
            "origin".to_owned(),
            RemoteSpec {
                fetch: Some("git@example.com:elsewhere.git".to_owned()),
                push: Some("git@example.com:elsewhere.git".to_owned()),
            },
        );
        remotes.insert(
            "backup".to_owned(),
            RemoteSpec {
                fetch: Some("git@example.com:backup.git".to_owned()),
                push: Some("git@example.com:backup.git".to_owned()),
            },
        );
        let reports = vec![
            ProjectReport {
                name: "proj1".to_owned(),
                remotes,
                ..Default::default()
            },
            ProjectReport {
                name: "surprise".to_owned(),
                ..Default::default()
            },
        ];

        let warnings = spec_drift(&spec, &reports);
        assert!(warnings.contains(&"[surprise] unexpected project".to_owned()));
        assert!(warnings.contains(&"[ghost] expected project is missing".to_owned()));
        assert!(warnings.contains(&"[proj1] [backup] unexpected remote".to_owned()));
        assert!(warnings
            .iter()
            .any(|warning| warning.starts_with("[proj1] [origin] [fetch] expected")));
    }
}
