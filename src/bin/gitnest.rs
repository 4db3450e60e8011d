// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use gitnest::{
    path::discover_root,
    reconcile::{Kind, Status},
    sync::{self, SyncOptions, SyncSpec},
    workspace::Workspace,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    process::exit,
    sync::Mutex,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "gitnest [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Run as if gitnest was started in <path> instead of the current
    /// working directory.
    #[arg(short = 'C', global = true, value_name = "path")]
    pub directory: Option<PathBuf>,

    /// Suppress console output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Mirror log output to target file.
    #[arg(long, global = true, value_name = "path")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let start = match &self.directory {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };

        match self.command {
            Command::Init => run_init(start),
            Command::Status => run_status(start),
            Command::Diff(opts) => run_diff(start, opts),
            Command::Add(opts) => run_add(start, opts),
            Command::Rm(opts) => run_rm(start, opts),
            Command::Restore(opts) => run_restore(start, opts),
            Command::Sync(opts) => run_sync(start, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize a gitnest workspace.
    Init,

    /// Show changes to tracked projects.
    Status,

    /// Show configuration differences between snapshots and disk.
    #[command(override_usage = "gitnest diff [options] [<project_name>]...")]
    Diff(DiffOptions),

    /// Begin or refresh tracking of projects.
    #[command(override_usage = "gitnest add [options] <project_name>...")]
    Add(AddOptions),

    /// Stop tracking projects without touching them on disk.
    #[command(override_usage = "gitnest rm [options] <project_name>...")]
    Rm(RmOptions),

    /// Restore projects from their last snapshot.
    #[command(override_usage = "gitnest restore [options] [<project_name>]...")]
    Restore(RestoreOptions),

    /// Fetch and report on every project repository.
    #[command(override_usage = "gitnest sync [options] [<pattern>]")]
    Sync(SyncCliOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DiffOptions {
    /// Projects to render; all changed projects when empty.
    #[arg(value_name = "project_name")]
    pub names: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Projects to snapshot.
    #[arg(required = true, value_name = "project_name")]
    pub names: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RmOptions {
    /// Projects to stop tracking.
    #[arg(required = true, value_name = "project_name")]
    pub names: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RestoreOptions {
    /// Restore all tracked projects.
    #[arg(short, long)]
    pub all: bool,

    /// Projects to restore.
    #[arg(required_unless_present = "all", value_name = "project_name")]
    pub names: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncCliOptions {
    /// Ignore projects whose name does not match this glob pattern.
    #[arg(value_name = "pattern")]
    pub pattern: Option<String>,

    /// Update all remotes (includes tags and pruning).
    #[arg(short, long)]
    pub fetch: bool,

    /// Path to a sync spec listing expected remotes.
    #[arg(short, long, value_name = "path")]
    pub spec: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_tracing(&cli) {
        eprintln!("{error:?}");
        exit(1);
    }

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    let registry = tracing_subscriber::registry().with(filter);

    // Keep the error stream and the report stream separate; status and
    // diff output goes to stdout, everything logged goes to stderr.
    let console = || {
        fmt::layer()
            .compact()
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
    };

    match (&cli.log_file, cli.quiet) {
        (Some(path), true) => {
            let file = std::fs::File::create(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        (Some(path), false) => {
            let file = std::fs::File::create(path)?;
            registry
                .with(console())
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        (None, true) => registry.init(),
        (None, false) => registry.with(console()).init(),
    }

    Ok(())
}

fn run_init(root: PathBuf) -> Result<()> {
    let workspace = Workspace::init(&root)?;
    println!(
        "Initialized gitnest workspace in {}",
        workspace.root().display()
    );

    Ok(())
}

fn run_status(start: PathBuf) -> Result<()> {
    let workspace = Workspace::discover(&start)?;
    let status = workspace.status()?;
    render_status(&status, workspace.root());

    Ok(())
}

fn render_status(status: &Status, root: &Path) {
    let changes = status
        .records()
        .iter()
        .filter(|record| matches!(record.change.kind(), Kind::Modified | Kind::Deleted))
        .collect::<Vec<_>>();

    if !changes.is_empty() {
        println!("Changes");
        println!("  (use \"gitnest add/rm <project>...\" to accept changes)");
        println!("  (use \"gitnest restore <project>...\" to undo changes)");
        for record in changes {
            let prefix = match record.change.kind() {
                Kind::Deleted => "deleted:  ",
                _ => "modified: ",
            };
            println!("\t{prefix}{}", record.name);
        }
        println!();
    } else if !status.tracks_anything() {
        println!("No projects are being tracked yet");
        println!();
    }

    let untracked = status.of_kind(Kind::Untracked).collect::<Vec<_>>();
    if !untracked.is_empty() {
        println!("Untracked projects");
        println!("  (use \"gitnest add <project>...\" to begin tracking)");
        for record in untracked {
            let suffix = if root.join(&record.name).is_dir() { "/" } else { "" };
            println!("\t{}{suffix}", record.name);
        }
        println!();
    }
}

fn run_diff(start: PathBuf, opts: DiffOptions) -> Result<()> {
    let workspace = Workspace::discover(&start)?;
    for diff in workspace.diff(&opts.names)? {
        if !diff.text.is_empty() {
            print!("{}", diff.text);
        }
    }

    Ok(())
}

fn run_add(start: PathBuf, opts: AddOptions) -> Result<()> {
    let mut workspace = Workspace::discover(&start)?;
    match workspace.add(&opts.names)? {
        Some(id) => info!("recorded snapshot {id}"),
        None => info!("snapshots already up to date"),
    }

    Ok(())
}

fn run_rm(start: PathBuf, opts: RmOptions) -> Result<()> {
    let mut workspace = Workspace::discover(&start)?;
    let id = workspace.rm(&opts.names)?;
    info!("recorded snapshot {id}");

    Ok(())
}

fn run_restore(start: PathBuf, opts: RestoreOptions) -> Result<()> {
    let workspace = Workspace::discover(&start)?;
    let names = if opts.all {
        workspace.tracked()?.into_iter().collect::<Vec<_>>()
    } else {
        opts.names
    };
    workspace.restore(&names)?;

    Ok(())
}

fn run_sync(start: PathBuf, opts: SyncCliOptions) -> Result<()> {
    let spec = opts.spec.map(SyncSpec::load).transpose()?;

    // Sweep the spec's root when it names one, else the enclosing
    // workspace, else the starting directory itself.
    let root = spec
        .as_ref()
        .and_then(|spec| spec.root.clone())
        .or_else(|| discover_root(&start).ok())
        .unwrap_or(start);

    let options = SyncOptions {
        pattern: opts.pattern,
        fetch: opts.fetch,
        spec,
    };
    sync::sweep(root, &options)?;

    Ok(())
}
