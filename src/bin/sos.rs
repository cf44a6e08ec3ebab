//! `sos` command-line interface.

use clap::{Args, Parser, Subcommand, ValueEnum};
use sos::config::{source_of, ConfigValue, FLAG_KEYS, LIST_KEYS, TEXT_KEYS};
use sos::merge::BlockKind;
use sos::{
    BranchOptions, CommitOptions, ConfigEdit, ConfigScope, ConflictResolver, DuplicateMode,
    FileChoice, GlobalConfig, LineChoice, LsStatus, MergeOperation, MoveOptions, OfflineOptions,
    Repository, RepositoryMode, Result, Selector, StoreError, SwitchOptions, UpdateOptions,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Offline version control for any working tree
#[derive(Parser, Debug)]
#[command(name = "sos")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run as if sos was started in this directory
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Per-user configuration file
    #[arg(long, global = true, env = "SOS_CONFIG")]
    config_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Insert,
    Remove,
    Both,
    Ask,
}

impl From<Policy> for MergeOperation {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Insert => MergeOperation::Insert,
            Policy::Remove => MergeOperation::Remove,
            Policy::Both => MergeOperation::Both,
            Policy::Ask => MergeOperation::Ask,
        }
    }
}

#[derive(Args, Debug)]
struct PatternArgs {
    /// Folder the pattern applies to
    folder: String,
    /// File name glob
    glob: String,
    /// Manage untracking patterns instead
    #[arg(long = "not")]
    negative: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Put the current directory under offline version control
    Offline {
        /// Name of the initial branch
        name: Option<String>,
        /// Initial commit message
        message: Option<String>,
        /// Version files matching tracking patterns only
        #[arg(long, conflicts_with = "picky")]
        track: bool,
        /// Stage tracking patterns per commit
        #[arg(long)]
        picky: bool,
        /// Compare file contents instead of modification times
        #[arg(long)]
        strict: bool,
        /// Store compressed blobs
        #[arg(long)]
        compress: bool,
        /// Wipe an existing repository store
        #[arg(long)]
        force: bool,
    },
    /// Remove the repository store
    Online {
        /// Ignore branches not synchronized upstream
        #[arg(long)]
        force: bool,
        /// Also ignore uncommitted changes
        #[arg(long)]
        force_dirty: bool,
    },
    /// Create a new branch
    Branch {
        name: Option<String>,
        message: Option<String>,
        /// Branch from the last commit instead of the file tree
        #[arg(long)]
        last: bool,
        /// Stay on the current branch
        #[arg(long)]
        stay: bool,
        /// Copy history instead of referencing it (with --last)
        #[arg(long)]
        full: bool,
    },
    /// Commit the file tree's changes
    Commit {
        message: Option<String>,
        /// Record the message as a tag
        #[arg(long)]
        tag: bool,
        #[arg(long)]
        strict: bool,
    },
    /// List changes against a revision
    Changes {
        #[arg(default_value = "")]
        selector: String,
        #[arg(long)]
        strict: bool,
    },
    /// Show line differences against a revision
    Diff {
        #[arg(default_value = "")]
        selector: String,
        /// Ignore whitespace differences
        #[arg(long)]
        ignore_whitespace: bool,
    },
    /// Repository summary
    Status,
    /// Make the file tree match another revision
    Switch {
        selector: String,
        #[arg(long)]
        force: bool,
        /// Only take over the target's tracking patterns
        #[arg(long)]
        meta: bool,
        #[arg(long)]
        strict: bool,
    },
    /// Integrate another revision into the file tree
    Update {
        selector: String,
        /// Policy for added and removed files
        #[arg(long, value_enum, default_value = "both")]
        files: Policy,
        /// Policy for lines of modified text files
        #[arg(long, value_enum)]
        lines: Option<Policy>,
        #[arg(long)]
        strict: bool,
    },
    /// Remove a branch
    Destroy {
        selector: String,
        #[arg(long)]
        force: bool,
    },
    /// Add a tracking pattern
    Add(PatternArgs),
    /// Remove a tracking pattern
    Remove(PatternArgs),
    /// List files with their versioning status
    Ls {
        #[arg(default_value = ".")]
        folder: String,
        #[arg(short, long)]
        recursive: bool,
        /// List tags instead
        #[arg(long)]
        tags: bool,
    },
    /// History of the current branch
    Log,
    /// Archive the repository store
    Dump { archive: PathBuf },
    /// Show or edit configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Rename files by pattern
    Move {
        source: String,
        target: String,
        /// Only rewrite the tracking pattern
        #[arg(long)]
        soft: bool,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Set {
        key: String,
        value: String,
        #[arg(long)]
        local: bool,
    },
    Unset {
        key: String,
        #[arg(long)]
        local: bool,
    },
    Add {
        key: String,
        value: String,
        #[arg(long)]
        local: bool,
    },
    Rm {
        key: String,
        value: String,
        #[arg(long)]
        local: bool,
        /// Drop an emptied local list
        #[arg(long)]
        prune: bool,
    },
    Show,
}

/// Resolver asking on the terminal.
struct Prompt;

impl Prompt {
    fn ask(question: &str, keys: &[char]) -> Result<char> {
        let stdin = io::stdin();
        loop {
            print!("{} ", question);
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Err(StoreError::InvalidOperation("no answer on stdin".into()));
            }
            let answer = line.trim().chars().next().map(|c| c.to_ascii_lowercase());
            if let Some(key) = answer.filter(|c| keys.contains(c)) {
                return Ok(key);
            }
        }
    }
}

impl ConflictResolver for Prompt {
    fn resolve_file(&mut self, path: &str, binary: bool) -> Result<FileChoice> {
        let choice = if binary {
            Self::ask(
                &format!("{} differs (binary). Keep (m)ine or take (t)heirs?", path),
                &['m', 't'],
            )?
        } else {
            Self::ask(
                &format!("{} differs. Keep (m)ine, take (t)heirs or merge (l)ines?", path),
                &['m', 't', 'l'],
            )?
        };
        Ok(match choice {
            't' => FileChoice::Theirs,
            'l' => FileChoice::Merge,
            _ => FileChoice::Mine,
        })
    }

    fn resolve_lines(&mut self, path: &str, mine: &[String], theirs: &[String]) -> Result<LineChoice> {
        println!("{}:", path);
        for line in mine {
            println!("  mine   | {}", line);
        }
        for line in theirs {
            println!("  theirs | {}", line);
        }
        let choice = Self::ask(
            "Keep (m)ine, take (t)heirs or (b)oth?",
            &['m', 't', 'b'],
        )?;
        Ok(match choice {
            't' => LineChoice::Theirs,
            'b' => LineChoice::Both,
            _ => LineChoice::Mine,
        })
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("SOS_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn global_config(path: Option<PathBuf>) -> Result<GlobalConfig> {
    let path = path.or_else(|| std::env::var_os("HOME").map(|home| Path::new(&home).join(".sos.json")));
    match path {
        Some(path) => GlobalConfig::load(path),
        None => Ok(GlobalConfig::empty()),
    }
}

fn open(cwd: &Path, global: GlobalConfig) -> Result<Repository> {
    let root = Repository::find_root(cwd)
        .ok_or_else(|| StoreError::NotOffline(cwd.display().to_string()))?;
    debug!(root = %root.display(), "Found repository");
    Repository::open(root, global)
}

fn print_changes(changes: &sos::ChangeSet) {
    for (path, (origin, _)) in &changes.moves {
        println!("MOV {} <- {}", path, origin);
    }
    for (path, _) in changes.real_additions() {
        println!("ADD {}", path);
    }
    for (path, _) in changes.real_deletions() {
        println!("DEL {}", path);
    }
    for path in changes.modifications.keys() {
        println!("MOD {}", path);
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = match cli.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir()?,
    };
    let global = global_config(cli.config_file)?;

    match cli.command {
        Command::Offline {
            name,
            message,
            track,
            picky,
            strict,
            compress,
            force,
        } => {
            let mode = if picky {
                Some(RepositoryMode::Picky)
            } else if track {
                Some(RepositoryMode::Track)
            } else {
                None
            };
            let repo = Repository::offline(
                &cwd,
                global,
                OfflineOptions {
                    mode,
                    strict: strict.then_some(true),
                    compress: compress.then_some(true),
                    force,
                    name,
                    message,
                },
            )?;
            println!("Offline repository in {} ({} mode)", repo.root().display(), repo.mode());
        }
        Command::Online { force, force_dirty } => {
            open(&cwd, global)?.online(force, force_dirty)?;
            println!("Repository is online again");
        }
        Command::Branch {
            name,
            message,
            last,
            stay,
            full,
        } => {
            let mut repo = open(&cwd, global)?;
            let id = repo.branch(BranchOptions {
                name,
                last,
                stay,
                duplicate: if full { DuplicateMode::Full } else { DuplicateMode::Fast },
                message,
            })?;
            println!("Created branch {}", id);
        }
        Command::Commit {
            message,
            tag,
            strict,
        } => {
            let mut repo = open(&cwd, global)?;
            let report = repo.commit(CommitOptions {
                message,
                tag,
                strict,
            })?;
            println!(
                "Committed {} (+{} -{} ~{}, {} moved)",
                report.revision,
                report.additions,
                report.deletions,
                report.modifications,
                report.moves
            );
        }
        Command::Changes { selector, strict } => {
            let repo = open(&cwd, global)?;
            let changes = repo.changes(&Selector::parse(&selector)?, strict)?;
            if changes.is_empty() {
                println!("No changes");
            }
            print_changes(&changes);
        }
        Command::Diff {
            selector,
            ignore_whitespace,
        } => {
            let repo = open(&cwd, global)?;
            let report = repo.diff(&Selector::parse(&selector)?, ignore_whitespace)?;
            print_changes(&report.changes);
            for file in &report.files {
                println!("--- {} ({})", file.path, report.against);
                let Some(blocks) = &file.blocks else {
                    println!("    binary file differs");
                    continue;
                };
                for block in blocks {
                    match block.kind {
                        BlockKind::Keep => {}
                        BlockKind::Insert => {
                            for line in &block.lines {
                                println!("{:>5} +  {}", block.new_line + 1, line);
                            }
                        }
                        BlockKind::Remove => {
                            for line in &block.lines {
                                println!("{:>5} -  {}", block.old_line + 1, line);
                            }
                        }
                        BlockKind::Replace => {
                            for line in &block.replaces {
                                println!("{:>5} -~ {}", block.old_line + 1, line);
                            }
                            for line in &block.lines {
                                println!("{:>5} +~ {}", block.new_line + 1, line);
                            }
                        }
                    }
                }
            }
        }
        Command::Status => {
            let repo = open(&cwd, global)?;
            let status = repo.status()?;
            println!(
                "Mode {}{}{}",
                status.mode,
                if status.strict { ", strict" } else { "" },
                if status.compress { ", compressed" } else { "" }
            );
            for branch in &status.branches {
                println!(
                    "{} {} [{}] {} revision(s){}",
                    if branch.current { "*" } else { " " },
                    branch.info.number,
                    branch.info.label(),
                    branch.revisions,
                    if branch.info.in_sync { ", in sync" } else { "" }
                );
                for pattern in &branch.info.tracked {
                    println!("    track   {}", pattern);
                }
                for pattern in &branch.info.untracked {
                    println!("    untrack {}", pattern);
                }
            }
            println!("{}", if status.changed { "File tree has changes" } else { "File tree is clean" });
        }
        Command::Switch {
            selector,
            force,
            meta,
            strict,
        } => {
            let mut repo = open(&cwd, global)?;
            let report = repo.switch(&Selector::parse(&selector)?, SwitchOptions { force, meta, strict })?;
            if let Some(target) = report.target {
                println!(
                    "Switched to {} ({} restored, {} deleted, {} modified)",
                    target,
                    report.restored.len(),
                    report.deleted.len(),
                    report.modified.len()
                );
            }
        }
        Command::Update {
            selector,
            files,
            lines,
            strict,
        } => {
            let mut repo = open(&cwd, global)?;
            let report = repo.update(
                &Selector::parse(&selector)?,
                UpdateOptions {
                    files: files.into(),
                    lines: lines.map(Into::into),
                    strict,
                },
                &mut Prompt,
            )?;
            for path in &report.added {
                println!("ADD {}", path);
            }
            for path in &report.removed {
                println!("DEL {}", path);
            }
            for path in &report.theirs {
                println!("THR {}", path);
            }
            for path in &report.merged {
                println!("MRG {}", path);
            }
        }
        Command::Destroy { selector, force } => {
            let mut repo = open(&cwd, global)?;
            let removed = repo.destroy(&Selector::parse(&selector)?, force)?;
            println!(
                "Removed branch {} (now on {})",
                removed.info.label(),
                removed.current
            );
        }
        Command::Add(args) => {
            let mut repo = open(&cwd, global)?;
            let pattern = repo.add_pattern(&args.folder, &args.glob, args.negative)?;
            println!("{} {}", if args.negative { "Untracking" } else { "Tracking" }, pattern);
        }
        Command::Remove(args) => {
            let mut repo = open(&cwd, global)?;
            let pattern = repo.remove_pattern(&args.folder, &args.glob, args.negative)?;
            println!("Removed pattern {}", pattern);
        }
        Command::Ls {
            folder,
            recursive,
            tags,
        } => {
            let repo = open(&cwd, global)?;
            if tags {
                for tag in repo.tags() {
                    println!("{}", tag);
                }
                return Ok(());
            }
            for entry in repo.ls(&folder, recursive)? {
                match entry.status {
                    LsStatus::Ignored(pattern) => println!("IGN {}  ({})", entry.path, pattern),
                    LsStatus::Tracked(patterns) => {
                        println!("TRK {}  ({})", entry.path, patterns.join(", "))
                    }
                    LsStatus::Plain => println!("    {}", entry.path),
                }
            }
        }
        Command::Log => {
            let repo = open(&cwd, global)?;
            for entry in repo.log()? {
                println!(
                    "r{:<4} {:>14} +{} -{} ~{} (text +{}) {} file(s)  {}",
                    entry.commit.number.0,
                    entry.commit.created.0 / 1000,
                    entry.added,
                    entry.removed,
                    entry.modified,
                    entry.text_added,
                    entry.files,
                    entry.commit.message.as_deref().unwrap_or("")
                );
            }
        }
        Command::Dump { archive } => {
            let repo = open(&cwd, global)?;
            let report = repo.dump(&archive)?;
            println!("Wrote {} file(s) to {}", report.files, report.archive.display());
        }
        Command::Config { action } => config_command(&cwd, global, action)?,
        Command::Move {
            source,
            target,
            soft,
            force,
        } => {
            let mut repo = open(&cwd, global)?;
            let report = repo.move_files(&source, &target, MoveOptions { soft, force })?;
            for (from, to) in &report.renamed {
                println!("{} -> {}", from, to);
            }
            println!("Now tracking {}", report.pattern);
        }
    }
    Ok(())
}

fn config_command(cwd: &Path, mut global: GlobalConfig, action: ConfigAction) -> Result<()> {
    let (edit, local) = match action {
        ConfigAction::Show => {
            let repo = open(cwd, global.clone()).ok();
            let empty = Default::default();
            let (local, global_layer) = match &repo {
                Some(repo) => repo.config_layers(),
                None => (&empty, global.overlay()),
            };
            let config = match &repo {
                Some(repo) => repo.config().clone(),
                None => sos::Config::layered(&empty, global.overlay())?,
            };
            for key in FLAG_KEYS.iter().chain(LIST_KEYS).chain(TEXT_KEYS) {
                let value = match config.value_of(key) {
                    Some(ConfigValue::Flag(v)) => (if v { "on" } else { "off" }).to_string(),
                    Some(ConfigValue::List(v)) => v.join(";"),
                    Some(ConfigValue::Text(v)) => v,
                    None => String::new(),
                };
                println!(
                    "{:<20} {:<8} {}",
                    key,
                    format!("{:?}", source_of(key, local, global_layer)),
                    value
                );
            }
            return Ok(());
        }
        ConfigAction::Set { key, value, local } => (ConfigEdit::Set { key, value }, local),
        ConfigAction::Unset { key, local } => (ConfigEdit::Unset { key }, local),
        ConfigAction::Add { key, value, local } => (ConfigEdit::Add { key, value }, local),
        ConfigAction::Rm {
            key,
            value,
            local,
            prune,
        } => (ConfigEdit::Remove { key, value, prune }, local),
    };

    if local {
        open(cwd, global)?.edit_config(&edit, ConfigScope::Local)?;
    } else {
        global.edit(&edit)?;
    }
    println!("Configuration updated");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sos: {}", e);
            ExitCode::FAILURE
        }
    }
}
