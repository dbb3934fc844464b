//! assetlink - keep `@link@` asset markers and their content store in sync
//!
//! assetlink scans source files for `@link@:<path>` markers, checks them
//! against a content store directory, and cleans up broken markers and
//! orphaned store files.

use assetlink::output::{
    DoctorReport, render_attach, render_check, render_clean, render_doctor, render_rules,
    render_scan,
};
use assetlink::watcher::{WatcherEvent, WatcherManager};
use assetlink::{ChangeKind, Engine, OutputFormat, Summary, Workspace, filter_picks};
use assetlink_core::{CancellationFlag, CaseFolding, CleanupSelection};
use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr, bail};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "assetlink", version, about)]
struct Args {
    /// Subcommand to run
    #[command(subcommand)]
    command: Command,

    /// Workspace root (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Path to config file (default: .config/assetlink/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log diagnostic detail
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: text, json
    #[arg(short, long, global = true)]
    format: Option<String>,
}

/// Subcommands
#[derive(Debug, Subcommand)]
enum Command {
    /// List markers per file with their status
    Scan {
        /// Only this file (relative to the workspace root)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Report broken markers and orphan store files
    Check {
        /// Only this file (relative to the workspace root)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Exit non-zero if anything is broken or orphaned
        #[arg(long)]
        strict: bool,
    },

    /// Remove broken markers and delete orphan store files
    Clean {
        /// Only broken markers in this file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Select broken markers
        #[arg(long)]
        broken: bool,

        /// Select orphan store files
        #[arg(long)]
        orphans: bool,

        /// Keep only items whose label or location contains this text
        #[arg(long = "match", value_name = "TEXT")]
        pattern: Option<String>,

        /// Show what would be cleaned without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Confirm the cleanup
        #[arg(short, long)]
        yes: bool,
    },

    /// Copy files into the store and print (or insert) their markers
    Attach {
        /// Files to copy into the store
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Store sub-directory (default: images/ for images, docs/ otherwise)
        #[arg(long)]
        dir: Option<String>,

        /// File name (without extension) for the copies
        #[arg(long)]
        name: Option<String>,

        /// Insert marker lines into this file
        #[arg(long)]
        into: Option<PathBuf>,

        /// 1-based line to insert before (default: end of file)
        #[arg(long, requires = "into")]
        line: Option<usize>,
    },

    /// Show or edit comment syntax rules
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },

    /// Print the resolved workspace setup
    Doctor,

    /// Keep re-checking as files change
    Watch,
}

#[derive(Debug, Subcommand)]
enum RulesCommand {
    /// List configured rules and the effective extension map
    List,

    /// Remove extensions from the configured rules
    Remove {
        /// Extensions to remove, with or without a dot
        #[arg(required = true)]
        extensions: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (workspace, format) = match open(&args) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };
    init_tracing(args.verbose || workspace.settings().verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} Failed to start runtime: {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args.command, workspace, format)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// Resolve the output format and open the workspace before anything runs.
fn open(args: &Args) -> Result<(Workspace, OutputFormat)> {
    let format = match args.format.as_deref() {
        None => OutputFormat::Text,
        Some(s) => match OutputFormat::from_str(s) {
            Some(format) => format,
            None => bail!("Unknown format {s:?}; expected text or json"),
        },
    };

    let root = match &args.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().wrap_err("Failed to get current directory")?,
    };
    let workspace = Workspace::open(&root, args.config.as_deref())?;
    Ok((workspace, format))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "assetlink=debug,assetlink_core=debug"
    } else {
        "assetlink=info,assetlink_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(command: Command, workspace: Workspace, format: OutputFormat) -> Result<ExitCode> {
    match command {
        Command::Scan { file } => run_scan_command(&workspace, file.as_deref(), format).await,
        Command::Check { file, strict } => {
            run_check_command(&workspace, file.as_deref(), strict, format).await
        }
        Command::Clean {
            file,
            broken,
            orphans,
            pattern,
            dry_run,
            yes,
        } => {
            let options = CleanOptions {
                broken,
                orphans,
                pattern,
                dry_run,
                yes,
            };
            run_clean_command(&workspace, file.as_deref(), options, format).await
        }
        Command::Attach {
            files,
            dir,
            name,
            into,
            line,
        } => {
            let target = AttachTarget {
                dir: dir.as_deref(),
                name: name.as_deref(),
                into: into.as_deref(),
                line,
            };
            run_attach_command(&workspace, &files, target, format).await
        }
        Command::Rules { action } => run_rules_command(&workspace, action, format),
        Command::Doctor => run_doctor_command(&workspace, format).await,
        Command::Watch => run_watch_command(workspace, format).await,
    }
}

/// Cancel the flag on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationFlag {
    let cancel = CancellationFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Cancelling...", "->".blue().bold());
            flag.cancel();
        }
    });
    cancel
}

async fn run_scan_command(
    workspace: &Workspace,
    file: Option<&Path>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let scope = workspace.scope(file)?;
    if scope.is_workspace() {
        eprintln!(
            "{} Scanning {}...",
            "->".blue().bold(),
            workspace.root().display()
        );
    }
    let (scan, result) = workspace.check(scope, &cancel_on_ctrl_c()).await?;
    print!(
        "{}",
        with_newline(render_scan(&scan, &result, workspace.root(), format))
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_check_command(
    workspace: &Workspace,
    file: Option<&Path>,
    strict: bool,
    format: OutputFormat,
) -> Result<ExitCode> {
    let scope = workspace.scope(file)?;
    let (scan, result) = workspace.check(scope, &cancel_on_ctrl_c()).await?;
    if scan.cancelled {
        bail!("Check cancelled");
    }
    print!(
        "{}",
        with_newline(render_check(&result, workspace.root(), format))
    );

    if strict && !result.is_clean() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

struct CleanOptions {
    broken: bool,
    orphans: bool,
    pattern: Option<String>,
    dry_run: bool,
    yes: bool,
}

async fn run_clean_command(
    workspace: &Workspace,
    file: Option<&Path>,
    options: CleanOptions,
    format: OutputFormat,
) -> Result<ExitCode> {
    let scope = workspace.scope(file)?;
    if !options.dry_run && !options.yes {
        bail!("clean changes files; pass --yes to confirm or --dry-run to preview");
    }
    if !scope.is_workspace() && options.orphans {
        bail!("--orphans needs a workspace scan; drop --file");
    }

    let cancel = cancel_on_ctrl_c();
    let (scan, result) = workspace.check(scope, &cancel).await?;
    if scan.cancelled {
        bail!("Scan cancelled; nothing was changed");
    }

    let items = filter_picks(
        result.pick_list(workspace.root()),
        options.broken,
        options.orphans,
        options.pattern.as_deref(),
    );

    if options.dry_run || items.is_empty() {
        print!("{}", with_newline(render_clean(&items, None, format)));
        return Ok(ExitCode::SUCCESS);
    }

    let selection = CleanupSelection::from_picks(&items);
    eprintln!(
        "{} Cleaning {} item(s)...",
        "->".blue().bold(),
        selection.len()
    );
    let report = workspace.executor().apply(&selection, &cancel).await;
    print!(
        "{}",
        with_newline(render_clean(&items, Some(&report), format))
    );

    if report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Where `attach` puts the copies and their markers
struct AttachTarget<'a> {
    dir: Option<&'a str>,
    name: Option<&'a str>,
    into: Option<&'a Path>,
    line: Option<usize>,
}

async fn run_attach_command(
    workspace: &Workspace,
    files: &[PathBuf],
    target: AttachTarget<'_>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let outcome = workspace
        .attach(files, target.dir, target.name, target.into, target.line)
        .await?;
    print!(
        "{}",
        with_newline(render_attach(&outcome, workspace.root(), format))
    );
    Ok(ExitCode::SUCCESS)
}

fn run_rules_command(
    workspace: &Workspace,
    action: RulesCommand,
    format: OutputFormat,
) -> Result<ExitCode> {
    match action {
        RulesCommand::List => {}
        RulesCommand::Remove { extensions } => {
            let before = workspace.registry().effective_map().len();
            workspace.remove_rules(&extensions)?;
            let after = workspace.registry().effective_map().len();
            eprintln!(
                "{} Removed {} extension(s); saved {}",
                "->".blue().bold(),
                before.saturating_sub(after),
                workspace.config().path().display()
            );
        }
    }
    let rules = workspace.config().config().rules;
    let map = workspace.registry().effective_map();
    print!("{}", with_newline(render_rules(&rules, &map, format)));
    Ok(ExitCode::SUCCESS)
}

async fn run_doctor_command(workspace: &Workspace, format: OutputFormat) -> Result<ExitCode> {
    let settings = workspace.settings();
    let map = workspace.registry().effective_map();
    let filter = workspace.scanner().filter();
    let candidates = workspace.scanner().candidates().await?;
    let config_path = workspace.config().path();

    let report = DoctorReport {
        workspace_root: workspace.root().display().to_string(),
        config_path: config_path.display().to_string(),
        config_found: config_path.is_file(),
        store_root: settings.store_root.display().to_string(),
        store_exists: settings.store_root.is_dir(),
        case_insensitive: settings.case == CaseFolding::Insensitive,
        extensions: map.extensions().map(str::to_string).collect(),
        include: filter.include,
        exclude: filter.exclude,
        candidate_files: candidates.files.len(),
        widened: candidates.widened,
    };
    print!("{}", with_newline(render_doctor(&report, format)));
    Ok(ExitCode::SUCCESS)
}

async fn run_watch_command(workspace: Workspace, format: OutputFormat) -> Result<ExitCode> {
    let engine = Engine::new(workspace);

    let (summary, elapsed) = engine.rebuild().await?;
    print_summary(&summary, format, elapsed);

    let (tx, mut rx) = tokio::sync::mpsc::channel::<WatcherEvent>(16);
    let mut watcher = WatcherManager::new(
        engine.config_path().to_path_buf(),
        Duration::from_millis(200),
        tx,
    )?;
    watcher.reconfigure(&engine.watch_dirs().await)?;
    info!(
        "Watching {} directories; Ctrl-C to stop",
        watcher.watched_dirs().len()
    );

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    WatcherEvent::Reconfigure => {
                        let update = engine.reconfigure().await;
                        if let Some(e) = engine.config_error().await {
                            error!("{e}");
                        }
                        if let Err(e) = watcher.reconfigure(&engine.watch_dirs().await) {
                            error!("Failed to reconfigure watcher: {e:#}");
                        }
                        match update {
                            Ok((summary, elapsed)) => print_summary(&summary, format, elapsed),
                            Err(e) => error!("Rebuild failed: {e:#}"),
                        }
                    }
                    WatcherEvent::FilesChanged(paths) => {
                        let start = Instant::now();
                        match engine.on_files_changed(&paths).await {
                            Ok((ChangeKind::Ignored, _)) => {}
                            Ok((_, summary)) => print_summary(&summary, format, start.elapsed()),
                            Err(e) => error!("Update failed: {e:#}"),
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{} Stopped", "->".blue().bold());
                break;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &Summary, format: OutputFormat, elapsed: Duration) {
    match format {
        OutputFormat::Json => {
            println!("{}", facet_json::to_string(summary).unwrap_or_default());
        }
        OutputFormat::Text => {
            let status = if summary.broken == 0 && summary.orphans == 0 {
                "ok".green().bold().to_string()
            } else {
                "!!".red().bold().to_string()
            };
            println!(
                "{} {} {}",
                status,
                summary.one_line(),
                format!("({}ms)", elapsed.as_millis()).dimmed()
            );
        }
    }
}

fn with_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_clean_flags() {
        let args = Args::parse_from([
            "assetlink", "--root", "/ws", "clean", "--broken", "--match", "logo", "--dry-run",
        ]);
        assert_eq!(args.root, Some(PathBuf::from("/ws")));
        match args.command {
            Command::Clean {
                broken,
                orphans,
                pattern,
                dry_run,
                yes,
                ..
            } => {
                assert!(broken && dry_run);
                assert!(!orphans && !yes);
                assert_eq!(pattern.as_deref(), Some("logo"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_attach_flags() {
        let args = Args::parse_from([
            "assetlink", "attach", "a.png", "b.png", "--name", "login flow", "--into", "main.py",
            "--line", "3",
        ]);
        match args.command {
            Command::Attach {
                files,
                dir,
                name,
                into,
                line,
            } => {
                assert_eq!(files, vec![PathBuf::from("a.png"), PathBuf::from("b.png")]);
                assert_eq!(dir, None);
                assert_eq!(name.as_deref(), Some("login flow"));
                assert_eq!(into, Some(PathBuf::from("main.py")));
                assert_eq!(line, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_line_requires_into() {
        assert!(Args::try_parse_from(["assetlink", "attach", "a.png", "--line", "3"]).is_err());
    }
}
