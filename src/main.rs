use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use pagesync::cli::{BaselineCommand, Cli, Command, SyncArgs};
use pagesync::config::Config;
use pagesync::output::SyncEvent;
use pagesync::remote::MemoryRemote;
use pagesync::state::SyncStateFile;
use pagesync::{BaselineStore, SyncOrchestrator, SyncPassResult};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().as_str()));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    match &cli.command {
        Command::Sync(args) => run_sync(&cli.config, args, cli.quiet),
        Command::Baseline {
            baseline_dir,
            command,
        } => run_baseline(&cli.config, baseline_dir.as_deref(), command),
    }
}

fn run_sync(config_path: &Path, args: &SyncArgs, quiet: bool) -> Result<()> {
    let mut config = Config::load(config_path)?;
    config.override_force(args.force_mode());
    if let Some(limit) = args.max_file_size {
        config.max_file_size = limit;
    }

    let snapshot = config
        .remote_snapshot
        .clone()
        .context("remote_snapshot is not set in the config")?;
    let remote = MemoryRemote::load_json(&snapshot)?;
    let baseline = BaselineStore::new(&config.baseline_dir);
    baseline.initialize()?;
    let mut state = SyncStateFile::load(&config.state_file)?;

    if !quiet && !args.json {
        println!("pagesync v{}", env!("CARGO_PKG_VERSION"));
        println!("Syncing {} tree(s) against {}\n", config.trees.len(), snapshot.display());
    }

    let started = Utc::now();
    let timer = Instant::now();
    let orchestrator = SyncOrchestrator::new(&remote, &baseline).with_max_file_size(config.max_file_size);
    let outcome = sync_and_resolve(&orchestrator, &config, state.last_sync, args, quiet);

    // Pages may have been written remotely before a later tree failed.
    remote.save_json(&snapshot)?;

    let conflicts = match outcome {
        Ok(conflicts) => conflicts,
        Err(e) => {
            if args.json {
                SyncEvent::Error {
                    anchor_id: None,
                    error: e.to_string(),
                }
                .emit();
            }
            return Err(e);
        }
    };

    let clean = conflicts.is_none();
    if clean {
        state.mark_synced(started);
        state.save(&config.state_file)?;
    }

    if args.json {
        SyncEvent::Summary {
            trees: config.trees.len(),
            conflicts: conflicts.unwrap_or(0),
            clean,
            duration_secs: timer.elapsed().as_secs_f64(),
        }
        .emit();
    } else if !quiet {
        match conflicts {
            None => println!("\n{}", "✓ Sync complete".green().bold()),
            Some(0) => println!("\n{}", "✓ Sync complete with skipped pages".yellow().bold()),
            Some(n) => {
                println!("\n{}", format!("! {} conflict(s) need attention", n).yellow().bold());
                println!("  Resolve the markers, then run: pagesync sync --force-push");
            }
        }
        println!("  Duration: {}", format_duration(timer.elapsed()).cyan());
    }
    Ok(())
}

/// Returns `None` when every tree finished cleanly, otherwise the number of
/// conflicts still open.
fn sync_and_resolve(
    orchestrator: &SyncOrchestrator<'_, MemoryRemote>,
    config: &Config,
    last_sync: Option<chrono::DateTime<Utc>>,
    args: &SyncArgs,
    quiet: bool,
) -> Result<Option<usize>> {
    let results = orchestrator.sync_all(config, last_sync)?;

    let mut clean = true;
    let mut open = 0;
    for (tree, mut result) in config.trees.iter().zip(results) {
        report_pass(&result, args.json, quiet);

        let conflicts = std::mem::take(&mut result.conflicts);
        clean &= result.is_clean();
        if conflicts.is_empty() {
            continue;
        }

        let unresolved = if args.no_merge {
            conflicts
        } else {
            let outcome = orchestrator.resolve_conflicts(tree, &tree.staging_dir(config), conflicts)?;
            for id in &outcome.merged {
                if args.json {
                    SyncEvent::Merged {
                        anchor_id: tree.anchor_id.clone(),
                        document_id: id.clone(),
                    }
                    .emit();
                } else if !quiet {
                    println!("  {} {}", "merged".green(), id);
                }
            }
            clean &= outcome.failed == 0;
            outcome.unresolved
        };

        for conflict in &unresolved {
            if args.json {
                SyncEvent::Conflict {
                    anchor_id: tree.anchor_id.clone(),
                    document_id: conflict.document_id.clone(),
                    title: conflict.title.clone(),
                    path: conflict.local_path.clone(),
                }
                .emit();
            } else if !quiet {
                println!(
                    "  {} {} ({})",
                    "conflict".red(),
                    conflict.local_path.display(),
                    conflict.document_id
                );
            }
        }
        clean &= unresolved.is_empty();
        open += unresolved.len();
    }

    Ok(if clean { None } else { Some(open) })
}

fn report_pass(result: &SyncPassResult, json: bool, quiet: bool) {
    if json {
        SyncEvent::pass(result).emit();
        return;
    }
    if quiet {
        return;
    }

    println!("{} {} ({})", "Tree".bold(), result.anchor_id, result.direction);
    println!("  Pushed:   {}", count(result.pushed_count, |s| s.green()));
    println!("  Pulled:   {}", count(result.pulled_count, |s| s.green()));
    println!("  Deleted:  {}", count(result.deleted_count, |s| s.red()));
    if result.skipped_count > 0 {
        println!("  Skipped:  {}", result.skipped_count.to_string().yellow());
    }
    if result.failed_count > 0 {
        println!("  Failed:   {}", result.failed_count.to_string().red());
    }
}

fn count(n: usize, paint: impl Fn(&str) -> colored::ColoredString) -> colored::ColoredString {
    if n > 0 {
        paint(&n.to_string())
    } else {
        n.to_string().bright_black()
    }
}

fn run_baseline(config_path: &Path, baseline_dir: Option<&Path>, command: &BaselineCommand) -> Result<()> {
    let root: PathBuf = match baseline_dir {
        Some(dir) => dir.to_path_buf(),
        None => Config::load(config_path)?.baseline_dir,
    };
    let store = BaselineStore::new(root);

    match command {
        BaselineCommand::Init => {
            store.initialize()?;
            println!("Baseline repository ready at {}", store.root().display());
        }
        BaselineCommand::Get { id } => match store.get(id)? {
            Some(content) => print!("{}", content),
            None => anyhow::bail!("No baseline stored for document {}", id),
        },
        BaselineCommand::Update { id, file } => {
            let content = match file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf).context("Failed to read stdin")?;
                    buf
                }
            };
            store.update(id, &content)?;
        }
        BaselineCommand::Merge { id, local, remote } => {
            let local = std::fs::read_to_string(local)
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let remote = std::fs::read_to_string(remote)
                .with_context(|| format!("Failed to read {}", remote.display()))?;
            let base = store.get(id)?.unwrap_or_default();

            let result = store.merge(&base, &local, &remote, id)?;
            print!("{}", result.merged_content);
            if result.has_conflicts {
                eprintln!("{} conflict region(s)", result.conflict_count);
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
