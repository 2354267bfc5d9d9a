use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use panel_snapshots::catalog::{ResourceKind, Snapshot};
use panel_snapshots::error::OperationResult;
use panel_snapshots::managers::logging::{init_console_logging, init_logging, LoggingConfig};
use panel_snapshots::managers::snapshot::{RestoreReport, SnapshotManager};
use panel_snapshots::platform::DatabaseTools;
use panel_snapshots::strategies::FileAction;
use panel_snapshots::utils::command::program_available;
use panel_snapshots::{load_config, resolve_settings, CancellationToken, SnapshotError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "panel-snapshots")]
#[command(about = "Snapshot backup, retention and restore for hosting-panel resources", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/panel-snapshots/config.toml")]
    config: PathBuf,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a snapshot of one resource and apply retention to it
    Backup {
        /// Resource kind (database, virtualHost, dnsZone, ...)
        #[arg(short, long)]
        kind: ResourceKind,

        /// Resource reference (database name, domain, username); omit for fullSystem
        #[arg(short, long = "ref")]
        resource_ref: Option<String>,
    },

    /// List the snapshots of one resource, newest first
    List {
        #[arg(short, long)]
        kind: ResourceKind,

        #[arg(short, long = "ref")]
        resource_ref: Option<String>,
    },

    /// Restore a resource from one of its snapshots
    Restore {
        #[arg(short, long)]
        kind: ResourceKind,

        #[arg(short, long = "ref")]
        resource_ref: Option<String>,

        /// Snapshot id to restore (interactive if not specified)
        #[arg(short, long)]
        snapshot: Option<u64>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete one snapshot and its artifact
    Delete {
        /// Snapshot id
        id: u64,
    },

    /// Apply retention to one resource, or sweep every resource
    Prune {
        #[arg(short, long)]
        kind: Option<ResourceKind>,

        #[arg(short, long = "ref")]
        resource_ref: Option<String>,

        /// Snapshots to keep (defaults to the configured limit for the kind)
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        max: Option<u64>,
    },

    /// Show snapshot counts and sizes per resource kind
    Stats,

    /// Measure a live resource on disk
    Size {
        #[arg(short, long)]
        kind: ResourceKind,

        #[arg(short, long = "ref")]
        resource_ref: Option<String>,
    },

    /// Check a snapshot's artifact is present and readable
    Verify {
        /// Snapshot id
        id: u64,

        /// Record the measured artifact size in the catalog
        #[arg(long)]
        update_size: bool,
    },

    /// Validate configuration file
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            report_error(e, json);
            ExitCode::FAILURE
        }
    }
}

fn report_error(e: anyhow::Error, json: bool) {
    if !json {
        eprintln!("✗ {:#}", e);
        return;
    }

    let result: OperationResult<()> = match e.downcast::<SnapshotError>() {
        Ok(err) => OperationResult::from_result(Err(err), ""),
        Err(other) => OperationResult {
            success: false,
            kind: None,
            message: format!("{:#}", other),
            data: None,
        },
    };
    print_json(&result);
}

/// Exit code 2 marks a partial restore or a failed verification
fn run(cli: Cli) -> Result<ExitCode> {
    // Validation logs to the console only; a broken config has no log directory
    if let Commands::Validate = cli.command {
        init_console_logging();
        handle_validate(&cli.config, cli.json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli.config)?;

    // Setup logging with file rotation (must keep guard alive)
    let _log_guard = init_logging(&LoggingConfig::from_global(&config.global))?;

    let manager = SnapshotManager::from_config(&config)?;
    let cancel = cancel_on_ctrl_c();
    let json = cli.json;

    match cli.command {
        Commands::Backup { kind, resource_ref } => {
            if !json {
                println!("Backing up {}...", label(kind, &resource_ref));
            }
            let snapshot = manager.create_snapshot(kind, resource_ref.as_deref(), &cancel)?;
            if json {
                print_json(&OperationResult::from_result(Ok(&snapshot), "Snapshot created"));
            } else {
                println!("✓ Snapshot {} created", snapshot.id);
                println!("  Artifact: {}", snapshot.artifact_path.display());
                println!("  Size: {}", format_bytes(snapshot.size_bytes));
                for component in &snapshot.components {
                    println!("  {}: {:?} ({})", component.name, component.status, component.message);
                }
            }
        }

        Commands::List { kind, resource_ref } => {
            let snapshots = manager.list_snapshots(kind, resource_ref.as_deref())?;
            if json {
                print_json(&OperationResult::from_result(Ok(&snapshots), "ok"));
            } else {
                println!("=== Snapshots for {} ===\n", label(kind, &resource_ref));
                print_snapshots(&snapshots);
            }
        }

        Commands::Restore {
            kind,
            resource_ref,
            snapshot,
            yes,
        } => {
            let snapshot_id = match snapshot {
                Some(id) => id,
                None => select_snapshot(&manager, kind, resource_ref.as_deref())?,
            };

            if !yes && !confirm_restore(&manager, snapshot_id)? {
                println!("Restore cancelled.");
                return Ok(ExitCode::SUCCESS);
            }

            let report = manager.restore_snapshot(kind, resource_ref.as_deref(), snapshot_id, &cancel)?;
            if json {
                print_json(&OperationResult::from_result(Ok(&report), "Restore finished"));
            } else {
                print_restore_report(&report);
            }
            if !report.is_complete() {
                return Ok(ExitCode::from(2));
            }
        }

        Commands::Delete { id } => {
            manager.delete_snapshot(id)?;
            if json {
                print_json(&OperationResult::from_result(Ok(id), "Snapshot deleted"));
            } else {
                println!("✓ Snapshot {} deleted", id);
            }
        }

        Commands::Prune {
            kind,
            resource_ref,
            max,
        } => {
            let reports = match kind {
                Some(kind) => {
                    let max = match max {
                        Some(max) => usize::try_from(max).context("--max is too large")?,
                        None => manager.settings().retention.max_for(kind),
                    };
                    vec![manager.prune(kind, resource_ref.as_deref(), max)?]
                }
                None => manager.prune_all()?,
            };

            if json {
                print_json(&OperationResult::from_result(Ok(&reports), "Prune finished"));
            } else {
                for report in &reports {
                    println!(
                        "{}: kept {}, deleted {}",
                        report.resource_label(),
                        report.kept,
                        report.deleted.len()
                    );
                    if report.displaced_completed > 0 {
                        println!(
                            "  ⚠ {} completed snapshot(s) removed in favour of newer failed ones",
                            report.displaced_completed
                        );
                    }
                    for failure in &report.failures {
                        println!("  ✗ snapshot {}: {}", failure.snapshot_id, failure.error);
                    }
                }
                if reports.is_empty() {
                    println!("Nothing to prune.");
                }
            }
        }

        Commands::Stats => {
            let stats = manager.stats()?;
            if json {
                print_json(&OperationResult::from_result(Ok(&stats), "ok"));
            } else {
                println!("=== Snapshot Statistics ===\n");
                println!("{:<18} {:>6} {:>12}  Last snapshot", "Kind", "Count", "Size");
                for (kind, s) in &stats {
                    let last = s
                        .last_snapshot
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<18} {:>6} {:>12}  {}",
                        kind.as_str(),
                        s.count,
                        format_bytes(s.total_bytes),
                        last
                    );
                }
            }
        }

        Commands::Size { kind, resource_ref } => {
            let size = manager.resource_size(kind, resource_ref.as_deref(), &cancel)?;
            if json {
                print_json(&OperationResult::from_result(Ok(size), "ok"));
            } else {
                println!(
                    "{}: {} files, {}",
                    label(kind, &resource_ref),
                    size.files,
                    format_bytes(size.bytes)
                );
            }
        }

        Commands::Verify { id, update_size } => {
            let report = manager.verify_snapshot(id, update_size)?;
            let ok = report.is_ok();
            if json {
                print_json(&OperationResult::from_result(Ok(&report), "Verification finished"));
            } else {
                println!("Snapshot {}: {}", id, report.artifact_path.display());
                println!("  Recorded size: {}", format_bytes(report.recorded_bytes));
                if let Some(actual) = report.actual_bytes {
                    println!("  Size on disk: {}", format_bytes(actual));
                }
                if let Some(contents) = report.contents {
                    println!("  Archive: {} files, {}", contents.files, format_bytes(contents.bytes));
                }
                if report.size_updated {
                    println!("  Catalog size updated");
                }
                match report.problem {
                    Some(ref problem) => println!("✗ {}", problem),
                    None if ok => println!("✓ Snapshot verified"),
                    None => {}
                }
            }
            if !ok {
                return Ok(ExitCode::from(2));
            }
        }

        // Handled before the config is loaded
        Commands::Validate => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn handle_validate(path: &Path, json: bool) -> Result<()> {
    let config = load_config(path)?;
    let settings = resolve_settings(&config)?;

    let missing_tools: Vec<String> = settings
        .database
        .as_ref()
        .map(|db| DatabaseTools::native().programs(db))
        .unwrap_or_default()
        .into_iter()
        .filter(|program| !program_available(program))
        .collect();

    if json {
        #[derive(Serialize)]
        struct Summary {
            backup_root: PathBuf,
            catalog_file: PathBuf,
            max_snapshots: usize,
            locations: usize,
            database: bool,
            full_system: bool,
            missing_tools: Vec<String>,
        }
        let summary = Summary {
            backup_root: settings.backup_root.clone(),
            catalog_file: settings.catalog_file.clone(),
            max_snapshots: settings.retention.max_snapshots,
            locations: settings.locations.len(),
            database: settings.database.is_some(),
            full_system: settings.full_system.is_some(),
            missing_tools,
        };
        print_json(&OperationResult::from_result(Ok(summary), "Configuration is valid"));
        return Ok(());
    }

    println!("✓ Configuration is valid");
    println!("  Backup root: {}", settings.backup_root.display());
    println!("  Catalog: {}", settings.catalog_file.display());
    println!("  Max snapshots: {}", settings.retention.max_snapshots);
    let mut overrides: Vec<_> = settings.retention.overrides.iter().collect();
    overrides.sort();
    for (kind, max) in overrides {
        println!("    {}: {}", kind, max);
    }
    match settings.operation_timeout {
        Some(timeout) => println!("  Operation timeout: {}s", timeout.as_secs()),
        None => println!("  Operation timeout: none"),
    }
    println!(
        "  Database: {}",
        if settings.database.is_some() { "configured" } else { "not configured" }
    );
    println!(
        "  Full system: {}",
        if settings.full_system.is_some() { "configured" } else { "not configured" }
    );
    for program in &missing_tools {
        println!("  ⚠ {} not found on PATH; database snapshots will fail", program);
    }
    Ok(())
}

/// Cancel running operations on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();

    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("Ctrl-C handler unavailable: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, cancelling...");
                child.cancel();
            }
        });
    });

    token
}

fn select_snapshot(
    manager: &SnapshotManager,
    kind: ResourceKind,
    resource_ref: Option<&str>,
) -> Result<u64> {
    use dialoguer::Select;

    let snapshots: Vec<Snapshot> = manager
        .list_snapshots(kind, resource_ref)?
        .into_iter()
        .filter(|s| s.status == panel_snapshots::SnapshotStatus::Completed)
        .collect();

    if snapshots.is_empty() {
        anyhow::bail!("No completed snapshots found for {}", label(kind, &resource_ref.map(str::to_string)));
    }

    let items: Vec<String> = snapshots
        .iter()
        .map(|s| {
            format!(
                "{} - {} ({})",
                s.id,
                s.created_at.format("%Y-%m-%d %H:%M:%S"),
                format_bytes(s.size_bytes)
            )
        })
        .collect();

    let selection = Select::new()
        .with_prompt("Select snapshot to restore")
        .items(&items)
        .default(0) // Newest first
        .interact()?;

    Ok(snapshots[selection].id)
}

fn confirm_restore(manager: &SnapshotManager, snapshot_id: u64) -> Result<bool> {
    use dialoguer::Confirm;

    let snapshot = manager.get_snapshot(snapshot_id)?;
    println!("\nSnapshot {} of {}", snapshot.id, snapshot.resource_label());
    println!("  Taken: {}", snapshot.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Artifact: {}", snapshot.artifact_path.display());
    println!();
    println!("Restore overwrites files that still exist in the live resource.");
    println!("Files deleted since the snapshot was taken are NOT recreated.");
    println!();

    Ok(Confirm::new()
        .with_prompt("Do you want to proceed with the restore?")
        .default(false)
        .interact()?)
}

fn print_snapshots(snapshots: &[Snapshot]) {
    if snapshots.is_empty() {
        println!("No snapshots found.");
        return;
    }

    println!("{:>6}  {:<19}  {:<9}  {:>10}  Artifact", "ID", "Created", "Status", "Size");
    for s in snapshots {
        println!(
            "{:>6}  {:<19}  {:<9}  {:>10}  {}",
            s.id,
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
            s.status,
            format_bytes(s.size_bytes),
            s.artifact_path.display()
        );
    }
}

fn print_restore_report(report: &RestoreReport) {
    for file in &report.files {
        if let FileAction::Failed(ref reason) = file.action {
            println!("  ✗ {}: {}", file.path.display(), reason);
        }
    }
    for component in &report.components {
        println!("  {}: {:?} ({})", component.name, component.status, component.message);
    }

    if report.is_complete() {
        println!("\n✓ Restore completed");
    } else {
        println!("\n⚠ Restore partially completed");
    }
    println!(
        "  {} restored, {} skipped (not present in live tree), {} failed",
        report.restored, report.skipped, report.failed
    );
    if let Some(ref reload) = report.reload {
        if reload.success {
            println!("  Reloaded {}", reload.service);
        } else {
            println!("  ⚠ Reload of {} failed: {}", reload.service, reload.message);
        }
    }
}

fn label(kind: ResourceKind, resource_ref: &Option<String>) -> String {
    panel_snapshots::catalog::resource_label(kind, resource_ref.as_deref())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
