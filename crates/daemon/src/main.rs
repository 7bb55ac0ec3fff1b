// SPDX-License-Identifier: MIT

//! `healarrd`: the remediation daemon's entry point. Resolves on-disk
//! state, recovers the event log, wires the five engine services to a
//! production `ArrClient`/`HealthChecker`/`PathMapper`/`Scanner`, and runs
//! until asked to stop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use healarr_adapters::{FsHealthChecker, HttpArrClient, PrefixPathMapper, SweepScanner};
use healarr_core::{ScheduleConfig, ScheduleId, SystemClock};
use healarr_engine::{EventBus, Remediator, RemediatorConfig, RetryMonitor, RetryMonitorConfig, Verifier, VerifierConfig};
use healarr_storage::{snapshot, ConfigStore, MaterializedState, Snapshot, Wal};

use healarr_daemon::{
    health_status, setup_logging, DaemonError, DaemonPaths, HealthMonitor, HealthMonitorConfig, Scheduler,
    SchedulerConfig,
};

/// How often the daemon writes a fresh snapshot so a restart replays a
/// bounded WAL tail rather than the whole history.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Parser, Debug)]
#[command(name = "healarrd", about = "Detects and remediates corrupted media library files")]
struct Cli {
    /// Overrides HEALARR_STATE_DIR for this run.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the daemon until a shutdown signal arrives. The default when no subcommand is given.
    Run,
    /// Prints `GetHealthStatus` (spec.md §6) as JSON and exits.
    Health,
    /// Manages `scan_schedules` rows without starting the daemon (spec.md §4.2).
    #[command(subcommand)]
    Schedule(ScheduleCommand),
}

#[derive(Subcommand, Debug)]
enum ScheduleCommand {
    /// Registers a new schedule.
    Add {
        #[arg(long)]
        scan_path_id: String,
        #[arg(long)]
        cron_expression: String,
        #[arg(long, default_value_t = true)]
        enabled: bool,
    },
    /// Updates an existing schedule's cron expression and/or enabled flag.
    Update {
        id: String,
        #[arg(long)]
        cron_expression: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
    },
    /// Removes a schedule.
    Delete { id: String },
    /// Lists every configured schedule.
    List,
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let cli = Cli::parse();
    if let Some(dir) = &cli.state_dir {
        std::env::set_var("HEALARR_STATE_DIR", dir);
    }

    let paths = DaemonPaths::resolve()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Schedule(cmd) => {
            let config_store = paths.load_config_store()?;
            run_schedule_command(&config_store, cmd)?;
            return Ok(());
        }
        Command::Health => {
            let _log_guard = setup_logging(&paths.log_path)?;
            let bus = recover_bus(&paths)?;
            let status = health_status(&bus, HealthMonitorConfig::default().stuck_threshold, HealthMonitorConfig::default().stuck_within);
            println!("{}", serde_json::to_string_pretty(&status).unwrap_or_else(|_| "{}".to_string()));
            return Ok(());
        }
        Command::Run => {}
    }

    let _log_guard = setup_logging(&paths.log_path)?;
    let config_store = Arc::new(paths.load_config_store()?);
    let bus = recover_bus(&paths)?;

    let arr = Arc::new(arr_client_from_env());
    let health = Arc::new(FsHealthChecker::new());
    let path_mapper = Arc::new(PrefixPathMapper::new(
        config_store.scan_paths().into_iter().map(|p| (p.local_path, p.arr_path)).collect(),
    ));
    let scanner = Arc::new(SweepScanner::new(health.clone()));

    let remediator = Remediator::new(bus.clone(), arr.clone(), path_mapper, config_store.clone(), RemediatorConfig::default());
    let verifier = Verifier::new(bus.clone(), arr.clone(), health.clone(), config_store.clone(), VerifierConfig::default());
    let retry_monitor = RetryMonitor::new(bus.clone(), config_store.clone(), RetryMonitorConfig::default());
    let scheduler = Scheduler::new(bus.clone(), config_store.clone(), scanner, SchedulerConfig::default());
    let health_monitor =
        HealthMonitor::new(bus.clone(), arr.clone(), health.clone(), scheduler.clone(), HealthMonitorConfig::default());

    remediator.start();
    verifier.start();
    retry_monitor.start();
    scheduler.start();
    health_monitor.start();

    let snapshot_path = paths.snapshot_path.clone();
    let snapshot_bus = bus.clone();
    let snapshot_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(SNAPSHOT_INTERVAL).await;
            write_snapshot(&snapshot_bus, &snapshot_path);
        }
    });

    tracing::info!("healarrd ready");
    wait_for_shutdown_signal().await;
    tracing::info!("shutdown requested, stopping services");

    snapshot_task.abort();
    health_monitor.stop().await;
    scheduler.stop().await;
    retry_monitor.stop().await;
    verifier.stop().await;
    remediator.stop().await;
    bus.shutdown().await;

    write_snapshot(&bus, &paths.snapshot_path);
    tracing::info!("healarrd stopped");
    Ok(())
}

/// Reopens the snapshot + WAL and replays whatever comes after it, the same
/// recovery sequence `Command::Run` and `Command::Health` both need.
fn recover_bus(paths: &DaemonPaths) -> Result<Arc<EventBus<SystemClock>>, DaemonError> {
    let (state, processed_seq) = match snapshot::read(&paths.snapshot_path)? {
        Some(Snapshot { seq, state, .. }) => {
            tracing::info!(seq, corruptions = state.corruptions.len(), "loaded snapshot");
            (state, seq)
        }
        None => {
            tracing::info!("no snapshot found, starting from an empty projection");
            (MaterializedState::default(), 0)
        }
    };

    let mut wal = Wal::open(&paths.wal_path, processed_seq)?;
    let mut state = state;
    let to_replay = wal.entries_after(processed_seq)?;
    let replayed = to_replay.len();
    for entry in &to_replay {
        state.apply(&entry.event);
    }
    wal.mark_processed(wal.write_seq());
    if replayed > 0 {
        tracing::info!(replayed, "replayed events from the WAL after the last snapshot");
    }

    Ok(EventBus::new(wal, state, SystemClock::default()))
}

/// Handles `healarrd schedule ...` against the config store directly; no
/// running daemon (and thus no live cron registration) is required for a
/// one-shot mutation (spec.md §4.2).
fn run_schedule_command(config_store: &ConfigStore, cmd: ScheduleCommand) -> Result<(), DaemonError> {
    match cmd {
        ScheduleCommand::Add { scan_path_id, cron_expression, enabled } => {
            let schedule = ScheduleConfig {
                id: ScheduleId::new(),
                scan_path_id: scan_path_id.into(),
                cron_expression,
                enabled,
            };
            config_store.add_schedule(schedule.clone())?;
            println!("added schedule {}", schedule.id);
        }
        ScheduleCommand::Update { id, cron_expression, enabled } => {
            let updated = config_store.update_schedule(&ScheduleId::from_string(&id), cron_expression, enabled)?;
            println!("updated schedule {}", updated.id);
        }
        ScheduleCommand::Delete { id } => {
            config_store.delete_schedule(&ScheduleId::from_string(&id))?;
            println!("deleted schedule {id}");
        }
        ScheduleCommand::List => {
            for schedule in config_store.schedules() {
                println!(
                    "{}\t{}\t{}\tenabled={}",
                    schedule.id, schedule.scan_path_id, schedule.cron_expression, schedule.enabled
                );
            }
        }
    }
    Ok(())
}

fn write_snapshot(bus: &EventBus<SystemClock>, path: &std::path::Path) {
    let (seq, state) = bus.snapshot_state();
    let snapshot = Snapshot::new(seq, state, chrono::Utc::now());
    if let Err(err) = snapshot::write(path, &snapshot) {
        tracing::warn!(error = %err, "failed to write snapshot");
    }
}

/// A single arr instance configured via environment variables. Mapping
/// many instances to many scan paths is configuration the engine doesn't
/// yet own (spec.md §1 scopes that out); this is the minimal production
/// wiring for the common single-instance deployment.
fn arr_client_from_env() -> HttpArrClient {
    let base_url = std::env::var("HEALARR_ARR_URL").unwrap_or_else(|_| {
        tracing::warn!("HEALARR_ARR_URL not set, arr API calls will fail until it is configured");
        String::new()
    });
    let api_key = std::env::var("HEALARR_ARR_API_KEY").unwrap_or_default();
    HttpArrClient::new(base_url, api_key)
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = &mut ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler, falling back to ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
