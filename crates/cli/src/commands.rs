// FILE: crates/cli/src/commands.rs

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use clap::ArgMatches;
use console::style;
use lotkeeper_config::{Config, ConfigManager};
use lotkeeper_core::{
    EntryFilter, EntryId, EntryStatistics, FeeCalculation, Money,
    OperationId, ParkingEntry, PaymentStatus, QueueStatus, QueuedOperation, Timestamp,
    MILLIS_PER_DAY,
};
use lotkeeper_database::{
    connection::close, open_operation_queue, open_record_store, run_queue_migrations,
    DatabaseConfig, OperationQueue,
};
use lotkeeper_network::{ClientConfig, HttpRemoteClient};
use lotkeeper_resilience::CircuitBreakerConfig;
use lotkeeper_sync_engine::{
    ConflictRecord, ConflictStatistics, CycleOutcome, EngineStatus, EntryVersion, ParkingService,
    PhaseReport, RemoteClient, Resolution, SyncEngine, SyncError, SyncScheduler, SyncSettings,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Everything a command needs, opened once per invocation
pub struct App {
    pub config: Config,
    pub service: ParkingService,
    pub engine: Arc<SyncEngine>,
    pub remote: Arc<HttpRemoteClient>,
}

impl App {
    pub async fn open(manager: &ConfigManager, config: Config) -> Result<Self> {
        if let Err(errors) = config.validate() {
            bail!("Invalid configuration: {}", join_errors(&errors));
        }

        let data_dir = manager.data_dir();
        let db_path = config.app.database_path_in(data_dir);
        let queue_path = config.app.queue_path_in(data_dir);
        log::debug!("Record store {}, queue {}", db_path.display(), queue_path.display());

        let store = open_record_store(DatabaseConfig::new(db_path.to_string_lossy()))
            .await
            .context("Failed to open record store")?;
        let queue = if queue_path == db_path {
            run_queue_migrations(store.pool())
                .await
                .context("Failed to prepare operation queue")?;
            OperationQueue::with_max_attempts(store.pool().clone(), config.sync.max_attempts)
        } else {
            open_operation_queue(
                DatabaseConfig::new(queue_path.to_string_lossy()),
                config.sync.max_attempts,
            )
            .await
            .context("Failed to open operation queue")?
        };

        let fees = config
            .fees
            .to_schedule()
            .map_err(|errors| anyhow!("Invalid fee schedule: {}", join_errors(&errors)))?;
        let remote = Arc::new(
            HttpRemoteClient::with_config(client_config(&config))
                .context("Failed to create remote client")?,
        );

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            sync_settings(&config),
        ));
        let service = ParkingService::new(store, queue, engine.locks(), fees);

        let (recovered, reset) = engine.recover().await.context("Failed to recover queue")?;
        if recovered > 0 || reset > 0 {
            log::warn!(
                "Recovered {} interrupted operation(s) and {} entry state(s)",
                recovered,
                reset
            );
        }

        Ok(Self {
            config,
            service,
            engine,
            remote,
        })
    }

    pub async fn close(self) {
        let store_pool = self.engine.store().pool().clone();
        let queue_pool = self.engine.queue().pool().clone();
        drop(self);
        close(queue_pool).await;
        close(store_pool).await;
    }
}

pub fn client_config(config: &Config) -> ClientConfig {
    ClientConfig {
        base_url: config.remote.base_url.clone(),
        timeout: config.remote.timeout(),
        credentials: config.remote.credentials(),
        circuit_breaker_config: Some(CircuitBreakerConfig::new(
            config.remote.breaker_threshold as usize,
            config.remote.breaker_reset(),
        )),
        ..Default::default()
    }
}

pub fn sync_settings(config: &Config) -> SyncSettings {
    SyncSettings {
        enabled: config.sync.enabled,
        batch_size: config.sync.batch_size,
        max_workers: config.sync.max_workers,
        request_timeout: config.sync.request_timeout(),
        merge_window: config.sync.merge_window(),
        initial_backoff: config.sync.initial_backoff(),
        max_backoff: config.sync.max_backoff(),
    }
}

fn join_errors<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?
    );
    Ok(())
}

fn heading(title: &str) {
    println!("\n{}", style(title).bold().cyan());
    println!("{}", "=".repeat(80));
}

fn success(message: impl std::fmt::Display) {
    println!("{} {}", style("✓").green().bold(), message);
}

// ===== Config =====

pub fn config_command(
    manager: &ConfigManager,
    config: &Config,
    matches: &ArgMatches,
    json: bool,
) -> Result<()> {
    match matches.subcommand() {
        Some(("init", _)) => {
            if manager.initialize().context("Failed to write config file")? {
                success(format!("Created {}", manager.config_path().display()));
            } else {
                println!("Config already exists at {}", manager.config_path().display());
            }
        }
        Some(("show", _)) => {
            let mut shown = config.clone();
            if shown.remote.password.is_some() {
                shown.remote.password = Some("***".to_string());
            }
            if json {
                return print_json(&shown);
            }
            let text = toml::to_string_pretty(&shown).context("Failed to render config")?;
            println!("# {}\n{}", manager.config_path().display(), text);
        }
        Some(("validate", _)) => {
            let problems = manager.validate().context("Failed to load config file")?;
            if problems.is_empty() {
                success(format!("{} is valid", manager.config_path().display()));
            } else {
                for problem in &problems {
                    println!("{} {}", style("✗").red().bold(), problem);
                }
                bail!("{} invalid setting(s)", problems.len());
            }
        }
        Some(("path", _)) => {
            println!("Config file: {}", manager.config_path().display());
            println!(
                "Record store: {}",
                config.app.database_path_in(manager.data_dir()).display()
            );
            println!(
                "Operation queue: {}",
                config.app.queue_path_in(manager.data_dir()).display()
            );
        }
        _ => bail!("Unknown config command"),
    }
    Ok(())
}

// ===== Status & sync =====

#[derive(Serialize)]
struct StatusView {
    remote_url: String,
    remote_online: bool,
    engine: EngineStatus,
    queue: QueueStatus,
    conflicts: ConflictStatistics,
    conflicted_entries: usize,
}

pub async fn show_status(app: &App, json: bool) -> Result<()> {
    let online = app.remote.check_connectivity().await;
    let view = StatusView {
        remote_url: app.config.remote.base_url.clone(),
        remote_online: online,
        engine: app.engine.status(),
        queue: app.engine.queue_status().await.context("Failed to read queue")?,
        conflicts: app.engine.conflict_statistics(),
        conflicted_entries: app
            .engine
            .store()
            .conflicted_ids()
            .await
            .context("Failed to read sync metadata")?
            .len(),
    };
    if json {
        return print_json(&view);
    }

    heading("Sync Status");
    let remote_state = if view.remote_online {
        style("online").green()
    } else {
        style("offline").red()
    };
    println!("Remote: {} ({})", view.remote_url, remote_state);
    println!(
        "Sync: {}",
        if view.engine.enabled { "enabled" } else { "disabled" }
    );
    print_queue_status(&view.queue);
    if view.conflicted_entries > 0 {
        println!(
            "{} {} entr{} awaiting conflict resolution",
            style("!").yellow().bold(),
            view.conflicted_entries,
            if view.conflicted_entries == 1 { "y" } else { "ies" }
        );
    }
    Ok(())
}

pub async fn run_sync(app: &App, matches: &ArgMatches, json: bool) -> Result<()> {
    if matches.get_flag("watch") {
        return watch(app).await;
    }

    match matches.get_one::<String>("phase").map(String::as_str) {
        Some("push") => {
            let report = app.engine.push().await.map_err(sync_failure)?;
            if json {
                return print_json(&report);
            }
            print_phase("Push", &report);
        }
        Some("pull") => {
            let report = app.engine.pull().await.map_err(sync_failure)?;
            if json {
                return print_json(&report);
            }
            print_phase("Pull", &report);
        }
        _ => match app.engine.sync_now().await.map_err(sync_failure)? {
            CycleOutcome::Completed(report) => {
                if json {
                    return print_json(&report);
                }
                print_phase("Push", &report.push);
                print_phase("Pull", &report.pull);
                success(format!("Sync finished in {} ms", report.duration_ms));
            }
            CycleOutcome::Skipped => println!("A sync cycle is already running"),
            CycleOutcome::Disabled => {
                println!("Sync is disabled; set sync.enabled = true to enable it")
            }
        },
    }
    Ok(())
}

fn sync_failure(err: SyncError) -> anyhow::Error {
    match err {
        SyncError::Offline(reason) => anyhow!(
            "Remote service is unreachable ({}); local changes stay queued",
            reason
        ),
        other => anyhow::Error::new(other).context("Sync failed"),
    }
}

async fn watch(app: &App) -> Result<()> {
    let interval = app.config.sync.interval();
    let scheduler = SyncScheduler::start(app.engine.clone(), interval);
    scheduler.trigger();
    println!(
        "Syncing every {}s with {}. Press Ctrl-C to stop.",
        interval.as_secs(),
        app.config.remote.base_url
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("Stopping after the current cycle...");
    scheduler.shutdown().await;

    let status = app.engine.status();
    success(format!(
        "Stopped after {} cycle(s), {} error(s)",
        status.sync_count, status.error_count
    ));
    Ok(())
}

fn print_phase(name: &str, report: &PhaseReport) {
    println!(
        "{}: {} synced, {} failed, {} conflict(s), {} merged, {} deferred",
        style(name).bold(),
        report.synced,
        report.failed,
        report.conflicts,
        report.merged,
        report.deferred
    );
    for failure in &report.terminal {
        println!(
            "  {} operation {} on entry {}: {}",
            style("✗").red().bold(),
            failure.operation_id,
            failure.entry_id,
            failure.error
        );
    }
}

// ===== Entries =====

pub async fn entries_command(app: &App, matches: &ArgMatches, json: bool) -> Result<()> {
    match matches.subcommand() {
        Some(("add", sub)) => add_entry(app, sub).await,
        Some(("exit", sub)) => record_exit(app, sub, json).await,
        Some(("pay", sub)) => record_payment(app, sub).await,
        Some(("delete", sub)) => delete_entry(app, sub).await,
        Some(("show", sub)) => show_entry(app, sub, json).await,
        Some(("list", sub)) => list_entries(app, sub, json).await,
        Some(("stats", _)) => show_stats(app, json).await,
        Some(("overstayed", _)) => list_overstayed(app, json).await,
        Some(("estimate", sub)) => estimate_fee(app, sub),
        _ => bail!("Unknown entries command"),
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow!("{} is required", name))
}

fn entry_id_arg(matches: &ArgMatches) -> Result<EntryId> {
    parse_entry_id(required(matches, "id")?)
}

async fn add_entry(app: &App, matches: &ArgMatches) -> Result<()> {
    let entry_time = parse_time(matches.get_one::<String>("at").map(String::as_str))?;
    let mut entry = ParkingEntry::new(
        required(matches, "transport")?.as_str(),
        required(matches, "type")?.as_str(),
        required(matches, "vehicle")?,
        entry_time,
    );
    entry.driver_name = matches.get_one::<String>("driver").cloned();
    entry.driver_phone = matches.get_one::<String>("phone").cloned();
    if let Some(notes) = matches.get_one::<String>("notes") {
        entry.notes = notes.clone();
    }

    let created = app
        .service
        .create_entry(entry)
        .await
        .context("Failed to record entry")?;

    success("Entry recorded");
    println!("  ID: {}", created.id);
    println!("  Vehicle: {} ({})", created.vehicle_number, created.vehicle_type);
    println!("  Entered: {}", format_time(created.entry_time));
    Ok(())
}

async fn record_exit(app: &App, matches: &ArgMatches, json: bool) -> Result<()> {
    let id = entry_id_arg(matches)?;
    let exit_time = parse_time(matches.get_one::<String>("at").map(String::as_str))?;
    let payment = matches.get_flag("paid").then_some(PaymentStatus::Paid);

    let (mut entry, fee) = app
        .service
        .record_exit(id, exit_time, payment)
        .await
        .context("Failed to record exit")?;
    if let Some(payment_type) = matches.get_one::<String>("payment-type") {
        entry = app
            .service
            .record_payment(id, PaymentStatus::Paid, Some(payment_type.clone()))
            .await
            .context("Failed to record payment type")?;
    }

    if json {
        return print_json(&fee);
    }
    success(format!("{} exited", entry.vehicle_number));
    print_fee(&fee);
    println!("  Payment: {}", entry.payment_status);
    Ok(())
}

fn print_fee(fee: &FeeCalculation) {
    println!(
        "  Stay: {} day(s) at {} per day = {}",
        fee.billed_days, fee.daily_rate, fee.base_fee
    );
    if fee.is_overstay {
        println!(
            "  {} {} overstay day(s), penalty {}",
            style("!").yellow().bold(),
            fee.penalty_days,
            fee.penalty_fee
        );
    }
    println!("  Total: {}", style(fee.total_fee).bold());
}

async fn record_payment(app: &App, matches: &ArgMatches) -> Result<()> {
    let id = entry_id_arg(matches)?;
    let status: PaymentStatus = required(matches, "status")?
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let payment_type = matches.get_one::<String>("payment-type").cloned();

    let entry = app
        .service
        .record_payment(id, status, payment_type)
        .await
        .context("Failed to record payment")?;
    success(format!(
        "{} is now {} ({})",
        entry.vehicle_number, entry.payment_status, entry.parking_fee
    ));
    Ok(())
}

async fn delete_entry(app: &App, matches: &ArgMatches) -> Result<()> {
    let id = entry_id_arg(matches)?;
    let entry = app.service.get_entry(id).await.context("Failed to get entry")?;

    if !matches.get_flag("force") {
        println!(
            "Are you sure you want to delete the entry for {}? (y/N)",
            entry.vehicle_number
        );
        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .context("Failed to read input")?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Deletion cancelled.");
            return Ok(());
        }
    }

    app.service
        .delete_entry(id)
        .await
        .context("Failed to delete entry")?;
    success(format!("Entry deleted: {}", entry.vehicle_number));
    Ok(())
}

#[derive(Serialize)]
struct EntryView<'a> {
    entry: &'a ParkingEntry,
    sync: &'a lotkeeper_core::SyncMetadata,
}

async fn show_entry(app: &App, matches: &ArgMatches, json: bool) -> Result<()> {
    let id = entry_id_arg(matches)?;
    let entry = app.service.get_entry(id).await.context("Failed to get entry")?;
    let sync = app
        .engine
        .store()
        .get_sync_metadata(id)
        .await
        .context("Failed to read sync metadata")?;
    if json {
        return print_json(&EntryView {
            entry: &entry,
            sync: &sync,
        });
    }

    heading("Parking Entry");
    println!("ID: {}", entry.id);
    println!("Vehicle: {} ({})", style(&entry.vehicle_number).bold(), entry.vehicle_type);
    println!("Transport: {}", entry.transport_name);
    if let Some(driver) = &entry.driver_name {
        println!("Driver: {}", driver);
    }
    if let Some(phone) = &entry.driver_phone {
        println!("Phone: {}", phone);
    }
    println!("Entered: {}", format_time(entry.entry_time));
    if let Some(exit) = entry.exit_time {
        println!("Exited: {}", format_time(exit));
    }
    println!("Status: {}", entry.status);
    println!("Fee: {} ({})", entry.parking_fee, entry.payment_status);
    if let Some(payment_type) = &entry.payment_type {
        println!("Payment type: {}", payment_type);
    }
    if !entry.notes.is_empty() {
        println!("\nNotes:\n{}", entry.notes);
    }

    println!("\nSync:");
    println!("  State: {}{}", sync.sync_status, if sync.is_dirty { " (dirty)" } else { "" });
    match &sync.remote_id {
        Some(remote_id) => println!("  Remote ID: {}", remote_id),
        None => println!("  Remote ID: not yet assigned"),
    }
    if let Some(last) = sync.last_synced {
        println!("  Last synced: {}", format_time(last));
    }
    Ok(())
}

fn entry_filter(matches: &ArgMatches) -> Result<EntryFilter> {
    let parse_opt = |name: &str| -> Result<Option<Timestamp>> {
        matches
            .get_one::<String>(name)
            .map(|raw| parse_time(Some(raw)))
            .transpose()
    };
    Ok(EntryFilter {
        status: matches
            .get_one::<String>("status")
            .map(|s| s.parse())
            .transpose()
            .map_err(|e: String| anyhow!(e))?,
        vehicle_type: matches.get_one::<String>("type").cloned(),
        payment_status: matches
            .get_one::<String>("payment")
            .map(|s| s.parse())
            .transpose()
            .map_err(|e: String| anyhow!(e))?,
        vehicle_number: matches.get_one::<String>("vehicle").cloned(),
        entry_from: parse_opt("from")?,
        entry_to: parse_opt("to")?,
    })
}

async fn list_entries(app: &App, matches: &ArgMatches, json: bool) -> Result<()> {
    let filter = entry_filter(matches)?;
    let entries = app
        .service
        .list_entries(&filter)
        .await
        .context("Failed to list entries")?;
    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No entries found. Use 'entries add' to record a vehicle.");
        return Ok(());
    }

    heading(&format!("{} Entries", entries.len()));
    for entry in &entries {
        print_entry_summary(entry);
    }
    Ok(())
}

fn print_entry_summary(entry: &ParkingEntry) {
    println!(
        "{}  {:<12} {:<10} {:<7} {:>10} {:<8} {}",
        truncate(&entry.id.to_string(), 8),
        entry.vehicle_number,
        entry.vehicle_type,
        entry.status,
        entry.parking_fee,
        entry.payment_status,
        format_time(entry.entry_time)
    );
}

async fn show_stats(app: &App, json: bool) -> Result<()> {
    let stats = app
        .service
        .statistics()
        .await
        .context("Failed to compute statistics")?;
    if json {
        return print_json(&stats);
    }
    print_statistics(&stats);
    Ok(())
}

fn print_statistics(stats: &EntryStatistics) {
    heading("Lot Statistics");
    println!("Total entries: {}", style(stats.total_entries).bold());
    println!("Parked: {}  Exited: {}  Unpaid: {}", stats.parked, stats.exited, stats.unpaid);
    println!("Income (paid): {}", style(stats.total_income).bold().green());
    println!("Billed total: {}", stats.billed_total);
    println!("Outstanding: {}", stats.outstanding());

    if !stats.by_vehicle_type.is_empty() {
        println!("\nBy vehicle type:");
        for (vehicle_type, group) in &stats.by_vehicle_type {
            println!("  {:<12} {:>5}  {:>12}", vehicle_type, group.count, group.revenue);
        }
    }
    if !stats.by_payment_status.is_empty() {
        println!("\nBy payment status:");
        for (status, group) in &stats.by_payment_status {
            println!("  {:<12} {:>5}  {:>12}", status, group.count, group.revenue);
        }
    }
}

async fn list_overstayed(app: &App, json: bool) -> Result<()> {
    let now = Timestamp::now();
    let entries = app
        .service
        .overstayed(now)
        .await
        .context("Failed to list overstayed vehicles")?;
    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        success("No vehicle is over the overstay threshold");
        return Ok(());
    }
    heading(&format!("{} Overstayed Vehicles", entries.len()));
    for entry in &entries {
        println!(
            "{}  {:<12} {:<10} {:>6.1}h  {}",
            truncate(&entry.id.to_string(), 8),
            entry.vehicle_number,
            entry.vehicle_type,
            entry.duration_hours(now),
            entry.transport_name
        );
    }
    Ok(())
}

fn estimate_fee(app: &App, matches: &ArgMatches) -> Result<()> {
    let vehicle_type = required(matches, "type")?;
    let hours = *matches
        .get_one::<i64>("hours")
        .ok_or_else(|| anyhow!("hours is required"))?;
    let estimate: Money = app.service.estimate(vehicle_type, hours);
    println!(
        "{} for {}h: {} (daily rate {})",
        vehicle_type,
        hours,
        style(estimate).bold(),
        app.service.fee_schedule().daily_rate(vehicle_type)
    );
    Ok(())
}

// ===== Queue =====

pub async fn queue_command(app: &App, matches: &ArgMatches, json: bool) -> Result<()> {
    match matches.subcommand() {
        Some(("status", _)) => {
            let status = app.engine.queue_status().await.context("Failed to read queue")?;
            if json {
                return print_json(&status);
            }
            heading("Operation Queue");
            print_queue_status(&status);
        }
        Some(("failed", _)) => {
            let failed = app
                .engine
                .queue()
                .list_failed()
                .await
                .context("Failed to list failed operations")?;
            if json {
                return print_json(&failed);
            }
            if failed.is_empty() {
                success("No failed operations");
                return Ok(());
            }
            heading(&format!("{} Failed Operations", failed.len()));
            for op in &failed {
                print_operation(op);
            }
        }
        Some(("retry", sub)) => {
            let id = parse_operation_id(required(sub, "id")?)?;
            app.engine
                .retry_failed(id)
                .await
                .context("Failed to re-arm operation")?;
            success(format!("Operation {} will be retried on the next sync", id));
        }
        Some(("purge", sub)) => {
            let days = *sub.get_one::<i64>("days").unwrap_or(&7);
            let cutoff = Timestamp::from_millis(
                Timestamp::now()
                    .as_millis()
                    .saturating_sub(days.saturating_mul(MILLIS_PER_DAY)),
            );
            let removed = app
                .engine
                .queue()
                .purge_completed(cutoff)
                .await
                .context("Failed to purge completed operations")?;
            success(format!("Removed {} completed operation(s)", removed));
        }
        _ => bail!("Unknown queue command"),
    }
    Ok(())
}

fn print_queue_status(status: &QueueStatus) {
    println!(
        "Queue: {} outstanding ({} pending, {} ready, {} in flight)",
        status.queue_size, status.pending, status.ready, status.processing
    );
    if status.failed > 0 {
        println!(
            "{} {} failed operation(s) need attention; see 'queue failed'",
            style("✗").red().bold(),
            status.failed
        );
    }
    println!("Completed: {}", status.completed);
}

fn print_operation(op: &QueuedOperation) {
    println!(
        "\n{} {} of entry {}",
        style(op.id).bold(),
        op.operation_type,
        op.target
    );
    println!(
        "  Attempts: {} | Queued: {} | Last change: {}",
        op.attempts,
        format_time(op.enqueued_at),
        format_time(op.updated_at)
    );
    if let Some(error) = &op.last_error {
        println!("  Error: {}", style(error).red());
    }
}

// ===== Conflicts =====

/// Re-detects conflicts recorded by an earlier process
///
/// Conflict records live in memory only; entries left in `conflict` state
/// are re-examined with a full pull.
async fn refresh_conflicts(app: &App) -> Result<()> {
    let conflicted = app
        .engine
        .store()
        .conflicted_ids()
        .await
        .context("Failed to read sync metadata")?;
    if conflicted.is_empty() || app.engine.resolver().pending_count() > 0 {
        return Ok(());
    }

    println!(
        "Re-checking {} conflicted entr{} against the remote...",
        conflicted.len(),
        if conflicted.len() == 1 { "y" } else { "ies" }
    );
    match app.engine.pull().await {
        Ok(_) => Ok(()),
        Err(SyncError::Offline(reason)) => {
            log::warn!("Cannot re-check conflicts while offline: {}", reason);
            println!(
                "{} Remote unreachable; conflicted entries: {}",
                style("!").yellow().bold(),
                conflicted
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to re-check conflicts")),
    }
}

fn conflict_for(app: &App, entry_id: EntryId) -> Result<ConflictRecord> {
    app.engine
        .resolver()
        .pending_for(entry_id)
        .context("Failed to read conflicts")?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No unresolved conflict for entry {}", entry_id))
}

pub async fn conflicts_command(app: &App, matches: &ArgMatches, json: bool) -> Result<()> {
    match matches.subcommand() {
        Some(("list", _)) => {
            refresh_conflicts(app).await?;
            let conflicts = app.engine.pending_conflicts().context("Failed to read conflicts")?;
            if json {
                return print_json(&conflicts);
            }
            if conflicts.is_empty() {
                success("No unresolved conflicts");
                return Ok(());
            }
            heading(&format!("{} Unresolved Conflicts", conflicts.len()));
            for record in &conflicts {
                println!(
                    "{}  {:<13} {}  detected {}",
                    record.entry_id(),
                    record.kind.to_string(),
                    record.local.entry().vehicle_number,
                    format_time(record.detected_at)
                );
            }
        }
        Some(("show", sub)) => {
            refresh_conflicts(app).await?;
            let record = conflict_for(app, entry_id_arg(sub)?)?;
            let suggestions = app
                .engine
                .resolution_suggestions(record.id)
                .context("Failed to compute suggestions")?;
            if json {
                return print_json(&(&record, &suggestions));
            }

            heading(&format!("Conflict on {}", record.local.entry().vehicle_number));
            println!("Kind: {}", record.kind);
            print_version("Local", &record.local);
            print_version("Remote", &record.remote);
            println!("\nSuggestions:");
            for suggestion in &suggestions {
                println!("  {:<11} {}", suggestion.resolution.label(), suggestion.reason);
            }
        }
        Some(("resolve", sub)) => {
            refresh_conflicts(app).await?;
            let record = conflict_for(app, entry_id_arg(sub)?)?;
            let resolution = match required(sub, "use")?.as_str() {
                "local" => Resolution::UseLocal,
                "remote" => Resolution::UseRemote,
                _ => app
                    .engine
                    .resolution_suggestions(record.id)
                    .context("Failed to compute suggestions")?
                    .into_iter()
                    .map(|s| s.resolution)
                    .find(|r| matches!(r, Resolution::Merged(_)))
                    .ok_or_else(|| {
                        anyhow!("No automatic merge is available; use local or remote")
                    })?,
            };
            let notes = sub.get_one::<String>("notes").cloned();

            let resolved = app
                .engine
                .resolve_conflict(record.id, resolution, notes)
                .await
                .context("Failed to resolve conflict")?;
            success(format!(
                "Resolved {} conflict on {} with {}",
                resolved.kind,
                resolved.local.entry().vehicle_number,
                resolved
                    .resolution
                    .as_ref()
                    .map(|r| r.label())
                    .unwrap_or("none")
            ));
        }
        Some(("stats", _)) => {
            let stats = app.engine.conflict_statistics();
            if json {
                return print_json(&stats);
            }
            heading("Conflict Statistics");
            println!("Detected: {}", stats.detected);
            println!("Auto-resolved: {}", stats.auto_resolved);
            println!("Manually resolved: {}", stats.manually_resolved);
            println!("Pending: {}", stats.pending);
            println!("Auto-resolution rate: {:.1}%", stats.auto_resolution_rate);
        }
        _ => bail!("Unknown conflicts command"),
    }
    Ok(())
}

fn print_version(side: &str, version: &EntryVersion) {
    let entry = version.entry();
    print!("\n{}: ", style(side).bold());
    if version.is_deleted() {
        println!("{}", style("deleted").red());
        return;
    }
    println!(
        "{} | {} | fee {} | {}",
        entry.status,
        entry.exit_time.map(format_time).unwrap_or_else(|| "no exit".to_string()),
        entry.parking_fee,
        entry.payment_status
    );
    println!("  Modified: {}", format_time(entry.last_modified));
}

// ===== Snapshots =====

pub async fn export_snapshot(app: &App, matches: &ArgMatches) -> Result<()> {
    let output = required(matches, "output")?;
    let count = app
        .engine
        .store()
        .export_to_file(Path::new(output))
        .await
        .context("Failed to export snapshot")?;
    success(format!("Exported {} entries to {}", count, output));
    Ok(())
}

pub async fn import_snapshot(app: &App, matches: &ArgMatches) -> Result<()> {
    let input = required(matches, "input")?;
    let report = app
        .engine
        .store()
        .import_from_file(Path::new(input))
        .await
        .with_context(|| format!("Failed to import {}", input))?;
    success(format!(
        "Imported {} entries ({} already present)",
        report.imported, report.skipped
    ));
    Ok(())
}

// ===== Parsing & formatting =====

/// Parses RFC 3339, `YYYY-MM-DD HH:MM` in local time, or `now`; `None` means now
pub fn parse_time(raw: Option<&str>) -> Result<Timestamp> {
    let Some(raw) = raw.map(str::trim) else {
        return Ok(Timestamp::now());
    };
    if raw.eq_ignore_ascii_case("now") {
        return Ok(Timestamp::now());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Timestamp::from_millis(parsed.timestamp_millis()));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .with_context(|| format!("Invalid time '{}': use RFC 3339 or YYYY-MM-DD HH:MM", raw))?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("Time '{}' does not exist in the local time zone", raw))?;
    Ok(Timestamp::from_millis(local.timestamp_millis()))
}

pub fn format_time(timestamp: Timestamp) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp.as_millis()) {
        Some(utc) => utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => timestamp.to_string(),
    }
}

pub fn parse_entry_id(raw: &str) -> Result<EntryId> {
    EntryId::from_string(raw.trim()).context("Invalid entry ID format")
}

pub fn parse_operation_id(raw: &str) -> Result<OperationId> {
    OperationId::from_string(raw.trim()).context("Invalid operation ID format")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}
