//! Simulate command - replay change events against a topology handle
//!
//! Computes the topology once, starts the invalidation reactor with the
//! configured triggers over an in-process transport, replays the events
//! file, then reports every lifecycle event the store emitted.

use super::{compute_label, resolve_root, styled_status, with_topology_store, HandleView};
use crate::cli::args::{OutputFormat, SimulateArgs};
use crate::config::Config;
use crate::error::{HandleError, HandleResult};
use crate::events::LifecycleEvent;
use crate::handle::{HandleStatus, ProxyHandle};
use crate::reactor::{
    ChangeEvent, InvalidationReactor, InvalidationTrigger, LocalTransport, ReactorSnapshot,
};
use crate::store::{ComputeOptions, HandleStore};
use crate::topology::{self, ScanOptions, Topology};
use crate::ui::{self, ReplayProgress, UiContext};
use console::style;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

#[derive(Serialize)]
struct SimulationReport {
    replayed: usize,
    refreshed: bool,
    reactor: ReactorSnapshot,
    handle: HandleView,
    events: Vec<LifecycleEvent>,
}

/// Execute the simulate command
pub async fn execute(args: SimulateArgs, config: &Config) -> HandleResult<()> {
    let changes = read_events(&args.events).await?;
    with_topology_store(config, |store| run(store, args, changes, config)).await
}

async fn run(
    store: HandleStore<Topology>,
    args: SimulateArgs,
    changes: Vec<ChangeEvent>,
    config: &Config,
) -> HandleResult<()> {
    let root = resolve_root(args.path.as_deref())?;
    let (_subscription, mut lifecycle) = store.subscribe_channel();

    let options = ScanOptions {
        include_hidden: config.scan.include_hidden,
        max_depth: config.scan.max_depth,
    };
    let label = compute_label(args.label, config);
    let source_type = config.scan.source_type.as_str();

    compute_topology(&store, source_type, &root, &options, &label, config).await?;

    let triggers: Vec<InvalidationTrigger> =
        config.triggers.iter().map(InvalidationTrigger::from).collect();
    if triggers.is_empty() {
        debug!("No triggers configured; change events will be ignored");
    }
    let transport = LocalTransport::with_capacity(changes.len());
    let reactor = InvalidationReactor::new(triggers)
        .start(Arc::new(store.clone()), &transport)
        .await?;

    let ctx = UiContext::detect();
    let progress = ReplayProgress::new(&ctx, changes.len(), args.format == OutputFormat::Table);
    for change in &changes {
        progress.on_event(&change.topic);
        transport.send(change.clone());
    }
    transport.close_all();
    let stats = reactor.join().await;
    progress.finish();
    info!(
        "Replayed {} change event(s), {} invalidation(s)",
        changes.len(),
        stats.invalidations
    );

    let current = store.get_or_raise(source_type)?;
    let refreshed = args.refresh && current.status() != HandleStatus::Fresh;
    let handle = if refreshed {
        compute_topology(&store, source_type, &root, &options, &label, config).await?
    } else {
        current
    };

    let mut events = Vec::new();
    while let Ok(event) = lifecycle.try_recv() {
        events.push(event);
    }

    match args.format {
        OutputFormat::Table => print_table(&ctx, &events, &handle, &stats, changes.len()),
        OutputFormat::Json => {
            let report = SimulationReport {
                replayed: changes.len(),
                refreshed,
                reactor: stats,
                handle: HandleView::from(&handle),
                events,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Plain => {
            for event in &events {
                println!("{} {}", event.event_type, event.source_type);
            }
            println!("{}", handle.status());
        }
    }

    Ok(())
}

async fn compute_topology(
    store: &HandleStore<Topology>,
    source_type: &str,
    root: &Path,
    options: &ScanOptions,
    label: &str,
    config: &Config,
) -> HandleResult<ProxyHandle<Topology>> {
    let compute_options = ComputeOptions::new(label)
        .ttl(config.compute.ttl())
        .timeout(config.compute.timeout())
        .source_hash(topology::source_fingerprint(root, options)?);

    let scan_root = root.to_path_buf();
    let scan_options = options.clone();
    store
        .compute(
            source_type,
            move || topology::scan(scan_root, scan_options),
            compute_options,
        )
        .await
}

/// Parse a JSON-lines file of change events
///
/// Blank lines and lines starting with `#` are skipped.
async fn read_events(path: &Path) -> HandleResult<Vec<ChangeEvent>> {
    if !path.exists() {
        return Err(HandleError::PathNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| HandleError::io(format!("reading events from {}", path.display()), e))?;
    parse_events(&content)
}

fn parse_events(content: &str) -> HandleResult<Vec<ChangeEvent>> {
    content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            serde_json::from_str::<ChangeEvent>(line)
                .map_err(|e| HandleError::invalid(format!("event on line {}: {}", number, e)))
        })
        .collect()
}

fn print_table(
    ctx: &UiContext,
    events: &[LifecycleEvent],
    handle: &ProxyHandle<Topology>,
    stats: &ReactorSnapshot,
    replayed: usize,
) {
    ui::section(ctx, "Lifecycle events");
    println!(
        "{:<14} {:<24} {:<16} {:<10}",
        style("TIME").bold(),
        style("EVENT").bold(),
        style("SOURCE").bold(),
        style("HANDLE").bold()
    );
    println!("{}", "-".repeat(66));
    for event in events {
        println!(
            "{:<14} {:<24} {:<16} {:<10}",
            event.timestamp.format("%H:%M:%S%.3f"),
            event.event_type,
            event.source_type,
            event
                .handle_id
                .map(|id| id.short())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    ui::section(ctx, "Result");
    ui::key_value(ctx, "change events", &replayed.to_string());
    ui::key_value(ctx, "invalidations", &stats.invalidations.to_string());
    ui::key_value(ctx, "filtered", &stats.filtered.to_string());
    if stats.failures > 0 || stats.transport_errors > 0 {
        ui::step_warn(
            ctx,
            &format!(
                "{} handling failure(s), {} transport error(s)",
                stats.failures, stats.transport_errors
            ),
        );
    }
    ui::key_value(ctx, "handle", &handle.handle_id().short());
    ui::key_value(ctx, "status", &styled_status(handle.status()).to_string());
    ui::key_value(ctx, "computations", &handle.computation_count().to_string());
}
