//! Scan command - compute a topology handle for a directory

use super::{compute_label, resolve_root, styled_status, with_topology_store, HandleView};
use crate::cli::args::{OutputFormat, ScanArgs};
use crate::config::Config;
use crate::error::{HandleError, HandleResult};
use crate::handle::ProxyHandle;
use crate::store::{ComputeOptions, HandleStore};
use crate::topology::{self, ScanOptions, Topology};
use crate::ui::{self, TaskSpinner, UiContext};
use std::time::Duration;
use tracing::debug;

/// Execute the scan command
pub async fn execute(args: ScanArgs, config: &Config) -> HandleResult<()> {
    with_topology_store(config, |store| run(store, args, config)).await
}

async fn run(store: HandleStore<Topology>, args: ScanArgs, config: &Config) -> HandleResult<()> {
    let root = resolve_root(args.path.as_deref())?;

    let options = ScanOptions {
        include_hidden: args.hidden || config.scan.include_hidden,
        max_depth: args.max_depth.or(config.scan.max_depth),
    };
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .or_else(|| config.compute.timeout());
    let compute_options = ComputeOptions::new(compute_label(args.label, config))
        .ttl(config.compute.ttl())
        .timeout(timeout)
        .source_hash(topology::source_fingerprint(&root, &options)?);

    let ctx = UiContext::detect();
    let mut spinner = TaskSpinner::new(&ctx);
    let fancy = args.format == OutputFormat::Table;
    if fancy {
        spinner.start(&format!("Scanning {}...", root.display()));
    }

    let scan_root = root.clone();
    let result = store
        .compute(
            config.scan.source_type.as_str(),
            move || topology::scan(scan_root, options),
            compute_options,
        )
        .await;

    let handle = match result {
        Ok(handle) => handle,
        Err(e) => {
            if fancy {
                spinner.stop_error("Scan failed");
            }
            return Err(e);
        }
    };
    if fancy {
        spinner.stop(&format!("Scanned {}", root.display()));
    }
    debug!("Handle {} is {}", handle.handle_id(), handle.status());

    let topology = handle
        .data()
        .ok_or_else(|| HandleError::Internal("fresh handle without data".to_string()))?;

    match args.format {
        OutputFormat::Table => print_table(&ctx, &handle, topology),
        OutputFormat::Json => print_json(&handle, topology)?,
        OutputFormat::Plain => print_plain(&handle, topology),
    }

    Ok(())
}

fn print_table(ctx: &UiContext, handle: &ProxyHandle<Topology>, topology: &Topology) {
    ui::section(ctx, &format!("Topology of {}", topology.root.display()));
    ui::key_value(ctx, "source type", handle.source_type().as_str());
    ui::key_value(ctx, "handle", &handle.handle_id().short());
    ui::key_value(ctx, "status", &styled_status(handle.status()).to_string());
    ui::key_value(ctx, "source hash", handle.source_hash().unwrap_or("-"));
    ui::key_value(ctx, "files", &topology.files.to_string());
    ui::key_value(ctx, "directories", &topology.directories.to_string());
    ui::key_value(ctx, "bytes", &topology.total_bytes.to_string());
    ui::key_value(
        ctx,
        "computed in",
        &format!("{}ms", handle.computation_duration().as_millis()),
    );
    if let Some(expires) = handle.expires_at() {
        ui::key_value(ctx, "expires", &expires.format("%Y-%m-%d %H:%M:%S").to_string());
    }

    let extensions = topology
        .top_extensions(8)
        .into_iter()
        .map(|(ext, count)| format!("{}={}", ext, count))
        .collect::<Vec<_>>()
        .join(", ");
    if !extensions.is_empty() {
        ui::key_value(ctx, "extensions", &extensions);
    }
}

fn print_json(handle: &ProxyHandle<Topology>, topology: &Topology) -> HandleResult<()> {
    let output = serde_json::json!({
        "handle": HandleView::from(handle),
        "topology": topology,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_plain(handle: &ProxyHandle<Topology>, topology: &Topology) {
    println!(
        "{} {} files={} dirs={} bytes={}",
        handle.status(),
        handle.source_hash().unwrap_or("-"),
        topology.files,
        topology.directories,
        topology.total_bytes
    );
}
