//! Command-line utility for inspecting and draining a courier envelope queue
//!
//! This tool provides operational control over the on-disk queue:
//! - Listing, viewing and deleting queued envelopes
//! - Purging the whole queue
//! - Queue statistics
//! - Flushing the queue to a collector

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use courier::{
    Client, CourierConfig, DiskQueue, FlushResult,
    config::find_config_file,
    logging,
    spool::{BackendConfig, FileBackingStore, SpooledEnvelopeId},
};

/// Command-line utility for managing a courier envelope queue
#[derive(Parser, Debug)]
#[command(name = "courierctl")]
#[command(about = "Inspect and drain a courier envelope queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (RON or TOML). Defaults to `COURIER_CONFIG`, then
    /// ./courier.config.ron, then /etc/courier/courier.config.ron
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Queue directory, overriding the configured spool backend
    #[arg(short, long)]
    spool_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue management commands
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Deliver everything queued, waiting at most `timeout` seconds
    Flush {
        /// Collector DSN, overriding the configured one
        #[arg(long)]
        dsn: Option<String>,

        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// List queued envelopes, oldest first
    List {
        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the header and items of a queued envelope
    View {
        /// Queue entry ID to view
        entry_id: String,
    },
    /// Delete a single queued envelope
    Delete {
        /// Queue entry ID to delete
        entry_id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete every queued envelope
    Purge {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show queue statistics
    Stats,
}

fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref(), cli.spool_path)?;

    match cli.command {
        Commands::Queue { action } => {
            let queue = config.spool.into_queue()?;
            match action {
                QueueAction::List { format } => cmd_list(&queue, &format)?,
                QueueAction::View { entry_id } => cmd_view(&queue, &entry_id)?,
                QueueAction::Delete { entry_id, yes } => cmd_delete(&queue, &entry_id, yes)?,
                QueueAction::Purge { yes } => cmd_purge(&queue, yes)?,
                QueueAction::Stats => cmd_stats(&queue)?,
            }
        }
        Commands::Flush { dsn, timeout } => {
            cmd_flush(config, dsn, Duration::from_secs(timeout))?;
        }
    }

    Ok(())
}

fn load_config(
    path: Option<&PathBuf>,
    spool_path: Option<PathBuf>,
) -> anyhow::Result<CourierConfig> {
    let mut config = match path {
        Some(path) => CourierConfig::from_file(path)?,
        None => match find_config_file() {
            Ok(path) => CourierConfig::from_file(path)?,
            Err(_) => CourierConfig::default(),
        },
    };

    if let Some(spool_path) = spool_path {
        let store = FileBackingStore::builder().path(spool_path).build()?;
        config.spool.backend = BackendConfig::File(store);
    }

    Ok(config)
}

/// List envelopes in the queue
fn cmd_list(queue: &DiskQueue, format: &str) -> anyhow::Result<()> {
    let ids = queue.list_all()?;

    match format {
        "json" => {
            // Built by hand to keep serde_json out of the binary
            println!("[");
            for (i, id) in ids.iter().enumerate() {
                let (envelope_id, items) = summarise(queue, id);
                let comma = if i + 1 < ids.len() { "," } else { "" };
                println!(
                    r#"  {{"id": "{id}", "event_id": "{envelope_id}", "items": "{items}", "timestamp": {}}}{comma}"#,
                    id.timestamp_ms(),
                );
            }
            println!("]");
        }
        _ => {
            println!(
                "{:<28} {:<34} {:<8} {:<24}",
                "ENTRY ID", "EVENT ID", "AGE", "ITEMS"
            );
            println!("{}", "-".repeat(96));

            for id in &ids {
                let (envelope_id, items) = summarise(queue, id);
                let age = format_age(id.timestamp_ms());
                println!("{id:<28} {envelope_id:<34} {age:<8} {items:<24}");
            }

            println!("\nTotal: {} envelope(s)", ids.len());
        }
    }

    Ok(())
}

/// Event ID and item types of a queued envelope, or placeholders if it is
/// unreadable.
fn summarise(queue: &DiskQueue, id: &SpooledEnvelopeId) -> (String, String) {
    match queue.read(id) {
        Ok(envelope) => {
            let items = envelope
                .items
                .iter()
                .map(|item| item.item_type.as_str())
                .collect::<Vec<_>>()
                .join(",");
            (envelope.id.to_string(), items)
        }
        Err(_) => ("(corrupt)".to_string(), String::new()),
    }
}

/// View a queued envelope in detail
fn cmd_view(queue: &DiskQueue, entry_id: &str) -> anyhow::Result<()> {
    let id = parse_entry_id(entry_id)?;
    let envelope = queue.read(&id)?;
    let size = queue.backing_store().size(&id)?;

    println!("Entry ID: {id}");
    println!("Queued: {}", format_timestamp(id.timestamp_ms()));
    println!("Age: {}", format_age(id.timestamp_ms()));
    println!("Size: {size} bytes");
    println!();

    println!("Envelope:");
    println!("  Event ID: {}", envelope.id);
    println!("  Header: {}", envelope.header);
    println!();

    println!("Items ({}):", envelope.items.len());
    for (i, item) in envelope.items.iter().enumerate() {
        print!(
            "  {}. {} [{}] {} bytes",
            i + 1,
            item.item_type.as_str(),
            item.category(),
            item.payload.len()
        );
        if let Some(filename) = &item.filename {
            print!(" ({filename})");
        }
        println!();
    }

    Ok(())
}

/// Delete a single envelope from the queue
fn cmd_delete(queue: &DiskQueue, entry_id: &str, yes: bool) -> anyhow::Result<()> {
    let id = parse_entry_id(entry_id)?;

    if !yes && !confirm(&format!("Delete envelope {id}?"))? {
        println!("Cancelled");
        return Ok(());
    }

    queue.remove(&id)?;
    println!("Deleted envelope {id}");

    Ok(())
}

/// Delete every envelope in the queue
fn cmd_purge(queue: &DiskQueue, yes: bool) -> anyhow::Result<()> {
    let count = queue.len();
    if count == 0 {
        println!("Queue is empty");
        return Ok(());
    }

    if !yes && !confirm(&format!("Delete all {count} queued envelope(s)?"))? {
        println!("Cancelled");
        return Ok(());
    }

    let removed = queue.clear()?;
    println!("Deleted {removed} envelope(s)");

    Ok(())
}

/// Display queue statistics
fn cmd_stats(queue: &DiskQueue) -> anyhow::Result<()> {
    let ids = queue.list_all()?;
    let store = queue.backing_store();

    let total_bytes: u64 = ids.iter().filter_map(|id| store.size(id).ok()).sum();

    let mut categories = std::collections::BTreeMap::new();
    let mut corrupt = 0usize;
    for id in &ids {
        match queue.read(id) {
            Ok(envelope) => {
                for item in &envelope.items {
                    *categories.entry(item.category().to_string()).or_insert(0usize) += 1;
                }
            }
            Err(_) => corrupt += 1,
        }
    }

    println!("=== Courier Queue Statistics ===");
    println!();
    println!("Envelopes: {} / {}", ids.len(), queue.max_envelopes());
    match queue.max_bytes() {
        Some(max_bytes) => println!("Size: {total_bytes} / {max_bytes} bytes"),
        None => println!("Size: {total_bytes} bytes"),
    }
    if corrupt > 0 {
        println!("Corrupt: {corrupt}");
    }

    if let (Some(oldest), Some(newest)) = (ids.first(), ids.last()) {
        println!();
        println!("Oldest: {} ago", format_age(oldest.timestamp_ms()));
        println!("Newest: {} ago", format_age(newest.timestamp_ms()));
    }

    if !categories.is_empty() {
        println!();
        println!("Items by category:");
        for (category, count) in &categories {
            println!("  {category:<16} {count}");
        }
    }

    Ok(())
}

/// Deliver the queue to the collector
fn cmd_flush(
    mut config: CourierConfig,
    dsn: Option<String>,
    timeout: Duration,
) -> anyhow::Result<()> {
    if dsn.is_some() {
        config.dsn = dsn;
    }
    config.transport.send_cached_on_start = true;

    let client = Client::from_config(config)?;

    match client.flush(timeout) {
        FlushResult::Success => println!("Queue drained"),
        FlushResult::TimedOut => {
            let remaining = client.transport().queue().len();
            anyhow::bail!(
                "Flush timed out after {}, {remaining} envelope(s) still queued",
                format_duration(timeout.as_secs())
            );
        }
        FlushResult::AlreadyFlushing => anyhow::bail!("A flush is already in progress"),
    }

    Ok(())
}

fn parse_entry_id(s: &str) -> anyhow::Result<SpooledEnvelopeId> {
    let filename = if s.ends_with(".envelope") {
        s.to_string()
    } else {
        format!("{s}.envelope")
    };

    SpooledEnvelopeId::from_filename(&filename)
        .ok_or_else(|| anyhow::anyhow!("Invalid entry ID: {s}"))
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    use std::io::Write;

    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;

    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn format_timestamp(timestamp_ms: u64) -> String {
    use chrono::{TimeZone, Utc};

    let datetime = Utc.timestamp_millis_opt(i64::try_from(timestamp_ms).unwrap_or(0));
    if let chrono::offset::LocalResult::Single(dt) = datetime {
        dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    } else {
        "unknown".to_string()
    }
}

/// Format age (time since timestamp) as human-readable
fn format_age(timestamp_ms: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let age_secs = now.saturating_sub(u128::from(timestamp_ms)) / 1000;
    format_duration(u64::try_from(age_secs).unwrap_or(u64::MAX))
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
