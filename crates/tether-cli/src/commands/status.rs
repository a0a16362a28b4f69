//! Status command handler

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;

use tether_core::store::SCHEMA_VERSION;
use tether_core::{Operation, StoredEvent, SyncConfig};

use super::open_store;
use crate::output::{Output, OutputFormat};

/// Counts over the durable queue
#[derive(Debug, Default, PartialEq)]
struct QueueSummary {
    pending: usize,
    receipts: usize,
    claimed: usize,
    retrying: usize,
    oldest_age_secs: Option<i64>,
}

impl QueueSummary {
    fn from_events(events: &[StoredEvent]) -> Self {
        let now = Utc::now();
        Self {
            pending: events.len(),
            receipts: events
                .iter()
                .filter(|e| e.record.operation == Operation::Receipt)
                .count(),
            claimed: events.iter().filter(|e| e.claimed_by.is_some()).count(),
            retrying: events.iter().filter(|e| e.record.retry_count > 0).count(),
            oldest_age_secs: events
                .iter()
                .map(|e| e.record.created_at)
                .min()
                .map(|oldest| (now - oldest).num_seconds()),
        }
    }
}

/// Show status information
pub fn show(config: &SyncConfig, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let db_path = config.queue_db_path();
    // Don't create a database just to report that it's empty
    let summary = if db_path.exists() {
        QueueSummary::from_events(&open_store(config)?.list()?)
    } else {
        QueueSummary::default()
    };
    let config_file = config_path
        .cloned()
        .unwrap_or_else(SyncConfig::config_file_path);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_file,
                    "queue_db": db_path,
                    "schema_version": SCHEMA_VERSION,
                    "base_url": config.base_url,
                    "realtime_url": config.realtime_url,
                    "queue": {
                        "pending": summary.pending,
                        "receipts": summary.receipts,
                        "claimed": summary.claimed,
                        "retrying": summary.retrying,
                        "oldest_age_secs": summary.oldest_age_secs
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", summary.pending);
        }
        OutputFormat::Human => {
            println!("Tether Status");
            println!("=============");
            println!();
            println!("Server:");
            println!(
                "  HTTP:     {}",
                config.base_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  Realtime: {}",
                config.realtime_url.as_deref().unwrap_or("(not set)")
            );
            println!();
            println!("Queue:");
            println!("  Location: {}", db_path.display());
            println!("  Pending:  {}", summary.pending);
            if summary.pending > 0 {
                println!("  Receipts: {}", summary.receipts);
                println!("  Claimed:  {}", summary.claimed);
                println!("  Retrying: {}", summary.retrying);
            }
            if let Some(age) = summary.oldest_age_secs {
                println!("  Oldest:   {}", format_age(age));
            }
            println!();
            println!("Config file: {}", config_file.display());
        }
    }

    Ok(())
}

fn format_age(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s ago", s.max(0)),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86400 => format!("{}h ago", s / 3600),
        s => format!("{}d ago", s / 86400),
    }
}
