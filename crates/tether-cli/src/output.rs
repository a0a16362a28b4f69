//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;
use serde_json::json;

use tether_core::{EventTransport, StoredEvent};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Outcome of a flush
#[derive(Debug, Default, Serialize)]
pub struct FlushReport {
    pub synced: usize,
    /// Event id and error message of each terminal failure
    pub failed: Vec<(String, String)>,
    pub aborted: Vec<String>,
    pub remaining: usize,
    pub timed_out: bool,
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print the durable queue
    pub fn print_queue(&self, events: &[StoredEvent]) {
        match self.format {
            OutputFormat::Human => {
                if events.is_empty() {
                    println!("Queue is empty.");
                    return;
                }
                for stored in events {
                    let event = &stored.record;
                    let claim = if stored.claimed_by.is_some() {
                        " [claimed]"
                    } else {
                        ""
                    };
                    println!(
                        "{} | {:<7} | {:<4} | {} | retries {} | {}{}",
                        truncate(&event.id, 12),
                        event.operation.as_str(),
                        transport_name(&event.transport),
                        truncate(event.target.as_deref().unwrap_or("-"), 24),
                        event.retry_count,
                        event.created_at.format("%Y-%m-%d %H:%M"),
                        claim
                    );
                }
                println!("\n{} event(s)", events.len());
            }
            OutputFormat::Json => {
                let rows: Vec<_> = events
                    .iter()
                    .map(|stored| {
                        json!({
                            "event": stored.record,
                            "claimed_by": stored.claimed_by,
                            "claimed_at": stored.claimed_at,
                        })
                    })
                    .collect();
                print_json(&rows);
            }
            OutputFormat::Quiet => {
                for stored in events {
                    println!("{}", stored.record.id);
                }
            }
        }
    }

    /// Print the outcome of a flush
    pub fn print_flush_report(&self, report: &FlushReport) {
        match self.format {
            OutputFormat::Human => {
                println!("Synced:    {}", report.synced);
                if !report.failed.is_empty() {
                    println!("Failed:    {}", report.failed.len());
                    for (id, error) in &report.failed {
                        println!("  {} - {}", id, error);
                    }
                }
                if !report.aborted.is_empty() {
                    println!("Aborted:   {}", report.aborted.len());
                }
                println!("Remaining: {}", report.remaining);
                if report.timed_out {
                    println!();
                    println!("Timed out before the queue drained.");
                }
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => {
                println!("{}", report.remaining);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!("{}", json!({"status": "success", "message": message}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

fn transport_name(transport: &EventTransport) -> &'static str {
    match transport {
        EventTransport::Http { .. } => "http",
        EventTransport::Realtime { .. } => "ws",
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_flush_report_json_shape() {
        let report = FlushReport {
            synced: 2,
            failed: vec![("e1".to_string(), "not-found: gone".to_string())],
            aborted: vec!["e2".to_string()],
            remaining: 0,
            timed_out: false,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["synced"], 2);
        assert_eq!(value["failed"][0][0], "e1");
        assert_eq!(value["aborted"][0], "e2");
        assert_eq!(value["timed_out"], false);
    }
}
