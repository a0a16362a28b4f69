//! Queue command handlers

use std::io::{self, Write};

use anyhow::{bail, Result};

use tether_core::{QueueStore, SyncConfig};

use super::open_store;
use crate::output::Output;

/// List pending events, oldest first
pub fn list(config: &SyncConfig, output: &Output) -> Result<()> {
    let store = open_store(config)?;
    let events = store.list()?;
    output.print_queue(&events);
    Ok(())
}

/// Delete one pending event
pub async fn drop(config: &SyncConfig, id: String, output: &Output) -> Result<()> {
    let store = open_store(config)?;
    if store.get(&id)?.is_none() {
        bail!("No queued event with ID '{}'", id);
    }
    store.delete_sync_events(vec![id.clone()]).await?;
    output.success(&format!("Dropped event {}", id));
    Ok(())
}

/// Delete every pending event
pub fn clear(config: &SyncConfig, force: bool, output: &Output) -> Result<()> {
    let store = open_store(config)?;
    let count = store.count()?;
    if count == 0 {
        output.message("Queue is empty.");
        return Ok(());
    }

    if output.should_prompt() && !force && !confirm(count)? {
        output.message("Cancelled.");
        return Ok(());
    }

    let removed = store.clear()?;
    output.success(&format!("Removed {} queued event(s)", removed));
    Ok(())
}

fn confirm(count: usize) -> Result<bool> {
    print!("Delete {} queued event(s)? Unsent changes will be lost. [y/N] ", count);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tempfile::TempDir;
    use tether_core::{Operation, SyncEvent};

    fn config(dir: &TempDir) -> SyncConfig {
        SyncConfig {
            data_dir: dir.path().to_path_buf(),
            ..SyncConfig::default()
        }
    }

    async fn seed(config: &SyncConfig, ids: &[&str]) {
        let store = open_store(config).unwrap();
        let records = ids
            .iter()
            .map(|id| {
                SyncEvent::http(Operation::Create, "conversations")
                    .with_id(*id)
                    .with_target(format!("conv-{}", id))
                    .to_record()
            })
            .collect();
        store.write_sync_events(records).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_removes_only_named_event() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["e1", "e2"]).await;
        let output = Output::new(OutputFormat::Quiet);

        drop(&config, "e1".to_string(), &output).await.unwrap();

        let store = open_store(&config).unwrap();
        assert!(store.get("e1").unwrap().is_none());
        assert!(store.get("e2").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_unknown_id_fails() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let output = Output::new(OutputFormat::Quiet);

        let err = drop(&config, "missing".to_string(), &output)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_clear_without_prompt_outside_human_mode() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["e1", "e2", "e3"]).await;

        clear(&config, false, &Output::new(OutputFormat::Json)).unwrap();
        assert_eq!(open_store(&config).unwrap().count().unwrap(), 0);
    }
}
