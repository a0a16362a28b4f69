//! Config command handlers

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use tether_core::SyncConfig;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "data_dir, base_url, realtime_url, max_retries, \
                    max_unavailable_retry_wait_secs, max_retries_before_cors_error, \
                    max_receipt_connections, http_timeout_ms, realtime_request_timeout_ms, \
                    log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        SyncConfig::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to encode configuration")?
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(SyncConfig::config_file_path);
            println!("Configuration:");
            println!("  data_dir:                        {}", config.data_dir.display());
            println!("  base_url:                        {}", or_unset(&config.base_url));
            println!("  realtime_url:                    {}", or_unset(&config.realtime_url));
            println!("  max_retries:                     {}", config.max_retries);
            println!(
                "  max_unavailable_retry_wait_secs: {}",
                config.max_unavailable_retry_wait_secs
            );
            println!(
                "  max_retries_before_cors_error:   {}",
                config.max_retries_before_cors_error
            );
            println!(
                "  max_receipt_connections:         {}",
                config.max_receipt_connections
            );
            println!("  http_timeout_ms:                 {}", config.http_timeout_ms);
            println!(
                "  realtime_request_timeout_ms:     {}",
                config.realtime_request_timeout_ms
            );
            println!(
                "  log_file:                        {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        SyncConfig::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;
    config.validate()?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(SyncConfig::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

/// Print the config file in effect
pub fn path(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let path = config_path
        .cloned()
        .unwrap_or_else(SyncConfig::config_file_path);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "path": path, "exists": path.exists() })
            );
        }
        _ => println!("{}", path.display()),
    }
    Ok(())
}

fn apply(config: &mut SyncConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "base_url" => config.base_url = optional(value),
        "realtime_url" => config.realtime_url = optional(value),
        "max_retries" => config.max_retries = parse(key, value)?,
        "max_unavailable_retry_wait_secs" => {
            config.max_unavailable_retry_wait_secs = parse(key, value)?
        }
        "max_retries_before_cors_error" => {
            config.max_retries_before_cors_error = parse(key, value)?
        }
        "max_receipt_connections" => config.max_receipt_connections = parse(key, value)?,
        "http_timeout_ms" => config.http_timeout_ms = parse(key, value)?,
        "realtime_request_timeout_ms" => config.realtime_request_timeout_ms = parse(key, value)?,
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: {}",
                key,
                KEYS
            );
        }
    }
    Ok(())
}

/// Empty or "none" clears an optional setting
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .ok()
        .with_context(|| format!("Invalid value for {}: '{}' is not a number", key, value))
}

fn or_unset(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(not set)")
}
