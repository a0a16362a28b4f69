//! Flush command handler

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use tether_core::transport::WebSocketConfig;
use tether_core::{
    Connectivity, HttpFirer, RequestCorrelator, Session, SyncConfig, SyncContext, SyncManager,
    SyncNotification, WebSocketChannel,
};

use super::open_store;
use crate::output::{FlushReport, Output};

/// How often the queue is checked for having drained
const DRAIN_POLL: Duration = Duration::from_millis(250);

/// Send every queued event, waiting up to `timeout_secs` for the queue to drain
pub async fn flush(
    config: &SyncConfig,
    timeout_secs: u64,
    token: Option<String>,
    output: &Output,
) -> Result<()> {
    let Some(token) = token else {
        bail!("No session token. Pass --token or set TETHER_TOKEN.");
    };
    if config.base_url.is_none() {
        bail!(
            "Base URL not configured. Set it with:\n  \
             tether config set base_url https://api.example.com"
        );
    }

    let store = Arc::new(open_store(config)?);
    let pending = store.count()?;
    if pending == 0 {
        output.message("Queue is empty, nothing to flush.");
        return Ok(());
    }

    // Without a realtime channel, assume the network is up and let the
    // HTTP failures speak for themselves
    let connectivity = Connectivity::new(config.realtime_url.is_none());
    let session = Session::authenticated(token);
    let mut context = SyncContext::new(
        store,
        Arc::new(HttpFirer::new()),
        connectivity.clone(),
        session,
    );

    let mut channel = None;
    if let Some(ref url) = config.realtime_url {
        let (socket, inbound) =
            WebSocketChannel::spawn(WebSocketConfig::new(url.clone()), connectivity.clone());
        let (correlator, _changes) =
            RequestCorrelator::new(socket.clone(), config.realtime_request_timeout());
        tokio::spawn(correlator.clone().run(inbound, Duration::from_secs(1)));
        context = context.with_realtime(correlator);
        channel = Some(socket);
    }

    output.message(&format!("Flushing {} queued event(s)...", pending));
    let manager = SyncManager::spawn(config.clone(), context);
    let notifications = manager.subscribe();
    let report = drain(&manager, notifications, Duration::from_secs(timeout_secs)).await;

    manager.destroy();
    if let Some(channel) = channel {
        channel.shutdown();
    }

    output.print_flush_report(&report);
    if report.timed_out && report.remaining > 0 {
        bail!("{} event(s) still queued after {}s", report.remaining, timeout_secs);
    }
    Ok(())
}

/// Collect notifications until the queue is empty or `timeout` passes
async fn drain(
    manager: &SyncManager,
    mut notifications: broadcast::Receiver<SyncNotification>,
    timeout: Duration,
) -> FlushReport {
    let mut report = FlushReport::default();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(DRAIN_POLL);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                report.timed_out = true;
                break;
            }

            notification = notifications.recv() => match notification {
                Ok(notification) => record(&mut report, notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} sync notifications", skipped);
                }
                Err(RecvError::Closed) => break,
            },

            _ = poll.tick() => match manager.snapshot().await {
                Some(snapshot) if snapshot.loaded && snapshot.is_empty() => break,
                Some(_) => {}
                None => break,
            },
        }
    }

    while let Ok(notification) = notifications.try_recv() {
        record(&mut report, notification);
    }
    report.remaining = manager.snapshot().await.map(|s| s.len()).unwrap_or(0);
    report
}

fn record(report: &mut FlushReport, notification: SyncNotification) {
    match notification {
        SyncNotification::Success { event, .. } => {
            debug!("Flushed {}", event.id);
            report.synced += 1;
        }
        SyncNotification::Error { event, error, .. } => {
            report.failed.push((event.id, error.to_string()));
        }
        SyncNotification::Abort { event, .. } => report.aborted.push(event.id),
        SyncNotification::Added { .. } => {}
    }
}
