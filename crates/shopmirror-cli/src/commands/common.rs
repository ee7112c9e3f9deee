use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use shopmirror_core::sync::{CollectionStatus, PullOutcome, SyncReport};
use shopmirror_core::util::compact_text;
use shopmirror_core::{MemoryRemote, MirrorConfig, Record, RemoteSource, SyncContext};

use crate::error::CliError;

/// Context talking to the configured remote.
pub async fn open_online_context(config: &MirrorConfig) -> Result<SyncContext, CliError> {
    if config.remote_url.is_none() {
        return Err(CliError::RemoteNotConfigured);
    }
    let remote: Arc<dyn RemoteSource> = Arc::new(config.remote_client()?);
    Ok(SyncContext::open(config, remote).await?)
}

/// Context for commands that only read or clear the local cache.
pub async fn open_offline_context(config: &MirrorConfig) -> Result<SyncContext, CliError> {
    let remote: Arc<dyn RemoteSource> = Arc::new(MemoryRemote::new());
    Ok(SyncContext::open(config, remote).await?)
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub collection: String,
    pub last_synced: Option<i64>,
    pub last_synced_iso: Option<String>,
    pub records: usize,
    pub stale: bool,
}

pub fn status_to_item(status: &CollectionStatus) -> StatusItem {
    StatusItem {
        collection: status.collection.clone(),
        last_synced: status.last_synced,
        last_synced_iso: status.last_synced.map(format_sync_timestamp),
        records: status.records,
        stale: status.stale,
    }
}

pub fn format_status_lines(statuses: &[CollectionStatus], now_ms: i64) -> Vec<String> {
    let width = statuses
        .iter()
        .map(|status| status.collection.len())
        .max()
        .unwrap_or_default();

    statuses
        .iter()
        .map(|status| {
            let synced = status.last_synced.map_or_else(
                || "never".to_string(),
                |timestamp| format_relative_time(timestamp, now_ms),
            );
            let marker = if status.stale { "  (stale)" } else { "" };
            format!(
                "{:<width$}  {:>6} records  synced {synced}{marker}",
                status.collection, status.records
            )
        })
        .collect()
}

pub fn format_outcome(collection: &str, outcome: PullOutcome) -> String {
    match outcome {
        PullOutcome::Throttled => format!("{collection}: up to date (use --force to refetch)"),
        PullOutcome::Empty => format!("{collection}: remote is empty"),
        PullOutcome::Synced { upserted, deleted } => {
            format!("{collection}: {upserted} upserted, {deleted} deleted")
        }
    }
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.synced.is_empty() {
        lines.push(format!("Synced: {}", report.synced.join(", ")));
    }
    if !report.empty.is_empty() {
        lines.push(format!("Empty: {}", report.empty.join(", ")));
    }
    if !report.throttled.is_empty() {
        lines.push(format!("Up to date: {}", report.throttled.join(", ")));
    }
    for (collection, error) in &report.failed {
        lines.push(format!("Failed: {collection}: {error}"));
    }
    lines
}

pub fn format_record_line(record: &Record, max_chars: usize) -> String {
    let fields = Value::Object(record.fields.clone()).to_string();
    let preview = if fields.chars().count() > max_chars {
        let truncated = fields
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        format!("{truncated}...")
    } else {
        fields
    };
    format!("{}  {}", record.id, compact_text(&preview))
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| format_record_line(record, 100))
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
