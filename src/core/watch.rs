use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::api::client::{FalconClient, PAGE_LIMIT};
use crate::core::alert::{derive_display_id, AlertRecord};
use crate::core::error::KestrelError;
use crate::core::filter::{AlertFilter, AlertStats};
use crate::core::output::{emit_record, OutputFormat};
use crate::core::store::AlertStore;
use crate::core::time::{fql_time, now_utc};

const BACKOFF_SECS: u64 = 5;

/// Session-scoped watch state. Created at watch start and discarded when the
/// session ends; the watermark is never persisted across sessions.
pub struct WatchContext {
    /// Creation-time watermark: alerts created at or before this instant
    /// have been processed. Monotonically non-decreasing.
    pub since_iso: String,
    /// Display ids accepted during this session.
    pub seen: HashSet<String>,
    /// Alerts accepted (emitted) during this session.
    pub new_count: u64,
}

impl WatchContext {
    pub fn start(lookback_minutes: i64) -> Self {
        let since = now_utc() - ChronoDuration::minutes(lookback_minutes);
        Self {
            since_iso: fql_time(since),
            seen: HashSet::new(),
            new_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub poll_interval: u64,
    pub lookback_minutes: i64,
    pub filter: AlertFilter,
    pub format: OutputFormat,
    pub log_file: Option<PathBuf>,
}

/// One poll iteration: query ids newer than the watermark, fetch, dedup,
/// filter, emit, cache, then advance the watermark to the newest creation
/// time actually processed. Returns the accepted records in emission order.
pub async fn poll_once(
    client: &mut FalconClient,
    store: &AlertStore,
    ctx: &mut WatchContext,
    opts: &WatchOptions,
    stats: &mut AlertStats,
) -> Result<Vec<AlertRecord>, KestrelError> {
    let ids = client.query_alert_ids(&ctx.since_iso, PAGE_LIMIT).await?;
    let fresh: Vec<String> = ids
        .into_iter()
        .filter(|id| !ctx.seen.contains(derive_display_id(id)))
        .collect();

    let mut accepted = Vec::new();
    if fresh.is_empty() {
        return Ok(accepted);
    }

    let mut records = client.fetch_alerts(&fresh).await?;
    // Fetch order does not match query order; sort by creation time so the
    // watermark advances in order.
    records.sort_by(|a, b| {
        a.best_created()
            .unwrap_or("")
            .cmp(b.best_created().unwrap_or(""))
    });

    let mut high_water: Option<String> = None;
    for record in records {
        let full_id = record.full_id().unwrap_or("unknown-id").to_string();
        let display_id = derive_display_id(&full_id).to_string();
        if ctx.seen.contains(&display_id) {
            continue;
        }
        if !opts.filter.matches(&record) {
            continue;
        }

        stats.add(&record);

        if let Err(err) = emit_record(&record, opts.format, opts.log_file.as_deref()) {
            tracing::warn!("could not log alert {display_id}: {err}");
        }
        // A failed cache write loses durability, not live visibility.
        if let Err(err) = store.upsert(&record, &display_id, &full_id) {
            tracing::warn!("cache write failed for {display_id}: {err}");
        }

        if let Some(created) = record.best_created() {
            if high_water.as_deref().map_or(true, |hw| created > hw) {
                high_water = Some(created.to_string());
            }
        }

        ctx.seen.insert(display_id);
        ctx.new_count += 1;
        accepted.push(record);
    }

    if let Some(hw) = high_water {
        if hw.as_str() > ctx.since_iso.as_str() {
            ctx.since_iso = hw;
        }
    }

    Ok(accepted)
}

/// Poll until cancelled. Transport failures back off and retry; an auth
/// failure ends the session. The caller owns the context and reads the
/// session summary from it after return.
pub async fn watch(
    client: &mut FalconClient,
    store: &AlertStore,
    ctx: &mut WatchContext,
    opts: &WatchOptions,
    stats: &mut AlertStats,
) -> Result<(), KestrelError> {
    loop {
        let polled = tokio::select! {
            _ = tokio::signal::ctrl_c() => None,
            res = poll_once(client, store, ctx, opts, stats) => Some(res),
        };

        match polled {
            None => break,
            Some(Ok(_)) => {
                if pause(Duration::from_secs(opts.poll_interval)).await {
                    break;
                }
            }
            Some(Err(err @ KestrelError::Auth(_))) => return Err(err),
            Some(Err(err)) => {
                tracing::error!("poll failed: {err}; backing off {BACKOFF_SECS}s");
                if pause(Duration::from_secs(BACKOFF_SECS)).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Sleep that wakes early on ctrl-c; returns true when cancelled.
async fn pause(duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
