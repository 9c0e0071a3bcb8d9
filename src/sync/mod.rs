//! Candle synchronization between a local store and a remote feed
//!
//! Reads what the store already has, fills the holes from the feed, persists
//! the delta and returns one ascending, deduplicated series.

pub mod context;
pub mod gaps;
pub mod merge;

use std::sync::Arc;

use crate::api::RemoteFeed;
use crate::config::SyncConfig;
use crate::error::BotError;
use crate::models::timeframe::interval_ms;
use crate::models::{Candle, TimeRange};
use crate::persistence::CandleStore;
use crate::Result;

pub use context::{CancelHandle, SyncContext};
pub use gaps::find_missing_ranges;
pub use merge::merge_candles;

use merge::{most_recent, normalize};

/// What a range synchronization did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Candles the store returned on the first read
    pub from_store: usize,
    pub missing_ranges: Vec<TimeRange>,
    /// Candles received from the remote feed
    pub fetched: usize,
    /// Rows the store reported as inserted or changed
    pub persisted: u64,
    /// Missing ranges the remote feed could not fill
    pub failed_ranges: Vec<TimeRange>,
    pub store_available: bool,
    /// Result was merged locally instead of re-read from the store
    pub merged_locally: bool,
}

pub struct CandleSynchronizer {
    store: Arc<dyn CandleStore>,
    feed: Arc<dyn RemoteFeed>,
    config: SyncConfig,
}

impl CandleSynchronizer {
    pub fn new(store: Arc<dyn CandleStore>, feed: Arc<dyn RemoteFeed>, config: SyncConfig) -> Self {
        Self {
            store,
            feed,
            config,
        }
    }

    /// Complete series for open_time in `[start, end]`
    pub async fn fetch_range(
        &self,
        ctx: &SyncContext,
        symbol: &str,
        timeframe: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>> {
        let (candles, _) = self
            .fetch_range_with_report(ctx, symbol, timeframe, start, end)
            .await?;
        Ok(candles)
    }

    /// Same as [`fetch_range`](Self::fetch_range), also returning what was done
    ///
    /// Only cancellation is an error. Store and feed failures degrade to
    /// whatever data could be obtained.
    pub async fn fetch_range_with_report(
        &self,
        ctx: &SyncContext,
        symbol: &str,
        timeframe: &str,
        start: i64,
        end: i64,
    ) -> Result<(Vec<Candle>, SyncReport)> {
        let mut report = SyncReport::default();
        if start > end {
            return Ok((Vec::new(), report));
        }

        let stored = match ctx
            .run(
                "store read",
                self.store.get_range(symbol, timeframe, Some(start), Some(end), None),
            )
            .await
        {
            Ok(candles) => {
                report.store_available = true;
                normalize(candles)
            }
            Err(e @ BotError::Cancelled(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Store read failed for {} {}, falling back to remote only: {}",
                    symbol,
                    timeframe,
                    e
                );
                Vec::new()
            }
        };
        report.from_store = stored.len();

        let interval = interval_ms(timeframe);
        report.missing_ranges = match interval {
            Some(i) => find_missing_ranges(&stored, start, end, i),
            None if stored.is_empty() => vec![TimeRange::new(start, end)],
            None => {
                tracing::debug!("Unknown timeframe {}, skipping gap detection", timeframe);
                Vec::new()
            }
        };

        if report.missing_ranges.is_empty() {
            return Ok((stored, report));
        }

        let mut fetched = Vec::new();
        let mut persist_failed = false;

        // One range at a time so store writes stay ordered
        for range in report.missing_ranges.clone() {
            let page = match self.fetch_gap(ctx, symbol, timeframe, range, interval).await {
                Ok(page) => page,
                Err(e @ BotError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Skipping gap {}..{} for {} {}: {}",
                        range.start,
                        range.end,
                        symbol,
                        timeframe,
                        e
                    );
                    report.failed_ranges.push(range);
                    continue;
                }
            };

            if page.is_empty() {
                continue;
            }
            report.fetched += page.len();

            match ctx
                .run("store upsert", self.store.upsert_many(symbol, timeframe, &page))
                .await
            {
                Ok(written) => report.persisted += written,
                Err(e @ BotError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Failed to persist {} candles: {}", page.len(), e);
                    persist_failed = true;
                }
            }

            fetched.extend(page);
        }

        if fetched.is_empty() {
            log_report(symbol, timeframe, &report);
            return Ok((stored, report));
        }

        let threshold = stored.last().map(|c| c.open_time);

        // A store that missed writes would hand back the old holes
        let candles = if persist_failed {
            report.merged_locally = true;
            merge_candles(stored, fetched, threshold)
        } else {
            match ctx
                .run(
                    "store re-read",
                    self.store.get_range(symbol, timeframe, Some(start), Some(end), None),
                )
                .await
            {
                Ok(candles) => normalize(candles),
                Err(e @ BotError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Store re-read failed, merging locally: {}", e);
                    report.merged_locally = true;
                    merge_candles(stored, fetched, threshold)
                }
            }
        };

        log_report(symbol, timeframe, &report);
        Ok((candles, report))
    }

    /// The `limit` most recent candles, ascending
    pub async fn fetch_latest(
        &self,
        ctx: &SyncContext,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let stored = match ctx
            .run(
                "store read",
                self.store.get_range(symbol, timeframe, None, None, Some(limit)),
            )
            .await
        {
            Ok(candles) => Some(normalize(candles)),
            Err(e @ BotError::Cancelled(_)) => return Err(e),
            Err(e) => {
                tracing::warn!("Store read failed for {} {}: {}", symbol, timeframe, e);
                None
            }
        };

        if let Some(stored) = &stored {
            if stored.len() >= limit {
                return Ok(most_recent(stored.clone(), limit));
            }
        }

        // Headroom for duplicates and gaps
        let fetched = match ctx
            .run(
                "remote fetch",
                self.feed.get_candles(symbol, timeframe, None, None, limit * 2),
            )
            .await
        {
            Ok(candles) => normalize(candles),
            Err(e @ BotError::Cancelled(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Remote fetch failed for {} {}, returning stored candles: {}",
                    symbol,
                    timeframe,
                    e
                );
                return Ok(most_recent(stored.unwrap_or_default(), limit));
            }
        };

        let latest_known = match &stored {
            Some(candles) => Ok(candles.last().map(|c| c.open_time)),
            None => ctx
                .run(
                    "store latest",
                    self.store.get_latest_open_time(symbol, timeframe),
                )
                .await,
        };

        match latest_known {
            Ok(latest) => {
                let fresh: Vec<Candle> = fetched
                    .iter()
                    .filter(|c| latest.map_or(true, |t| c.open_time > t))
                    .cloned()
                    .collect();
                if !fresh.is_empty() {
                    match ctx
                        .run("store upsert", self.store.upsert_many(symbol, timeframe, &fresh))
                        .await
                    {
                        Ok(written) => tracing::debug!(
                            "Persisted {} new candles for {} {}",
                            written,
                            symbol,
                            timeframe
                        ),
                        Err(e @ BotError::Cancelled(_)) => return Err(e),
                        Err(e) => tracing::warn!("Failed to persist new candles: {}", e),
                    }
                }
            }
            Err(e @ BotError::Cancelled(_)) => return Err(e),
            Err(e) => tracing::warn!("Store unavailable, not persisting: {}", e),
        }

        let stored = stored.unwrap_or_default();
        let threshold = stored.last().map(|c| c.open_time);
        Ok(most_recent(merge_candles(stored, fetched, threshold), limit))
    }

    /// Fetch one missing range page by page
    ///
    /// Pages until the range end is passed or the feed has nothing more.
    /// A failure on the first page fails the range. A failure on a later
    /// page keeps what was already received.
    async fn fetch_gap(
        &self,
        ctx: &SyncContext,
        symbol: &str,
        timeframe: &str,
        range: TimeRange,
        interval: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let batch = self.config.fetch_batch_limit.max(1);
        let mut candles = Vec::new();
        let mut cursor = range.start;

        loop {
            let page = match ctx
                .run(
                    "remote fetch",
                    self.feed
                        .get_candles(symbol, timeframe, Some(cursor), Some(range.end), batch),
                )
                .await
            {
                Ok(page) => page,
                Err(e @ BotError::Cancelled(_)) => return Err(e),
                Err(e) if candles.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!("Partial gap fill, stopped at {}: {}", cursor, e);
                    break;
                }
            };

            let Some(last_open) = page.iter().map(|c| c.open_time).max() else {
                break;
            };
            candles.extend(
                page.into_iter()
                    .filter(|c| c.open_time >= range.start && c.open_time <= range.end),
            );

            // A page shorter than `batch` may just be the feed's own cap
            let next = last_open + interval.unwrap_or(1);
            if next > range.end || next <= cursor {
                break;
            }
            cursor = next;
        }

        Ok(candles)
    }
}

fn log_report(symbol: &str, timeframe: &str, report: &SyncReport) {
    tracing::info!(
        "Synced {} {}: {} from store, {} gaps, {} fetched, {} persisted, {} failed ranges",
        symbol,
        timeframe,
        report.from_store,
        report.missing_ranges.len(),
        report.fetched,
        report.persisted,
        report.failed_ranges.len()
    );
}
