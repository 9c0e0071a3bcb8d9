use async_trait::async_trait;
use bandbot::api::{OrderRequest, RemoteFeed};
use bandbot::backtest::{MarketScenario, SyntheticFeed};
use bandbot::config::SyncConfig;
use bandbot::persistence::{CandleStore, MemoryCandleStore};
use bandbot::sync::{merge_candles, CandleSynchronizer, SyncContext};
use bandbot::{AccountBalance, BotError, Candle, OrderResult, Result, TimeRange, Timeframe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

const HOUR: i64 = 3_600_000;
const SYMBOL: &str = "SYNTH";

// ============================================================================
// Failure-injecting collaborators
// ============================================================================

/// Memory store that can be told to fail reads and writes
struct FlakyStore {
    inner: MemoryCandleStore,
    fail_writes: AtomicBool,
    /// Reads that succeed before every further read fails
    reads_left: AtomicUsize,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryCandleStore::new(10_000),
            fail_writes: AtomicBool::new(false),
            reads_left: AtomicUsize::new(usize::MAX),
        }
    }

    fn down() -> Self {
        let store = Self::new();
        store.fail_writes.store(true, Ordering::SeqCst);
        store.reads_left.store(0, Ordering::SeqCst);
        store
    }

    fn take_read(&self) -> Result<()> {
        self.reads_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| BotError::DataSource("store offline".to_string()))
    }
}

#[async_trait]
impl CandleStore for FlakyStore {
    async fn get_range(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        self.take_read()?;
        self.inner.get_range(symbol, timeframe, start, end, limit).await
    }

    async fn upsert_many(&self, symbol: &str, timeframe: &str, candles: &[Candle]) -> Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BotError::DataSource("store read-only".to_string()));
        }
        self.inner.upsert_many(symbol, timeframe, candles).await
    }

    async fn get_latest_open_time(&self, symbol: &str, timeframe: &str) -> Result<Option<i64>> {
        self.take_read()?;
        self.inner.get_latest_open_time(symbol, timeframe).await
    }
}

/// Synthetic feed that errors for requests starting inside `failing`
struct FlakyFeed {
    inner: SyntheticFeed,
    failing: Vec<TimeRange>,
    calls: AtomicUsize,
}

impl FlakyFeed {
    fn new(inner: SyntheticFeed, failing: Vec<TimeRange>) -> Self {
        Self {
            inner,
            failing,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFeed for FlakyFeed {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(s) = start {
            if self.failing.iter().any(|r| s >= r.start && s <= r.end) {
                return Err(BotError::DataSource("HTTP 503".to_string()));
            }
        }
        self.inner.get_candles(symbol, timeframe, start, end, limit).await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        self.inner.place_order(request).await
    }

    async fn get_balances(&self) -> Result<Vec<AccountBalance>> {
        self.inner.get_balances().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn series(n: usize) -> Vec<Candle> {
    SyntheticFeed::generate(11, MarketScenario::Sideways, SYMBOL, Timeframe::H1, 0, n)
        .candles()
        .to_vec()
}

fn open_times(candles: &[Candle]) -> Vec<i64> {
    candles.iter().map(|c| c.open_time).collect()
}

fn hours(range: std::ops::RangeInclusive<i64>) -> Vec<i64> {
    range.map(|h| h * HOUR).collect()
}

fn synchronizer(store: Arc<dyn CandleStore>, feed: Arc<dyn RemoteFeed>) -> CandleSynchronizer {
    CandleSynchronizer::new(
        store,
        feed,
        SyncConfig {
            fetch_batch_limit: 7,
            timeout_secs: None,
        },
    )
}

/// Store seeded with every candle of `all` except the excluded hours
async fn seeded(store: &FlakyStore, all: &[Candle], excluded: &[i64]) {
    let kept: Vec<Candle> = all
        .iter()
        .filter(|c| !excluded.contains(&(c.open_time / HOUR)))
        .cloned()
        .collect();
    store.inner.upsert_many(SYMBOL, "1h", &kept).await.unwrap();
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_gaps_filled_and_persisted() {
    tracing_subscriber::fmt().try_init().ok();

    let all = series(30);
    let store = Arc::new(FlakyStore::new());
    let excluded: Vec<i64> = (0..3).chain(10..15).chain(27..30).collect();
    seeded(&store, &all, &excluded).await;
    let feed = Arc::new(FlakyFeed::new(SyntheticFeed::new(all.clone()), Vec::new()));

    let sync = synchronizer(store.clone(), feed.clone());
    let (candles, report) = assert_ok!(
        sync.fetch_range_with_report(&SyncContext::new(), SYMBOL, "1h", 0, 29 * HOUR)
            .await
    );

    assert_eq!(open_times(&candles), hours(0..=29));
    assert_eq!(
        report.missing_ranges,
        vec![
            TimeRange::new(0, 2 * HOUR),
            TimeRange::new(10 * HOUR, 14 * HOUR),
            TimeRange::new(27 * HOUR, 29 * HOUR),
        ]
    );
    assert_eq!(report.from_store, 19);
    assert_eq!(report.fetched, 11);
    assert_eq!(report.persisted, 11);
    assert!(!report.merged_locally);
    assert_eq!(store.inner.candle_count(SYMBOL, "1h").unwrap(), 30);

    // Second pass is served from the store alone
    let calls = feed.calls();
    let (again, report) = sync
        .fetch_range_with_report(&SyncContext::new(), SYMBOL, "1h", 0, 29 * HOUR)
        .await
        .unwrap();
    assert_eq!(again, candles);
    assert!(report.missing_ranges.is_empty());
    assert_eq!(feed.calls(), calls);
}

#[tokio::test]
async fn test_store_down_falls_back_to_remote() {
    let all = series(20);
    let feed = Arc::new(FlakyFeed::new(SyntheticFeed::new(all.clone()), Vec::new()));
    let sync = synchronizer(Arc::new(FlakyStore::down()), feed);

    let (candles, report) = sync
        .fetch_range_with_report(&SyncContext::new(), SYMBOL, "1h", 5 * HOUR, 14 * HOUR)
        .await
        .unwrap();

    assert_eq!(open_times(&candles), hours(5..=14));
    assert!(!report.store_available);
    assert_eq!(report.from_store, 0);
    assert!(report.merged_locally);
    assert_eq!(report.persisted, 0);
}

#[tokio::test]
async fn test_failed_range_is_skipped() {
    let all = series(30);
    let store = Arc::new(FlakyStore::new());
    let excluded: Vec<i64> = (5..10).chain(20..25).collect();
    seeded(&store, &all, &excluded).await;
    let feed = Arc::new(FlakyFeed::new(
        SyntheticFeed::new(all),
        vec![TimeRange::new(5 * HOUR, 9 * HOUR)],
    ));

    let sync = synchronizer(store.clone(), feed);
    let (candles, report) = sync
        .fetch_range_with_report(&SyncContext::new(), SYMBOL, "1h", 0, 29 * HOUR)
        .await
        .unwrap();

    let expected: Vec<i64> = hours(0..=29)
        .into_iter()
        .filter(|t| !(5 * HOUR..=9 * HOUR).contains(t))
        .collect();
    assert_eq!(open_times(&candles), expected);
    assert_eq!(report.failed_ranges, vec![TimeRange::new(5 * HOUR, 9 * HOUR)]);
    assert_eq!(report.fetched, 5);
}

#[tokio::test]
async fn test_reread_failure_merges_locally() {
    let all = series(20);
    let store = Arc::new(FlakyStore::new());
    seeded(&store, &all, &(12..20).collect::<Vec<_>>()).await;
    // First read works, the re-read does not
    store.reads_left.store(1, Ordering::SeqCst);
    let feed = Arc::new(FlakyFeed::new(SyntheticFeed::new(all), Vec::new()));

    let sync = synchronizer(store.clone(), feed);
    let (candles, report) = sync
        .fetch_range_with_report(&SyncContext::new(), SYMBOL, "1h", 0, 19 * HOUR)
        .await
        .unwrap();

    assert_eq!(open_times(&candles), hours(0..=19));
    assert!(report.merged_locally);
    assert_eq!(report.persisted, 8);
    assert_eq!(store.inner.candle_count(SYMBOL, "1h").unwrap(), 20);
}

#[tokio::test]
async fn test_result_sorted_unique_and_bounded() {
    // The generator leaves real holes the feed cannot fill either
    let all = SyntheticFeed::generate(3, MarketScenario::WithGaps, SYMBOL, Timeframe::H1, 0, 200)
        .candles()
        .to_vec();
    let store = Arc::new(FlakyStore::new());
    let stored: Vec<Candle> = all.iter().step_by(3).cloned().collect();
    store.inner.upsert_many(SYMBOL, "1h", &stored).await.unwrap();
    let feed = Arc::new(FlakyFeed::new(SyntheticFeed::new(all.clone()), Vec::new()));

    let sync = synchronizer(store, feed);
    let (start, end) = (10 * HOUR, 150 * HOUR);
    let candles = sync
        .fetch_range(&SyncContext::new(), SYMBOL, "1h", start, end)
        .await
        .unwrap();

    assert!(candles.windows(2).all(|w| w[0].open_time < w[1].open_time));
    assert!(candles.iter().all(|c| c.open_time >= start && c.open_time <= end));
    let available = all
        .iter()
        .filter(|c| c.open_time >= start && c.open_time <= end)
        .count();
    assert_eq!(candles.len(), available);
}

#[tokio::test]
async fn test_cancelled_context_aborts_sync() {
    let all = series(10);
    let feed = Arc::new(FlakyFeed::new(SyntheticFeed::new(all), Vec::new()));
    let sync = synchronizer(Arc::new(FlakyStore::new()), feed.clone());

    let (cancel, ctx) = SyncContext::cancellable();
    cancel.cancel();

    let err = assert_err!(sync.fetch_range(&ctx, SYMBOL, "1h", 0, 9 * HOUR).await);
    assert!(matches!(err, BotError::Cancelled(_)));
    let err = assert_err!(sync.fetch_latest(&ctx, SYMBOL, "1h", 5).await);
    assert!(matches!(err, BotError::Cancelled(_)));
    assert_eq!(feed.calls(), 0);
}

#[tokio::test]
async fn test_fetch_latest_when_store_down() {
    let all = series(30);
    let feed = Arc::new(FlakyFeed::new(SyntheticFeed::new(all), Vec::new()));
    let sync = synchronizer(Arc::new(FlakyStore::down()), feed);

    let candles = sync
        .fetch_latest(&SyncContext::new(), SYMBOL, "1h", 5)
        .await
        .unwrap();

    assert_eq!(open_times(&candles), hours(25..=29));
}

#[test]
fn test_stored_candles_win_up_to_threshold() {
    let mut all = series(4);
    let stored = vec![all[0].clone(), all[1].clone()];
    all[1].close = -1.0;
    all[2].close = -2.0;

    let merged = merge_candles(stored.clone(), all.clone(), Some(HOUR));

    assert_eq!(merged.len(), 4);
    assert_eq!(merged[1], stored[1]);
    assert_eq!(merged[2].close, -2.0);
}
