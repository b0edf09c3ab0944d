// =============================================================================
// Refresh Orchestrator — polling lifecycle and the per-symbol result set
// =============================================================================
//
// One cycle:
//   1. Snapshot the configuration and tag the cycle with a sequence number.
//   2. For every symbol, concurrently: fetch ticker + klines together, each
//      bounded by the request timeout, then derive a signal. A failure is
//      captured as that symbol's failure record and never touches siblings.
//   3. Once every pipeline has settled, publish the ResultSet atomically in
//      configuration order, unless a newer cycle has already published.
//
// Triggers:
//   - Symbol set or capital change            -> immediate cycle
//   - Auto-refresh timer tick (auto only)     -> cycle
//   - Manual refresh (only while auto is off) -> cycle
//
// Overlapping cycles run to completion independently. Highest sequence wins;
// a slower, older cycle is discarded instead of overwriting newer results.
// In-flight work is never cancelled.
// =============================================================================

pub mod timer;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::{join, join_all, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::market_data::{Endpoint, MarketDataError, MarketDataSource};
use crate::runtime_config::RuntimeConfig;
use crate::strategy;
use crate::types::{Signal, Symbol};

pub use timer::AutoRefreshTimer;

// =============================================================================
// Result set
// =============================================================================

/// Latest signal per symbol, in configuration order at fetch time.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    /// Sequence number of the cycle that produced this set.
    pub cycle: u64,
    pub generated_at: DateTime<Utc>,
    pub signals: Vec<Signal>,
}

impl ResultSet {
    pub fn new(cycle: u64, signals: Vec<Signal>) -> Self {
        Self {
            cycle,
            generated_at: Utc::now(),
            signals,
        }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Signal> {
        self.signals.iter().find(|s| s.symbol() == symbol)
    }

    pub fn has_partial_failures(&self) -> bool {
        self.signals.iter().any(Signal::is_failure)
    }

    pub fn failure_count(&self) -> usize {
        self.signals.iter().filter(|s| s.is_failure()).count()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

// =============================================================================
// Status surface
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Success,
    PartialFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    /// No cycle has published yet and none is running.
    Idle,
    Loading,
    Settled(Settlement),
}

/// What the presentation layer renders.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSnapshot {
    pub phase: RefreshPhase,
    pub loading: bool,
    /// Cycle-level failure outside any per-symbol pipeline.
    pub error: Option<String>,
    pub has_partial_failures: bool,
    /// Whether the auto-refresh timer is currently scheduled.
    pub auto_refresh_armed: bool,
    pub results: Option<ResultSet>,
}

/// Why a cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    ConfigChanged,
    Timer,
    Manual,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::ConfigChanged => write!(f, "config_changed"),
            Self::Timer => write!(f, "timer"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// How a finished cycle affected the published result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published { failures: usize },
    /// A newer cycle had already published.
    Stale,
    /// The aggregation task died; the error string was set.
    Aborted,
    /// Finished after shutdown.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("manual refresh is disabled while auto refresh is on")]
    AutoRefreshEnabled,

    #[error("orchestrator has been shut down")]
    ShutDown,
}

/// Handle on a spawned cycle. Dropping it does not cancel the cycle.
pub struct CycleHandle {
    pub seq: u64,
    handle: JoinHandle<CycleOutcome>,
}

impl CycleHandle {
    pub async fn wait(self) -> CycleOutcome {
        self.handle.await.unwrap_or(CycleOutcome::Aborted)
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Owns the result set and the auto-refresh timer. Nothing else mutates them.
pub struct RefreshOrchestrator {
    core: Arc<Core>,
    timer: Mutex<AutoRefreshTimer>,
}

struct Core {
    source: Arc<dyn MarketDataSource>,
    config: RwLock<RuntimeConfig>,
    published: RwLock<Option<Arc<ResultSet>>>,
    last_error: RwLock<Option<String>>,
    next_seq: AtomicU64,
    in_flight: AtomicUsize,
    shut_down: AtomicBool,
}

/// Keeps the in-flight count honest even if the cycle task is cancelled.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RefreshOrchestrator {
    pub fn new(source: Arc<dyn MarketDataSource>, config: RuntimeConfig) -> Self {
        Self {
            core: Arc::new(Core {
                source,
                config: RwLock::new(config),
                published: RwLock::new(None),
                last_error: RwLock::new(None),
                next_seq: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                shut_down: AtomicBool::new(false),
            }),
            timer: Mutex::new(AutoRefreshTimer::new()),
        }
    }

    /// Run the initial cycle and arm the timer if auto refresh is on.
    pub fn start(&self) -> Result<CycleHandle, TriggerError> {
        let handle = self.core.spawn_cycle(Trigger::Startup)?;
        let config = self.core.config.read().clone();
        self.sync_timer(&config);
        Ok(handle)
    }

    /// Replace the configuration snapshot and fire whatever triggers the
    /// change implies. Returns the cycle handle when a cycle was started.
    pub fn apply_config(&self, config: RuntimeConfig) -> Result<Option<CycleHandle>, TriggerError> {
        if self.core.is_shut_down() {
            return Err(TriggerError::ShutDown);
        }

        let previous = std::mem::replace(&mut *self.core.config.write(), config.clone());

        let data_changed = previous.symbols != config.symbols
            || previous.capital_per_signal != config.capital_per_signal;
        let schedule_changed = previous.auto_refresh != config.auto_refresh
            || previous.refresh_interval != config.refresh_interval;

        if schedule_changed {
            info!(
                auto_refresh = config.auto_refresh,
                interval_ms = config.refresh_interval.as_millis(),
                "refresh schedule changed"
            );
            self.sync_timer(&config);
        }

        if data_changed {
            return self.core.spawn_cycle(Trigger::ConfigChanged).map(Some);
        }
        Ok(None)
    }

    /// Manual refresh. Only allowed while auto refresh is off.
    pub fn refresh_now(&self) -> Result<CycleHandle, TriggerError> {
        if self.core.is_shut_down() {
            return Err(TriggerError::ShutDown);
        }
        if self.core.config.read().auto_refresh {
            return Err(TriggerError::AutoRefreshEnabled);
        }
        self.core.spawn_cycle(Trigger::Manual)
    }

    /// Tear down the timer and refuse all further triggers. Cycles already
    /// running finish, but their results are discarded.
    pub fn shutdown(&self) {
        self.core.shut_down.store(true, Ordering::SeqCst);
        self.timer.lock().stop();
        info!("refresh orchestrator shut down");
    }

    pub fn results(&self) -> Option<Arc<ResultSet>> {
        self.core.published.read().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.core.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.core.last_error.read().clone()
    }

    pub fn has_partial_failures(&self) -> bool {
        self.results().is_some_and(|r| r.has_partial_failures())
    }

    pub fn phase(&self) -> RefreshPhase {
        phase_of(self.is_loading(), self.results().as_deref())
    }

    /// Status for the presentation layer. `in_flight` is read once so the
    /// phase and the loading flag always agree.
    pub fn snapshot(&self) -> RefreshSnapshot {
        let loading = self.is_loading();
        let results = self.results();
        RefreshSnapshot {
            phase: phase_of(loading, results.as_deref()),
            loading,
            error: self.last_error(),
            has_partial_failures: results.as_ref().is_some_and(|r| r.has_partial_failures()),
            auto_refresh_armed: self.timer.lock().is_running(),
            results: results.map(|r| (*r).clone()),
        }
    }

    /// Period of the running auto-refresh timer, if any.
    pub fn timer_period(&self) -> Option<Duration> {
        self.timer.lock().period()
    }

    fn sync_timer(&self, config: &RuntimeConfig) {
        let mut timer = self.timer.lock();
        if !config.auto_refresh || self.core.is_shut_down() {
            timer.stop();
            return;
        }

        let weak: Weak<Core> = Arc::downgrade(&self.core);
        timer.start(config.refresh_interval.as_duration(), move || {
            let Some(core) = weak.upgrade() else { return };
            if !core.config.read().auto_refresh {
                return;
            }
            if let Err(e) = core.spawn_cycle(Trigger::Timer) {
                debug!(error = %e, "timer tick ignored");
            }
        });
    }
}

fn phase_of(loading: bool, results: Option<&ResultSet>) -> RefreshPhase {
    if loading {
        return RefreshPhase::Loading;
    }
    match results {
        None => RefreshPhase::Idle,
        Some(r) if r.has_partial_failures() => RefreshPhase::Settled(Settlement::PartialFailure),
        Some(_) => RefreshPhase::Settled(Settlement::Success),
    }
}

impl Drop for RefreshOrchestrator {
    fn drop(&mut self) {
        self.core.shut_down.store(true, Ordering::SeqCst);
    }
}

impl Core {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn spawn_cycle(self: &Arc<Self>, trigger: Trigger) -> Result<CycleHandle, TriggerError> {
        if self.is_shut_down() {
            return Err(TriggerError::ShutDown);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let config = self.config.read().clone();

        // Visible as loading before the task is first polled.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        *self.last_error.write() = None;

        let core = Arc::clone(self);
        let handle = tokio::spawn(async move { core.run_cycle(seq, trigger, config).await });
        Ok(CycleHandle { seq, handle })
    }

    async fn run_cycle(self: Arc<Self>, seq: u64, trigger: Trigger, config: RuntimeConfig) -> CycleOutcome {
        let _guard = InFlightGuard(&self.in_flight);
        let started = Instant::now();
        info!(cycle = seq, trigger = %trigger, symbols = config.symbols.len(), "refresh cycle started");

        let collector = tokio::spawn(collect_signals(Arc::clone(&self.source), config));
        let signals = match collector.await {
            Ok(signals) => signals,
            Err(e) => {
                error!(cycle = seq, error = %e, "refresh cycle aborted");
                *self.last_error.write() = Some(format!("Failed to load: {e}"));
                return CycleOutcome::Aborted;
            }
        };

        let outcome = self.publish(ResultSet::new(seq, signals));
        debug!(cycle = seq, elapsed_ms = started.elapsed().as_millis() as u64, ?outcome, "refresh cycle finished");
        outcome
    }

    fn publish(&self, set: ResultSet) -> CycleOutcome {
        if self.is_shut_down() {
            debug!(cycle = set.cycle, "cycle finished after shutdown, discarding");
            return CycleOutcome::Discarded;
        }

        let mut slot = self.published.write();
        if let Some(current) = slot.as_ref() {
            if current.cycle > set.cycle {
                debug!(cycle = set.cycle, newer = current.cycle, "stale cycle result discarded");
                return CycleOutcome::Stale;
            }
        }

        let failures = set.failure_count();
        info!(
            cycle = set.cycle,
            signals = set.len() - failures,
            failures,
            "result set published"
        );
        *slot = Some(Arc::new(set));
        CycleOutcome::Published { failures }
    }
}

// =============================================================================
// Per-symbol pipelines
// =============================================================================

async fn collect_signals(source: Arc<dyn MarketDataSource>, config: RuntimeConfig) -> Vec<Signal> {
    let source = source.as_ref();
    let config = &config;
    let pipelines = config.symbols.iter().map(|symbol| async move {
        // A panic inside one pipeline becomes that symbol's failure record.
        match AssertUnwindSafe(symbol_pipeline(source, symbol, config))
            .catch_unwind()
            .await
        {
            Ok(signal) => signal,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(symbol = %symbol, error = %message, "symbol pipeline panicked");
                Signal::failure(symbol.clone(), message)
            }
        }
    });
    join_all(pipelines).await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "symbol pipeline panicked".to_string()
    }
}

async fn symbol_pipeline(source: &dyn MarketDataSource, symbol: &Symbol, config: &RuntimeConfig) -> Signal {
    let limit = config.request_timeout();
    let ticker = bounded(Endpoint::Ticker, limit, source.fetch_ticker(symbol));
    let klines = bounded(
        Endpoint::Klines,
        limit,
        source.fetch_klines(symbol, config.kline_interval_minutes, config.kline_limit),
    );

    match join(ticker, klines).await {
        (Ok(ticker), Ok(klines)) => {
            let signal = strategy::generate(symbol, &ticker, &klines, config.capital_per_signal);
            debug!(symbol = %symbol, side = %signal.side, leverage = signal.leverage, "signal derived");
            Signal::Success(signal)
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(symbol = %symbol, error = %e, detail = e.detail(), "symbol pipeline failed");
            Signal::failure(symbol.clone(), e.to_string())
        }
    }
}

/// Bound a single provider request; expiry drops (cancels) the request.
async fn bounded<T, F>(endpoint: Endpoint, limit: Duration, fut: F) -> Result<T, MarketDataError>
where
    F: Future<Output = Result<T, MarketDataError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MarketDataError::unavailable(
            endpoint,
            format!("timed out after {} ms", limit.as_millis()),
        )),
    }
}
