//! Per-client rate limiting.
//!
//! # Responsibilities
//! - Token bucket per client key, refilled continuously
//! - Lazily created registry entries, at most one per key
//! - Background janitor evicting entries idle beyond a threshold
//! - `AdmissionControl` stage answering `429` when a bucket is empty
//!
//! # Design Decisions
//! - Sharded map (`DashMap`); each entry guards its bucket with its own mutex
//! - Creation goes through `entry().or_insert_with`, under the shard lock
//! - The janitor's `retain` takes the same shard locks as lookups
//! - The registry owns the janitor's stop signal; dropping it stops the task

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::RateLimitConfig;
use crate::http::pipeline::{Handler, Stage};
use crate::http::request::{client_key_of, RequestContextExt};
use crate::http::response::{json_error, RATE_LIMITED_MESSAGE};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// A token bucket with continuous refill.
///
/// Not synchronized; callers hold the owning entry's lock.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill_at: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    pub fn new_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill_at: now,
        }
    }

    pub fn try_consume(&mut self, n: u32) -> bool {
        self.try_consume_at(n, Instant::now())
    }

    /// Refill up to `now`, then take `n` tokens if available.
    ///
    /// A denied call leaves the bucket untouched.
    pub fn try_consume_at(&mut self, n: u32, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill_at).as_secs_f64();
        let available = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        let n = f64::from(n);

        if available >= n {
            self.tokens = available - n;
            self.last_refill_at = now;
            true
        } else {
            false
        }
    }

    /// Token level as of the last admitted call.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

#[derive(Debug)]
struct EntryState {
    bucket: TokenBucket,
    last_seen_at: Instant,
}

/// One client's registry entry.
#[derive(Debug)]
pub struct LimiterEntry {
    state: Mutex<EntryState>,
}

impl LimiterEntry {
    fn new(burst: u32, rps: f64, now: Instant) -> Self {
        Self {
            state: Mutex::new(EntryState {
                bucket: TokenBucket::new_at(burst, rps, now),
                last_seen_at: now,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self, now: Instant) {
        let mut state = self.lock();
        if now > state.last_seen_at {
            state.last_seen_at = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.lock().last_seen_at)
    }
}

/// Handle to a client's bucket, handed out by [`LimiterRegistry::limiter_for`].
#[derive(Debug, Clone)]
pub struct LimiterHandle {
    entry: Arc<LimiterEntry>,
}

impl LimiterHandle {
    pub fn try_consume(&self, n: u32) -> bool {
        self.entry.lock().bucket.try_consume(n)
    }

    pub fn tokens(&self) -> f64 {
        self.entry.lock().bucket.tokens()
    }
}

/// Concurrent map from client key to limiter entry.
#[derive(Debug)]
pub struct LimiterRegistry {
    entries: DashMap<String, Arc<LimiterEntry>>,
    rps: f64,
    burst: u32,
    idle_after: Duration,
    sweep_interval: Duration,
    shutdown: Shutdown,
}

impl LimiterRegistry {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            rps: config.requests_per_second,
            burst: config.burst_size,
            idle_after: config.idle_eviction(),
            sweep_interval: config.sweep_interval(),
            shutdown: Shutdown::new(),
        }
    }

    /// Look up or create the entry for `key`, marking it as seen now.
    pub fn limiter_for(&self, key: &str) -> LimiterHandle {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            entry.touch(now);
            return LimiterHandle {
                entry: Arc::clone(entry.value()),
            };
        }

        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(LimiterEntry::new(self.burst, self.rps, now)));
        entry.touch(now);
        LimiterHandle {
            entry: Arc::clone(entry.value()),
        }
    }

    /// Remove entries idle for longer than the eviction threshold.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.idle_for(now) <= self.idle_after;
            if !keep {
                evicted += 1;
            }
            keep
        });
        metrics::set_limiter_entries(self.entries.len());
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Start the periodic sweep.
    ///
    /// Runs until [`stop_janitor`](Self::stop_janitor) is called or the
    /// registry is dropped.
    pub fn spawn_janitor(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let mut stop = self.shutdown.subscribe();
        let period = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval = ?period, "Limiter janitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        let evicted = registry.sweep();
                        if evicted > 0 {
                            tracing::debug!(
                                evicted,
                                remaining = registry.len(),
                                "Evicted idle limiter entries"
                            );
                        }
                    }
                    _ = stop.recv() => break,
                }
            }

            tracing::info!("Limiter janitor stopped");
        })
    }

    pub fn stop_janitor(&self) {
        self.shutdown.trigger();
    }

    /// Janitor tasks still waiting on the stop signal.
    pub fn active_janitors(&self) -> usize {
        self.shutdown.receiver_count()
    }
}

fn rate_limited() -> Response {
    let mut response = json_error(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    response
}

/// Charges each request against its client's bucket.
#[derive(Debug, Clone)]
pub struct AdmissionControl {
    registry: Arc<LimiterRegistry>,
}

impl AdmissionControl {
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self { registry }
    }
}

impl Stage for AdmissionControl {
    fn name(&self) -> &'static str {
        "admission_control"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let registry = Arc::clone(&self.registry);
        Handler::new(move |req| -> BoxFuture<'static, Response> {
            let key = client_key_of(&req);
            if registry.limiter_for(&key).try_consume(1) {
                return next.call(req);
            }

            tracing::debug!(
                client = %key,
                request_id = req.request_id().map_or("-", |id| id.as_str()),
                "Rate limit exceeded"
            );
            metrics::record_rate_limited();
            std::future::ready(rate_limited()).boxed()
        })
    }
}
