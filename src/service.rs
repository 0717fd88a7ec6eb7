use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant as StdInstant;

use time::format_description::well_known::Rfc3339;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::MatchmakingConfig;
use crate::error::MatchmakingError;
use crate::hub::{Delivery, NotificationHub, Subscription};
use crate::models::{AddRequestResponse, QueueStats};
use crate::queue::{
    Matcher, Matchmaker, QueueEvent, QueueEventType, Request, RequestPool, RequestState,
    SteppedTolerance, ToleranceCurve,
};

/// Engine that pairs users by rank and notifies both sides of each match.
/// Owns the request pool, the matcher and the notification hub; clones share them.
///
/// The matching loop holds only a weak reference, so dropping the last handle
/// stops it even without calling [`shutdown`](MatchEngine::shutdown).
#[derive(Clone)]
pub struct MatchEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    /// Pending requests, one per user
    pool: RequestPool,
    /// Pair search over the pool
    matcher: Matcher,
    /// Per-user delivery of match results
    hub: NotificationHub,
    /// Wakes the matching loop after an admission
    wake: Arc<Notify>,
    /// Channel for broadcasting queue events to observers
    events: broadcast::Sender<QueueEvent>,
    /// Flipped to true to stop the matching loop
    shutdown: watch::Sender<bool>,
    /// Configuration for matching and queue limits
    config: MatchmakingConfig,
    /// Engine start time for calculating uptime
    start_time: StdInstant,
    /// Counter for committed pairings
    matches_count: AtomicU64,
    /// Counter for rejected admissions
    rejected_count: AtomicU64,
}

impl MatchEngine {
    /// Creates an engine using the stepped tolerance described by `config`
    /// (or the defaults) and starts its matching loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Option<MatchmakingConfig>) -> Self {
        let config = config.unwrap_or_default();
        let tolerance = Arc::new(SteppedTolerance::from(&config));
        Self::with_tolerance(config, tolerance)
    }

    /// Creates an engine with a custom tolerance curve and starts its matching loop.
    pub fn with_tolerance(config: MatchmakingConfig, tolerance: Arc<dyn ToleranceCurve>) -> Self {
        log::info!("Creating match engine with configuration: {:?}", config);

        let (events, _) = broadcast::channel(config.event_buffer);
        let (shutdown, _) = watch::channel(false);
        let engine = Self {
            inner: Arc::new(EngineInner {
                pool: RequestPool::new(config.max_queue_size),
                matcher: Matcher::new(tolerance),
                hub: NotificationHub::new(config.result_retention()),
                wake: Arc::new(Notify::new()),
                events,
                shutdown,
                config,
                start_time: StdInstant::now(),
                matches_count: AtomicU64::new(0),
                rejected_count: AtomicU64::new(0),
            }),
        };

        engine.start_matching_loop();
        engine
    }

    /// Spawns the single task that runs sweeps. It wakes on every admission and
    /// on a periodic tick so aged requests are re-evaluated as tolerance widens.
    fn start_matching_loop(&self) {
        let weak = Arc::downgrade(&self.inner);
        let wake = Arc::clone(&self.inner.wake);
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let period = self.inner.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let mut tick = false;
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = interval.tick() => tick = true,
                    // Err means every engine handle is gone.
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if tick {
                    let pruned = inner.hub.prune(Instant::now());
                    if pruned > 0 {
                        log::debug!("Pruned {} idle notification slots", pruned);
                    }
                }
                let engine = MatchEngine { inner };
                engine.sweep_now();
            }
            log::info!("Matching loop stopped");
        });
    }

    /// Admits a request for `user_id`. Returns the request's ticket.
    ///
    /// A result from the user's previous match that nobody claimed is discarded,
    /// so subscribers only ever see the outcome of the new request.
    ///
    /// # Returns
    /// - Ok(ticket) if the request was added to the pool
    /// - Err(MatchmakingError::AlreadyEnqueued) if the user already has a pending request
    /// - Err(MatchmakingError::QueueFull) if the pool is at capacity
    pub fn enqueue(&self, user_id: &str, rank: i32) -> Result<u64, MatchmakingError> {
        let inner = &self.inner;
        let admitted = {
            let mut pool = inner.pool.lock();
            let admitted = pool.insert(user_id.to_string(), rank);
            if admitted.is_ok() {
                inner.hub.discard_buffered(user_id);
            }
            admitted
        };

        match admitted {
            Ok(request) => {
                log::info!("Enqueued {} (rank {}, ticket {})", user_id, rank, request.ticket);
                let _ = inner.events.send(QueueEvent {
                    user_id: user_id.to_string(),
                    event_type: QueueEventType::Enqueued { rank },
                });
                inner.wake.notify_one();
                Ok(request.ticket)
            }
            Err(e) => {
                log::warn!("Rejected request for {}: {}", user_id, e);
                inner.rejected_count.fetch_add(1, Ordering::Relaxed);
                let _ = inner.events.send(QueueEvent {
                    user_id: user_id.to_string(),
                    event_type: QueueEventType::Rejected(e.code()),
                });
                Err(e)
            }
        }
    }

    /// Subscribes to the next match of `user_id`.
    pub fn subscribe(&self, user_id: &str) -> Subscription {
        self.inner.hub.subscribe(user_id)
    }

    /// Runs one sweep and publishes every pairing it commits.
    ///
    /// Publishing happens before the pool lock is released, so results reach
    /// the hub in commit order even when sweeps run concurrently, and a user
    /// cannot be admitted again before the previous match is published.
    ///
    /// Returns the number of pairings committed.
    pub fn sweep_now(&self) -> usize {
        let inner = &self.inner;
        let mut pool = inner.pool.lock();
        let sweep = inner.matcher.sweep_locked(&mut pool, Instant::now());
        inner.matches_count.fetch_add(sweep.matches.len() as u64, Ordering::Relaxed);

        for pairing in &sweep.matches {
            let result = &pairing.result;
            let [first, second] = &pairing.requests;
            let waited = |request: &Request| (result.matched_at - request.enqueued_at_utc).whole_milliseconds();
            log::info!("Matched {} with {} (delta {}, waited {}ms and {}ms)",
                     first.user_id, second.user_id, result.delta, waited(first), waited(second));

            for (request, other) in [(first, second), (second, first)] {
                if inner.hub.publish(&request.user_id, request.ticket, result.clone()) == Delivery::Ignored {
                    log::error!("Match for {} was published twice", request.user_id);
                }
                let _ = inner.events.send(QueueEvent {
                    user_id: request.user_id.clone(),
                    event_type: QueueEventType::Matched {
                        with: other.user_id.clone(),
                        delta: result.delta,
                    },
                });
            }
        }
        drop(pool);

        if let Some(e) = sweep.aborted {
            log::error!("Matching sweep aborted after {} pairings: {}", sweep.matches.len(), e);
        }
        sweep.matches.len()
    }

    /// Subscribe to queue events (admissions, rejections, matches).
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Number of requests currently pending.
    pub fn pending(&self) -> usize {
        self.inner.pool.len()
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.inner.config
    }

    /// Stops the matching loop. Pending requests stay in the pool and
    /// `sweep_now` keeps working.
    pub fn shutdown(&self) {
        log::info!("Shutting down match engine");
        self.inner.shutdown.send_replace(true);
    }

    /// Get a snapshot of queue statistics
    pub fn stats(&self) -> QueueStats {
        let inner = &self.inner;
        QueueStats {
            pending_requests: inner.pool.len(),
            queue_capacity: inner.pool.capacity(),
            waiting_subscribers: inner.hub.waiting(),
            buffered_results: inner.hub.buffered(),
            matches_count: inner.matches_count.load(Ordering::Relaxed),
            rejected_count: inner.rejected_count.load(Ordering::Relaxed),
            uptime_seconds: inner.start_time.elapsed().as_secs(),
            oldest_pending_since: inner
                .pool
                .oldest()
                .and_then(|request| request.enqueued_at_utc.format(&Rfc3339).ok()),
        }
    }
}

#[async_trait::async_trait]
impl Matchmaker for MatchEngine {
    async fn add_request(&self, user_id: &str, rank: i32) -> AddRequestResponse {
        self.enqueue(user_id, rank).into()
    }

    fn match_found(&self, user_id: &str) -> Subscription {
        self.subscribe(user_id)
    }

    fn request_state(&self, user_id: &str) -> Option<RequestState> {
        if self.inner.pool.contains(user_id) {
            Some(RequestState::Pending)
        } else if self.inner.hub.has_published(user_id) {
            Some(RequestState::Matched)
        } else {
            None
        }
    }
}
