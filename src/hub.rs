//! Exactly-once delivery of match results to subscribers.
//!
//! Subscribing and matching race freely: a subscriber may attach before the user
//! enqueues, while the request is pending, or after the match was committed. A
//! result produced with nobody listening is buffered until a subscriber claims
//! it, the user is admitted again, or it ages out.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::MatchResult;

type Slots = Mutex<HashMap<String, Slot>>;

/// Per-user delivery state.
#[derive(Debug)]
struct Slot {
    /// Live subscriptions waiting for the next result
    waiters: Vec<(Uuid, oneshot::Sender<MatchResult>)>,
    /// Result published while nobody was waiting
    buffered: Option<MatchResult>,
    /// Ticket of the last request a result was published for
    last_ticket: Option<u64>,
    /// Last time this slot changed, for pruning
    touched: Instant,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Self {
            waiters: Vec::new(),
            buffered: None,
            last_ticket: None,
            touched: now,
        }
    }
}

/// What `publish` did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to this many live subscribers
    Delivered(usize),
    /// Nobody was listening; kept for the next subscriber
    Buffered,
    /// A result for this or a newer request was already published
    Ignored,
}

pub struct NotificationHub {
    slots: Arc<Slots>,
    retention: Duration,
}

impl NotificationHub {
    pub fn new(retention: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    /// Registers interest in the next match of `user_id`.
    ///
    /// A result buffered before this call is claimed on first poll, unless the
    /// user is admitted again in between (see [`discard_buffered`]). Each
    /// buffered result reaches at most one subscriber.
    ///
    /// [`discard_buffered`]: NotificationHub::discard_buffered
    pub fn subscribe(&self, user_id: &str) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();

        {
            let mut slots = self.slots.lock();
            let slot = slots
                .entry(user_id.to_string())
                .or_insert_with(|| Slot::new(now));
            slot.touched = now;
            slot.waiters.push((id, tx));
        }

        Subscription {
            user_id: user_id.to_string(),
            id,
            rx: Some(rx),
            buffer_checked: false,
            slots: Arc::downgrade(&self.slots),
        }
    }

    /// Drops an undelivered result for `user_id`. Called when the user starts
    /// a new round so a previous match is not mistaken for the next one.
    pub fn discard_buffered(&self, user_id: &str) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(user_id).and_then(|slot| slot.buffered.take()) {
            Some(stale) => {
                log::debug!("Discarding undelivered match for {} (delta {}) on re-admission",
                          user_id, stale.delta);
                true
            }
            None => false,
        }
    }

    /// Hands `result` to every subscriber of `user_id`, or buffers it.
    ///
    /// `ticket` identifies the matched request. Publishing for a ticket that is
    /// not newer than the last one published for the user is ignored.
    pub fn publish(&self, user_id: &str, ticket: u64, result: MatchResult) -> Delivery {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(user_id.to_string())
            .or_insert_with(|| Slot::new(now));

        if slot.last_ticket.map_or(false, |last| ticket <= last) {
            log::warn!("Ignoring duplicate match publish for {} (ticket {}, last {:?})",
                     user_id, ticket, slot.last_ticket);
            return Delivery::Ignored;
        }
        slot.last_ticket = Some(ticket);
        slot.touched = now;

        let mut delivered = 0;
        for (_, tx) in slot.waiters.drain(..) {
            if tx.send(result.clone()).is_ok() {
                delivered += 1;
            }
        }

        if delivered > 0 {
            // An older undelivered result is superseded by this one.
            slot.buffered = None;
            Delivery::Delivered(delivered)
        } else {
            if slot.buffered.is_some() {
                log::debug!("Replacing undelivered match for {}", user_id);
            }
            slot.buffered = Some(result);
            Delivery::Buffered
        }
    }

    /// Drops buffered results and idle slots untouched for longer than the
    /// retention period. Slots with live waiters are always kept.
    pub fn prune(&self, now: Instant) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|user_id, slot| {
            if !slot.waiters.is_empty() {
                return true;
            }
            let expired = now.saturating_duration_since(slot.touched) > self.retention;
            if expired && slot.buffered.is_some() {
                log::info!("Discarding undelivered match for {} after retention period", user_id);
            }
            !expired
        });
        before - slots.len()
    }

    /// True once a result has been published for `user_id` and the slot is still retained.
    pub fn has_published(&self, user_id: &str) -> bool {
        self.slots
            .lock()
            .get(user_id)
            .map_or(false, |slot| slot.last_ticket.is_some())
    }

    /// Number of live subscriptions across all users.
    pub fn waiting(&self) -> usize {
        self.slots.lock().values().map(|slot| slot.waiters.len()).sum()
    }

    /// Number of results waiting for a subscriber.
    pub fn buffered(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.buffered.is_some())
            .count()
    }
}

/// A single-resolution wait for one user's match.
///
/// Resolves to `Some(result)` once, or `None` if the hub went away first.
/// Dropping it before resolution releases its place in the hub.
pub struct Subscription {
    user_id: String,
    id: Uuid,
    rx: Option<oneshot::Receiver<MatchResult>>,
    buffer_checked: bool,
    slots: Weak<Slots>,
}

impl Subscription {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Takes a result buffered for this user and withdraws the waiter in the same
    /// critical section, so a concurrent publish cannot also reach it.
    fn claim_buffered(&self) -> Option<MatchResult> {
        let slots = self.slots.upgrade()?;
        let mut slots = slots.lock();
        let slot = slots.get_mut(&self.user_id)?;
        let result = slot.buffered.take()?;
        slot.waiters.retain(|(id, _)| *id != self.id);
        Some(result)
    }

    /// Converts the subscription into a stream that yields the result once and then ends.
    pub fn into_stream(self) -> impl Stream<Item = MatchResult> + Send + Unpin {
        stream::once(self).filter_map(futures::future::ready)
    }
}

impl Future for Subscription {
    type Output = Option<MatchResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.rx.is_none() {
            return Poll::Ready(None);
        }
        if !self.buffer_checked {
            self.buffer_checked = true;
            if let Some(result) = self.claim_buffered() {
                self.rx = None;
                return Poll::Ready(Some(result));
            }
        }
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(result) => {
                self.rx = None;
                Poll::Ready(result.ok())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.rx.is_none() {
            return;
        }
        if let Some(slots) = self.slots.upgrade() {
            let mut slots = slots.lock();
            if let Some(slot) = slots.get_mut(&self.user_id) {
                slot.waiters.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
