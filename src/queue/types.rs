use time::OffsetDateTime;
use tokio::time::Instant;

use crate::hub::Subscription;
use crate::models::AddRequestResponse;

/// A pending enqueue request owned by the pool.
/// Each request carries a unique, increasing ticket and the moment it was admitted.
#[derive(Debug, Clone)]
pub struct Request {
    /// Identity of the user; at most one pending request per user
    pub user_id: String,
    /// Skill rank used for compatibility
    pub rank: i32,
    /// Admission sequence number, unique across the lifetime of the pool
    pub ticket: u64,
    /// Monotonic admission time, used to compute wait time
    pub enqueued_at: Instant,
    /// Wall-clock admission time
    pub enqueued_at_utc: OffsetDateTime,
}

impl Request {
    pub fn new(user_id: String, rank: i32, ticket: u64) -> Self {
        Self {
            user_id,
            rank,
            ticket,
            enqueued_at: Instant::now(),
            enqueued_at_utc: OffsetDateTime::now_utc(),
        }
    }
}

/// Lifecycle of a request. A request leaves the pool exactly when it becomes `Matched`.
#[derive(Clone, Debug, PartialEq, Eq, Copy)]
pub enum RequestState {
    /// Admitted and waiting in the pool
    Pending,
    /// Paired and removed from the pool; terminal
    Matched,
}

/// Event emitted when the queue state changes.
/// These events are broadcast to all observers of the engine.
#[derive(Clone, Debug)]
pub struct QueueEvent {
    /// The user the event is about
    pub user_id: String,
    pub event_type: QueueEventType,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueueEventType {
    /// A request was admitted with the given rank
    Enqueued { rank: i32 },
    /// An `addRequest` was refused; carries the error code
    Rejected(&'static str),
    /// The user's request was paired
    Matched { with: String, delta: u32 },
}

/// Trait defining the two operations an API layer consumes.
/// This abstraction lets a transport depend on the queue without knowing
/// how matching is scheduled.
///
/// All implementations must be thread-safe.
#[async_trait::async_trait]
pub trait Matchmaker: Send + Sync + 'static {
    /// Submit a user's rank for pairing. Never waits for a match.
    async fn add_request(&self, user_id: &str, rank: i32) -> AddRequestResponse;

    /// Subscribe to the single match result of a user.
    fn match_found(&self, user_id: &str) -> Subscription;

    /// Current state of the user's request, if the engine knows it.
    fn request_state(&self, user_id: &str) -> Option<RequestState>;
}
