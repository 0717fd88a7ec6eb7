//! Data models for the matchmaking queue.
//! Defines the result types handed to API layers, serialized in the shape
//! of the `addRequest` mutation and the `matchFound` subscription.

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::MatchmakingError;

/// Outcome of an `addRequest` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddRequestResponse {
    /// Whether the request was admitted into the pool
    pub ok: bool,
    /// Error code when `ok` is false, `null` otherwise
    pub error: Option<String>,
}

impl AddRequestResponse {
    pub fn accepted() -> Self {
        Self { ok: true, error: None }
    }

    pub fn rejected(error: &MatchmakingError) -> Self {
        Self {
            ok: false,
            error: Some(error.code().to_string()),
        }
    }
}

impl<T> From<Result<T, MatchmakingError>> for AddRequestResponse {
    fn from(result: Result<T, MatchmakingError>) -> Self {
        match result {
            Ok(_) => Self::accepted(),
            Err(e) => Self::rejected(&e),
        }
    }
}

/// One participant of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedUser {
    pub user_id: String,
    pub user_rank: i32,
}

/// A committed pairing of two users. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Both participants; the first one is the request that waited longest
    pub users: [MatchedUser; 2],
    /// Absolute rank difference between the two participants
    pub delta: u32,
    /// When the pairing was committed
    #[serde(skip)]
    pub matched_at: OffsetDateTime,
}

impl MatchResult {
    /// Returns true if `user_id` is one of the two participants.
    pub fn involves(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u.user_id == user_id)
    }

    /// The participant that is not `user_id`, if `user_id` took part.
    pub fn opponent_of(&self, user_id: &str) -> Option<&MatchedUser> {
        match &self.users {
            [a, b] if a.user_id == user_id => Some(b),
            [a, b] if b.user_id == user_id => Some(a),
            _ => None,
        }
    }
}

/// Point-in-time view of the engine, suitable for a health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Requests currently waiting in the pool
    pub pending_requests: usize,
    /// Maximum pending requests allowed
    pub queue_capacity: usize,
    /// Subscriptions waiting for a result
    pub waiting_subscribers: usize,
    /// Results produced before anyone subscribed
    pub buffered_results: usize,
    /// Total pairings committed since start
    pub matches_count: u64,
    /// Total rejected `addRequest` calls since start
    pub rejected_count: u64,
    /// Seconds since the engine was created
    pub uptime_seconds: u64,
    /// RFC 3339 admission time of the longest-waiting request
    pub oldest_pending_since: Option<String>,
}
