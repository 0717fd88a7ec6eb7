use std::collections::{BTreeMap, HashMap};

use parking_lot::{Mutex, MutexGuard};

use crate::error::MatchmakingError;
use crate::queue::types::Request;

/// In-memory pool of pending requests, keyed by user.
///
/// This implementation has the following characteristics:
/// - One exclusive lock guards every mutation and every matching sweep
/// - O(1) duplicate detection through a HashMap keyed by user ID
/// - Enqueue order kept in a BTreeMap keyed by ticket, so scans are oldest-first
/// - Configurable maximum size to prevent memory exhaustion
pub struct RequestPool {
    state: Mutex<PoolState>,
    max_size: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    by_user: HashMap<String, Request>,
    order: BTreeMap<u64, String>,
    next_ticket: u64,
}

/// Exclusive access to the pool. Held by the matcher for a whole sweep so no
/// insert or removal can interleave with planning and committing pairs.
pub struct PoolGuard<'a> {
    state: MutexGuard<'a, PoolState>,
    max_size: usize,
}

impl RequestPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            max_size,
        }
    }

    pub fn lock(&self) -> PoolGuard<'_> {
        PoolGuard {
            state: self.state.lock(),
            max_size: self.max_size,
        }
    }

    /// Atomically checks that `user_id` has no pending request and admits a new one.
    pub fn insert(&self, user_id: impl Into<String>, rank: i32) -> Result<Request, MatchmakingError> {
        self.lock().insert(user_id.into(), rank)
    }

    pub fn remove(&self, user_id: &str) -> Result<Request, MatchmakingError> {
        self.lock().remove(user_id)
    }

    /// Consistent copy of every pending request, oldest first.
    pub fn snapshot(&self) -> Vec<Request> {
        self.lock().snapshot()
    }

    /// The request that has waited longest, if any.
    pub fn oldest(&self) -> Option<Request> {
        let state = self.state.lock();
        let (_, user_id) = state.order.iter().next()?;
        state.by_user.get(user_id).cloned()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.state.lock().by_user.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl PoolGuard<'_> {
    pub fn insert(&mut self, user_id: String, rank: i32) -> Result<Request, MatchmakingError> {
        if self.state.by_user.contains_key(&user_id) {
            return Err(MatchmakingError::AlreadyEnqueued(user_id));
        }
        if self.state.by_user.len() >= self.max_size {
            return Err(MatchmakingError::QueueFull);
        }

        self.state.next_ticket += 1;
        let ticket = self.state.next_ticket;
        let request = Request::new(user_id.clone(), rank, ticket);

        self.state.order.insert(ticket, user_id.clone());
        self.state.by_user.insert(user_id, request.clone());
        Ok(request)
    }

    pub fn remove(&mut self, user_id: &str) -> Result<Request, MatchmakingError> {
        let request = self
            .state
            .by_user
            .remove(user_id)
            .ok_or_else(|| MatchmakingError::NotFound(user_id.to_string()))?;
        self.state.order.remove(&request.ticket);
        Ok(request)
    }

    /// Removes both sides of a pairing, or neither. Both users are checked
    /// before anything is removed so a failed revalidation leaves the pool intact.
    pub fn take_pair(&mut self, first: &str, second: &str) -> Result<(Request, Request), MatchmakingError> {
        // A user can never be paired with itself; treat it like a vanished entry.
        if first == second {
            return Err(MatchmakingError::NotFound(second.to_string()));
        }
        for user_id in [first, second] {
            if !self.state.by_user.contains_key(user_id) {
                return Err(MatchmakingError::NotFound(user_id.to_string()));
            }
        }
        let a = self.remove(first)?;
        let b = self.remove(second)?;
        Ok((a, b))
    }

    pub fn snapshot(&self) -> Vec<Request> {
        self.state
            .order
            .values()
            .filter_map(|user_id| self.state.by_user.get(user_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.by_user.is_empty()
    }
}
