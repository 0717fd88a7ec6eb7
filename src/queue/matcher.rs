use std::sync::Arc;

use time::OffsetDateTime;
use tokio::time::Instant;

use crate::error::MatchmakingError;
use crate::models::{MatchResult, MatchedUser};
use crate::queue::matching::{plan_pairs, rank_delta};
use crate::queue::pool::{PoolGuard, RequestPool};
use crate::queue::tolerance::ToleranceCurve;
use crate::queue::types::Request;

/// A committed pairing: both requests removed from the pool and the result built from them.
#[derive(Debug, Clone)]
pub struct Pairing {
    pub requests: [Request; 2],
    pub result: MatchResult,
}

/// Outcome of one sweep over the pool.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Pairings committed by this sweep, in commit order
    pub matches: Vec<Pairing>,
    /// Set when revalidation failed and the rest of the sweep was abandoned
    pub aborted: Option<MatchmakingError>,
}

/// Searches the pool for compatible pairs under a tolerance curve.
pub struct Matcher {
    tolerance: Arc<dyn ToleranceCurve>,
}

impl Matcher {
    pub fn new(tolerance: Arc<dyn ToleranceCurve>) -> Self {
        Self { tolerance }
    }

    pub fn sweep(&self, pool: &RequestPool) -> Sweep {
        self.sweep_at(pool, Instant::now())
    }

    /// Runs one sweep with wait times measured against `now`.
    ///
    /// The pool lock is held from snapshot to the last commit, so sweeps are
    /// serialized with each other and with admission.
    pub fn sweep_at(&self, pool: &RequestPool, now: Instant) -> Sweep {
        self.sweep_locked(&mut pool.lock(), now)
    }

    /// Runs one sweep under a lock the caller already holds. The caller may keep
    /// the guard after the sweep to act on the pairings before admission resumes.
    pub fn sweep_locked(&self, guard: &mut PoolGuard<'_>, now: Instant) -> Sweep {
        let snapshot = guard.snapshot();
        if snapshot.len() < 2 {
            return Sweep::default();
        }

        let planned = plan_pairs(&snapshot, now, self.tolerance.as_ref());
        log::debug!("Sweep over {} pending requests planned {} pairs", snapshot.len(), planned.len());

        let mut sweep = Sweep::default();
        for (head, partner) in planned {
            let (head_id, partner_id) = (&snapshot[head].user_id, &snapshot[partner].user_id);
            match guard.take_pair(head_id, partner_id) {
                Ok((a, b)) => {
                    let result = build_result(&a, &b);
                    sweep.matches.push(Pairing { requests: [a, b], result });
                }
                Err(e) => {
                    // The lock is held for the whole sweep, so a planned entry can only
                    // vanish if mutual exclusion is broken.
                    log::error!("Aborting sweep: pairing {} with {} failed revalidation: {}",
                              head_id, partner_id, e);
                    sweep.aborted = Some(e);
                    break;
                }
            }
        }
        sweep
    }
}

fn build_result(a: &Request, b: &Request) -> MatchResult {
    MatchResult {
        users: [
            MatchedUser { user_id: a.user_id.clone(), user_rank: a.rank },
            MatchedUser { user_id: b.user_id.clone(), user_rank: b.rank },
        ],
        delta: rank_delta(a.rank, b.rank),
        matched_at: OffsetDateTime::now_utc(),
    }
}
