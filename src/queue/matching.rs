use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::queue::tolerance::ToleranceCurve;
use crate::queue::types::Request;

/// Absolute rank difference. Computed in i64 so extreme ranks cannot overflow.
pub fn rank_delta(a: i32, b: i32) -> u32 {
    (i64::from(a) - i64::from(b)).unsigned_abs() as u32
}

/// Wait time used for a candidate pair: that of whichever request is older.
pub fn pair_wait(a: &Request, b: &Request, now: Instant) -> Duration {
    now.saturating_duration_since(a.enqueued_at.min(b.enqueued_at))
}

/// Two requests are compatible when their rank delta is within the tolerance
/// reached by the longer of the two waits.
pub fn is_compatible(a: &Request, b: &Request, now: Instant, curve: &dyn ToleranceCurve) -> bool {
    if a.user_id == b.user_id {
        return false;
    }
    rank_delta(a.rank, b.rank) <= curve.tolerance(pair_wait(a, b, now))
}

/// Plans pairings over `ordered` (oldest first) and returns index pairs into it.
///
/// Each unpaired head, oldest first, takes the compatible unpaired candidate with
/// the smallest rank delta; on equal deltas the older candidate wins. A head with
/// no compatible candidate stays pending and the scan moves on. Every index
/// appears in at most one pair.
///
/// Candidates are kept in a rank-ordered set, so the minimum-delta candidate is
/// a nearest neighbour lookup and a plan costs O(n log n). Checking only that
/// neighbour is enough: any unpaired candidate older than the head was itself a
/// head with no compatible partner, and with a non-decreasing curve every other
/// candidate for this head sits at an equal or larger delta under a tolerance no
/// wider than the head's own.
pub fn plan_pairs(ordered: &[Request], now: Instant, curve: &dyn ToleranceCurve) -> Vec<(usize, usize)> {
    // (rank, position in age order); position breaks rank ties towards the older request
    let mut by_rank: BTreeSet<(i32, usize)> = ordered
        .iter()
        .enumerate()
        .map(|(idx, request)| (request.rank, idx))
        .collect();
    let mut pairs = Vec::new();

    for head in 0..ordered.len() {
        let key = (ordered[head].rank, head);
        if !by_rank.remove(&key) {
            // Already taken as somebody's partner
            continue;
        }

        match nearest_by_rank(&by_rank, ordered[head].rank) {
            Some(partner) if is_compatible(&ordered[head], &ordered[partner], now, curve) => {
                log::debug!("Planned pair {} <-> {} (delta {})",
                          ordered[head].user_id, ordered[partner].user_id,
                          rank_delta(ordered[head].rank, ordered[partner].rank));
                by_rank.remove(&(ordered[partner].rank, partner));
                pairs.push((head, partner));
            }
            // Stays pending, and remains a candidate for younger heads
            _ => {
                by_rank.insert(key);
            }
        }
    }

    pairs
}

/// Position of the entry closest in rank to `rank`, preferring the older entry
/// (lower position) when both sides are equally close.
fn nearest_by_rank(by_rank: &BTreeSet<(i32, usize)>, rank: i32) -> Option<usize> {
    let above = by_rank.range((rank, 0)..).next().copied();
    // Largest rank below, then the oldest entry holding that rank
    let below = by_rank
        .range(..(rank, 0))
        .next_back()
        .and_then(|&(below_rank, _)| by_rank.range((below_rank, 0)..).next().copied());

    match (above, below) {
        (Some((up_rank, up)), Some((down_rank, down))) => {
            let (up_delta, down_delta) = (rank_delta(up_rank, rank), rank_delta(down_rank, rank));
            if up_delta < down_delta || (up_delta == down_delta && up < down) {
                Some(up)
            } else {
                Some(down)
            }
        }
        (Some((_, idx)), None) | (None, Some((_, idx))) => Some(idx),
        (None, None) => None,
    }
}
