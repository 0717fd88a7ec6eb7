//! Rank tolerance as a function of wait time.
//!
//! The matcher only ever asks "how far apart may two ranks be after waiting this
//! long?", so the growth curve is a plug-in rather than fixed policy.

use std::time::Duration;

use crate::config::MatchmakingConfig;

/// Maximum rank delta accepted after a given wait.
///
/// Implementations must be monotonically non-decreasing in `waited`, otherwise
/// a request that was compatible with a partner can become incompatible again.
pub trait ToleranceCurve: Send + Sync + 'static {
    fn tolerance(&self, waited: Duration) -> u32;
}

impl<F> ToleranceCurve for F
where
    F: Fn(Duration) -> u32 + Send + Sync + 'static,
{
    fn tolerance(&self, waited: Duration) -> u32 {
        self(waited)
    }
}

/// Tolerance that widens by `step` every `interval` waited, starting at `base`
/// and optionally capped at `ceiling`.
#[derive(Debug, Clone, PartialEq)]
pub struct SteppedTolerance {
    pub base: u32,
    pub step: u32,
    pub interval: Duration,
    pub ceiling: Option<u32>,
}

impl SteppedTolerance {
    pub fn new(base: u32, step: u32, interval: Duration, ceiling: Option<u32>) -> Self {
        Self { base, step, interval, ceiling }
    }
}

impl From<&MatchmakingConfig> for SteppedTolerance {
    fn from(config: &MatchmakingConfig) -> Self {
        Self::new(
            config.tolerance_base,
            config.tolerance_step,
            Duration::from_millis(config.tolerance_step_ms),
            config.tolerance_ceiling,
        )
    }
}

impl ToleranceCurve for SteppedTolerance {
    fn tolerance(&self, waited: Duration) -> u32 {
        let interval_ms = self.interval.as_millis().max(1);
        let steps = u32::try_from(waited.as_millis() / interval_ms).unwrap_or(u32::MAX);
        let widened = self.base.saturating_add(self.step.saturating_mul(steps));
        match self.ceiling {
            Some(ceiling) => widened.min(ceiling),
            None => widened,
        }
    }
}

/// Tolerance that never changes. `FixedTolerance(0)` matches exact ranks only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedTolerance(pub u32);

impl ToleranceCurve for FixedTolerance {
    fn tolerance(&self, _waited: Duration) -> u32 {
        self.0
    }
}
