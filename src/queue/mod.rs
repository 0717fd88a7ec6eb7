// Re-export all necessary types and interfaces
mod types;
mod pool;
mod tolerance;
mod matcher;
pub mod matching;

// Public exports from the queue module
pub use types::*;
pub use pool::{PoolGuard, RequestPool};
pub use tolerance::{FixedTolerance, SteppedTolerance, ToleranceCurve};
pub use matcher::{Matcher, Pairing, Sweep};
