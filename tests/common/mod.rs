#![allow(dead_code)]

use queue_matchmaking::{MatchEngine, MatchResult, MatchmakingConfig, Subscription};
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialise logging once per test binary; honours RUST_LOG
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Engine with default configuration
pub fn test_engine() -> MatchEngine {
    init();
    MatchEngine::new(None)
}

/// Engine with a fast sweep tick, for tests relying on tolerance growth
pub fn fast_tick_config() -> MatchmakingConfig {
    MatchmakingConfig {
        sweep_interval_ms: 50,
        ..MatchmakingConfig::default()
    }
}

/// Wait for a subscription to resolve, failing the test after `secs` seconds
pub async fn expect_match_within(sub: Subscription, secs: u64) -> MatchResult {
    let user = sub.user_id().to_string();
    tokio::time::timeout(Duration::from_secs(secs), sub)
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for match of {}", user))
        .unwrap_or_else(|| panic!("Hub dropped before {} was matched", user))
}

pub async fn expect_match(sub: Subscription) -> MatchResult {
    expect_match_within(sub, 5).await
}

/// User IDs of a match, sorted for comparison
pub fn sorted_users(result: &MatchResult) -> Vec<String> {
    let mut users: Vec<String> = result.users.iter().map(|u| u.user_id.clone()).collect();
    users.sort();
    users
}
