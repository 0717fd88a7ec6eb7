//! Matchmaking queue engine.
//!
//! Clients enqueue a rank for a user, the engine pairs compatible requests
//! (exact ranks at once, wider gaps as requests age) and every subscriber of
//! either user is notified of the match exactly once.

pub mod config;   // Configuration management
pub mod error;    // Error types and handling
pub mod hub;      // Match result delivery
pub mod models;   // Result and stats types
pub mod queue;    // Request pool and matching
pub mod service;  // Engine facade

pub use config::MatchmakingConfig;
pub use error::MatchmakingError;
pub use hub::{Delivery, NotificationHub, Subscription};
pub use models::{AddRequestResponse, MatchResult, MatchedUser, QueueStats};
pub use queue::Matchmaker;
pub use service::MatchEngine;
