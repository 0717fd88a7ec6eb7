use futures::future::join_all;
use queue_matchmaking::queue::{FixedTolerance, QueueEventType, RequestState};
use queue_matchmaking::{MatchEngine, Matchmaker, MatchmakingConfig};
use rand::Rng;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

mod common;

#[tokio::test]
async fn test_duplicate_add_request_rejected() {
    let engine = common::test_engine();

    let first = engine.add_request("script-user", 1200).await;
    assert!(first.ok);
    assert_eq!(serde_json::to_value(&first).unwrap(), json!({"ok": true, "error": null}));

    let duplicate = engine.add_request("script-user", 1200).await;
    assert!(!duplicate.ok);
    assert_eq!(
        serde_json::to_value(&duplicate).unwrap(),
        json!({"ok": false, "error": "already_enqueued"})
    );

    // Still exactly one pending request for the user
    assert_eq!(engine.pending(), 1);
    assert_eq!(engine.request_state("script-user"), Some(RequestState::Pending));
    assert_eq!(engine.stats().rejected_count, 1);
}

#[tokio::test]
async fn test_exact_rank_match_notifies_both_users() {
    let engine = common::test_engine();
    let sub_a = engine.match_found("sub_exact_a");
    let sub_b = engine.match_found("sub_exact_b");

    assert!(engine.add_request("sub_exact_a", 1500).await.ok);
    assert!(engine.add_request("sub_exact_b", 1500).await.ok);

    let result_a = common::expect_match(sub_a).await;
    let result_b = common::expect_match(sub_b).await;

    assert_eq!(result_a, result_b);
    assert_eq!(result_a.delta, 0);
    assert_eq!(common::sorted_users(&result_a), vec!["sub_exact_a", "sub_exact_b"]);

    assert_eq!(
        serde_json::to_value(&result_a).unwrap(),
        json!({
            "users": [
                {"userId": "sub_exact_a", "userRank": 1500},
                {"userId": "sub_exact_b", "userRank": 1500}
            ],
            "delta": 0
        })
    );

    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.request_state("sub_exact_a"), Some(RequestState::Matched));
    assert_eq!(engine.request_state("nobody"), None);
}

#[tokio::test]
async fn test_re_enqueue_after_match_is_fresh() {
    let engine = common::test_engine();
    let sub = engine.subscribe("alice");
    engine.enqueue("alice", 1000).unwrap();
    engine.enqueue("bob", 1000).unwrap();
    common::expect_match(sub).await;

    // The earlier request is terminal, so this is a new admission
    assert!(engine.add_request("alice", 1000).await.ok);
    assert!(engine.add_request("alice", 1000).await.error.as_deref() == Some("already_enqueued"));

    let sub = engine.subscribe("alice");
    engine.enqueue("carol", 1000).unwrap();
    let second = common::expect_match(sub).await;
    assert!(second.involves("carol"));
}

#[tokio::test]
async fn test_subscribe_after_match_still_delivers() {
    let engine = common::test_engine();
    engine.enqueue("early_a", 1300).unwrap();
    engine.enqueue("early_b", 1300).unwrap();

    // Let the matching loop commit the pair with nobody subscribed
    for _ in 0..100 {
        if engine.pending() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.pending(), 0);

    let a = common::expect_match(engine.subscribe("early_a")).await;
    let b = common::expect_match(engine.subscribe("early_b")).await;
    assert_eq!(a, b);
    assert_eq!(a.delta, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dissimilar_ranks_match_once_tolerance_widens() {
    common::init();
    let engine = MatchEngine::new(Some(common::fast_tick_config()));
    let sub = engine.subscribe("low");

    engine.enqueue("low", 1000).unwrap();
    engine.enqueue("high", 1400).unwrap();

    // Nothing is compatible at arrival
    assert_eq!(engine.sweep_now(), 0);
    assert_eq!(engine.pending(), 2);

    // +50 per second waited: delta 400 is tolerated after 8 seconds
    let started = tokio::time::Instant::now();
    let result = common::expect_match_within(sub, 60).await;
    let waited = started.elapsed();

    assert_eq!(result.delta, 400);
    assert!(waited >= Duration::from_secs(8), "matched too early: {:?}", waited);
    assert!(waited < Duration::from_secs(9), "matched too late: {:?}", waited);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tolerance_ceiling_keeps_far_ranks_apart() {
    common::init();
    let config = MatchmakingConfig {
        tolerance_ceiling: Some(100),
        ..common::fast_tick_config()
    };
    let engine = MatchEngine::new(Some(config));
    let sub = engine.subscribe("a");

    engine.enqueue("a", 1000).unwrap();
    engine.enqueue("b", 2000).unwrap();

    assert!(tokio::time::timeout(Duration::from_secs(120), sub).await.is_err());
    assert_eq!(engine.pending(), 2);

    // A closer opponent is still accepted within the ceiling
    let sub = engine.subscribe("a");
    engine.enqueue("c", 1080).unwrap();
    let result = common::expect_match(sub).await;
    assert!(result.involves("c"));
    assert_eq!(result.delta, 80);
}

#[tokio::test(start_paused = true)]
async fn test_oldest_request_is_served_first() {
    common::init();
    let engine = MatchEngine::new(Some(common::fast_tick_config()));
    engine.enqueue("veteran", 1000).unwrap();
    sleep(Duration::from_secs(5)).await;

    // Both newcomers are within the veteran's widened tolerance; the veteran
    // must be paired before the newcomers can pair with each other.
    let sub = engine.subscribe("veteran");
    engine.enqueue("newcomer_1", 1200).unwrap();
    engine.enqueue("newcomer_2", 1200).unwrap();

    let result = common::expect_match(sub).await;
    assert!(result.involves("newcomer_1"));
    assert_eq!(result.users[0].user_id, "veteran");
    assert_eq!(engine.pending(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fan_in_pairs_everyone_once() {
    let engine = common::test_engine();
    let users: Vec<String> = (0..64).map(|i| format!("fan_in_{}", i)).collect();
    let subs: Vec<_> = users.iter().map(|u| engine.subscribe(u)).collect();

    let admissions = users.iter().cloned().map(|user| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.add_request(&user, 1000).await })
    });
    for response in join_all(admissions).await {
        assert!(response.unwrap().ok);
    }

    let results = join_all(subs.into_iter().map(common::expect_match)).await;

    let mut distinct = HashSet::new();
    let mut seen_users = HashSet::new();
    for (user, result) in users.iter().zip(&results) {
        assert!(result.involves(user));
        assert_ne!(result.users[0].user_id, result.users[1].user_id);
        assert_eq!(result.delta, 0);
        distinct.insert(common::sorted_users(result));
    }
    for pair in &distinct {
        for user in pair {
            assert!(seen_users.insert(user.clone()), "{} appears in two matches", user);
        }
    }

    assert_eq!(distinct.len(), 32);
    assert_eq!(seen_users.len(), 64);
    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.stats().matches_count, 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_six_equal_ranks_make_three_matches() {
    let engine = common::test_engine();
    let users: Vec<String> = (1..=6).map(|i| format!("u{}", i)).collect();
    let subs: Vec<_> = users.iter().map(|u| engine.subscribe(u)).collect();

    join_all(users.iter().map(|u| engine.add_request(u, 1000))).await;
    let results = join_all(subs.into_iter().map(common::expect_match)).await;

    let matches: HashSet<Vec<String>> = results.iter().map(common::sorted_users).collect();
    assert_eq!(matches.len(), 3);
    assert!(results.iter().all(|r| r.delta == 0));

    let covered: HashSet<&String> = matches.iter().flatten().collect();
    assert_eq!(covered.len(), 6);
}

#[tokio::test]
async fn test_random_ranks_with_unbounded_tolerance() {
    common::init();
    let engine = MatchEngine::with_tolerance(MatchmakingConfig::default(), Arc::new(|_: Duration| u32::MAX));
    let mut rng = rand::thread_rng();

    let players: Vec<(String, i32)> = (0..40)
        .map(|i| (format!("p{}", i), rng.gen_range(800..2400)))
        .collect();
    let subs: Vec<_> = players.iter().map(|(u, _)| engine.subscribe(u)).collect();
    for (user, rank) in &players {
        engine.enqueue(user, *rank).unwrap();
    }

    for sub in subs {
        let result = common::expect_match(sub).await;
        let [a, b] = &result.users;
        assert_eq!(result.delta, (a.user_rank - b.user_rank).unsigned_abs());
        let rank_of = |id: &str| players.iter().find(|(u, _)| u == id).map(|(_, r)| *r);
        assert_eq!(rank_of(&a.user_id), Some(a.user_rank));
        assert_eq!(rank_of(&b.user_id), Some(b.user_rank));
    }
    assert_eq!(engine.stats().matches_count, 20);
}

#[tokio::test]
async fn test_queue_full_response() {
    common::init();
    let config = MatchmakingConfig {
        max_queue_size: 2,
        ..MatchmakingConfig::default()
    };
    let engine = MatchEngine::with_tolerance(config, Arc::new(FixedTolerance(0)));

    assert!(engine.add_request("a", 1000).await.ok);
    assert!(engine.add_request("b", 3000).await.ok);
    let full = engine.add_request("c", 5000).await;
    assert_eq!(full.error.as_deref(), Some("queue_full"));
    assert_eq!(engine.stats().queue_capacity, 2);
}

#[tokio::test]
async fn test_queue_events_and_stats() {
    let engine = common::test_engine();
    let mut events = engine.events();
    let sub = engine.subscribe("a");

    engine.enqueue("a", 1500).unwrap();
    let _ = engine.enqueue("a", 1500);
    engine.enqueue("b", 1500).unwrap();
    common::expect_match(sub).await;

    let mut kinds = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
        kinds.push((event.user_id, event.event_type));
    }

    assert_eq!(kinds[0], ("a".to_string(), QueueEventType::Enqueued { rank: 1500 }));
    assert_eq!(kinds[1], ("a".to_string(), QueueEventType::Rejected("already_enqueued")));
    assert_eq!(kinds[2], ("b".to_string(), QueueEventType::Enqueued { rank: 1500 }));
    assert!(kinds.contains(&("a".to_string(), QueueEventType::Matched { with: "b".to_string(), delta: 0 })));
    assert!(kinds.contains(&("b".to_string(), QueueEventType::Matched { with: "a".to_string(), delta: 0 })));

    let stats = engine.stats();
    assert_eq!(stats.pending_requests, 0);
    assert_eq!(stats.matches_count, 1);
    assert_eq!(stats.rejected_count, 1);
    assert_eq!(stats.waiting_subscribers, 0);
    // b never subscribed, so its result is held for a late subscriber
    assert_eq!(stats.buffered_results, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_background_matching() {
    let engine = common::test_engine();
    engine.shutdown();
    sleep(Duration::from_secs(1)).await;

    engine.enqueue("a", 1000).unwrap();
    engine.enqueue("b", 1000).unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.pending(), 2);

    // Manual sweeps still work after the loop is gone
    let sub = engine.subscribe("a");
    assert_eq!(engine.sweep_now(), 1);
    assert!(common::expect_match(sub).await.involves("b"));
}

#[tokio::test]
async fn test_previous_match_not_delivered_to_next_round() {
    let engine = common::test_engine();
    engine.shutdown();

    engine.enqueue("x", 1000).unwrap();
    engine.enqueue("y", 1000).unwrap();
    assert_eq!(engine.sweep_now(), 1);
    assert_eq!(engine.stats().buffered_results, 2);

    // Subscribed ahead of the next round, then admitted again
    let mut sub = engine.subscribe("x");
    assert!(engine.add_request("x", 2000).await.ok);
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut sub).await.is_err());
    assert_eq!(engine.stats().buffered_results, 1);

    engine.enqueue("z", 2000).unwrap();
    assert_eq!(engine.sweep_now(), 1);
    let result = common::expect_match(sub).await;
    assert!(result.involves("z"));
    assert!(result.users.iter().all(|u| u.user_rank == 2000));

    // y was not admitted again, so its result is still waiting
    assert!(common::expect_match(engine.subscribe("y")).await.involves("x"));
}

#[tokio::test]
async fn test_stats_report_oldest_pending_admission() {
    let engine = common::test_engine();
    engine.shutdown();
    assert_eq!(engine.stats().oldest_pending_since, None);

    let year = time::OffsetDateTime::now_utc().year().to_string();
    engine.enqueue("first", 1000).unwrap();
    engine.enqueue("second", 5000).unwrap();

    let since = engine.stats().oldest_pending_since.unwrap();
    assert!(since.starts_with(&year), "unexpected timestamp {}", since);
    assert!(since.ends_with('Z'), "unexpected timestamp {}", since);
    let json = serde_json::to_value(engine.stats()).unwrap();
    assert_eq!(json["oldest_pending_since"], json!(since));

    engine.enqueue("third", 1000).unwrap();
    engine.enqueue("fourth", 5000).unwrap();
    assert_eq!(engine.sweep_now(), 2);
    assert_eq!(engine.stats().oldest_pending_since, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_not_stalled_by_large_pool() {
    common::init();
    let config = MatchmakingConfig {
        max_queue_size: 10_000,
        ..MatchmakingConfig::default()
    };
    let engine = MatchEngine::with_tolerance(config, Arc::new(FixedTolerance(0)));
    engine.shutdown();
    for i in 0..6000 {
        engine.enqueue(&format!("waiting_{}", i), i * 1000).unwrap();
    }

    let sweeper = {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..20 {
                engine.sweep_now();
            }
        })
    };

    let mut slowest = Duration::ZERO;
    for i in 0..20 {
        let started = std::time::Instant::now();
        assert!(engine.add_request(&format!("late_{}", i), -1_000_000 - i).await.ok);
        slowest = slowest.max(started.elapsed());
        tokio::task::yield_now().await;
    }
    sweeper.await.unwrap();

    assert_eq!(engine.pending(), 6020);
    assert!(slowest < Duration::from_millis(250), "admission took {:?}", slowest);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweeps_deliver_every_round() {
    common::init();
    let engine = MatchEngine::new(Some(common::fast_tick_config()));
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let sweepers: Vec<_> = (0..3)
        .map(|_| {
            let engine = engine.clone();
            let done = done.clone();
            tokio::task::spawn_blocking(move || {
                while !done.load(std::sync::atomic::Ordering::Relaxed) {
                    engine.sweep_now();
                }
            })
        })
        .collect();

    // Every round uses its own rank, so a result from another round is detectable
    let players = (0..8).map(|p| {
        let engine = engine.clone();
        tokio::spawn(async move {
            let user = format!("player_{}", p);
            for round in 0..25 {
                let rank = round * 10_000;
                let sub = engine.subscribe(&user);
                assert!(engine.add_request(&user, rank).await.ok);
                let result = common::expect_match(sub).await;
                assert!(result.involves(&user));
                assert!(
                    result.users.iter().all(|u| u.user_rank == rank),
                    "{} in round {} received {:?}",
                    user,
                    round,
                    result
                );
            }
        })
    });
    for player in join_all(players).await {
        player.unwrap();
    }

    done.store(true, std::sync::atomic::Ordering::Relaxed);
    for sweeper in sweepers {
        sweeper.await.unwrap();
    }
    assert_eq!(engine.stats().matches_count, 100);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn test_dropping_every_handle_releases_engine() {
    let engine = common::test_engine();
    let mut sub = engine.subscribe("orphan");
    engine.enqueue("orphan", 1000).unwrap();

    // A remaining clone keeps the engine alive
    let clone = engine.clone();
    drop(engine);
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut sub).await.is_err());
    assert_eq!(clone.pending(), 1);

    // Without shutdown(), the matching loop must not keep the hub alive
    drop(clone);
    let resolved = tokio::time::timeout(Duration::from_secs(5), sub).await;
    assert_eq!(resolved.ok(), Some(None));
}
