//! Tests for the fixed-window rate limiter

use std::sync::Arc;
use std::time::Duration;

use api_gateway::config::RateLimitConfig;
use api_gateway::middleware::rate_limit::{Admission, RateLimiter};

#[tokio::test(start_paused = true)]
async fn test_fixed_window_admits_then_rejects_then_resets() {
    let limiter = RateLimiter::new(2, Duration::from_secs(1));

    assert_eq!(limiter.admit("10.0.0.1").await, Admission::Allowed);
    assert_eq!(limiter.admit("10.0.0.1").await, Admission::Allowed);
    match limiter.admit("10.0.0.1").await {
        Admission::Rejected { limit, window, .. } => {
            assert_eq!(limit, 2);
            assert_eq!(window, Duration::from_secs(1));
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(limiter.admit("10.0.0.1").await, Admission::Allowed);
    assert_eq!(limiter.bucket("10.0.0.1").await.unwrap().count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_does_not_consume_quota() {
    let limiter = RateLimiter::new(1, Duration::from_secs(10));

    assert_eq!(limiter.admit("a").await, Admission::Allowed);
    for _ in 0..5 {
        assert!(matches!(limiter.admit("a").await, Admission::Rejected { .. }));
    }
    assert_eq!(limiter.bucket("a").await.unwrap().count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_clients_are_counted_separately() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));

    assert_eq!(limiter.admit("10.0.0.1").await, Admission::Allowed);
    assert_eq!(limiter.admit("10.0.0.2").await, Admission::Allowed);
    assert!(matches!(limiter.admit("10.0.0.1").await, Admission::Rejected { .. }));
    assert_eq!(limiter.tracked_clients().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_time_points_at_window_end() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    let before = chrono::Utc::now().timestamp();

    limiter.admit("a").await;
    let Admission::Rejected { reset_at, .. } = limiter.admit("a").await else {
        panic!("expected rejection");
    };

    assert!(reset_at >= before + 59);
    assert!(reset_at <= chrono::Utc::now().timestamp() + 61);
}

#[tokio::test(start_paused = true)]
async fn test_boundary_burst_is_possible() {
    let limiter = RateLimiter::new(3, Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(900)).await;
    limiter.admit("a").await;
    tokio::time::sleep(Duration::from_millis(950)).await;
    for _ in 0..2 {
        assert_eq!(limiter.admit("a").await, Admission::Allowed);
    }
    // Window opened at the first request has passed; a full new quota follows.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..3 {
        assert_eq!(limiter.admit("a").await, Admission::Allowed);
    }
    assert!(matches!(limiter.admit("a").await, Admission::Rejected { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_keeps_buckets_within_grace_period() {
    let limiter = RateLimiter::new(5, Duration::from_secs(1));
    limiter.admit("a").await;

    // Window over, grace period not yet.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(limiter.sweep_expired().await, 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(limiter.sweep_expired().await, 1);
    assert_eq!(limiter.tracked_clients().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_runs_and_stops() {
    let config = RateLimitConfig {
        limit: 10,
        window_secs: 1,
        sweep_interval_secs: 1,
    };
    let limiter = RateLimiter::start(&config);

    limiter.admit("a").await;
    limiter.admit("b").await;
    assert_eq!(limiter.tracked_clients().await, 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(limiter.tracked_clients().await, 0);

    limiter.shutdown().await;

    // No sweeper any more: a stale bucket stays until swept by hand.
    limiter.admit("c").await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(limiter.tracked_clients().await, 1);
}

#[tokio::test]
async fn test_concurrent_admission_never_exceeds_limit() {
    let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(60)));

    let handles: Vec<_> = (0..200)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.admit("shared").await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() == Admission::Allowed {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 50);
}
