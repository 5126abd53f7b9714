//! Integration tests for rate limiting.
//!
//! Covers the admission entry point under concurrency, window sliding,
//! retention cleanup and the fail-open policy. PostgreSQL variants need a
//! database with the migrations applied.

use chrono::Duration;
use rentwise_auth::clock::{Clock, ManualClock};
use rentwise_auth::db::{Database, DatabaseConfig, MemoryStore};
use rentwise_auth::security::{RateLimitConfig, RateLimitRule, RateLimiter, TICKET_CREATION_ENDPOINT};
use serial_test::serial;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

fn memory_limiter() -> (RateLimiter, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::starting_now());
    let limiter = RateLimiter::with_clock(store.clone(), clock.clone(), RateLimitConfig::default());
    (limiter, store, clock)
}

async fn count_admitted(limiter: Arc<RateLimiter>, user_id: Uuid, attempts: usize) -> (u32, u32) {
    let mut join_set = JoinSet::new();

    for _ in 0..attempts {
        let limiter = Arc::clone(&limiter);
        join_set.spawn(async move {
            limiter
                .with_rate_limit(user_id, "/api/auth/login", "POST")
                .await
        });
    }

    let mut allowed = 0;
    let mut denied = 0;
    while let Some(result) = join_set.join_next().await {
        if result.unwrap().allowed {
            allowed += 1;
        } else {
            denied += 1;
        }
    }
    (allowed, denied)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_overshoot() {
    let (limiter, store, _) = memory_limiter();
    let user_id = Uuid::new_v4();

    let (allowed, denied) = count_admitted(Arc::new(limiter), user_id, 100).await;

    assert_eq!(allowed, 5, "Expected exactly 5 admitted requests, got {allowed}");
    assert_eq!(denied, 95);
    assert_eq!(store.rate_limit_record_count(), 5);
}

#[tokio::test]
async fn test_ticket_creation_limit() {
    let (limiter, _, clock) = memory_limiter();
    let user_id = Uuid::new_v4();

    for i in 0..20 {
        let decision = limiter
            .with_rate_limit(user_id, "/api/maintenance-requests", "POST")
            .await;
        assert!(decision.allowed, "Ticket #{} should be allowed", i + 1);
    }

    let decision = limiter
        .with_rate_limit(user_id, "/api/maintenance-requests", "POST")
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.limit, 20);
    assert!(decision.retry_after_secs(clock.now()).unwrap() <= 3600);

    // Reads don't share the POST quota
    assert!(
        limiter
            .with_rate_limit(user_id, "/api/maintenance-requests", "GET")
            .await
            .allowed
    );
}

#[tokio::test]
async fn test_requests_age_out_one_by_one() {
    let (limiter, _, clock) = memory_limiter();
    let user_id = Uuid::new_v4();

    for _ in 0..5 {
        limiter
            .with_rate_limit(user_id, "/api/auth/login", "POST")
            .await;
        clock.advance(Duration::minutes(1));
    }
    assert!(
        !limiter
            .check_rate_limit(user_id, "/api/auth/login", "POST")
            .await
            .allowed
    );

    // First request was at t=0, window is 15 minutes
    clock.advance(Duration::minutes(10) + Duration::seconds(1));
    let decision = limiter
        .check_rate_limit(user_id, "/api/auth/login", "POST")
        .await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 1);
}

#[tokio::test]
async fn test_custom_rule_override() {
    let store = Arc::new(MemoryStore::new());
    let config = RateLimitConfig::default()
        .with_rule(TICKET_CREATION_ENDPOINT, RateLimitRule::new(2, 60).unwrap())
        .unwrap();
    let limiter = RateLimiter::new(store, config);
    let user_id = Uuid::new_v4();

    for _ in 0..2 {
        limiter
            .with_rate_limit(user_id, "/api/maintenance-requests", "POST")
            .await;
    }
    let decision = limiter
        .with_rate_limit(user_id, "/api/maintenance-requests", "POST")
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.limit, 2);
}

#[tokio::test]
async fn test_cleanup_only_touches_old_records() {
    let (limiter, _, clock) = memory_limiter();
    let user_id = Uuid::new_v4();

    limiter
        .record_request(user_id, "/api/properties", "GET")
        .await
        .unwrap();
    clock.advance(Duration::hours(25));
    limiter
        .record_request(user_id, "/api/properties", "GET")
        .await
        .unwrap();

    assert_eq!(limiter.cleanup_rate_limits().await.unwrap(), 1);

    let decision = limiter
        .check_rate_limit(user_id, "/api/properties", "GET")
        .await;
    assert_eq!(decision.remaining, 99, "Newer record should still be counted");
}

#[tokio::test]
async fn test_outage_then_recovery() {
    let (limiter, store, _) = memory_limiter();
    let user_id = Uuid::new_v4();

    store.set_unavailable(true);
    for _ in 0..10 {
        assert!(
            limiter
                .with_rate_limit(user_id, "/api/auth/login", "POST")
                .await
                .allowed,
            "Limiter should fail open during an outage"
        );
    }

    store.set_unavailable(false);
    let decision = limiter
        .with_rate_limit(user_id, "/api/auth/login", "POST")
        .await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 4, "Nothing was recorded during the outage");
}

// === PostgreSQL ===

/// Helper to create a test database
async fn setup_test_db() -> Database {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost/rentwise_test".to_string());

    let config = DatabaseConfig {
        database_url,
        max_connections: 20,
        min_connections: 1,
        connection_timeout_secs: 5,
        idle_timeout_secs: 300,
        max_lifetime_secs: 1800,
    };

    Database::new(&config)
        .await
        .expect("Failed to create test database")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
#[ignore = "Requires database setup"]
async fn test_postgres_concurrent_requests_never_overshoot() {
    let db = setup_test_db().await;
    let limiter = RateLimiter::new(Arc::new(db.rate_limit_store()), RateLimitConfig::default());

    let (allowed, denied) = count_admitted(Arc::new(limiter), Uuid::new_v4(), 100).await;

    assert_eq!(
        allowed, 5,
        "Expected exactly 5 allowed requests (no race condition), got {allowed}"
    );
    assert_eq!(denied, 95);
}

#[tokio::test]
#[serial]
#[ignore = "Requires database setup"]
async fn test_postgres_check_and_record() {
    let db = setup_test_db().await;
    let limiter = RateLimiter::new(Arc::new(db.rate_limit_store()), RateLimitConfig::default());
    let user_id = Uuid::new_v4();

    for i in 0..3 {
        let decision = limiter
            .check_rate_limit(user_id, "/api/auth/password-reset", "POST")
            .await;
        assert!(decision.allowed, "Attempt #{} should be allowed", i + 1);
        limiter
            .record_request(user_id, "/api/auth/password-reset", "POST")
            .await
            .expect("Recording should succeed");
    }

    let decision = limiter
        .check_rate_limit(user_id, "/api/auth/password-reset", "POST")
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
}
