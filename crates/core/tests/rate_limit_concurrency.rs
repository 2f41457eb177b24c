//! Rate limiter behavior across independent workers sharing one database.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use tempfile::TempDir;

use provisioner_core::rate_limit::{ClassLimit, SqliteWindowStore};
use provisioner_core::{LimitClass, RateLimitConfig, RateLimiter};

fn config(limit: u32) -> RateLimitConfig {
    RateLimitConfig {
        write: ClassLimit {
            limit,
            window_secs: 60,
        },
        ..Default::default()
    }
}

#[test]
fn test_permits_never_exceed_limit_across_workers() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("limits.db");

    const WORKERS: usize = 8;
    const ATTEMPTS: usize = 10;
    const LIMIT: u32 = 25;

    // One connection per worker, like separate processes.
    let limiters: Vec<RateLimiter> = (0..WORKERS)
        .map(|_| {
            let store = SqliteWindowStore::new(&db_path).expect("Failed to open window store");
            RateLimiter::new(Arc::new(store), config(LIMIT))
        })
        .collect();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = limiters
        .into_iter()
        .map(|limiter| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut permitted = 0u32;
                for _ in 0..ATTEMPTS {
                    let decision = limiter
                        .allow("cloud-api", LimitClass::Write)
                        .expect("limiter should not error");
                    if decision.permitted {
                        permitted += 1;
                    } else {
                        assert!(decision.retry_after_secs > 0);
                    }
                }
                permitted
            })
        })
        .collect();

    let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, LIMIT);
}

#[test]
fn test_window_shared_between_workers() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("limits.db");

    let first = RateLimiter::new(
        Arc::new(SqliteWindowStore::new(&db_path).unwrap()),
        config(2),
    );
    let second = RateLimiter::new(
        Arc::new(SqliteWindowStore::new(&db_path).unwrap()),
        config(2),
    );

    let start = Utc::now();
    assert!(first.allow_at("cloud-api", LimitClass::Write, start).unwrap().permitted);
    assert!(second.allow_at("cloud-api", LimitClass::Write, start).unwrap().permitted);

    let denied = first
        .allow_at("cloud-api", LimitClass::Write, start + chrono::Duration::seconds(10))
        .unwrap();
    assert!(!denied.permitted);
    assert_eq!(denied.retry_after_secs, 50);

    // The default class has its own window.
    assert!(second.allow_at("cloud-api", LimitClass::Default, start).unwrap().permitted);

    let later = start + chrono::Duration::seconds(61);
    assert!(second.allow_at("cloud-api", LimitClass::Write, later).unwrap().permitted);
}
