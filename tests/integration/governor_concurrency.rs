//! Integration tests for the Rate Governor
//!
//! Tests cover:
//! - Global concurrency cap under load
//! - Per-category caps nested in the global cap
//! - Request-window overflow waits
//! - Independent governors do not share counters

use schemaforge::governor::{RateGovernor, RateGovernorConfig, RATE_WINDOW};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn governor(rpm: u64, concurrent: usize) -> Arc<RateGovernor> {
    let config = RateGovernorConfig {
        requests_per_minute: rpm,
        cost_per_minute: 1_000_000,
        max_concurrent: concurrent,
        ..RateGovernorConfig::default()
    };
    Arc::new(RateGovernor::new(config).unwrap())
}

/// Tracks current and peak number of guarded bodies
#[derive(Default)]
struct Occupancy {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_cap_holds_for_whole_guarded_call() {
    let governor = governor(1_000, 3);
    let occupancy = Arc::new(Occupancy::default());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let governor = Arc::clone(&governor);
        let occupancy = Arc::clone(&occupancy);
        handles.push(tokio::spawn(async move {
            let _permit = governor.acquire(None, 10).await;
            occupancy.enter();
            tokio::time::sleep(Duration::from_millis(15)).await;
            occupancy.leave();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(occupancy.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 3);
    let stats = governor.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.total_granted, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_category_cap_nested_in_global_cap() {
    let config = RateGovernorConfig {
        requests_per_minute: 1_000,
        cost_per_minute: 1_000_000,
        max_concurrent: 4,
        ..RateGovernorConfig::default()
    }
    .with_category("schema", 1);
    let governor = Arc::new(RateGovernor::new(config).unwrap());
    let schema = Arc::new(Occupancy::default());
    let everything = Arc::new(Occupancy::default());

    let mut handles = Vec::new();
    for i in 0..16 {
        let governor = Arc::clone(&governor);
        let schema = Arc::clone(&schema);
        let everything = Arc::clone(&everything);
        handles.push(tokio::spawn(async move {
            let category = if i % 2 == 0 { "schema" } else { "validation" };
            let _permit = governor.acquire(Some(category), 1).await;
            everything.enter();
            if category == "schema" {
                schema.enter();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            if category == "schema" {
                schema.leave();
            }
            everything.leave();
        }));
    }
    futures::future::join_all(handles).await;

    assert_eq!(schema.peak.load(Ordering::SeqCst), 1);
    assert!(everything.peak.load(Ordering::SeqCst) <= 4);
}

#[tokio::test(start_paused = true)]
async fn test_request_overflow_waits_for_window() {
    let governor = governor(5, 10);
    let start = tokio::time::Instant::now();

    for _ in 0..5 {
        drop(governor.acquire(None, 1).await);
    }
    assert!(start.elapsed() < Duration::from_secs(1));

    drop(governor.acquire(None, 1).await);
    assert!(start.elapsed() >= RATE_WINDOW);
    assert_eq!(governor.stats().total_waited, 1);
}

#[tokio::test(start_paused = true)]
async fn test_window_never_exceeds_ceiling() {
    let governor = governor(4, 10);
    let mut admitted = Vec::new();
    for _ in 0..12 {
        drop(governor.acquire(None, 1).await);
        admitted.push(tokio::time::Instant::now());
    }

    for (i, at) in admitted.iter().enumerate() {
        let in_window = admitted[i..]
            .iter()
            .take_while(|later| later.duration_since(*at) < RATE_WINDOW)
            .count();
        assert!(in_window <= 4, "window starting at admission {} held {}", i, in_window);
    }
}

#[tokio::test]
async fn test_reconstruction_gives_fresh_counters() {
    let first = governor(10, 2);
    drop(first.acquire(None, 1).await);
    assert_eq!(first.stats().requests_in_window, 1);

    let second = governor(10, 2);
    assert_eq!(second.stats().requests_in_window, 0);
    assert_eq!(second.stats().total_granted, 0);
}
