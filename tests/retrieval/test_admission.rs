use std::sync::Arc;
use std::time::Duration;

use docqa_retrieval::ratelimit::{LimiterRegistry, RETRIEVAL, RateLimitConfig, RateLimiter};
use docqa_retrieval::{Error, Settings};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_burst_admitted_then_rejected() {
    let limiter = RateLimiter::new("retrieval", RateLimitConfig::new(2.0, 2, 60.0, 0.1)).unwrap();

    for _ in 0..2 {
        let admission = limiter.check().await.unwrap();
        assert!(!admission.was_delayed());
    }

    let rejected: Error = limiter.check().await.unwrap_err().into();
    assert!(rejected.is_rejection());
    match rejected {
        Error::RateLimited(e) => {
            assert_eq!(e.required_delay, Duration::from_millis(500));
            assert_eq!(e.max_delay, Duration::from_millis(100));
        }
        other => panic!("expected a rejection, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_past_burst_waits_one_interval() {
    let rate = 4.0;
    let burst = 3;
    let limiter =
        RateLimiter::new("ingestion", RateLimitConfig::new(rate, burst, 60.0, 1.0)).unwrap();

    let start = Instant::now();
    for _ in 0..burst {
        assert_eq!(limiter.check().await.unwrap().delay, Duration::ZERO);
    }
    let admission = limiter.check().await.unwrap();
    assert_eq!(admission.delay, Duration::from_millis(250));
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_queue_behind_reservations() {
    let limiter = Arc::new(
        RateLimiter::new("embedding", RateLimitConfig::new(4.0, 1, 60.0, 1.0)).unwrap(),
    );
    limiter.check().await.unwrap();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.check().await.map(|a| a.delay) })
        })
        .collect();

    let mut delays = Vec::new();
    for handle in handles {
        delays.push(handle.await.unwrap().unwrap());
    }
    delays.sort();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(250),
            Duration::from_millis(500),
            Duration::from_millis(750),
        ]
    );

    let metrics = limiter.metrics();
    assert_eq!(metrics.total_requests, 4);
    assert_eq!(metrics.delayed_requests, 3);
    assert!((metrics.total_delay_seconds - 1.5).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_registry_from_settings() {
    let mut settings = Settings::default();
    settings
        .rate_limits
        .insert(RETRIEVAL.to_string(), RateLimitConfig::new(1.0, 1, 60.0, 0.0));
    let registry = LimiterRegistry::from_settings(&settings);

    let limiter = registry.get_limiter(RETRIEVAL, None).unwrap();
    limiter.check().await.unwrap();
    assert!(limiter.check().await.is_err());

    let metrics = registry.all_metrics();
    assert_eq!(metrics[RETRIEVAL].rejected_requests, 1);
    assert!((metrics[RETRIEVAL].rejection_rate() - 0.5).abs() < 1e-9);
}
