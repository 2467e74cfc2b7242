//! Single-flight and TTL behavior of the policy cache, exercised through
//! a counting fake fetcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use keygate_policy::cache::{PolicyCache, PolicyFetcher};
use keygate_policy::{Effect, Policy, PolicyError};

#[derive(Clone)]
struct CountingFetcher {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    fail: bool,
}

impl CountingFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay,
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            fail: true,
        }
    }

}

impl PolicyFetcher for CountingFetcher {
    async fn fetch(&self, parameter: &str) -> Result<Policy, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(PolicyError::Transport("wire down".to_string()));
        }
        Ok(Policy {
            version: 1,
            rules: vec![],
            default_effect: Some(Effect::Allow),
            default_reason: Some(format!("loaded from {parameter}")),
        })
    }
}

#[tokio::test]
async fn concurrent_loads_for_one_key_fetch_once() {
    let fetcher = CountingFetcher::new(Duration::from_millis(50));
    let calls = fetcher.calls.clone();
    let cache = PolicyCache::new(fetcher);

    let (a, b, c, d) = tokio::join!(
        cache.load("/keygate/policy"),
        cache.load("/keygate/policy"),
        cache.load("/keygate/policy"),
        cache.load("/keygate/policy"),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    d.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_keys_fetch_independently() {
    let fetcher = CountingFetcher::new(Duration::ZERO);
    let calls = fetcher.calls.clone();
    let cache = PolicyCache::new(fetcher);

    let first = cache.load("/keygate/policy-a").await.unwrap();
    let second = cache.load("/keygate/policy-b").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(first.default_reason.as_deref(), Some("loaded from /keygate/policy-a"));
    assert_eq!(second.default_reason.as_deref(), Some("loaded from /keygate/policy-b"));
}

#[tokio::test]
async fn fresh_entries_are_served_from_cache() {
    let fetcher = CountingFetcher::new(Duration::ZERO);
    let calls = fetcher.calls.clone();
    let cache = PolicyCache::new(fetcher);

    for _ in 0..5 {
        cache.load("/keygate/policy").await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_ttl_refetches_every_load() {
    let fetcher = CountingFetcher::new(Duration::ZERO);
    let calls = fetcher.calls.clone();
    let cache = PolicyCache::with_ttl(fetcher, Duration::ZERO);

    cache.load("/keygate/policy").await.unwrap();
    cache.load("/keygate/policy").await.unwrap();
    cache.load("/keygate/policy").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn a_failed_fetch_is_not_cached() {
    let fetcher = CountingFetcher::failing();
    let calls = fetcher.calls.clone();
    let cache = PolicyCache::new(fetcher);

    assert!(cache.load("/keygate/policy").await.is_err());
    assert!(cache.load("/keygate/policy").await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidate_drops_the_entry() {
    let fetcher = CountingFetcher::new(Duration::ZERO);
    let calls = fetcher.calls.clone();
    let cache = PolicyCache::new(fetcher);

    cache.load("/keygate/policy").await.unwrap();
    cache.invalidate("/keygate/policy").await;
    cache.load("/keygate/policy").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
