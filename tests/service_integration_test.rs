//! End-to-end coverage of `ShortenerService` against the in-memory fakes, exercising the
//! concrete scenarios the component design calls out: create-then-resolve, dedup,
//! rate-limit gating ahead of any durable work, and a full cleaner cycle.

use std::sync::Arc;

use shortlink_core::cleaner::ShutdownSignal;
use shortlink_core::config::ServiceConfig;
use shortlink_core::ratelimit::Principal;
use shortlink_core::testing::{
    InMemoryHashPool, InMemoryHashStore, InMemoryRateLimiter, InMemoryUrlCache, InMemoryUrlStore,
};
use shortlink_core::validation::{PrivateHostValidator, RawUrlValidator};
use shortlink_core::{CoreError, ServiceDeps, ShortenerService};

fn build_service(config: ServiceConfig) -> (ShortenerService, Arc<InMemoryUrlStore>, Arc<InMemoryHashStore>) {
    let hash_store = Arc::new(InMemoryHashStore::default());
    let url_store = Arc::new(InMemoryUrlStore::default());
    let deps = ServiceDeps::with_default_metrics(
        hash_store.clone(),
        url_store.clone(),
        Arc::new(InMemoryHashPool::default()),
        Arc::new(InMemoryUrlCache::default()),
        Arc::new(InMemoryRateLimiter::new(config.rate_limit.clone())),
        Arc::new(RawUrlValidator::new(config.url_validation.clone())),
        Arc::new(PrivateHostValidator),
        Arc::new(PrivateHostValidator),
    );
    let service = ShortenerService::new(deps, config).unwrap();
    (service, url_store, hash_store)
}

#[tokio::test]
async fn creating_the_same_url_twice_returns_the_same_short_url() {
    let (service, _url_store, _hash_store) = build_service(ServiceConfig::default());
    let principal = Principal::User("alice".into());

    let first = service
        .create_short("https://example.com/docs", principal.clone())
        .await
        .unwrap();
    let second = service
        .create_short("https://example.com/docs", principal)
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn create_then_resolve_round_trips_through_the_service_facade() {
    let (service, _url_store, _hash_store) = build_service(ServiceConfig::default());
    let principal = Principal::User("bob".into());

    let short = service
        .create_short("https://example.com/pricing", principal.clone())
        .await
        .unwrap();
    let hash = short.rsplit('/').next().unwrap();

    let resolution = service.resolve(hash, principal).await.unwrap();
    assert_eq!(resolution.url, "https://example.com/pricing");
}

#[tokio::test]
async fn resolving_an_unknown_hash_fails_with_not_found() {
    let (service, _url_store, _hash_store) = build_service(ServiceConfig::default());
    let result = service.resolve("does-not-exist", Principal::Anonymous).await;
    assert!(matches!(result, Err(CoreError::NotFound)));
}

#[tokio::test]
async fn rate_limit_gates_both_creation_and_resolution() {
    let mut config = ServiceConfig::default();
    config.rate_limit.capacity = 1;
    config.rate_limit.refill_tokens = 1;
    config.rate_limit.refill_duration_seconds = 3600;
    let (service, _url_store, _hash_store) = build_service(config);
    let principal = Principal::User("carol".into());

    let short = service
        .create_short("https://example.com/a", principal.clone())
        .await
        .unwrap();
    let hash = short.rsplit('/').next().unwrap().to_string();

    // The single token was already spent on create_short; resolve trips the limiter.
    let result = service.resolve(&hash, principal).await;
    assert!(matches!(result, Err(CoreError::RateLimited)));
}

#[tokio::test]
async fn cleaner_retires_old_urls_and_frees_their_hashes_for_reuse() {
    let (service, url_store, hash_store) = build_service(ServiceConfig::default());
    let principal = Principal::User("dave".into());

    let short = service
        .create_short("https://example.com/old-page", principal)
        .await
        .unwrap();
    let hash = short.rsplit('/').next().unwrap().to_string();

    // Backdate the row directly so it falls outside the retention window.
    let old_timestamp = chrono::Utc::now() - chrono::Duration::days(800);
    url_store.seed(&hash, "https://example.com/old-page", old_timestamp);

    let cleaner = service.build_cleaner(ShutdownSignal::new());
    cleaner.run().await.unwrap();

    assert!(!url_store.contains(&hash));
    assert!(!hash_store.is_claimed(&hash));
}

#[tokio::test]
async fn returning_a_hash_makes_it_available_to_the_pool_again() {
    let (service, _url_store, _hash_store) = build_service(ServiceConfig::default());
    service.return_hash("reclaimed-hash").await.unwrap();

    // A subsequent create should be able to pop it straight from the pool.
    let short = service
        .create_short("https://example.com/new", Principal::Anonymous)
        .await
        .unwrap();
    assert!(short.ends_with("/reclaimed-hash"));
}
