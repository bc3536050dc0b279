use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use derive_builder::Builder;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::Error;

const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60); // 15 minutes
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10); // 10 seconds
const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(30); // 30 seconds

#[derive(Debug, Clone, Builder)]
pub struct KeySetCacheConfig {
    /// How long a fetched key set is reused before the next lookup refreshes it
    #[builder(default = "DEFAULT_MIN_REFRESH_INTERVAL")]
    pub min_refresh_interval: Duration,
    /// Request timeout for the default HTTP fetcher
    #[builder(default = "DEFAULT_FETCH_TIMEOUT")]
    pub fetch_timeout: Duration,
    /// How long a failed fetch is remembered before the endpoint is tried again
    #[builder(default = "DEFAULT_FAILURE_BACKOFF")]
    pub failure_backoff: Duration,
}

impl Default for KeySetCacheConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
        }
    }
}

impl KeySetCacheConfig {
    pub fn builder() -> KeySetCacheConfigBuilder {
        KeySetCacheConfigBuilder::default()
    }
}

/// Transport used to download a published key set.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<JwkSet, Error>;
}

/// Fetches key sets over HTTPS with `reqwest`.
#[derive(Clone)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
}

impl HttpKeySetFetcher {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct KeySetDocument {
    #[serde(default)]
    keys: Vec<serde_json::Value>,
}

/// Keeps every key that parses. Providers publish key types we cannot use,
/// and one of those must not hide the rest of the set.
fn parse_key_set(document: KeySetDocument) -> JwkSet {
    let total = document.keys.len();
    let keys: Vec<Jwk> = document
        .keys
        .into_iter()
        .filter_map(|key| serde_json::from_value(key).ok())
        .collect();

    if keys.len() < total {
        tracing::debug!(skipped = total - keys.len(), "Skipped unparseable JWKS entries");
    }

    JwkSet { keys }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self, url: &str) -> Result<JwkSet, Error> {
        let document = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<KeySetDocument>()
            .await?;

        Ok(parse_key_set(document))
    }
}

#[derive(Default)]
struct CachedKeySet {
    keys: Option<Arc<JwkSet>>,
    /// Set after every attempt, successful or not. No fetch happens before it.
    refresh_after: Option<Instant>,
}

/// Per-endpoint cache of published signing keys.
///
/// Entries are created on first lookup and live as long as the cache. Each
/// entry has its own lock, held across the fetch, so refreshes serialize per
/// endpoint and concurrent lookups inside the refresh window share one fetch.
pub struct KeySetCache {
    config: KeySetCacheConfig,
    fetcher: Arc<dyn KeySetFetcher>,
    entries: DashMap<String, Arc<Mutex<CachedKeySet>>>,
}

impl KeySetCache {
    pub fn new(fetcher: Arc<dyn KeySetFetcher>, config: KeySetCacheConfig) -> Self {
        Self {
            config,
            fetcher,
            entries: DashMap::new(),
        }
    }

    /// Creates a cache backed by [`HttpKeySetFetcher`].
    pub fn http(config: KeySetCacheConfig) -> Result<Self, Error> {
        let fetcher = HttpKeySetFetcher::new(config.fetch_timeout)?;
        Ok(Self::new(Arc::new(fetcher), config))
    }

    pub fn config(&self) -> &KeySetCacheConfig {
        &self.config
    }

    /// Returns the key set for `url`, fetching it when missing or due for refresh.
    ///
    /// A failed fetch backs the endpoint off for `failure_backoff`. Until then,
    /// lookups (including those queued behind the failing fetch) get the
    /// previous set, or [`Error::KeySetUnavailable`] if there never was one.
    pub async fn get(&self, url: &str) -> Result<Arc<JwkSet>, Error> {
        let entry = self.entries.entry(url.to_string()).or_default().clone();
        let mut cached = entry.lock().await;

        if let Some(refresh_after) = cached.refresh_after {
            if Instant::now() < refresh_after {
                return cached
                    .keys
                    .clone()
                    .ok_or_else(|| Error::KeySetUnavailable(url.to_string()));
            }
        }

        match self.fetcher.fetch(url).await {
            Ok(set) => {
                tracing::info!(endpoint = url, keys = set.keys.len(), "JWKS loaded");
                let set = Arc::new(set);
                cached.keys = Some(set.clone());
                cached.refresh_after = Some(Instant::now() + self.config.min_refresh_interval);
                Ok(set)
            }
            Err(err) => {
                cached.refresh_after = Some(Instant::now() + self.config.failure_backoff);
                match &cached.keys {
                    Some(stale) => {
                        tracing::warn!(endpoint = url, error = %err, "Failed to refresh JWKS, serving stale keys");
                        Ok(stale.clone())
                    }
                    None => {
                        tracing::warn!(endpoint = url, error = %err, "Failed to fetch JWKS");
                        Err(err)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    pub(crate) const JWKS: &str = include_str!("../tests/jwks.json");

    pub(crate) fn test_key_set() -> JwkSet {
        serde_json::from_str(JWKS).unwrap()
    }

    /// Serves fixed key sets per URL and counts every call.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub sets: HashMap<String, JwkSet>,
        pub calls: Mutex<Vec<String>>,
        pub failing: AtomicBool,
        pub delay: Option<Duration>,
    }

    impl FakeFetcher {
        pub fn with(sets: Vec<(&str, JwkSet)>) -> Self {
            Self {
                sets: sets.into_iter().map(|(u, s)| (u.to_string(), s)).collect(),
                ..Default::default()
            }
        }

        pub async fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().await.iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl KeySetFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<JwkSet, Error> {
            self.calls.lock().await.push(url.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::KeySetUnavailable(url.to_string()));
            }
            self.sets
                .get(url)
                .cloned()
                .ok_or_else(|| Error::KeySetUnavailable(url.to_string()))
        }
    }

    const URL: &str = "https://issuer/common/discovery/v2.0/keys";

    fn cache(fetcher: Arc<FakeFetcher>) -> KeySetCache {
        KeySetCache::new(fetcher, KeySetCacheConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuses_key_set_within_refresh_interval() {
        let fetcher = Arc::new(FakeFetcher::with(vec![(URL, test_key_set())]));
        let cache = cache(fetcher.clone());

        cache.get(URL).await.unwrap();
        tokio::time::advance(Duration::from_secs(14 * 60)).await;
        let set = cache.get(URL).await.unwrap();

        assert_eq!(set.keys.len(), 1);
        assert_eq!(fetcher.calls_to(URL).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_after_interval() {
        let fetcher = Arc::new(FakeFetcher::with(vec![(URL, test_key_set())]));
        let cache = cache(fetcher.clone());

        cache.get(URL).await.unwrap();
        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        cache.get(URL).await.unwrap();

        assert_eq!(fetcher.calls_to(URL).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_one_fetch() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Some(Duration::from_millis(50)),
            ..FakeFetcher::with(vec![(URL, test_key_set())])
        });
        let cache = cache(fetcher.clone());

        let results = futures::future::join_all((0..16).map(|_| cache.get(URL))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(fetcher.calls_to(URL).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_fetch_is_retried_after_backoff() {
        let fetcher = Arc::new(FakeFetcher::with(vec![(URL, test_key_set())]));
        fetcher.failing.store(true, Ordering::SeqCst);
        let cache = cache(fetcher.clone());

        assert!(cache.get(URL).await.is_err());

        fetcher.failing.store(false, Ordering::SeqCst);
        assert!(matches!(
            cache.get(URL).await,
            Err(Error::KeySetUnavailable(_))
        ));
        assert_eq!(fetcher.calls_to(URL).await, 1);

        tokio::time::advance(DEFAULT_FAILURE_BACKOFF).await;
        assert!(cache.get(URL).await.is_ok());
        assert_eq!(fetcher.calls_to(URL).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_queued_behind_failing_fetch_do_not_refetch() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Some(Duration::from_secs(10)),
            ..FakeFetcher::with(vec![(URL, test_key_set())])
        });
        fetcher.failing.store(true, Ordering::SeqCst);
        let cache = cache(fetcher.clone());

        let started = Instant::now();
        let results = futures::future::join_all((0..8).map(|_| cache.get(URL))).await;

        assert!(results.iter().all(Result::is_err));
        assert_eq!(fetcher.calls_to(URL).await, 1);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_stale_keys() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Some(Duration::from_secs(10)),
            ..FakeFetcher::with(vec![(URL, test_key_set())])
        });
        let cache = cache(fetcher.clone());

        cache.get(URL).await.unwrap();
        fetcher.failing.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(16 * 60)).await;

        let started = Instant::now();
        let results = futures::future::join_all((0..8).map(|_| cache.get(URL))).await;
        assert!(started.elapsed() < Duration::from_secs(20));
        for _ in 0..4 {
            assert_eq!(cache.get(URL).await.unwrap().keys.len(), 1);
        }

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(fetcher.calls_to(URL).await, 2);

        tokio::time::advance(DEFAULT_FAILURE_BACKOFF).await;
        assert!(cache.get(URL).await.is_ok());
        assert_eq!(fetcher.calls_to(URL).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_are_cached_independently() {
        let other = "https://issuer/consumers/discovery/v2.0/keys";
        let fetcher = Arc::new(FakeFetcher::with(vec![
            (URL, test_key_set()),
            (other, JwkSet { keys: vec![] }),
        ]));
        let cache = cache(fetcher.clone());

        cache.get(URL).await.unwrap();
        cache.get(other).await.unwrap();
        cache.get(URL).await.unwrap();

        assert_eq!(fetcher.calls_to(URL).await, 1);
        assert_eq!(fetcher.calls_to(other).await, 1);
    }

    #[test]
    fn test_parse_key_set_skips_unusable_entries() {
        let document: KeySetDocument = serde_json::from_str(
            r#"{"keys": [
                {"kty": "RSA", "kid": "k1", "use": "sig", "n": "AQAB", "e": "AQAB"},
                {"kty": "unknown", "kid": "k2"}
            ]}"#,
        )
        .unwrap();

        let set = parse_key_set(document);
        assert_eq!(set.keys.len(), 1);
        assert!(set.find("k1").is_some());
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = KeySetCacheConfig::builder()
            .fetch_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(config.min_refresh_interval, DEFAULT_MIN_REFRESH_INTERVAL);
        assert_eq!(config.failure_backoff, DEFAULT_FAILURE_BACKOFF);
        assert_eq!(config.fetch_timeout, Duration::from_secs(2));
    }
}
