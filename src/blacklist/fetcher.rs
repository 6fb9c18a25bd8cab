//! Cached, retrying deny-list fetcher.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::cache::TtlCache;
use super::http::{Fetch, FetchResponse, SourceFormat};

/// How long a fetched list is served from cache.
pub const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Maximum number of distinct cached call signatures.
pub const CACHE_CAPACITY: usize = 1024;

#[allow(clippy::expect_used)]
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\s#,\[\]\{\}]+").expect("token pattern is valid"));

/// An entry of the deny-list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlacklistId {
    Int(i64),
    Str(String),
}

impl From<i64> for BlacklistId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for BlacklistId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    url: String,
    format: SourceFormat,
    attempts: u32,
    fallback: Option<Vec<BlacklistId>>,
}

/// Fetches deny-lists with retry and a time-bounded cache.
pub struct BlacklistFetcher {
    source: Arc<dyn Fetch>,
    cache: Mutex<TtlCache<CacheKey, HashSet<BlacklistId>>>,
    backoff: Duration,
}

impl BlacklistFetcher {
    /// Creates a fetcher over the given collaborator.
    #[must_use]
    pub fn new(source: Arc<dyn Fetch>) -> Self {
        Self {
            source,
            cache: Mutex::new(TtlCache::new(CACHE_CAPACITY, CACHE_TTL)),
            backoff: Duration::from_secs(1),
        }
    }

    /// Sets the pause between failed attempts.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the cache expiry window.
    #[must_use]
    pub fn with_ttl(self, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(TtlCache::new(CACHE_CAPACITY, ttl)),
            ..self
        }
    }

    /// Returns the identifiers listed at `url`.
    ///
    /// Never fails: when every attempt comes back empty the fallback (or an
    /// empty set) is returned and cached like any other result.
    pub async fn fetch(
        &self,
        url: &str,
        format: SourceFormat,
        attempts: u32,
        fallback: Option<&HashSet<BlacklistId>>,
    ) -> HashSet<BlacklistId> {
        let key = CacheKey {
            url: url.to_owned(),
            format,
            attempts,
            fallback: fallback.map(|f| {
                let mut ids: Vec<_> = f.iter().cloned().collect();
                ids.sort();
                ids
            }),
        };

        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!("Blacklist cache hit for {}", url);
            return hit;
        }

        let ids = self
            .fetch_uncached(url, format, attempts)
            .await
            .unwrap_or_else(|| fallback.cloned().unwrap_or_default());

        self.cache.lock().await.insert(key, ids.clone());
        ids
    }

    async fn fetch_uncached(
        &self,
        url: &str,
        format: SourceFormat,
        attempts: u32,
    ) -> Option<HashSet<BlacklistId>> {
        for attempt in 1..=attempts {
            let parsed = self
                .source
                .fetch(url, format)
                .await
                .filter(|r| !r.is_empty())
                .and_then(|r| parse_response(&r, format));

            if let Some(ids) = parsed {
                debug!("Fetched {} blacklist entries on attempt {}", ids.len(), attempt);
                return Some(ids);
            }

            if attempt < attempts {
                debug!("Blacklist attempt {}/{} failed, retrying", attempt, attempts);
                tokio::time::sleep(self.backoff).await;
            }
        }

        warn!("Could not fetch blacklist from {} after {} attempts", url, attempts);
        None
    }
}

impl std::fmt::Debug for BlacklistFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlacklistFetcher")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

fn parse_response(response: &FetchResponse, format: SourceFormat) -> Option<HashSet<BlacklistId>> {
    match (format, response) {
        (SourceFormat::Json, FetchResponse::Json(serde_json::Value::Array(items))) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    serde_json::Value::Number(n) => n.as_i64().map(BlacklistId::Int),
                    serde_json::Value::String(s) => Some(BlacklistId::Str(s.clone())),
                    _ => None,
                })
                .collect(),
        ),
        (SourceFormat::Text, FetchResponse::Raw(bytes)) => {
            Some(parse_text(&String::from_utf8_lossy(bytes)))
        }
        _ => None,
    }
}

/// Extracts every integer token from free text.
#[must_use]
pub fn parse_text(text: &str) -> HashSet<BlacklistId> {
    TOKEN
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|token| is_decimal(token))
        .filter_map(|token| token.parse().ok())
        .map(BlacklistId::Int)
        .collect()
}

fn is_decimal(token: &str) -> bool {
    let digits = token.strip_prefix('-').unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct ScriptedFetch {
        responses: std::sync::Mutex<VecDeque<Option<FetchResponse>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetch {
        fn new(responses: Vec<Option<FetchResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetch {
        async fn fetch(&self, _url: &str, _format: SourceFormat) -> Option<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().pop_front().flatten()
        }
    }

    fn fetcher(source: Arc<ScriptedFetch>) -> BlacklistFetcher {
        BlacklistFetcher::new(source).with_backoff(Duration::ZERO)
    }

    fn ids(values: &[i64]) -> HashSet<BlacklistId> {
        values.iter().copied().map(BlacklistId::Int).collect()
    }

    #[tokio::test]
    async fn test_all_attempts_empty_returns_fallback() {
        let source = ScriptedFetch::new(vec![
            Some(FetchResponse::Raw(Vec::new())),
            None,
            Some(FetchResponse::Raw(Vec::new())),
        ]);
        let fallback = ids(&[1, 2]);
        let result = fetcher(Arc::clone(&source))
            .fetch("https://example.org/list", SourceFormat::Text, 3, Some(&fallback))
            .await;
        assert_eq!(result, fallback);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_second_attempt_parses_text() {
        let source = ScriptedFetch::new(vec![
            None,
            Some(FetchResponse::Raw(b"111 222 abc -333".to_vec())),
        ]);
        let result = fetcher(Arc::clone(&source))
            .fetch("https://example.org/list", SourceFormat::Text, 3, Some(&ids(&[1, 2])))
            .await;
        assert_eq!(result, ids(&[111, 222, -333]));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_fallback_gives_empty_set() {
        let source = ScriptedFetch::new(vec![None, None]);
        let result = fetcher(source)
            .fetch("https://example.org/list", SourceFormat::Text, 2, None)
            .await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_identical_calls_hit_cache() {
        let source = ScriptedFetch::new(vec![
            Some(FetchResponse::Raw(b"5".to_vec())),
            Some(FetchResponse::Raw(b"6".to_vec())),
        ]);
        let fetcher = fetcher(Arc::clone(&source));

        let first = fetcher.fetch("https://example.org/a", SourceFormat::Text, 3, None).await;
        let second = fetcher.fetch("https://example.org/a", SourceFormat::Text, 3, None).await;
        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);

        // A different signature is a separate entry.
        let other = fetcher.fetch("https://example.org/a", SourceFormat::Text, 2, None).await;
        assert_eq!(other, ids(&[6]));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let source = ScriptedFetch::new(vec![
            Some(FetchResponse::Raw(b"5".to_vec())),
            Some(FetchResponse::Raw(b"6".to_vec())),
        ]);
        let fetcher = fetcher(Arc::clone(&source)).with_ttl(Duration::ZERO);

        fetcher.fetch("https://example.org/a", SourceFormat::Text, 1, None).await;
        let second = fetcher.fetch("https://example.org/a", SourceFormat::Text, 1, None).await;
        assert_eq!(second, ids(&[6]));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_json_source() {
        let source = ScriptedFetch::new(vec![Some(FetchResponse::Json(serde_json::json!([
            10, "spammer", -20, null
        ])))]);
        let result = fetcher(source)
            .fetch("https://example.org/list.json", SourceFormat::Json, 1, None)
            .await;
        let expected: HashSet<BlacklistId> = [
            BlacklistId::Int(10),
            BlacklistId::Str("spammer".to_owned()),
            BlacklistId::Int(-20),
        ]
        .into_iter()
        .collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_parse_text_python_list() {
        let text = "BLACKLIST = [\n  123, # spam\n  -1001234,\n  {456}, 7a, -, --5\n]";
        assert_eq!(parse_text(text), ids(&[123, -1_001_234, 456]));
    }
}
