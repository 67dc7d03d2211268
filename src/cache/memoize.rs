//! Memoizing wrapper around async operations

use super::keys::create_cache_key;
use super::response_cache::ResponseCache;
use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Derives the key suffix for a call from its arguments
pub type KeyGenerator<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;

/// Full key derivation, prefix included
type DeriveKey<A> = Arc<dyn Fn(&str, &A) -> Result<String> + Send + Sync>;

fn generated_key<A: 'static>(generator: KeyGenerator<A>) -> DeriveKey<A> {
    Arc::new(move |prefix, args| Ok(format!("{}:{}", prefix, generator(args))))
}

/// Options for [`ResponseCache::wrap`]
pub struct WrapOptions<A> {
    /// TTL for stored results; `None` uses the cache default, zero never expires
    pub ttl: Option<Duration>,
    /// Custom key derivation; defaults to the JSON form of the arguments
    pub key_generator: Option<KeyGenerator<A>>,
}

impl<A> WrapOptions<A> {
    pub fn new() -> Self {
        Self {
            ttl: None,
            key_generator: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key_generator<G>(mut self, generator: G) -> Self
    where
        G: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }
}

impl<A> Default for WrapOptions<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for WrapOptions<A> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            key_generator: self.key_generator.clone(),
        }
    }
}

impl<A> fmt::Debug for WrapOptions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapOptions")
            .field("ttl", &self.ttl)
            .field(
                "key_generator",
                &self.key_generator.as_ref().map(|_| "<function>"),
            )
            .finish()
    }
}

/// An operation whose successful results are cached
///
/// Concurrent calls with the same arguments are not coalesced: each one that misses the
/// cache runs the operation.
pub struct CachedFn<A, V, F>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Arc<ResponseCache<V>>,
    prefix: String,
    operation: F,
    options: WrapOptions<A>,
    derive_key: DeriveKey<A>,
    _args: PhantomData<fn(A)>,
}

impl<A, V, F, Fut> CachedFn<A, V, F>
where
    V: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<V>>,
{
    /// Keys come from the options' generator, or from the JSON form of the arguments
    pub(crate) fn new(
        cache: Arc<ResponseCache<V>>,
        prefix: String,
        operation: F,
        options: WrapOptions<A>,
    ) -> Self
    where
        A: Serialize + 'static,
    {
        let derive_key: DeriveKey<A> = match options.key_generator.clone() {
            Some(generator) => generated_key(generator),
            None => Arc::new(|prefix, args| create_cache_key(prefix, args)),
        };
        Self::with_key_derivation(cache, prefix, operation, options, derive_key)
    }

    /// Keys always come from `generator`; `A` needs no JSON form
    pub(crate) fn with_key_generator(
        cache: Arc<ResponseCache<V>>,
        prefix: String,
        operation: F,
        mut options: WrapOptions<A>,
        generator: KeyGenerator<A>,
    ) -> Self
    where
        A: 'static,
    {
        options.key_generator = Some(generator.clone());
        Self::with_key_derivation(cache, prefix, operation, options, generated_key(generator))
    }

    fn with_key_derivation(
        cache: Arc<ResponseCache<V>>,
        prefix: String,
        operation: F,
        options: WrapOptions<A>,
        derive_key: DeriveKey<A>,
    ) -> Self {
        Self {
            cache,
            prefix,
            operation,
            options,
            derive_key,
            _args: PhantomData,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Cache key used for `args`
    pub fn key_for(&self, args: &A) -> Result<String> {
        (self.derive_key)(&self.prefix, args)
    }

    /// Return the cached result for `args`, or run the operation and cache its success
    ///
    /// Errors from the operation are returned as-is and never stored.
    pub async fn call(&self, args: A) -> Result<V> {
        let key = self.key_for(&args)?;
        if let Some(value) = self.cache.get(&key).await {
            return Ok(value);
        }

        let value = (self.operation)(args).await?;
        let ttl = self.options.ttl.or(self.cache.config().default_ttl);
        self.cache.set_with_ttl(key.clone(), value.clone(), ttl).await;
        trace!(key = %key, "Cached wrapped result");
        Ok(value)
    }
}

impl<A, V, F> fmt::Debug for CachedFn<A, V, F>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFn")
            .field("prefix", &self.prefix)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::ResilienceError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache() -> Arc<ResponseCache<String>> {
        Arc::new(
            ResponseCache::new(CacheConfig {
                auto_cleanup: false,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_wrap_caches_success() {
        let cache = cache();
        let calls = AtomicU32::new(0);
        let lookup = cache.wrap(
            "book",
            |id: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(format!("book-{id}")) }
            },
            WrapOptions::default(),
        );

        assert_eq!(lookup.call(7).await.unwrap(), "book-7");
        assert_eq!(lookup.call(7).await.unwrap(), "book-7");
        assert_eq!(lookup.call(8).await.unwrap(), "book-8");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.has("book:7").await);
    }

    #[tokio::test]
    async fn test_wrap_does_not_cache_errors() {
        let cache = cache();
        let calls = AtomicU32::new(0);
        let lookup = cache.wrap(
            "book",
            |_id: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(ResilienceError::connection("reset")) }
            },
            WrapOptions::default(),
        );

        assert!(lookup.call(1).await.is_err());
        assert!(lookup.call(1).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_custom_key_generator() {
        let cache = cache();
        let lookup = cache.wrap(
            "search",
            |(term, _page): (String, u32)| async move { Ok(term.to_uppercase()) },
            WrapOptions::new().key_generator(|(term, _): &(String, u32)| term.clone()),
        );

        lookup.call(("rust".to_string(), 1)).await.unwrap();
        assert_eq!(cache.keys().await, vec!["search:rust".to_string()]);
        assert_eq!(
            lookup.key_for(&("rust".to_string(), 9)).unwrap(),
            "search:rust"
        );
    }

    /// Argument type with no JSON form
    struct Shelf {
        aisle: char,
        _handle: std::sync::mpsc::Sender<()>,
    }

    #[tokio::test]
    async fn test_wrap_keyed_accepts_unserializable_arguments() {
        let cache = cache();
        let calls = AtomicU32::new(0);
        let lookup = cache.wrap_keyed(
            "shelf",
            |shelf: Shelf| {
                calls.fetch_add(1, Ordering::SeqCst);
                let aisle = shelf.aisle;
                async move { Ok(format!("aisle {aisle}")) }
            },
            |shelf: &Shelf| shelf.aisle.to_string(),
            WrapOptions::new().ttl(Duration::from_secs(30)),
        );

        let (tx, _rx) = std::sync::mpsc::channel();
        let shelf = |aisle| Shelf {
            aisle,
            _handle: tx.clone(),
        };
        assert_eq!(lookup.call(shelf('b')).await.unwrap(), "aisle b");
        assert_eq!(lookup.call(shelf('b')).await.unwrap(), "aisle b");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(lookup.key_for(&shelf('c')).unwrap(), "shelf:c");
        assert!(cache.has("shelf:b").await);
    }
}
