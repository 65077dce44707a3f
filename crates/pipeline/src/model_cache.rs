//! Process-global model cache
//!
//! Inference models are expensive to load and shared across sessions.
//! The cache is keyed by `(size, device, precision)`; initialization is
//! serialized per key so concurrent sessions never load the same model
//! twice.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Cache key identifying one loaded model variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub size: String,
    pub device: String,
    pub precision: String,
}

impl ModelKey {
    pub fn new(
        size: impl Into<String>,
        device: impl Into<String>,
        precision: impl Into<String>,
    ) -> Self {
        Self {
            size: size.into(),
            device: device.into(),
            precision: precision.into(),
        }
    }
}

/// Concurrent read-through cache with per-key initialization locks.
pub struct ModelCache<T> {
    map: DashMap<ModelKey, Arc<OnceCell<Arc<T>>>>,
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl<T: Send + Sync + 'static> ModelCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached model or run the loader exactly once for this key.
    ///
    /// Concurrent callers for the same key await the single in-flight load.
    pub async fn get_or_load<E, F, Fut>(&self, key: ModelKey, loader: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = self
            .map
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let value = cell
            .get_or_try_init(|| async { loader().await.map(Arc::new) })
            .await?;
        Ok(value.clone())
    }

    /// Look up without loading.
    pub fn get(&self, key: &ModelKey) -> Option<Arc<T>> {
        self.map
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Drop one cached model.
    pub fn evict(&self, key: &ModelKey) {
        self.map.remove(key);
    }

    /// Drop everything; called on shutdown of the last owner.
    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_loader_runs_once_per_key() {
        let cache: ModelCache<String> = ModelCache::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let key = ModelKey::new("large-v3", "cpu", "f16");

        let mut handles = Vec::new();
        let cache = Arc::new(cache);
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load(key, || async {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Ok::<_, std::convert::Infallible>("model".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(*handle.await.unwrap(), "model");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_can_retry() {
        let cache: ModelCache<String> = ModelCache::new();
        let key = ModelKey::new("base", "cpu", "f32");

        let result: Result<Arc<String>, &str> = cache
            .get_or_load(key.clone(), || async { Err("load failed") })
            .await;
        assert!(result.is_err());

        // OnceCell stays uninitialized after a failed load
        let result: Result<Arc<String>, &str> = cache
            .get_or_load(key.clone(), || async { Ok("ok".to_string()) })
            .await;
        assert_eq!(*result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_distinct_keys_load_separately() {
        let cache: ModelCache<u32> = ModelCache::new();
        let a = cache
            .get_or_load(ModelKey::new("s", "cpu", "f32"), || async {
                Ok::<_, std::convert::Infallible>(1u32)
            })
            .await
            .unwrap();
        let b = cache
            .get_or_load(ModelKey::new("s", "cuda", "f32"), || async {
                Ok::<_, std::convert::Infallible>(2u32)
            })
            .await
            .unwrap();
        assert_eq!((*a, *b), (1, 2));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
