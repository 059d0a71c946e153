//! Rule catalog service.
//!
//! Maintains a fresh, validated view of framework rules loaded from the
//! external configuration store. Entries are cached with a TTL (default
//! 5 minutes); an expired entry is transparently reloaded on the next
//! `load_framework` call.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::RwLock;

use crate::domain::errors::{DetectionError, DetectionResult};
use crate::domain::models::{FrameworkRule, FrameworkType};
use crate::domain::ports::ConfigStore;

/// Key prefix under which framework rule documents live.
pub const FRAMEWORK_KEY_PREFIX: &str = "training.log.parser.framework.";

/// Default staleness bound for cached rules.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Upper bound on cached rule entries.
const CACHE_MAX_CAPACITY: u64 = 1024;

/// TTL-cached catalog of framework detection rules.
///
/// Reads are short; the write lock is taken only to swap the cache on
/// `refresh_cache` / `set_cache_ttl`.
pub struct RuleCatalog {
    store: Arc<dyn ConfigStore>,
    cache: RwLock<Cache<String, Arc<FrameworkRule>>>,
}

impl RuleCatalog {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn ConfigStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(build_cache(ttl)),
        }
    }

    /// Load one framework rule, serving from cache while fresh.
    pub async fn load_framework(&self, name: &str) -> DetectionResult<Arc<FrameworkRule>> {
        let cache = self.cache.read().await.clone();
        if let Some(rule) = cache.get(name).await {
            return Ok(rule);
        }

        let rule = self.fetch_and_validate(name).await?;
        cache.insert(name.to_string(), rule.clone()).await;
        Ok(rule)
    }

    /// Discover and load every rule under the key prefix.
    ///
    /// A failure to enumerate keys degrades to an empty list with a
    /// warning. Per-entry load failures are logged and skipped; the batch
    /// continues.
    pub async fn load_all(&self) -> Vec<Arc<FrameworkRule>> {
        let keys = match self.store.list_keys(FRAMEWORK_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "failed to enumerate framework rule keys");
                return Vec::new();
            }
        };

        let mut rules = Vec::new();
        for key in keys {
            let Some(name) = key.strip_prefix(FRAMEWORK_KEY_PREFIX) else {
                continue;
            };
            // Keys with further dot segments are sub-configs, not rules.
            if name.is_empty() || name.contains('.') {
                continue;
            }
            match self.load_framework(name).await {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    tracing::warn!(framework = name, error = %e, "skipping framework rule");
                }
            }
        }
        rules
    }

    /// Cached rule, if present. Never hits the store.
    pub async fn get_framework(&self, name: &str) -> Option<Arc<FrameworkRule>> {
        let cache = self.cache.read().await.clone();
        cache.get(name).await
    }

    /// Names of all enabled cached frameworks.
    pub async fn list_frameworks(&self) -> Vec<String> {
        self.cached_rules()
            .await
            .into_iter()
            .filter(|r| r.enabled)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Names of enabled training frameworks.
    pub async fn list_training_frameworks(&self) -> Vec<String> {
        self.list_by_type(FrameworkType::Training)
            .await
            .into_iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Names of enabled inference frameworks.
    pub async fn list_inference_frameworks(&self) -> Vec<String> {
        self.list_by_type(FrameworkType::Inference)
            .await
            .into_iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Enabled training rules, priority descending.
    pub async fn get_training_frameworks(&self) -> Vec<Arc<FrameworkRule>> {
        self.get_frameworks_by_type(FrameworkType::Training).await
    }

    /// Enabled inference rules, priority descending.
    pub async fn get_inference_frameworks(&self) -> Vec<Arc<FrameworkRule>> {
        self.get_frameworks_by_type(FrameworkType::Inference).await
    }

    /// Enabled rules of one type, priority descending.
    pub async fn get_frameworks_by_type(
        &self,
        framework_type: FrameworkType,
    ) -> Vec<Arc<FrameworkRule>> {
        let mut rules = self.list_by_type(framework_type).await;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    /// Drop every cached entry and repopulate from the store.
    pub async fn refresh_cache(&self) -> Vec<Arc<FrameworkRule>> {
        {
            let cache = self.cache.read().await.clone();
            cache.invalidate_all();
        }
        self.load_all().await
    }

    /// Replace the staleness bound. Existing entries are dropped; the next
    /// loads repopulate under the new TTL.
    pub async fn set_cache_ttl(&self, ttl: Duration) {
        let mut cache = self.cache.write().await;
        *cache = build_cache(ttl);
    }

    async fn fetch_and_validate(&self, name: &str) -> DetectionResult<Arc<FrameworkRule>> {
        let key = format!("{FRAMEWORK_KEY_PREFIX}{name}");
        let doc = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| DetectionError::FrameworkNotFound(name.to_string()))?;

        let rule: FrameworkRule = serde_json::from_str(&doc).map_err(|e| {
            DetectionError::InvalidRule {
                name: name.to_string(),
                reason: format!("malformed rule document: {e}"),
            }
        })?;
        rule.validate()?;
        Ok(Arc::new(rule))
    }

    async fn cached_rules(&self) -> Vec<Arc<FrameworkRule>> {
        let cache = self.cache.read().await.clone();
        cache.iter().map(|(_, rule)| rule).collect()
    }

    async fn list_by_type(&self, framework_type: FrameworkType) -> Vec<Arc<FrameworkRule>> {
        self.cached_rules()
            .await
            .into_iter()
            .filter(|r| r.enabled && r.framework_type() == framework_type)
            .collect()
    }
}

fn build_cache(ttl: Duration) -> Cache<String, Arc<FrameworkRule>> {
    Cache::builder()
        .max_capacity(CACHE_MAX_CAPACITY)
        .time_to_live(ttl)
        .build()
}
