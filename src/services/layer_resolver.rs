//! Framework layer resolution.
//!
//! Maps a framework name to its stack layer and layer priority, consulting
//! the rule catalog with a small TTL cache in front. Unknown frameworks
//! default to the runtime layer.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::domain::models::FrameworkLayer;
use crate::services::rule_catalog::RuleCatalog;

const LAYER_CACHE_TTL_SECS: u64 = 300;
const LAYER_CACHE_MAX_CAPACITY: u64 = 1024;

/// Resolved layer info for one framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerInfo {
    pub layer: FrameworkLayer,
    /// Layer priority: wrapper 3, orchestration 2, runtime 1, inference 0.
    pub priority: u8,
}

impl LayerInfo {
    fn for_layer(layer: FrameworkLayer) -> Self {
        Self {
            layer,
            priority: layer.priority(),
        }
    }
}

impl Default for LayerInfo {
    fn default() -> Self {
        Self::for_layer(FrameworkLayer::Runtime)
    }
}

/// Cached framework-name → layer lookup.
pub struct LayerResolver {
    catalog: Arc<RuleCatalog>,
    cache: Cache<String, LayerInfo>,
}

impl LayerResolver {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self {
            catalog,
            cache: Cache::builder()
                .max_capacity(LAYER_CACHE_MAX_CAPACITY)
                .time_to_live(Duration::from_secs(LAYER_CACHE_TTL_SECS))
                .build(),
        }
    }

    /// Layer and priority for a framework; (runtime, 1) when no rule exists.
    pub async fn resolve(&self, framework: &str) -> LayerInfo {
        if let Some(info) = self.cache.get(framework).await {
            return info;
        }

        let info = match self.catalog.load_framework(framework).await {
            Ok(rule) => LayerInfo::for_layer(rule.layer()),
            Err(_) => LayerInfo::default(),
        };
        self.cache.insert(framework.to_string(), info).await;
        info
    }

    /// Two frameworks conflict on layer iff they occupy the same layer.
    pub async fn conflicts_on_layer(&self, a: &str, b: &str) -> bool {
        let layer_a = self.resolve(a).await.layer;
        let layer_b = self.resolve(b).await.layer;
        layer_a == layer_b
    }

    /// Drop all cached entries (used after a catalog refresh).
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}
