//! Named limiter lookup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use super::config::{DEFAULT_COMPONENT, RateLimitConfig, default_rate_limits};
use super::limiter::{RateLimitMetrics, RateLimiter};
use crate::config::Settings;
use crate::error::ConfigurationError;

/// Lazily creates one [`RateLimiter`] per component name and hands out
/// shared references to it.
#[derive(Debug)]
pub struct LimiterRegistry {
    defaults: HashMap<String, RateLimitConfig>,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new(default_rate_limits())
    }
}

impl LimiterRegistry {
    pub fn new(defaults: HashMap<String, RateLimitConfig>) -> Self {
        Self {
            defaults,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.rate_limits.clone())
    }

    /// Configuration a new limiter for `component` would get: its own entry,
    /// then the `default` entry, then the built-in defaults for that name.
    pub fn default_config(&self, component: &str) -> RateLimitConfig {
        self.defaults
            .get(component)
            .or_else(|| self.defaults.get(DEFAULT_COMPONENT))
            .cloned()
            .unwrap_or_else(|| RateLimitConfig::for_component(component))
    }

    /// Returns the limiter for `component`, creating it on first use.
    ///
    /// An explicit `config` only applies when the limiter does not exist
    /// yet; later calls get the existing instance unchanged.
    pub fn get_limiter(
        &self,
        component: &str,
        config: Option<RateLimitConfig>,
    ) -> Result<Arc<RateLimiter>, ConfigurationError> {
        if let Some(limiter) = self.limiters.read().get(component) {
            return Ok(Arc::clone(limiter));
        }

        let mut limiters = self.limiters.write();
        if let Some(limiter) = limiters.get(component) {
            return Ok(Arc::clone(limiter));
        }

        let config = config.unwrap_or_else(|| self.default_config(component));
        let limiter = Arc::new(RateLimiter::new(component, config)?);
        tracing::debug!(component, "created rate limiter");
        limiters.insert(component.to_string(), Arc::clone(&limiter));
        Ok(limiter)
    }

    /// Metrics of every limiter created so far, keyed by component.
    pub fn all_metrics(&self) -> BTreeMap<String, RateLimitMetrics> {
        self.limiters
            .read()
            .iter()
            .map(|(name, limiter)| (name.clone(), limiter.metrics()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::config::{EMBEDDING, RETRIEVAL};

    #[test]
    fn test_same_instance_per_component() {
        let registry = LimiterRegistry::default();
        let a = registry.get_limiter(RETRIEVAL, None).unwrap();
        let b = registry.get_limiter(RETRIEVAL, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get_limiter(EMBEDDING, None).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(other.config(), &RateLimitConfig::for_component(EMBEDDING));
    }

    #[test]
    fn test_explicit_config_only_at_creation() {
        let registry = LimiterRegistry::default();
        let custom = RateLimitConfig::new(1.0, 1, 1.0, 0.0);
        let first = registry.get_limiter("reranker", Some(custom.clone())).unwrap();
        assert_eq!(first.config(), &custom);

        let again = registry
            .get_limiter("reranker", Some(RateLimitConfig::default()))
            .unwrap();
        assert_eq!(again.config(), &custom);
    }

    #[test]
    fn test_unknown_component_uses_catch_all() {
        let mut defaults = HashMap::new();
        defaults.insert(
            DEFAULT_COMPONENT.to_string(),
            RateLimitConfig::new(3.0, 3, 10.0, 1.0),
        );
        let registry = LimiterRegistry::new(defaults);
        let limiter = registry.get_limiter("anything", None).unwrap();
        assert_eq!(limiter.config().burst_size, 3);
    }

    #[test]
    fn test_invalid_explicit_config() {
        let registry = LimiterRegistry::default();
        let bad = RateLimitConfig::new(-1.0, 1, 1.0, 0.0);
        assert!(registry.get_limiter("broken", Some(bad)).is_err());
        assert!(registry.all_metrics().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_metrics() {
        let registry = LimiterRegistry::default();
        registry
            .get_limiter(RETRIEVAL, None)
            .unwrap()
            .check()
            .await
            .unwrap();
        registry.get_limiter(EMBEDDING, None).unwrap();

        let metrics = registry.all_metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[RETRIEVAL].total_requests, 1);
        assert_eq!(metrics[EMBEDDING].total_requests, 0);
    }
}
