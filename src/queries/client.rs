//! The session object tying cache, collaborator and retry policy together

use crate::billing::service::BillingService;
use crate::cache::retry::RetryPolicy;
use crate::cache::store::{QueryCache, StalenessTable};
use crate::config::schema::CacheConfig;
use std::sync::Arc;

/// Billing queries and mutations for one application session
///
/// Cheap to clone; clones share the same cache. Construct one per session
/// and hand it to whatever needs billing data.
#[derive(Clone)]
pub struct BillingQueries {
    pub(crate) cache: Arc<QueryCache>,
    pub(crate) service: Arc<dyn BillingService>,
    pub(crate) retry: RetryPolicy,
}

impl BillingQueries {
    /// Create queries with default staleness windows and retry policy
    pub fn new(service: Arc<dyn BillingService>) -> Self {
        Self {
            cache: Arc::new(QueryCache::new(StalenessTable::default())),
            service,
            retry: RetryPolicy::default(),
        }
    }

    /// Create queries configured from `config`
    pub fn from_config(service: Arc<dyn BillingService>, config: &CacheConfig) -> Self {
        Self {
            cache: Arc::new(QueryCache::new(config.staleness_table())),
            service,
            retry: config.retry_policy(),
        }
    }

    /// Replace the retry policy used by reads
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn service(&self) -> &Arc<dyn BillingService> {
        &self.service
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl std::fmt::Debug for BillingQueries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingQueries")
            .field("service", &self.service.service_name())
            .field("cached_keys", &self.cache.len())
            .field("retry", &self.retry)
            .finish()
    }
}
