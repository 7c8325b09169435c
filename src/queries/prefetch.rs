//! Cache warmers and bulk invalidation

use crate::cache::key;
use crate::queries::client::BillingQueries;
use tracing::{debug, info};

impl BillingQueries {
    /// Warm the matter list ahead of opening the time entry form
    ///
    /// Best effort: failures are logged and dropped.
    pub async fn prefetch_matters_for_entry_form(&self) {
        if let Err(e) = self.matters_for_entry_form().await {
            debug!("Prefetch of entry form matters failed: {}", e);
        }
    }

    /// Warm one client's billing summary; best effort
    pub async fn prefetch_client_billing(&self, client_id: &str) {
        if let Err(e) = self.client_billing(client_id).await {
            debug!("Prefetch of client billing for {} failed: {}", client_id, e);
        }
    }

    /// Evict everything under the billing root
    ///
    /// Used after out-of-band sync; calling it again is a no-op.
    pub fn invalidate_all(&self) -> usize {
        let evicted = self.cache.evict_prefix(&key::billing_root());
        info!("Evicted {} cached billing values", evicted);
        evicted
    }

    /// Force every time entry list and single entry to refetch
    pub fn invalidate_time_entries(&self) -> usize {
        let lists = self.cache.invalidate(&key::time_entries());
        let unsubmitted = self.cache.invalidate(&key::unsubmitted_entries());
        let singles = self.cache.invalidate(&key::time_entry_root());
        lists + unsubmitted + singles
    }

    /// Force every analytics aggregate to refetch
    pub fn invalidate_analytics(&self) -> usize {
        self.cache.invalidate(&key::analytics_root())
    }
}
