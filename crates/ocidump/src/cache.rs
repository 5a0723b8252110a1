//! Compartment name resolution with an in-memory, per-run cache.
//!
//! The fast path takes a shared read lock; a miss upgrades to the exclusive
//! lock and re-checks before issuing the remote lookup, so any number of
//! concurrent probes resolving the same identifier produce at most one call
//! to the identity endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ocidump_retry::Deadline;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::IdentityApi;
use crate::types::{Compartment, short_ocid};

/// Bound on a single on-demand lookup.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the whole preload pass.
pub const PRELOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// At or below this many compartments the preload populates serially.
pub const PRELOAD_SERIAL_LIMIT: usize = 200;

/// Batch size handed to each preload worker above the serial limit.
pub const PRELOAD_BATCH: usize = 20;

/// Preload worker count above the serial limit.
pub const PRELOAD_WORKERS: usize = 3;

/// Identifier-to-display-name resolver for compartments.
pub struct NameCache {
    identity: Arc<dyn IdentityApi>,
    names: RwLock<HashMap<String, String>>,
}

impl NameCache {
    pub fn new(identity: Arc<dyn IdentityApi>) -> Self {
        Self {
            identity,
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a compartment identifier to its display name.
    ///
    /// Misses trigger one bounded remote lookup; a failed lookup yields the
    /// short form of the identifier and is not cached, so a later call can
    /// repopulate on demand.
    pub async fn resolve(&self, id: &str) -> String {
        if let Some(name) = self.names.read().await.get(id) {
            return name.clone();
        }

        let mut names = self.names.write().await;
        if let Some(name) = names.get(id) {
            return name.clone();
        }

        let deadline = Deadline::after(RESOLVE_TIMEOUT);
        match deadline.race(self.identity.get_compartment(id)).await {
            Ok(Ok(compartment)) => {
                names.insert(id.to_string(), compartment.name.clone());
                compartment.name
            }
            Ok(Err(err)) => {
                debug!(compartment = id, error = %err, "compartment name lookup failed");
                short_ocid(id)
            }
            Err(_) => {
                debug!(compartment = id, "compartment name lookup timed out");
                short_ocid(id)
            }
        }
    }

    /// Enumerate the tenancy's active compartment subtree and populate the
    /// cache from it. Entries obtained before a partial failure are kept;
    /// nothing fatal escapes this method.
    pub async fn preload(&self, tenancy_id: &str) {
        let deadline = Deadline::after(PRELOAD_TIMEOUT);
        let mut compartments: Vec<Compartment> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = deadline
                .race(self.identity.list_compartments(tenancy_id, cursor.clone()))
                .await;
            match page {
                Ok(Ok(page)) => {
                    compartments.extend(page.items.into_iter().filter(Compartment::is_active));
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Ok(Err(err)) => {
                    debug!(error = %err, "compartment preload stopped early");
                    break;
                }
                Err(_) => {
                    debug!("compartment preload hit its time bound");
                    break;
                }
            }
        }

        debug!(count = compartments.len(), "preloading compartment names");
        self.populate(compartments).await;
    }

    /// Populate from an enumerated list: serially for small tenancies,
    /// batched across workers with a single fanned-in write above
    /// [`PRELOAD_SERIAL_LIMIT`].
    async fn populate(&self, compartments: Vec<Compartment>) {
        if compartments.len() <= PRELOAD_SERIAL_LIMIT {
            let mut names = self.names.write().await;
            for c in compartments {
                names.insert(c.id, c.name);
            }
            return;
        }

        let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<(String, String)>>(PRELOAD_WORKERS);
        let batches: Vec<Vec<Compartment>> = compartments
            .chunks(PRELOAD_BATCH)
            .map(|chunk| chunk.to_vec())
            .collect();

        for (worker, _) in (0..PRELOAD_WORKERS).zip(&batches) {
            let tx = tx.clone();
            let share: Vec<Vec<Compartment>> = batches
                .iter()
                .skip(worker)
                .step_by(PRELOAD_WORKERS)
                .cloned()
                .collect();
            tokio::spawn(async move {
                for batch in share {
                    let pairs: Vec<(String, String)> =
                        batch.into_iter().map(|c| (c.id, c.name)).collect();
                    if tx.send(pairs).await.is_err() {
                        return;
                    }
                }
            });
        }
        drop(tx);

        let mut all: Vec<(String, String)> = Vec::new();
        while let Some(pairs) = rx.recv().await {
            all.extend(pairs);
        }

        let mut names = self.names.write().await;
        for (id, name) in all {
            names.insert(id, name);
        }
    }

    pub async fn len(&self) -> usize {
        self.names.read().await.len()
    }

    #[cfg(test)]
    pub async fn peek(&self, id: &str) -> Option<String> {
        self.names.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::client::{ApiError, ApiResult, CompartmentPage};

    fn comp(n: usize) -> Compartment {
        Compartment {
            id: format!("ocid1.compartment.oc1..c{n:04}"),
            name: format!("team-{n}"),
            lifecycle_state: "ACTIVE".to_string(),
        }
    }

    /// Identity fixture: serves a fixed compartment set, counts lookups,
    /// and can fail from a given page onward.
    struct FixtureIdentity {
        compartments: Vec<Compartment>,
        page_size: usize,
        fail_from_page: Option<usize>,
        lookup_calls: AtomicUsize,
        lookup_delay: Duration,
    }

    impl FixtureIdentity {
        fn new(compartments: Vec<Compartment>) -> Self {
            Self {
                compartments,
                page_size: 50,
                fail_from_page: None,
                lookup_calls: AtomicUsize::new(0),
                lookup_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl IdentityApi for FixtureIdentity {
        async fn list_compartments(
            &self,
            _tenancy_id: &str,
            cursor: Option<String>,
        ) -> ApiResult<CompartmentPage> {
            let page: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            if self.fail_from_page.is_some_and(|fail| page >= fail) {
                return Err(ApiError::Service("internal server error".to_string()));
            }
            let start = page * self.page_size;
            let items: Vec<Compartment> = self
                .compartments
                .iter()
                .skip(start)
                .take(self.page_size)
                .cloned()
                .collect();
            let next_cursor = (start + self.page_size < self.compartments.len())
                .then(|| (page + 1).to_string());
            Ok(CompartmentPage { items, next_cursor })
        }

        async fn get_compartment(&self, id: &str) -> ApiResult<Compartment> {
            self.lookup_calls.fetch_add(1, Ordering::SeqCst);
            if !self.lookup_delay.is_zero() {
                tokio::time::sleep(self.lookup_delay).await;
            }
            self.compartments
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| ApiError::Service("NotAuthorizedOrNotFound".to_string()))
        }

        async fn list_availability_domains(&self, _compartment_id: &str) -> ApiResult<Vec<String>> {
            Ok(vec!["AD-1".to_string()])
        }
    }

    #[tokio::test]
    async fn resolve_hits_cache_after_first_lookup() {
        let identity = Arc::new(FixtureIdentity::new(vec![comp(1)]));
        let cache = NameCache::new(identity.clone());

        let id = comp(1).id;
        assert_eq!(cache.resolve(&id).await, "team-1");
        assert_eq!(cache.resolve(&id).await, "team-1");
        assert_eq!(identity.lookup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_resolves_issue_at_most_one_remote_call() {
        let mut identity = FixtureIdentity::new(vec![comp(1)]);
        identity.lookup_delay = Duration::from_millis(20);
        let identity = Arc::new(identity);
        let cache = Arc::new(NameCache::new(identity.clone()));

        let id = comp(1).id;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let id = id.clone();
            handles.push(tokio::spawn(async move { cache.resolve(&id).await }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), "team-1");
        }
        assert_eq!(identity.lookup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_lookup_returns_short_form_and_is_not_cached() {
        let identity = Arc::new(FixtureIdentity::new(vec![]));
        let cache = NameCache::new(identity.clone());

        let id = "ocid1.compartment.oc1..zzzz11112222";
        assert_eq!(cache.resolve(id).await, "ocid1.compartment…112222");
        assert_eq!(cache.peek(id).await, None);

        // A later call tries the endpoint again.
        cache.resolve(id).await;
        assert_eq!(identity.lookup_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn preload_fills_small_tenancies_serially() {
        let comps: Vec<Compartment> = (0..10).map(comp).collect();
        let identity = Arc::new(FixtureIdentity::new(comps.clone()));
        let cache = NameCache::new(identity.clone());

        cache.preload("ocid1.tenancy.oc1..t").await;
        assert_eq!(cache.len().await, 10);
        assert_eq!(cache.resolve(&comps[3].id).await, "team-3");
        // Preload satisfied everything; no on-demand lookups happened.
        assert_eq!(identity.lookup_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn preload_batches_large_tenancies() {
        let comps: Vec<Compartment> = (0..450).map(comp).collect();
        let identity = Arc::new(FixtureIdentity::new(comps.clone()));
        let cache = NameCache::new(identity);

        cache.preload("ocid1.tenancy.oc1..t").await;
        assert_eq!(cache.len().await, 450);
        assert_eq!(cache.resolve(&comps[449].id).await, "team-449");
    }

    #[tokio::test]
    async fn preload_keeps_entries_from_before_a_partial_failure() {
        let comps: Vec<Compartment> = (0..120).map(comp).collect();
        let mut identity = FixtureIdentity::new(comps.clone());
        identity.fail_from_page = Some(1);
        let cache = NameCache::new(Arc::new(identity));

        cache.preload("ocid1.tenancy.oc1..t").await;
        // First page (50 entries) landed before the failure.
        assert_eq!(cache.len().await, 50);
        assert_eq!(cache.peek(&comps[0].id).await.as_deref(), Some("team-0"));
        assert_eq!(cache.peek(&comps[100].id).await, None);
    }

    #[tokio::test]
    async fn preload_skips_inactive_compartments() {
        let mut comps: Vec<Compartment> = (0..4).map(comp).collect();
        comps[2].lifecycle_state = "DELETED".to_string();
        let cache = NameCache::new(Arc::new(FixtureIdentity::new(comps.clone())));

        cache.preload("ocid1.tenancy.oc1..t").await;
        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.peek(&comps[2].id).await, None);
    }
}
