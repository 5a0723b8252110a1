//! The discovery engine: concurrent, bounded, filtered traversal of
//! (compartment x resource-type) pairs under a single global deadline.
//!
//! Each surviving compartment becomes one task gated by a semaphore slot;
//! inside the slot the enabled probes run sequentially, every list call
//! governed by retries and raced against the deadline. Results land in one
//! shared snapshot under a mutex held only for the append.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ocidump_progress::ProgressTracker;
use ocidump_retry::{Deadline, RetryConfig, RetryError, RetryGovernor};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::NameCache;
use crate::client::{ApiError, Clients, race_detached};
use crate::config::EffectiveConfig;
use crate::filter::FilterSet;
use crate::probes::{ProbeContext, ProbeError, run_probe};
use crate::types::{Compartment, ResourceRecord, Snapshot};

/// A fatal discovery failure.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The provider's diagnostic already names the failure.
    #[error("{0}")]
    Credential(String),
    #[error("compartment enumeration failed: {0}")]
    Identity(String),
    /// The global deadline fired. Whatever was accumulated up to that point
    /// rides along; the caller may keep or discard it.
    #[error("discovery deadline exceeded")]
    Deadline { partial: Snapshot },
}

/// Run a full discovery pass and assemble the snapshot.
pub async fn discover(
    clients: &Clients,
    config: &EffectiveConfig,
    filters: &FilterSet,
    tracker: &ProgressTracker,
) -> Result<Snapshot, DiscoveryError> {
    let deadline = Deadline::after(config.timeout);
    let governor = RetryGovernor::new(RetryConfig {
        max_retries: config.max_retries,
        ..RetryConfig::default()
    });
    debug!(
        timeout = %humantime::format_duration(config.timeout),
        workers = config.max_workers,
        "starting discovery"
    );

    // Preflight: the credential provider may block internally well past the
    // deadline, so it runs detached and is raced rather than awaited.
    let credentials = Arc::clone(&clients.credentials);
    let principal = match race_detached(deadline, async move { credentials.acquire().await }).await
    {
        Ok(Ok(principal)) => principal,
        Ok(Err(err)) => return Err(DiscoveryError::Credential(err.to_string())),
        Err(_) => {
            return Err(DiscoveryError::Deadline {
                partial: Snapshot::new(Vec::new()),
            });
        }
    };
    debug!(tenancy = %principal.tenancy_id, "credential acquired");

    let compartments =
        match enumerate_compartments(clients, &governor, deadline, &principal.tenancy_id).await {
            Ok(compartments) => compartments,
            Err(RetryError::DeadlineExceeded) => {
                return Err(DiscoveryError::Deadline {
                    partial: Snapshot::new(Vec::new()),
                });
            }
            Err(err) => return Err(DiscoveryError::Identity(err.to_string())),
        };

    // Stage-1 filter, plus the active-state gate.
    let survivors: Vec<Compartment> = compartments
        .into_iter()
        .filter(|c| c.is_active() && filters.compartment_allowed(&c.id))
        .collect();
    info!(compartments = survivors.len(), "compartments selected");

    let cache = Arc::new(NameCache::new(Arc::clone(&clients.identity)));
    if deadline.race(cache.preload(&principal.tenancy_id)).await.is_err() {
        return Err(DiscoveryError::Deadline {
            partial: Snapshot::new(Vec::new()),
        });
    }

    // Fan out: one task per compartment, capacity-bounded.
    let enabled = filters.enabled_types();
    tracker.set_total((survivors.len() * enabled.len()) as u64);

    let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let collected: Arc<Mutex<Vec<ResourceRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let degraded: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let deadline_hit = Arc::new(AtomicBool::new(false));

    let ctx = ProbeContext {
        clients: clients.clone(),
        cache,
        filters: Arc::new(filters.clone()),
        governor,
        deadline,
    };

    let mut tasks = JoinSet::new();
    for compartment in survivors {
        let ctx = ctx.clone();
        let enabled = enabled.clone();
        let semaphore = Arc::clone(&semaphore);
        let collected = Arc::clone(&collected);
        let degraded = Arc::clone(&degraded);
        let deadline_hit = Arc::clone(&deadline_hit);
        let tracker = tracker.clone();

        tasks.spawn(async move {
            let Ok(_slot) = semaphore.acquire_owned().await else {
                return;
            };

            for kind in enabled {
                if deadline_hit.load(Ordering::SeqCst) {
                    return;
                }
                match run_probe(&ctx, kind, &compartment.id).await {
                    Ok(records) => {
                        if !records.is_empty() {
                            collected.lock().await.extend(records);
                        }
                    }
                    Err(ProbeError::Deadline) => {
                        deadline_hit.store(true, Ordering::SeqCst);
                        return;
                    }
                    Err(ProbeError::Api(msg)) => {
                        error!(
                            kind = %kind,
                            compartment = %compartment.name,
                            error = %msg,
                            "probe failed"
                        );
                        degraded
                            .lock()
                            .await
                            .push(format!("{}/{}", compartment.name, kind.alias()));
                    }
                }
                tracker.tick(&compartment.name, kind.alias());
            }
        });
    }

    // Barrier: wait for every compartment slot to drain.
    while tasks.join_next().await.is_some() {}
    tracker.finish();

    let records = std::mem::take(&mut *collected.lock().await);

    if deadline_hit.load(Ordering::SeqCst) {
        warn!(partial = records.len(), "deadline fired during discovery");
        return Err(DiscoveryError::Deadline {
            partial: Snapshot::new(records),
        });
    }

    let degraded = std::mem::take(&mut *degraded.lock().await);
    if degraded.is_empty() {
        info!(resources = records.len(), "discovery complete");
    } else {
        warn!(
            resources = records.len(),
            degraded = %degraded.join(", "),
            "discovery complete with degraded probes"
        );
    }

    Ok(Snapshot::new(records))
}

/// Drain the tenancy's compartment pages through the retry governor.
async fn enumerate_compartments(
    clients: &Clients,
    governor: &RetryGovernor,
    deadline: Deadline,
    tenancy_id: &str,
) -> Result<Vec<Compartment>, RetryError<ApiError>> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = governor
            .run(deadline, |_| {
                clients.identity.list_compartments(tenancy_id, cursor.clone())
            })
            .await?;
        all.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(all),
        }
    }
}
