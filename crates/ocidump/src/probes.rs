//! The resource-type probe catalog and its pagination driver.
//!
//! A probe enumerates one resource type within one compartment. Most kinds
//! list directly against the compartment; file systems list once per
//! availability domain because the endpoint requires the domain parameter,
//! and a handful of database and function kinds list under a parent resource
//! discovered by a preliminary listing.

use std::collections::BTreeMap;
use std::sync::Arc;

use ocidump_retry::{Deadline, RetryError, RetryGovernor};
use tracing::debug;

use crate::cache::NameCache;
use crate::client::{Clients, DetailRequest, ListRequest, RawResource};
use crate::filter::FilterSet;
use crate::types::{ResourceRecord, ResourceType};

/// How a probe scopes its list calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeScope {
    /// One listing per compartment.
    Compartment,
    /// One listing per availability domain; the endpoint requires the
    /// domain parameter and it cannot be synthesized.
    AvailabilityDomain,
    /// One listing per surviving parent resource of the given kind.
    Parent(ResourceType),
}

/// Catalog entry: how to list one resource kind and what to enrich it with.
pub struct ProbeSpec {
    pub kind: ResourceType,
    pub scope: ProbeScope,
    /// `(payload key, emitted key)` pairs copied from the listing payload.
    pub copy_keys: &'static [(&'static str, &'static str)],
    /// Issue a best-effort detail call and merge its attributes.
    pub detail: bool,
}

/// The full probe registry, one entry per [`ResourceType`].
pub static CATALOG: &[ProbeSpec] = &[
    ProbeSpec {
        kind: ResourceType::ComputeInstance,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("shape", "shape"),
            ("availability_domain", "availability_domain"),
        ],
        detail: true,
    },
    ProbeSpec {
        kind: ResourceType::Vcn,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("cidr_block", "cidr_block"),
            ("cidr_blocks", "cidr_blocks"),
            ("dns_label", "dns_label"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::Subnet,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("cidr_block", "cidr_block"),
            ("availability_domain", "availability_domain"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::BlockVolume,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("size_in_gbs", "size_gb"),
            ("vpus_per_gb", "performance_tier"),
            ("availability_domain", "availability_domain"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::BootVolume,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("size_in_gbs", "size_gb"),
            ("vpus_per_gb", "performance_tier"),
            ("availability_domain", "availability_domain"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::BlockVolumeBackup,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("size_in_gbs", "size_gb"),
            ("volume_id", "volume_id"),
            ("type", "backup_type"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::BootVolumeBackup,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("size_in_gbs", "size_gb"),
            ("boot_volume_id", "boot_volume_id"),
            ("type", "backup_type"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::Bucket,
        scope: ProbeScope::Compartment,
        copy_keys: &[("namespace", "namespace"), ("storage_tier", "storage_tier")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::OkeCluster,
        scope: ProbeScope::Compartment,
        copy_keys: &[("kubernetes_version", "kubernetes_version")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::LoadBalancer,
        scope: ProbeScope::Compartment,
        copy_keys: &[("shape_name", "shape"), ("is_private", "is_private")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::NetworkLoadBalancer,
        scope: ProbeScope::Compartment,
        copy_keys: &[("is_private", "is_private")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::Drg,
        scope: ProbeScope::Compartment,
        copy_keys: &[],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::LocalPeeringGateway,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("peering_status", "peering_status"),
            ("peer_advertised_cidr", "peer_advertised_cidr"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::DbSystem,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("shape", "shape"),
            ("database_edition", "database_edition"),
            ("node_count", "node_count"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::AutonomousDatabase,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("db_workload", "db_workload"),
            ("cpu_core_count", "cpu_core_count"),
            ("data_storage_size_in_tbs", "storage_tb"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::VmCluster,
        scope: ProbeScope::Compartment,
        copy_keys: &[("shape", "shape"), ("cpus_enabled", "cpus_enabled")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::Database,
        scope: ProbeScope::Parent(ResourceType::VmCluster),
        copy_keys: &[("db_name", "db_name"), ("db_unique_name", "db_unique_name")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::DbHome,
        scope: ProbeScope::Parent(ResourceType::VmCluster),
        copy_keys: &[("db_version", "db_version")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::DbNode,
        scope: ProbeScope::Parent(ResourceType::DbSystem),
        copy_keys: &[("hostname", "hostname")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::ExadataInfrastructure,
        scope: ProbeScope::Compartment,
        copy_keys: &[("shape", "shape"), ("compute_count", "compute_count")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::CloudExadataInfrastructure,
        scope: ProbeScope::Compartment,
        copy_keys: &[("shape", "shape"), ("compute_count", "compute_count")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::FunctionApplication,
        scope: ProbeScope::Compartment,
        copy_keys: &[],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::Function,
        scope: ProbeScope::Parent(ResourceType::FunctionApplication),
        copy_keys: &[
            ("memory_in_mbs", "memory_mb"),
            ("timeout_in_seconds", "timeout_seconds"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::ApiGateway,
        scope: ProbeScope::Compartment,
        copy_keys: &[("endpoint_type", "endpoint_type"), ("hostname", "hostname")],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::FileSystem,
        scope: ProbeScope::AvailabilityDomain,
        copy_keys: &[
            ("metered_bytes", "metered_bytes"),
            ("availability_domain", "availability_domain"),
        ],
        detail: false,
    },
    ProbeSpec {
        kind: ResourceType::Stream,
        scope: ProbeScope::Compartment,
        copy_keys: &[
            ("partitions", "partitions"),
            ("retention_in_hours", "retention_hours"),
        ],
        detail: false,
    },
];

/// Look up the catalog entry for a kind.
pub fn spec_for(kind: ResourceType) -> &'static ProbeSpec {
    CATALOG
        .iter()
        .find(|s| s.kind == kind)
        .expect("catalog covers every resource type")
}

/// Lifecycle states a probe skips.
pub fn is_terminated(state: &str) -> bool {
    matches!(
        state.to_ascii_uppercase().as_str(),
        "TERMINATED" | "TERMINATING" | "DELETED" | "DELETING"
    )
}

/// Shared handles a probe runs with.
#[derive(Clone)]
pub struct ProbeContext {
    pub clients: Clients,
    pub cache: Arc<NameCache>,
    pub filters: Arc<FilterSet>,
    pub governor: RetryGovernor,
    pub deadline: Deadline,
}

/// A probe-level failure.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The global deadline fired; fatal for the whole run.
    #[error("deadline exceeded")]
    Deadline,
    /// A permanent (or retry-exhausted) failure; this probe contributes
    /// nothing, the run continues.
    #[error("{0}")]
    Api(String),
}

impl From<RetryError<crate::client::ApiError>> for ProbeError {
    fn from(err: RetryError<crate::client::ApiError>) -> Self {
        match err {
            RetryError::DeadlineExceeded => ProbeError::Deadline,
            RetryError::Permanent(e) | RetryError::Exhausted(e) => ProbeError::Api(e.to_string()),
        }
    }
}

/// Enumerate one resource type within one compartment.
pub async fn run_probe(
    ctx: &ProbeContext,
    kind: ResourceType,
    compartment_id: &str,
) -> Result<Vec<ResourceRecord>, ProbeError> {
    let spec = spec_for(kind);

    match spec.scope {
        ProbeScope::Compartment => collect_listing(ctx, spec, compartment_id, None, None).await,
        ProbeScope::AvailabilityDomain => {
            let domains = match ctx
                .governor
                .run(ctx.deadline, |_| {
                    ctx.clients
                        .identity
                        .list_availability_domains(compartment_id)
                })
                .await
            {
                Ok(domains) => domains,
                Err(RetryError::DeadlineExceeded) => return Err(ProbeError::Deadline),
                Err(err) => {
                    debug!(
                        kind = %kind,
                        compartment = compartment_id,
                        error = %err,
                        "availability domain listing failed; skipping probe"
                    );
                    return Ok(Vec::new());
                }
            };

            let mut records = Vec::new();
            for domain in domains {
                match collect_listing(ctx, spec, compartment_id, Some(&domain), None).await {
                    Ok(mut batch) => records.append(&mut batch),
                    Err(ProbeError::Deadline) => return Err(ProbeError::Deadline),
                    Err(ProbeError::Api(msg)) => {
                        // One domain failing must not suppress the others.
                        debug!(
                            kind = %kind,
                            compartment = compartment_id,
                            domain = %domain,
                            error = %msg,
                            "availability domain listing failed"
                        );
                    }
                }
            }
            Ok(records)
        }
        ProbeScope::Parent(parent_kind) => {
            let parents = match list_raw(ctx, parent_kind, compartment_id, None, None).await {
                Ok(parents) => parents,
                Err(ProbeError::Deadline) => return Err(ProbeError::Deadline),
                Err(ProbeError::Api(msg)) => {
                    debug!(
                        kind = %kind,
                        parent = %parent_kind,
                        compartment = compartment_id,
                        error = %msg,
                        "parent listing failed; skipping probe"
                    );
                    return Ok(Vec::new());
                }
            };

            let mut records = Vec::new();
            for parent in parents {
                match collect_listing(ctx, spec, compartment_id, None, Some(&parent.id)).await {
                    Ok(mut batch) => records.append(&mut batch),
                    Err(ProbeError::Deadline) => return Err(ProbeError::Deadline),
                    Err(ProbeError::Api(msg)) => {
                        debug!(
                            kind = %kind,
                            parent_id = %parent.id,
                            error = %msg,
                            "dependent listing failed"
                        );
                    }
                }
            }
            Ok(records)
        }
    }
}

/// Drain one cursor chain into live raw items.
async fn list_raw(
    ctx: &ProbeContext,
    kind: ResourceType,
    compartment_id: &str,
    availability_domain: Option<&str>,
    parent_id: Option<&str>,
) -> Result<Vec<RawResource>, ProbeError> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let req = ListRequest {
            kind,
            compartment_id: compartment_id.to_string(),
            availability_domain: availability_domain.map(str::to_string),
            parent_id: parent_id.map(str::to_string),
            cursor: cursor.clone(),
        };
        let page = ctx
            .governor
            .run(ctx.deadline, |_| ctx.clients.resources.list(req.clone()))
            .await?;

        items.extend(
            page.items
                .into_iter()
                .filter(|item| !is_terminated(&item.lifecycle_state)),
        );
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }
}

/// Paginate one listing and build records from the surviving items.
async fn collect_listing(
    ctx: &ProbeContext,
    spec: &ProbeSpec,
    compartment_id: &str,
    availability_domain: Option<&str>,
    parent_id: Option<&str>,
) -> Result<Vec<ResourceRecord>, ProbeError> {
    let items = list_raw(
        ctx,
        spec.kind,
        compartment_id,
        availability_domain,
        parent_id,
    )
    .await?;

    let mut records = Vec::new();
    for item in items {
        // Stage-3 name filter runs before enrichment so a filtered-out
        // resource never incurs the detail call.
        if !ctx.filters.name_allowed(&item.display_name) {
            continue;
        }
        records.push(build_record(ctx, spec, compartment_id, item).await);
    }
    Ok(records)
}

/// The single record constructor: resolves the compartment name and applies
/// the catalog entry's enrichment.
async fn build_record(
    ctx: &ProbeContext,
    spec: &ProbeSpec,
    compartment_id: &str,
    item: RawResource,
) -> ResourceRecord {
    let compartment_name = ctx.cache.resolve(compartment_id).await;

    let mut additional_info = BTreeMap::new();
    for (src, dst) in spec.copy_keys {
        if let Some(value) = item.attributes.get(*src) {
            additional_info.insert((*dst).to_string(), value.clone());
        }
    }

    if spec.detail {
        let req = DetailRequest {
            kind: spec.kind,
            compartment_id: compartment_id.to_string(),
            resource_id: item.id.clone(),
        };
        match ctx.deadline.race(ctx.clients.resources.detail(req)).await {
            Ok(Ok(extra)) => additional_info.extend(extra),
            Ok(Err(err)) => {
                debug!(resource = %item.id, error = %err, "enrichment call failed");
            }
            Err(_) => {
                debug!(resource = %item.id, "enrichment call cut off by deadline");
            }
        }
    }

    ResourceRecord {
        resource_type: spec.kind,
        compartment_name,
        resource_name: item.display_name,
        ocid: item.id,
        compartment_id: compartment_id.to_string(),
        additional_info,
    }
}
