//! Domain types: the resource-type catalog, resource records, compartments,
//! and discovery snapshots.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known prefix every OCID carries (`ocid1.<type>.<realm>..<opaque>`).
pub const OCID_PREFIX: &str = "ocid1.";

/// The enumerated resource kinds the discovery engine can probe.
///
/// The variant order is the emission sort order, so it is kept stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    ComputeInstance,
    Vcn,
    Subnet,
    BlockVolume,
    BootVolume,
    BlockVolumeBackup,
    BootVolumeBackup,
    Bucket,
    OkeCluster,
    LoadBalancer,
    NetworkLoadBalancer,
    Drg,
    LocalPeeringGateway,
    DbSystem,
    AutonomousDatabase,
    VmCluster,
    Database,
    DbHome,
    DbNode,
    ExadataInfrastructure,
    CloudExadataInfrastructure,
    FunctionApplication,
    Function,
    ApiGateway,
    FileSystem,
    Stream,
}

impl ResourceType {
    pub const ALL: [ResourceType; 26] = [
        ResourceType::ComputeInstance,
        ResourceType::Vcn,
        ResourceType::Subnet,
        ResourceType::BlockVolume,
        ResourceType::BootVolume,
        ResourceType::BlockVolumeBackup,
        ResourceType::BootVolumeBackup,
        ResourceType::Bucket,
        ResourceType::OkeCluster,
        ResourceType::LoadBalancer,
        ResourceType::NetworkLoadBalancer,
        ResourceType::Drg,
        ResourceType::LocalPeeringGateway,
        ResourceType::DbSystem,
        ResourceType::AutonomousDatabase,
        ResourceType::VmCluster,
        ResourceType::Database,
        ResourceType::DbHome,
        ResourceType::DbNode,
        ResourceType::ExadataInfrastructure,
        ResourceType::CloudExadataInfrastructure,
        ResourceType::FunctionApplication,
        ResourceType::Function,
        ResourceType::ApiGateway,
        ResourceType::FileSystem,
        ResourceType::Stream,
    ];

    /// Canonical tag, e.g. `ComputeInstance`.
    pub fn canonical(&self) -> &'static str {
        match self {
            ResourceType::ComputeInstance => "ComputeInstance",
            ResourceType::Vcn => "Vcn",
            ResourceType::Subnet => "Subnet",
            ResourceType::BlockVolume => "BlockVolume",
            ResourceType::BootVolume => "BootVolume",
            ResourceType::BlockVolumeBackup => "BlockVolumeBackup",
            ResourceType::BootVolumeBackup => "BootVolumeBackup",
            ResourceType::Bucket => "Bucket",
            ResourceType::OkeCluster => "OkeCluster",
            ResourceType::LoadBalancer => "LoadBalancer",
            ResourceType::NetworkLoadBalancer => "NetworkLoadBalancer",
            ResourceType::Drg => "Drg",
            ResourceType::LocalPeeringGateway => "LocalPeeringGateway",
            ResourceType::DbSystem => "DbSystem",
            ResourceType::AutonomousDatabase => "AutonomousDatabase",
            ResourceType::VmCluster => "VmCluster",
            ResourceType::Database => "Database",
            ResourceType::DbHome => "DbHome",
            ResourceType::DbNode => "DbNode",
            ResourceType::ExadataInfrastructure => "ExadataInfrastructure",
            ResourceType::CloudExadataInfrastructure => "CloudExadataInfrastructure",
            ResourceType::FunctionApplication => "FunctionApplication",
            ResourceType::Function => "Function",
            ResourceType::ApiGateway => "ApiGateway",
            ResourceType::FileSystem => "FileSystem",
            ResourceType::Stream => "Stream",
        }
    }

    /// CLI-ergonomic alias, e.g. `compute_instances`.
    pub fn alias(&self) -> &'static str {
        match self {
            ResourceType::ComputeInstance => "compute_instances",
            ResourceType::Vcn => "vcns",
            ResourceType::Subnet => "subnets",
            ResourceType::BlockVolume => "block_volumes",
            ResourceType::BootVolume => "boot_volumes",
            ResourceType::BlockVolumeBackup => "block_volume_backups",
            ResourceType::BootVolumeBackup => "boot_volume_backups",
            ResourceType::Bucket => "buckets",
            ResourceType::OkeCluster => "oke_clusters",
            ResourceType::LoadBalancer => "load_balancers",
            ResourceType::NetworkLoadBalancer => "network_load_balancers",
            ResourceType::Drg => "drgs",
            ResourceType::LocalPeeringGateway => "local_peering_gateways",
            ResourceType::DbSystem => "db_systems",
            ResourceType::AutonomousDatabase => "autonomous_databases",
            ResourceType::VmCluster => "vm_clusters",
            ResourceType::Database => "databases",
            ResourceType::DbHome => "db_homes",
            ResourceType::DbNode => "db_nodes",
            ResourceType::ExadataInfrastructure => "exadata_infrastructures",
            ResourceType::CloudExadataInfrastructure => "cloud_exadata_infrastructures",
            ResourceType::FunctionApplication => "function_applications",
            ResourceType::Function => "functions",
            ResourceType::ApiGateway => "api_gateways",
            ResourceType::FileSystem => "file_systems",
            ResourceType::Stream => "streams",
        }
    }

    /// Parse a canonical tag (`ComputeInstance`), an alias
    /// (`compute_instances`), or the singular snake form
    /// (`compute_instance`). Matching is case-insensitive.
    pub fn parse(s: &str) -> Option<ResourceType> {
        let lower = s.trim().to_ascii_lowercase();
        ResourceType::ALL.into_iter().find(|t| {
            let alias = t.alias();
            lower == t.canonical().to_ascii_lowercase()
                || lower == alias
                || Some(lower.as_str()) == alias.strip_suffix('s')
        })
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

/// One discovered resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_type: ResourceType,
    /// Resolved display name of the owning compartment; falls back to the
    /// short form of the compartment OCID when resolution failed.
    pub compartment_name: String,
    pub resource_name: String,
    pub ocid: String,
    pub compartment_id: String,
    /// Type-specific attributes, best-effort (e.g. shape, primary_ip).
    #[serde(default)]
    pub additional_info: BTreeMap<String, String>,
}

/// An organizational container for resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compartment {
    pub id: String,
    pub name: String,
    pub lifecycle_state: String,
}

impl Compartment {
    /// Only compartments in an active state are processed.
    pub fn is_active(&self) -> bool {
        self.lifecycle_state.eq_ignore_ascii_case("ACTIVE")
    }
}

/// The full, ordered output of one discovery run.
///
/// Order carries no meaning but is stable — records sort by
/// `(resource_type, ocid)` so diffs over two snapshots are deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub resources: Vec<ResourceRecord>,
}

impl Snapshot {
    pub fn new(mut resources: Vec<ResourceRecord>) -> Self {
        sort_records(&mut resources);
        Self {
            generated_at: Utc::now(),
            resources,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Sort records by `(resource_type, ocid)`.
pub fn sort_records(records: &mut [ResourceRecord]) {
    records.sort_by(|a, b| {
        a.resource_type
            .cmp(&b.resource_type)
            .then_with(|| a.ocid.cmp(&b.ocid))
    });
}

/// Whether `s` looks like an OCID: the `ocid1.` prefix plus the dotted
/// `<type>.<realm>..<opaque>` structure.
pub fn is_ocid(s: &str) -> bool {
    if !s.starts_with(OCID_PREFIX) {
        return false;
    }
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() >= 5
        && !parts[1].is_empty()
        && !parts[2].is_empty()
        && parts.last().is_some_and(|p| !p.is_empty())
}

/// Short display form of an OCID: `ocid1.<type>…<last 6 chars>`.
/// Inputs that do not shorten cleanly are returned unchanged.
pub fn short_ocid(id: &str) -> String {
    if !id.is_ascii() {
        return id.to_string();
    }
    let Some(first) = id.find('.') else {
        return id.to_string();
    };
    let Some(second) = id[first + 1..].find('.').map(|i| first + 1 + i) else {
        return id.to_string();
    };
    if id.len() <= second + 7 {
        return id.to_string();
    }
    format!("{}…{}", &id[..second], &id[id.len() - 6..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ResourceType, ocid: &str) -> ResourceRecord {
        ResourceRecord {
            resource_type: kind,
            compartment_name: "prod".to_string(),
            resource_name: format!("r-{ocid}"),
            ocid: ocid.to_string(),
            compartment_id: "ocid1.compartment.oc1..c1".to_string(),
            additional_info: BTreeMap::new(),
        }
    }

    #[test]
    fn parse_accepts_canonical_alias_and_singular() {
        assert_eq!(
            ResourceType::parse("ComputeInstance"),
            Some(ResourceType::ComputeInstance)
        );
        assert_eq!(
            ResourceType::parse("compute_instances"),
            Some(ResourceType::ComputeInstance)
        );
        assert_eq!(
            ResourceType::parse("compute_instance"),
            Some(ResourceType::ComputeInstance)
        );
        assert_eq!(ResourceType::parse("VCNs"), Some(ResourceType::Vcn));
        assert_eq!(ResourceType::parse("db_systems"), Some(ResourceType::DbSystem));
        assert_eq!(ResourceType::parse("nope"), None);
        assert_eq!(ResourceType::parse(""), None);
    }

    #[test]
    fn every_type_round_trips_through_parse() {
        for t in ResourceType::ALL {
            assert_eq!(ResourceType::parse(t.canonical()), Some(t));
            assert_eq!(ResourceType::parse(t.alias()), Some(t));
        }
    }

    #[test]
    fn resource_type_serializes_snake_case() {
        let json = serde_json::to_string(&ResourceType::ComputeInstance).unwrap();
        assert_eq!(json, "\"compute_instance\"");
        let back: ResourceType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ResourceType::ComputeInstance);
    }

    #[test]
    fn compartment_active_check_ignores_case() {
        let c = Compartment {
            id: "ocid1.compartment.oc1..x".to_string(),
            name: "x".to_string(),
            lifecycle_state: "Active".to_string(),
        };
        assert!(c.is_active());

        let deleted = Compartment {
            lifecycle_state: "DELETED".to_string(),
            ..c
        };
        assert!(!deleted.is_active());
    }

    #[test]
    fn snapshot_sorts_by_type_then_ocid() {
        let snap = Snapshot::new(vec![
            record(ResourceType::Subnet, "ocid1.subnet.oc1..b"),
            record(ResourceType::ComputeInstance, "ocid1.instance.oc1..z"),
            record(ResourceType::Subnet, "ocid1.subnet.oc1..a"),
            record(ResourceType::ComputeInstance, "ocid1.instance.oc1..a"),
        ]);

        let keys: Vec<(ResourceType, &str)> = snap
            .resources
            .iter()
            .map(|r| (r.resource_type, r.ocid.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (ResourceType::ComputeInstance, "ocid1.instance.oc1..a"),
                (ResourceType::ComputeInstance, "ocid1.instance.oc1..z"),
                (ResourceType::Subnet, "ocid1.subnet.oc1..a"),
                (ResourceType::Subnet, "ocid1.subnet.oc1..b"),
            ]
        );
    }

    #[test]
    fn record_json_round_trip() {
        let mut rec = record(ResourceType::BlockVolume, "ocid1.volume.oc1..v1");
        rec.additional_info
            .insert("size_gb".to_string(), "100".to_string());

        let json = serde_json::to_string(&rec).unwrap();
        let back: ResourceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn ocid_validation() {
        assert!(is_ocid("ocid1.compartment.oc1..aaaabbbb"));
        assert!(is_ocid("ocid1.instance.oc1.iad.anuwcljt"));
        assert!(!is_ocid("ocid2.compartment.oc1..aaaabbbb"));
        assert!(!is_ocid("compartment-one"));
        assert!(!is_ocid("ocid1.compartment"));
        assert!(!is_ocid("ocid1..oc1..aaaabbbb"));
    }

    #[test]
    fn short_ocid_keeps_prefix_and_tail() {
        assert_eq!(
            short_ocid("ocid1.compartment.oc1..aaaa111122223333"),
            "ocid1.compartment…223333"
        );
        assert_eq!(short_ocid("tiny"), "tiny");
        assert_eq!(short_ocid("ocid1.c"), "ocid1.c");
    }
}
