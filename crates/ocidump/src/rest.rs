//! REST bindings for the hosted OCI endpoints.
//!
//! This is the default adapter behind the [`crate::client`] seam: plain
//! HTTPS list calls with `page` cursors and `opc-next-page` continuation
//! headers, authenticated with a delegated security token. Region and
//! tenancy come from the environment when set and from the instance
//! metadata service otherwise (the instance-principal path).
//!
//! Payload handling is deliberately generic: scalar fields of each returned
//! item are harvested into the attribute map under snake_case keys, and the
//! probe catalog picks the ones it emits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::{
    ApiError, ApiResult, Clients, CompartmentPage, CredentialProvider, DetailRequest, IdentityApi,
    ListPage, ListRequest, Principal, RawResource, ResourceApi,
};
use crate::types::{Compartment, ResourceType};

/// Security token consumed as the bearer credential.
pub const TOKEN_ENV_VAR: &str = "OCI_DUMP_SECURITY_TOKEN";
/// Region override; skips the metadata service.
pub const REGION_ENV_VAR: &str = "OCI_DUMP_REGION";
/// Tenancy override; skips the metadata service.
pub const TENANCY_ENV_VAR: &str = "OCI_DUMP_TENANCY";

/// Instance metadata service, v2.
const IMDS_INSTANCE_URL: &str = "http://169.254.169.254/opc/v2/instance/";

const PAGE_LIMIT: u32 = 100;
const NEXT_PAGE_HEADER: &str = "opc-next-page";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved connection parameters, bootstrapped once per run.
#[derive(Debug, Clone)]
struct Session {
    region: String,
    tenancy_id: String,
    token: String,
}

/// One adapter implements all three client traits; [`Clients::from_env`]
/// style construction happens through [`connect`].
pub struct RestAdapter {
    http: reqwest::Client,
    session: OnceCell<Session>,
}

/// Build the full client bundle backed by one shared adapter.
pub fn connect() -> ApiResult<Clients> {
    let adapter = Arc::new(RestAdapter::new()?);
    Ok(Clients {
        credentials: adapter.clone(),
        identity: adapter.clone(),
        resources: adapter,
    })
}

impl RestAdapter {
    pub fn new() -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Service(e.to_string()))?;
        Ok(Self {
            http,
            session: OnceCell::new(),
        })
    }

    async fn session(&self) -> ApiResult<&Session> {
        self.session
            .get_or_try_init(|| async {
                let token = std::env::var(TOKEN_ENV_VAR).map_err(|_| {
                    ApiError::Credential(format!(
                        "no security token: set {TOKEN_ENV_VAR} to a delegated session token"
                    ))
                })?;

                let region = std::env::var(REGION_ENV_VAR).ok();
                let tenancy = std::env::var(TENANCY_ENV_VAR).ok();
                let (region, tenancy_id) = match (region, tenancy) {
                    (Some(region), Some(tenancy)) => (region, tenancy),
                    (region, tenancy) => {
                        let metadata = self.fetch_instance_metadata().await?;
                        (
                            region.unwrap_or(metadata.0),
                            tenancy.unwrap_or(metadata.1),
                        )
                    }
                };

                debug!(region = %region, "session bootstrapped");
                Ok(Session {
                    region,
                    tenancy_id,
                    token,
                })
            })
            .await
    }

    /// `(region, tenancy)` from the metadata service.
    async fn fetch_instance_metadata(&self) -> ApiResult<(String, String)> {
        let response = self
            .http
            .get(IMDS_INSTANCE_URL)
            .header(header::AUTHORIZATION, "Bearer Oracle")
            .send()
            .await
            .map_err(|e| {
                ApiError::Credential(format!("instance metadata service unreachable: {e}"))
            })?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Credential(format!("malformed instance metadata: {e}")))?;

        let region = body
            .get("canonicalRegionName")
            .or_else(|| body.get("region"))
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Credential("instance metadata lacks a region".to_string()))?
            .to_string();
        let tenancy = body
            .get("tenantId")
            .or_else(|| body.get("compartmentId"))
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Credential("instance metadata lacks a tenancy".to_string()))?
            .to_string();
        Ok((region, tenancy))
    }

    async fn get_json(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> ApiResult<(Value, Option<String>)> {
        let session = self.session().await?;
        let response = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(&session.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Service(e.to_string()))?;

        let next = response
            .headers()
            .get(NEXT_PAGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(ApiError::Service(format!("HTTP {status}: {snippet}")));
        }

        let body = response
            .json()
            .await
            .map_err(|e| ApiError::Service(format!("malformed response from {url}: {e}")))?;
        Ok((body, next))
    }

    async fn identity_url(&self, path: &str) -> ApiResult<String> {
        let session = self.session().await?;
        Ok(format!(
            "https://identity.{}.oraclecloud.com{path}",
            session.region
        ))
    }

    /// The object-storage namespace, fetched once.
    async fn namespace(&self) -> ApiResult<String> {
        let session = self.session().await?;
        let url = format!(
            "https://objectstorage.{}.oraclecloud.com/n/",
            session.region
        );
        let (body, _) = self.get_json(url, &[]).await?;
        body.as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Service("namespace endpoint returned non-string".to_string()))
    }
}

/// Host template and list path per kind, plus the query parameter a
/// dependent listing scopes its parent with.
struct Endpoint {
    host: &'static str,
    path: &'static str,
    parent_param: Option<&'static str>,
}

fn endpoint_for(kind: ResourceType) -> Endpoint {
    let (host, path, parent_param) = match kind {
        ResourceType::ComputeInstance => ("iaas", "/20160918/instances", None),
        ResourceType::Vcn => ("iaas", "/20160918/vcns", None),
        ResourceType::Subnet => ("iaas", "/20160918/subnets", None),
        ResourceType::BlockVolume => ("iaas", "/20160918/volumes", None),
        ResourceType::BootVolume => ("iaas", "/20160918/bootVolumes", None),
        ResourceType::BlockVolumeBackup => ("iaas", "/20160918/volumeBackups", None),
        ResourceType::BootVolumeBackup => ("iaas", "/20160918/bootVolumeBackups", None),
        // Buckets go through the namespace-scoped path; see `list`.
        ResourceType::Bucket => ("objectstorage", "/b", None),
        ResourceType::OkeCluster => ("containerengine", "/20180222/clusters", None),
        ResourceType::LoadBalancer => ("loadbalancer", "/20170115/loadBalancers", None),
        ResourceType::NetworkLoadBalancer => (
            "network-load-balancer-api",
            "/20200501/networkLoadBalancers",
            None,
        ),
        ResourceType::Drg => ("iaas", "/20160918/drgs", None),
        ResourceType::LocalPeeringGateway => ("iaas", "/20160918/localPeeringGateways", None),
        ResourceType::DbSystem => ("database", "/20160918/dbSystems", None),
        ResourceType::AutonomousDatabase => ("database", "/20160918/autonomousDatabases", None),
        ResourceType::VmCluster => ("database", "/20160918/vmClusters", None),
        ResourceType::Database => ("database", "/20160918/databases", Some("vmClusterId")),
        ResourceType::DbHome => ("database", "/20160918/dbHomes", Some("vmClusterId")),
        ResourceType::DbNode => ("database", "/20160918/dbNodes", Some("dbSystemId")),
        ResourceType::ExadataInfrastructure => {
            ("database", "/20160918/exadataInfrastructures", None)
        }
        ResourceType::CloudExadataInfrastructure => {
            ("database", "/20160918/cloudExadataInfrastructures", None)
        }
        ResourceType::FunctionApplication => ("functions", "/20181201/applications", None),
        ResourceType::Function => ("functions", "/20181201/functions", Some("applicationId")),
        ResourceType::ApiGateway => ("apigateway", "/20190501/gateways", None),
        ResourceType::FileSystem => ("filestorage", "/20171215/fileSystems", None),
        ResourceType::Stream => ("streaming", "/20180418/streams", None),
    };
    Endpoint {
        host,
        path,
        parent_param,
    }
}

#[async_trait]
impl CredentialProvider for RestAdapter {
    async fn acquire(&self) -> ApiResult<Principal> {
        let session = self.session().await?;
        Ok(Principal {
            tenancy_id: session.tenancy_id.clone(),
        })
    }
}

#[async_trait]
impl IdentityApi for RestAdapter {
    async fn list_compartments(
        &self,
        tenancy_id: &str,
        cursor: Option<String>,
    ) -> ApiResult<CompartmentPage> {
        let url = self.identity_url("/20160918/compartments").await?;
        let mut query = vec![
            ("compartmentId", tenancy_id.to_string()),
            ("compartmentIdInSubtree", "true".to_string()),
            ("accessLevel", "ANY".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("page", cursor));
        }

        let (body, next_cursor) = self.get_json(url, &query).await?;
        let items = item_array(&body)
            .iter()
            .filter_map(value_to_compartment)
            .collect();
        Ok(CompartmentPage { items, next_cursor })
    }

    async fn get_compartment(&self, id: &str) -> ApiResult<Compartment> {
        let url = self
            .identity_url(&format!("/20160918/compartments/{id}"))
            .await?;
        let (body, _) = self.get_json(url, &[]).await?;
        value_to_compartment(&body)
            .ok_or_else(|| ApiError::Service("malformed compartment payload".to_string()))
    }

    async fn list_availability_domains(&self, compartment_id: &str) -> ApiResult<Vec<String>> {
        let url = self.identity_url("/20160918/availabilityDomains/").await?;
        let query = [("compartmentId", compartment_id.to_string())];
        let (body, _) = self.get_json(url, &query).await?;
        Ok(item_array(&body)
            .iter()
            .filter_map(|v| v.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl ResourceApi for RestAdapter {
    async fn list(&self, req: ListRequest) -> ApiResult<ListPage> {
        let session = self.session().await?;
        let endpoint = endpoint_for(req.kind);

        let url = if req.kind == ResourceType::Bucket {
            let namespace = self.namespace().await?;
            format!(
                "https://objectstorage.{}.oraclecloud.com/n/{namespace}/b",
                session.region
            )
        } else {
            format!(
                "https://{}.{}.oraclecloud.com{}",
                endpoint.host, session.region, endpoint.path
            )
        };

        let mut query = vec![
            ("compartmentId", req.compartment_id.clone()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(domain) = &req.availability_domain {
            query.push(("availabilityDomain", domain.clone()));
        }
        if let (Some(param), Some(parent)) = (endpoint.parent_param, &req.parent_id) {
            query.push((param, parent.clone()));
        }
        if let Some(cursor) = req.cursor {
            query.push(("page", cursor));
        }

        let (body, next_cursor) = self.get_json(url, &query).await?;
        let items = item_array(&body).iter().filter_map(value_to_raw).collect();
        Ok(ListPage { items, next_cursor })
    }

    async fn detail(&self, req: DetailRequest) -> ApiResult<BTreeMap<String, String>> {
        if req.kind != ResourceType::ComputeInstance {
            return Ok(BTreeMap::new());
        }

        let session = self.session().await?;
        let base = format!("https://iaas.{}.oraclecloud.com", session.region);

        // Primary address lives on the instance's first VNIC.
        let attachments_url = format!("{base}/20160918/vnicAttachments");
        let query = [
            ("compartmentId", req.compartment_id.clone()),
            ("instanceId", req.resource_id.clone()),
        ];
        let (body, _) = self.get_json(attachments_url, &query).await?;
        let attachments = item_array(&body);
        let Some(vnic_id) = attachments
            .first()
            .and_then(|v| v.get("vnicId"))
            .and_then(Value::as_str)
        else {
            return Ok(BTreeMap::new());
        };

        let (vnic, _) = self
            .get_json(format!("{base}/20160918/vnics/{vnic_id}"), &[])
            .await?;
        let mut info = BTreeMap::new();
        if let Some(ip) = vnic.get("privateIp").and_then(Value::as_str) {
            info.insert("primary_ip".to_string(), ip.to_string());
        }
        if let Some(ip) = vnic.get("publicIp").and_then(Value::as_str) {
            info.insert("public_ip".to_string(), ip.to_string());
        }
        Ok(info)
    }
}

/// List payloads come as a bare array or wrapped in `items`/`data`.
fn item_array(body: &Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("items")
            .or_else(|| map.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn value_to_compartment(value: &Value) -> Option<Compartment> {
    Some(Compartment {
        id: value.get("id")?.as_str()?.to_string(),
        name: value
            .get("name")
            .or_else(|| value.get("displayName"))?
            .as_str()?
            .to_string(),
        lifecycle_state: value
            .get("lifecycleState")
            .and_then(Value::as_str)
            .unwrap_or("ACTIVE")
            .to_string(),
    })
}

/// Keys never harvested into the attribute map.
const SKIPPED_KEYS: [&str; 7] = [
    "id",
    "displayName",
    "name",
    "lifecycleState",
    "definedTags",
    "freeformTags",
    "systemTags",
];

fn value_to_raw(value: &Value) -> Option<RawResource> {
    let obj = value.as_object()?;
    let id = obj.get("id")?.as_str()?.to_string();
    let display_name = ["displayName", "name", "dbName", "hostname"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or(&id)
        .to_string();
    let lifecycle_state = obj
        .get("lifecycleState")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let mut attributes = BTreeMap::new();
    for (key, value) in obj {
        if SKIPPED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(rendered) = scalar_to_string(value) {
            attributes.insert(camel_to_snake(key), rendered);
        }
    }

    Some(RawResource {
        id,
        display_name,
        lifecycle_state,
        attributes,
    })
}

/// Scalars pass through; arrays of scalars join with commas; nested
/// structures are dropped.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let scalars: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            (!scalars.is_empty() && scalars.len() == items.len()).then(|| scalars.join(","))
        }
        _ => None,
    }
}

/// `cidrBlock` -> `cidr_block`; acronym runs stay together, so
/// `sizeInGBs` -> `size_in_gbs`.
fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_upper = true;
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if !prev_upper {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_upper = true;
        } else {
            out.push(c);
            prev_upper = false;
        }
    }
    out
}
