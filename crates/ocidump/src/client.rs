//! The abstract client seam over the remote cloud API.
//!
//! The engine never sees concrete SDK bindings: it talks to a credential
//! provider, one identity endpoint, and one cursor-paginated resource
//! endpoint, all behind object-safe traits so tests can substitute fixtures.
//! Every call made through these traits is raced against the run's global
//! [`Deadline`] by the caller; the traits themselves stay oblivious.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ocidump_retry::{Deadline, DeadlineExceeded};

use crate::types::{Compartment, ResourceType};

/// Remote-call failure surfaced by a client implementation.
///
/// The `Service` diagnostic string is what the retry governor classifies, so
/// implementations should pass the provider's message through unmodified.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("deadline exceeded")]
    Deadline(#[from] DeadlineExceeded),
    #[error("credential acquisition failed: {0}")]
    Credential(String),
    #[error("{0}")]
    Service(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// The identity the credential provider conveys.
#[derive(Debug, Clone)]
pub struct Principal {
    pub tenancy_id: String,
}

/// Credential acquisition from the host environment (instance principals).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> ApiResult<Principal>;
}

/// One item as returned by a list endpoint, before record construction.
#[derive(Debug, Clone)]
pub struct RawResource {
    pub id: String,
    pub display_name: String,
    pub lifecycle_state: String,
    /// Scalar payload fields, keyed snake_case.
    pub attributes: BTreeMap<String, String>,
}

/// One page of a cursor-paginated resource listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<RawResource>,
    /// Opaque cursor for the next page; absent on the last page.
    pub next_cursor: Option<String>,
}

/// One page of a compartment enumeration.
#[derive(Debug, Clone, Default)]
pub struct CompartmentPage {
    pub items: Vec<Compartment>,
    pub next_cursor: Option<String>,
}

/// Parameters of one resource list call.
///
/// One shape covers all probe scopes: plain per-compartment listings,
/// per-availability-domain listings (the endpoint requires the domain), and
/// dependent listings scoped to a parent resource.
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub kind: ResourceType,
    pub compartment_id: String,
    pub availability_domain: Option<String>,
    pub parent_id: Option<String>,
    pub cursor: Option<String>,
}

impl ListRequest {
    pub fn new(kind: ResourceType, compartment_id: impl Into<String>) -> Self {
        Self {
            kind,
            compartment_id: compartment_id.into(),
            availability_domain: None,
            parent_id: None,
            cursor: None,
        }
    }

    pub fn availability_domain(mut self, ad: impl Into<String>) -> Self {
        self.availability_domain = Some(ad.into());
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// Parameters of one best-effort enrichment call.
#[derive(Debug, Clone)]
pub struct DetailRequest {
    pub kind: ResourceType,
    pub compartment_id: String,
    pub resource_id: String,
}

/// The identity endpoint: compartments and availability domains.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// One page of the tenancy's compartment subtree.
    async fn list_compartments(
        &self,
        tenancy_id: &str,
        cursor: Option<String>,
    ) -> ApiResult<CompartmentPage>;

    async fn get_compartment(&self, id: &str) -> ApiResult<Compartment>;

    async fn list_availability_domains(&self, compartment_id: &str) -> ApiResult<Vec<String>>;
}

/// The resource endpoints: cursor-paginated listings plus detail fetches.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn list(&self, req: ListRequest) -> ApiResult<ListPage>;

    /// Supplementary attributes for one resource (e.g. the primary VNIC
    /// address of an instance). Failures here never abort a probe.
    async fn detail(&self, req: DetailRequest) -> ApiResult<BTreeMap<String, String>>;
}

/// The full set of handles the discovery engine runs against.
#[derive(Clone)]
pub struct Clients {
    pub credentials: Arc<dyn CredentialProvider>,
    pub identity: Arc<dyn IdentityApi>,
    pub resources: Arc<dyn ResourceApi>,
}

/// Race a spawned future against the deadline, unwinding without waiting for
/// it to return.
///
/// Used for opaque bootstrap calls (credential acquisition, client
/// construction) that may block internally well past the deadline; the
/// spawned task keeps running to completion in the background, but the
/// caller is released the moment the deadline fires.
pub async fn race_detached<T>(
    deadline: Deadline,
    fut: impl std::future::Future<Output = T> + Send + 'static,
) -> Result<T, DeadlineExceeded>
where
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);
    match deadline.race(handle).await {
        Ok(Ok(out)) => Ok(out),
        // The spawned task panicked or was aborted; surface it as a missed
        // deadline rather than unwinding the engine.
        Ok(Err(_)) => Err(DeadlineExceeded),
        Err(DeadlineExceeded) => Err(DeadlineExceeded),
    }
}
