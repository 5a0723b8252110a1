//! In-memory client fixtures for engine and probe tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::client::{
    ApiError, ApiResult, Clients, CompartmentPage, CredentialProvider, DetailRequest, IdentityApi,
    ListPage, ListRequest, Principal, RawResource, ResourceApi,
};
use crate::types::{Compartment, ResourceType};

pub const TENANCY: &str = "ocid1.tenancy.oc1..fixture";

pub fn compartment(tag: &str) -> Compartment {
    Compartment {
        id: format!("ocid1.compartment.oc1..{tag}"),
        name: format!("comp-{tag}"),
        lifecycle_state: "ACTIVE".to_string(),
    }
}

pub fn raw(kind: ResourceType, tag: &str, name: &str) -> RawResource {
    RawResource {
        id: format!("ocid1.{}.oc1..{tag}", kind.alias().trim_end_matches('s')),
        display_name: name.to_string(),
        lifecycle_state: "AVAILABLE".to_string(),
        attributes: BTreeMap::new(),
    }
}

/// Key addressing one mock listing: `(kind, compartment, ad-or-parent)`.
pub type ListKey = (ResourceType, String, Option<String>);

pub fn key(kind: ResourceType, compartment: &Compartment) -> ListKey {
    (kind, compartment.id.clone(), None)
}

pub fn scoped_key(kind: ResourceType, compartment: &Compartment, scope: &str) -> ListKey {
    (kind, compartment.id.clone(), Some(scope.to_string()))
}

pub struct MockCredentials {
    pub tenancy_id: String,
    pub fail: bool,
    pub hang: bool,
}

impl MockCredentials {
    pub fn ok() -> Self {
        Self {
            tenancy_id: TENANCY.to_string(),
            fail: false,
            hang: false,
        }
    }
}

#[async_trait]
impl CredentialProvider for MockCredentials {
    async fn acquire(&self) -> ApiResult<Principal> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(ApiError::Credential(
                "instance principal metadata unavailable".to_string(),
            ));
        }
        Ok(Principal {
            tenancy_id: self.tenancy_id.clone(),
        })
    }
}

#[derive(Default)]
pub struct MockIdentity {
    pub compartments: Vec<Compartment>,
    /// Availability domains per compartment id.
    pub ads: HashMap<String, Vec<String>>,
    /// Fail availability-domain listings with this diagnostic.
    pub fail_ads: Option<String>,
    pub get_calls: AtomicUsize,
    pub hang_listing: AtomicBool,
}

impl MockIdentity {
    pub fn with_compartments(compartments: Vec<Compartment>) -> Self {
        Self {
            compartments,
            ..Self::default()
        }
    }
}

#[async_trait]
impl IdentityApi for MockIdentity {
    async fn list_compartments(
        &self,
        _tenancy_id: &str,
        _cursor: Option<String>,
    ) -> ApiResult<CompartmentPage> {
        if self.hang_listing.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(CompartmentPage {
            items: self.compartments.clone(),
            next_cursor: None,
        })
    }

    async fn get_compartment(&self, id: &str) -> ApiResult<Compartment> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.compartments
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| ApiError::Service("NotAuthorizedOrNotFound".to_string()))
    }

    async fn list_availability_domains(&self, compartment_id: &str) -> ApiResult<Vec<String>> {
        if let Some(msg) = &self.fail_ads {
            return Err(ApiError::Service(msg.clone()));
        }
        Ok(self
            .ads
            .get(compartment_id)
            .cloned()
            .unwrap_or_else(|| vec!["AD-1".to_string()]))
    }
}

#[derive(Default)]
pub struct MockResources {
    pub items: HashMap<ListKey, Vec<RawResource>>,
    /// Page size; zero means everything on one page.
    pub page_size: usize,
    /// Listings that fail, keyed like `items`, with their diagnostic.
    pub fail: HashMap<ListKey, String>,
    /// Enrichment payloads per resource id.
    pub details: HashMap<String, BTreeMap<String, String>>,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

#[async_trait]
impl ResourceApi for MockResources {
    async fn list(&self, req: ListRequest) -> ApiResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let key: ListKey = (
            req.kind,
            req.compartment_id.clone(),
            req.availability_domain.clone().or(req.parent_id.clone()),
        );
        if let Some(msg) = self.fail.get(&key) {
            return Err(ApiError::Service(msg.clone()));
        }
        let all = self.items.get(&key).cloned().unwrap_or_default();
        if self.page_size == 0 || all.len() <= self.page_size {
            return Ok(ListPage {
                items: all,
                next_cursor: None,
            });
        }

        let start: usize = req.cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let items: Vec<RawResource> = all.iter().skip(start).take(self.page_size).cloned().collect();
        let next = start + self.page_size;
        Ok(ListPage {
            items,
            next_cursor: (next < all.len()).then(|| next.to_string()),
        })
    }

    async fn detail(&self, req: DetailRequest) -> ApiResult<BTreeMap<String, String>> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .get(&req.resource_id)
            .cloned()
            .ok_or_else(|| ApiError::Service("attachment not found".to_string()))
    }
}

pub fn clients(
    credentials: MockCredentials,
    identity: MockIdentity,
    resources: MockResources,
) -> (Clients, Arc<MockIdentity>, Arc<MockResources>) {
    let identity = Arc::new(identity);
    let resources = Arc::new(resources);
    let clients = Clients {
        credentials: Arc::new(credentials),
        identity: identity.clone(),
        resources: resources.clone(),
    };
    (clients, identity, resources)
}
