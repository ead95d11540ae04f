//! Cluster registry
//!
//! Cluster records live under `/clusters/{name}`; each cluster keeps its
//! failure domains under `/clusters/{name}/failureDomain/{domain}`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MetadataError, Result};
use crate::notification::Notification;
use crate::path::{
    cluster_path, clusters_root, failure_domain_path, failure_domains_path,
    is_failure_domain_path, policies_root, tenant_cluster_path,
};
use crate::pool::WorkerPool;
use crate::resources::BaseResources;
use crate::store::MetadataStore;

/// Service endpoints and peers of one cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url_tls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_service_url_tls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_parameters: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub peer_cluster_names: BTreeSet<String>,
    /// Fields this crate does not interpret, kept as stored
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ClusterData {
    pub fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    pub fn with_broker_service_url(mut self, url: impl Into<String>) -> Self {
        self.broker_service_url = Some(url.into());
        self
    }
}

/// Brokers grouped into one failure domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDomain {
    #[serde(default)]
    pub brokers: BTreeSet<String>,
}

impl FailureDomain {
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
        }
    }
}

pub struct ClusterResources {
    resources: BaseResources<ClusterData>,
    failure_domains: FailureDomainResources,
}

impl ClusterResources {
    pub fn new(store: Arc<dyn MetadataStore>, pool: Arc<WorkerPool>, max_conflict_retries: u32) -> Self {
        Self {
            resources: BaseResources::new(Arc::clone(&store), Arc::clone(&pool), max_conflict_retries),
            failure_domains: FailureDomainResources::new(store, pool, max_conflict_retries),
        }
    }

    pub fn failure_domains(&self) -> &FailureDomainResources {
        &self.failure_domains
    }

    pub async fn list_async(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .resources
            .get_children_cached_async(&clusters_root())
            .await?
            .into_iter()
            .collect())
    }

    pub async fn get_cluster_async(&self, cluster: &str) -> Result<Option<ClusterData>> {
        self.resources.get_async(&cluster_path(cluster)?).await
    }

    pub async fn create_cluster_async(&self, cluster: &str, data: &ClusterData) -> Result<()> {
        self.resources.create_async(&cluster_path(cluster)?, data).await?;
        info!(cluster, "cluster created");
        Ok(())
    }

    pub async fn update_cluster_async<F>(&self, cluster: &str, modify: F) -> Result<ClusterData>
    where
        F: Fn(ClusterData) -> ClusterData + Send,
    {
        let updated = self.resources.set_async(&cluster_path(cluster)?, modify).await?;
        info!(cluster, "cluster updated");
        Ok(updated)
    }

    pub async fn delete_cluster_async(&self, cluster: &str) -> Result<()> {
        self.resources.delete_async(&cluster_path(cluster)?).await?;
        info!(cluster, "cluster deleted");
        Ok(())
    }

    /// Cache-bypassing existence check
    pub async fn cluster_exists_async(&self, cluster: &str) -> Result<bool> {
        self.resources.exists_async(&cluster_path(cluster)?).await
    }

    /// Whether any tenant has a namespace assigned to `cluster`.
    ///
    /// Tenants are checked concurrently; one failed check fails the query.
    pub async fn is_cluster_used_async(&self, cluster: &str) -> Result<bool> {
        let tenants = self
            .resources
            .get_children_cached_async(&policies_root())
            .await?;
        let checks = tenants.iter().map(|tenant| async move {
            let namespaces = self
                .resources
                .get_children_cached_async(&tenant_cluster_path(tenant, cluster)?)
                .await?;
            Ok::<_, MetadataError>(!namespaces.is_empty())
        });
        Ok(try_join_all(checks).await?.into_iter().any(|used| used))
    }

    pub async fn get_namespaces_for_cluster_async(&self, tenant: &str, cluster: &str) -> Result<Vec<String>> {
        self.resources
            .get_children_cached_async(&tenant_cluster_path(tenant, cluster)?)
            .await
    }

    pub fn list(&self) -> Result<BTreeSet<String>> {
        self.resources.pool().block_on(self.list_async())
    }

    pub fn get_cluster(&self, cluster: &str) -> Result<Option<ClusterData>> {
        self.resources.pool().block_on(self.get_cluster_async(cluster))
    }

    pub fn create_cluster(&self, cluster: &str, data: &ClusterData) -> Result<()> {
        self.resources.pool().block_on(self.create_cluster_async(cluster, data))
    }

    pub fn update_cluster<F>(&self, cluster: &str, modify: F) -> Result<ClusterData>
    where
        F: Fn(ClusterData) -> ClusterData + Send,
    {
        self.resources.pool().block_on(self.update_cluster_async(cluster, modify))
    }

    pub fn delete_cluster(&self, cluster: &str) -> Result<()> {
        self.resources.pool().block_on(self.delete_cluster_async(cluster))
    }

    pub fn cluster_exists(&self, cluster: &str) -> Result<bool> {
        self.resources.pool().block_on(self.cluster_exists_async(cluster))
    }

    pub fn is_cluster_used(&self, cluster: &str) -> Result<bool> {
        self.resources.pool().block_on(self.is_cluster_used_async(cluster))
    }

    pub fn get_namespaces_for_cluster(&self, tenant: &str, cluster: &str) -> Result<Vec<String>> {
        self.resources
            .pool()
            .block_on(self.get_namespaces_for_cluster_async(tenant, cluster))
    }
}

pub struct FailureDomainResources {
    resources: BaseResources<FailureDomain>,
}

impl FailureDomainResources {
    pub fn new(store: Arc<dyn MetadataStore>, pool: Arc<WorkerPool>, max_conflict_retries: u32) -> Self {
        Self {
            resources: BaseResources::new(store, pool, max_conflict_retries),
        }
    }

    pub async fn list_failure_domains_async(&self, cluster: &str) -> Result<Vec<String>> {
        self.resources
            .get_children_async(&failure_domains_path(cluster)?)
            .await
    }

    pub async fn get_failure_domain_async(&self, cluster: &str, domain: &str) -> Result<Option<FailureDomain>> {
        self.resources
            .get_async(&failure_domain_path(cluster, domain)?)
            .await
    }

    pub async fn set_failure_domain_with_create_async<F>(
        &self,
        cluster: &str,
        domain: &str,
        create_or_modify: F,
    ) -> Result<FailureDomain>
    where
        F: Fn(Option<FailureDomain>) -> FailureDomain + Send,
    {
        let stored = self
            .resources
            .set_with_create_async(&failure_domain_path(cluster, domain)?, create_or_modify)
            .await?;
        info!(cluster, domain, brokers = stored.brokers.len(), "failure domain stored");
        Ok(stored)
    }

    pub async fn delete_failure_domain_async(&self, cluster: &str, domain: &str) -> Result<()> {
        self.resources
            .delete_async(&failure_domain_path(cluster, domain)?)
            .await?;
        info!(cluster, domain, "failure domain deleted");
        Ok(())
    }

    /// Delete every failure domain of `cluster` and then the domain node itself.
    ///
    /// Children are deleted concurrently and independently. If any of them
    /// fails the first error is returned and the domain node is kept.
    pub async fn delete_failure_domains_async(&self, cluster: &str) -> Result<()> {
        let root = failure_domains_path(cluster)?;
        if !self.resources.exists_async(&root).await? {
            return Ok(());
        }

        let domains = self.resources.get_children_async(&root).await?;
        let deletes = domains.iter().map(|domain| {
            let root = &root;
            async move { self.resources.delete_async(&root.child(domain)?).await }
        });
        let failures: Vec<MetadataError> = join_all(deletes)
            .await
            .into_iter()
            .filter_map(|result| result.err())
            .collect();
        if let Some(first) = failures.into_iter().next() {
            warn!(cluster, error = %first, "failure domain cleanup incomplete");
            return Err(first);
        }

        self.resources.delete_async(&root).await?;
        info!(cluster, domains = domains.len(), "failure domains deleted");
        Ok(())
    }

    /// Invoke `listener` for changes to failure domains of any cluster
    pub fn register_listener<F>(&self, listener: F) -> Result<()>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let subscription = self
            .resources
            .subscribe()
            .filter(|n| is_failure_domain_path(&n.path));
        self.resources.listen(subscription, listener)
    }

    /// Brokers of `cluster` that already belong to a domain other than `domain`
    pub async fn brokers_in_other_domains_async(
        &self,
        cluster: &str,
        domain: &str,
        brokers: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut taken = BTreeMap::new();
        for other in self.list_failure_domains_async(cluster).await? {
            if other == domain {
                continue;
            }
            if let Some(existing) = self.get_failure_domain_async(cluster, &other).await? {
                let existing: HashSet<&String> = existing.brokers.iter().collect();
                for broker in brokers.iter().filter(|b| existing.contains(b)) {
                    taken.insert(broker.clone(), other.clone());
                }
            }
        }
        Ok(taken)
    }

    pub fn list_failure_domains(&self, cluster: &str) -> Result<Vec<String>> {
        self.resources
            .pool()
            .block_on(self.list_failure_domains_async(cluster))
    }

    pub fn get_failure_domain(&self, cluster: &str, domain: &str) -> Result<Option<FailureDomain>> {
        self.resources
            .pool()
            .block_on(self.get_failure_domain_async(cluster, domain))
    }

    pub fn set_failure_domain_with_create<F>(
        &self,
        cluster: &str,
        domain: &str,
        create_or_modify: F,
    ) -> Result<FailureDomain>
    where
        F: Fn(Option<FailureDomain>) -> FailureDomain + Send,
    {
        self.resources
            .pool()
            .block_on(self.set_failure_domain_with_create_async(cluster, domain, create_or_modify))
    }

    pub fn delete_failure_domain(&self, cluster: &str, domain: &str) -> Result<()> {
        self.resources
            .pool()
            .block_on(self.delete_failure_domain_async(cluster, domain))
    }

    pub fn delete_failure_domains(&self, cluster: &str) -> Result<()> {
        self.resources
            .pool()
            .block_on(self.delete_failure_domains_async(cluster))
    }
}
