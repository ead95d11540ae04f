//! Cluster and failure-domain endpoints under `clusters/{cluster}`

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{authorize, failure, AccessValidator, RequestContext, Response, RestError, RestResult};
use crate::cluster::{ClusterData, ClusterResources, FailureDomain};
use crate::error::MetadataError;

pub struct ClustersResource {
    clusters: Arc<ClusterResources>,
    access: Arc<dyn AccessValidator>,
}

impl ClustersResource {
    pub fn new(clusters: Arc<ClusterResources>, access: Arc<dyn AccessValidator>) -> Self {
        Self { clusters, access }
    }

    fn require_super_user(&self, ctx: &RequestContext) -> Result<(), RestError> {
        authorize(ctx, self.access.validate_super_user(ctx.principal.as_deref()))
    }

    async fn require_cluster(&self, ctx: &RequestContext, cluster: &str) -> Result<(), RestError> {
        match self.clusters.cluster_exists_async(cluster).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RestError::new(404, "Cluster does not exist")),
            Err(e) => Err(failure(ctx, "check cluster", cluster, e)),
        }
    }

    /// `GET clusters`
    pub async fn list_clusters(&self, ctx: &RequestContext) -> RestResult<BTreeSet<String>> {
        self.clusters
            .list_async()
            .await
            .map(Response::ok)
            .map_err(|e| failure(ctx, "list clusters", "/clusters", e))
    }

    /// `GET clusters/{cluster}`
    pub async fn get_cluster(&self, ctx: &RequestContext, cluster: &str) -> RestResult<ClusterData> {
        match self.clusters.get_cluster_async(cluster).await {
            Ok(Some(data)) => Ok(Response::ok(data)),
            Ok(None) => Err(RestError::new(404, "Cluster does not exist")),
            Err(e) => Err(failure(ctx, "get cluster", cluster, e)),
        }
    }

    /// `PUT clusters/{cluster}`
    pub async fn create_cluster(&self, ctx: &RequestContext, cluster: &str, data: &ClusterData) -> RestResult<()> {
        self.require_super_user(ctx)?;
        match self.clusters.create_cluster_async(cluster, data).await {
            Ok(()) => Ok(Response::no_content(())),
            Err(MetadataError::AlreadyExists(_)) => Err(RestError::new(409, "Cluster already exists")),
            Err(e) => Err(failure(ctx, "create cluster", cluster, e)),
        }
    }

    /// `POST clusters/{cluster}`: replace the stored record
    pub async fn update_cluster(&self, ctx: &RequestContext, cluster: &str, data: &ClusterData) -> RestResult<()> {
        self.require_super_user(ctx)?;
        match self.clusters.update_cluster_async(cluster, |_| data.clone()).await {
            Ok(_) => Ok(Response::no_content(())),
            Err(MetadataError::NotFound(_)) => Err(RestError::new(404, "Cluster does not exist")),
            Err(e) => Err(failure(ctx, "update cluster", cluster, e)),
        }
    }

    /// `DELETE clusters/{cluster}`: refused while namespaces use the cluster;
    /// failure domains go with it.
    pub async fn delete_cluster(&self, ctx: &RequestContext, cluster: &str) -> RestResult<()> {
        self.require_super_user(ctx)?;
        self.require_cluster(ctx, cluster).await?;
        match self.clusters.is_cluster_used_async(cluster).await {
            Ok(false) => {}
            Ok(true) => return Err(RestError::new(409, "Cluster not empty")),
            Err(e) => return Err(failure(ctx, "delete cluster", cluster, e)),
        }

        self.clusters
            .failure_domains()
            .delete_failure_domains_async(cluster)
            .await
            .map_err(|e| failure(ctx, "delete failure domains", cluster, e))?;
        self.clusters
            .delete_cluster_async(cluster)
            .await
            .map(Response::no_content)
            .map_err(|e| failure(ctx, "delete cluster", cluster, e))
    }

    /// `GET clusters/{cluster}/failureDomains`
    pub async fn get_failure_domains(
        &self,
        ctx: &RequestContext,
        cluster: &str,
    ) -> RestResult<BTreeMap<String, FailureDomain>> {
        self.require_cluster(ctx, cluster).await?;
        let domains = self.clusters.failure_domains();
        let names = domains
            .list_failure_domains_async(cluster)
            .await
            .map_err(|e| failure(ctx, "list failure domains", cluster, e))?;

        let mut found = BTreeMap::new();
        for name in names {
            match domains.get_failure_domain_async(cluster, &name).await {
                Ok(Some(domain)) => {
                    found.insert(name, domain);
                }
                // Deleted between the listing and the read.
                Ok(None) => {}
                Err(e) => return Err(failure(ctx, "get failure domain", cluster, e)),
            }
        }
        Ok(Response::ok(found))
    }

    /// `GET clusters/{cluster}/failureDomains/{domain}`
    pub async fn get_failure_domain(
        &self,
        ctx: &RequestContext,
        cluster: &str,
        domain: &str,
    ) -> RestResult<FailureDomain> {
        self.require_cluster(ctx, cluster).await?;
        match self.clusters.failure_domains().get_failure_domain_async(cluster, domain).await {
            Ok(Some(found)) => Ok(Response::ok(found)),
            Ok(None) => Err(RestError::new(404, "Domain does not exist")),
            Err(e) => Err(failure(ctx, "get failure domain", cluster, e)),
        }
    }

    /// `POST clusters/{cluster}/failureDomains/{domain}`: create or replace.
    ///
    /// A broker may belong to at most one domain per cluster.
    pub async fn set_failure_domain(
        &self,
        ctx: &RequestContext,
        cluster: &str,
        domain: &str,
        data: &FailureDomain,
    ) -> RestResult<()> {
        self.require_super_user(ctx)?;
        self.require_cluster(ctx, cluster).await?;
        let domains = self.clusters.failure_domains();

        let taken = domains
            .brokers_in_other_domains_async(cluster, domain, &data.brokers)
            .await
            .map_err(|e| failure(ctx, "set failure domain", cluster, e))?;
        if let Some((broker, other)) = taken.iter().next() {
            return Err(RestError::new(
                409,
                format!("Broker {broker} already exists in failure domain {other}"),
            ));
        }

        domains
            .set_failure_domain_with_create_async(cluster, domain, |_| data.clone())
            .await
            .map(|_| Response::no_content(()))
            .map_err(|e| failure(ctx, "set failure domain", cluster, e))
    }

    /// `DELETE clusters/{cluster}/failureDomains/{domain}`
    pub async fn delete_failure_domain(&self, ctx: &RequestContext, cluster: &str, domain: &str) -> RestResult<()> {
        self.require_super_user(ctx)?;
        self.require_cluster(ctx, cluster).await?;
        match self.clusters.failure_domains().delete_failure_domain_async(cluster, domain).await {
            Ok(()) => Ok(Response::no_content(())),
            Err(MetadataError::NotFound(_)) => Err(RestError::new(404, "Domain does not exist")),
            Err(e) => Err(failure(ctx, "delete failure domain", cluster, e)),
        }
    }
}
