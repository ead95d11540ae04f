//! Everything a broker needs, wired from one configuration

use std::sync::Arc;

use tracing::info;

use crate::admin::{AccessValidator, ClustersResource, SchemasResource};
use crate::cluster::ClusterResources;
use crate::config::MetadataConfig;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::schema::SchemaRegistry;
use crate::store::MetadataStore;

pub struct MetadataResources {
    config: MetadataConfig,
    store: Arc<dyn MetadataStore>,
    pool: Arc<WorkerPool>,
    clusters: Arc<ClusterResources>,
    schemas: Arc<SchemaRegistry>,
}

impl MetadataResources {
    pub fn new(config: MetadataConfig, store: Arc<dyn MetadataStore>) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(&config.workers, &config.store)?);
        let retries = config.store.max_conflict_retries;
        let clusters = Arc::new(ClusterResources::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            retries,
        ));
        let schemas = Arc::new(SchemaRegistry::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            retries,
            config.schema.default_compatibility_strategy,
        ));
        info!(
            threads = config.workers.threads,
            retries,
            default_strategy = %schemas.default_strategy(),
            "metadata resources ready"
        );
        Ok(Self {
            config,
            store,
            pool,
            clusters,
            schemas,
        })
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn clusters(&self) -> &Arc<ClusterResources> {
        &self.clusters
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn clusters_admin(&self, access: Arc<dyn AccessValidator>) -> ClustersResource {
        ClustersResource::new(Arc::clone(&self.clusters), access)
    }

    pub fn schemas_admin(&self, access: Arc<dyn AccessValidator>) -> SchemasResource {
        SchemasResource::new(Arc::clone(&self.schemas), access)
    }
}
