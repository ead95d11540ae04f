//! Schema registry over the resource store

use std::sync::Arc;

use tracing::{debug, info};

use super::{
    CompatibilityCheckers, SchemaAndMetadata, SchemaCompatibilityCheck,
    SchemaCompatibilityStrategy, SchemaData, SchemaHistory, SchemaType, SchemaVersion,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{MetadataError, Result};
use crate::path::{schema_id_from_path, schema_path, schemas_root};
use crate::pool::WorkerPool;
use crate::resources::{BaseResources, Mutation};
use crate::store::MetadataStore;

/// Schema histories keyed by schema id (`tenant/namespace/topic`)
pub struct SchemaRegistry {
    resources: BaseResources<SchemaHistory>,
    checkers: CompatibilityCheckers,
    default_strategy: SchemaCompatibilityStrategy,
    clock: Arc<dyn Clock>,
}

fn not_found(schema_id: &str) -> MetadataError {
    MetadataError::NotFound(format!("schema {schema_id}"))
}

impl SchemaRegistry {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        pool: Arc<WorkerPool>,
        max_conflict_retries: u32,
        default_strategy: SchemaCompatibilityStrategy,
    ) -> Self {
        Self {
            resources: BaseResources::new(store, pool, max_conflict_retries),
            checkers: CompatibilityCheckers::default(),
            default_strategy: default_strategy.resolve(SchemaCompatibilityStrategy::Full),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_checkers(mut self, checkers: CompatibilityCheckers) -> Self {
        self.checkers = checkers;
        self
    }

    /// Use `check` for every schema of `schema_type`
    pub fn register_check(&mut self, schema_type: SchemaType, check: Arc<dyn SchemaCompatibilityCheck>) {
        self.checkers.register(schema_type, check);
    }

    pub fn default_strategy(&self) -> SchemaCompatibilityStrategy {
        self.default_strategy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn resources(&self) -> &BaseResources<SchemaHistory> {
        &self.resources
    }

    async fn history(&self, schema_id: &str) -> Result<SchemaHistory> {
        let path = schema_path(schema_id)?;
        Ok(self.resources.get_async(&path).await?.unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Async forms
    // -----------------------------------------------------------------------

    /// Latest version; `Deleted` if it is a delete marker
    pub async fn get_schema_async(&self, schema_id: &str) -> Result<SchemaAndMetadata> {
        let history = self.history(schema_id).await?;
        let latest = history.latest().ok_or_else(|| not_found(schema_id))?;
        if latest.is_deleted() {
            return Err(MetadataError::Deleted(schema_id.to_string()));
        }
        Ok(SchemaAndMetadata::from_stored(schema_id, latest))
    }

    pub async fn get_schema_version_async(
        &self,
        schema_id: &str,
        version: SchemaVersion,
    ) -> Result<SchemaAndMetadata> {
        let history = self.history(schema_id).await?;
        let stored = history.find_version(version).ok_or_else(|| {
            MetadataError::NotFound(format!("schema {schema_id} version {version}"))
        })?;
        if stored.is_deleted() {
            return Err(MetadataError::Deleted(format!("{schema_id} version {version}")));
        }
        Ok(SchemaAndMetadata::from_stored(schema_id, stored))
    }

    /// Full history, delete markers included
    pub async fn get_all_schemas_async(&self, schema_id: &str) -> Result<Vec<SchemaAndMetadata>> {
        let history = self.history(schema_id).await?;
        if history.is_empty() {
            return Err(not_found(schema_id));
        }
        Ok(history
            .versions
            .iter()
            .map(|stored| SchemaAndMetadata::from_stored(schema_id, stored))
            .collect())
    }

    /// History with delete markers at the end removed
    pub async fn trim_deleted_schema_and_get_list_async(
        &self,
        schema_id: &str,
    ) -> Result<Vec<SchemaAndMetadata>> {
        let history = self.history(schema_id).await?;
        if history.is_empty() {
            return Err(not_found(schema_id));
        }
        Ok(history
            .trimmed()
            .iter()
            .map(|stored| SchemaAndMetadata::from_stored(schema_id, stored))
            .collect())
    }

    /// Live version whose content equals `candidate`
    pub async fn find_schema_version_async(
        &self,
        schema_id: &str,
        candidate: &SchemaData,
    ) -> Result<Option<SchemaVersion>> {
        Ok(self.history(schema_id).await?.find_matching(candidate))
    }

    /// Register `candidate` unless an identical live version exists.
    ///
    /// Validation and the compatibility check run against the history read
    /// in the same attempt as the append, so a concurrent registration forces
    /// a fresh check.
    pub async fn put_schema_if_absent_async(
        &self,
        schema_id: &str,
        candidate: &SchemaData,
        strategy: SchemaCompatibilityStrategy,
    ) -> Result<SchemaVersion> {
        let path = schema_path(schema_id)?;
        let strategy = strategy.resolve(self.default_strategy);
        let mut candidate = candidate.clone();
        candidate.is_deleted = false;

        let (version, appended) = self
            .resources
            .mutate_async(&path, |current| {
                let mut history = current.unwrap_or_default();
                if let Some(existing) = history.find_matching(&candidate) {
                    return Ok(Mutation::Keep((existing, false)));
                }
                self.checkers.validate(&candidate)?;
                self.checkers
                    .evaluate(history.live_generation(), &candidate, strategy)?;
                let version = history.append(candidate.clone());
                Ok(Mutation::Put(history, (version, true)))
            })
            .await?;

        if appended {
            info!(schema_id, %version, schema_type = %candidate.schema_type, "registered schema version");
        } else {
            debug!(schema_id, %version, "schema already registered");
        }
        Ok(version)
    }

    /// Whether `candidate` would be accepted; nothing is written
    pub async fn is_compatible_async(
        &self,
        schema_id: &str,
        candidate: &SchemaData,
        strategy: SchemaCompatibilityStrategy,
    ) -> Result<bool> {
        let strategy = strategy.resolve(self.default_strategy);
        let history = self.history(schema_id).await?;
        if history.find_matching(candidate).is_some() {
            return Ok(true);
        }
        self.checkers.validate(candidate)?;
        match self
            .checkers
            .evaluate(history.live_generation(), candidate, strategy)
        {
            Ok(()) => Ok(true),
            Err(MetadataError::IncompatibleSchema(reason)) => {
                debug!(schema_id, %reason, "schema is not compatible");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Soft delete appends a delete marker and returns its version; deleting
    /// an already deleted schema returns the existing marker. Force delete
    /// drops the whole history but keeps the version counter, and returns
    /// `None`.
    pub async fn delete_schema_async(
        &self,
        schema_id: &str,
        user: &str,
        force: bool,
    ) -> Result<Option<SchemaVersion>> {
        let path = schema_path(schema_id)?;
        let timestamp = self.clock.now_millis();

        let deleted = self
            .resources
            .mutate_async(&path, |current| {
                let mut history = match current {
                    Some(history) if !history.is_empty() => history,
                    _ => return Err(not_found(schema_id)),
                };
                if force {
                    history.erase();
                    return Ok(Mutation::Put(history, None));
                }
                if let Some(latest) = history.latest().filter(|s| s.is_deleted()) {
                    return Ok(Mutation::Keep(Some(latest.version)));
                }
                let version = history.append(SchemaData::deletion_marker(user, timestamp));
                Ok(Mutation::Put(history, Some(version)))
            })
            .await?;

        match deleted {
            Some(version) => info!(schema_id, %version, user, "schema deleted"),
            None => info!(schema_id, user, "schema history erased"),
        }
        Ok(deleted)
    }

    /// Ids with at least one version
    pub async fn list_schema_ids_async(&self) -> Result<Vec<String>> {
        let root = schemas_root();
        let mut ids = Vec::new();
        for tenant in self.resources.get_children_async(&root).await? {
            let tenant_path = root.child(&tenant)?;
            for namespace in self.resources.get_children_async(&tenant_path).await? {
                let namespace_path = tenant_path.child(&namespace)?;
                for topic in self.resources.get_children_async(&namespace_path).await? {
                    let Some(id) = schema_id_from_path(&namespace_path.child(&topic)?) else {
                        continue;
                    };
                    if !self.history(&id).await?.is_empty() {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Blocking forms
    // -----------------------------------------------------------------------

    pub fn get_schema(&self, schema_id: &str) -> Result<SchemaAndMetadata> {
        self.resources.pool().block_on(self.get_schema_async(schema_id))
    }

    pub fn get_schema_version(&self, schema_id: &str, version: SchemaVersion) -> Result<SchemaAndMetadata> {
        self.resources
            .pool()
            .block_on(self.get_schema_version_async(schema_id, version))
    }

    pub fn get_all_schemas(&self, schema_id: &str) -> Result<Vec<SchemaAndMetadata>> {
        self.resources.pool().block_on(self.get_all_schemas_async(schema_id))
    }

    pub fn trim_deleted_schema_and_get_list(&self, schema_id: &str) -> Result<Vec<SchemaAndMetadata>> {
        self.resources
            .pool()
            .block_on(self.trim_deleted_schema_and_get_list_async(schema_id))
    }

    pub fn find_schema_version(&self, schema_id: &str, candidate: &SchemaData) -> Result<Option<SchemaVersion>> {
        self.resources
            .pool()
            .block_on(self.find_schema_version_async(schema_id, candidate))
    }

    pub fn put_schema_if_absent(
        &self,
        schema_id: &str,
        candidate: &SchemaData,
        strategy: SchemaCompatibilityStrategy,
    ) -> Result<SchemaVersion> {
        self.resources
            .pool()
            .block_on(self.put_schema_if_absent_async(schema_id, candidate, strategy))
    }

    pub fn is_compatible(
        &self,
        schema_id: &str,
        candidate: &SchemaData,
        strategy: SchemaCompatibilityStrategy,
    ) -> Result<bool> {
        self.resources
            .pool()
            .block_on(self.is_compatible_async(schema_id, candidate, strategy))
    }

    pub fn delete_schema(&self, schema_id: &str, user: &str, force: bool) -> Result<Option<SchemaVersion>> {
        self.resources
            .pool()
            .block_on(self.delete_schema_async(schema_id, user, force))
    }

    pub fn list_schema_ids(&self) -> Result<Vec<String>> {
        self.resources.pool().block_on(self.list_schema_ids_async())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryStore;

    const ID: &str = "acme/orders/checkout";
    const USER_V1: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;
    const USER_V2: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"string"}]}"#;

    fn registry() -> SchemaRegistry {
        let pool = Arc::new(WorkerPool::with_defaults().unwrap());
        SchemaRegistry::new(
            Arc::new(MemoryStore::new()),
            pool,
            8,
            SchemaCompatibilityStrategy::Full,
        )
        .with_clock(Arc::new(FixedClock(1_700_000_000_000)))
    }

    fn avro(body: &str) -> SchemaData {
        SchemaData::new(SchemaType::Avro, body.as_bytes()).with_user("alice")
    }

    #[test]
    fn test_put_is_idempotent() {
        let reg = registry();
        let strategy = SchemaCompatibilityStrategy::Full;
        assert_eq!(reg.put_schema_if_absent(ID, &avro(USER_V1), strategy).unwrap().value(), 0);
        assert_eq!(reg.put_schema_if_absent(ID, &avro(USER_V1), strategy).unwrap().value(), 0);
        assert_eq!(reg.get_all_schemas(ID).unwrap().len(), 1);
        assert_eq!(
            reg.find_schema_version(ID, &avro(USER_V1)).unwrap(),
            Some(SchemaVersion::new(0))
        );
        assert_eq!(reg.find_schema_version(ID, &avro(USER_V2)).unwrap(), None);
    }

    #[test]
    fn test_incompatible_and_invalid() {
        let reg = registry();
        reg.put_schema_if_absent(ID, &avro(USER_V1), SchemaCompatibilityStrategy::Full)
            .unwrap();

        let err = reg
            .put_schema_if_absent(ID, &avro(USER_V2), SchemaCompatibilityStrategy::Full)
            .unwrap_err();
        assert!(matches!(err, MetadataError::IncompatibleSchema(_)));
        assert!(!reg.is_compatible(ID, &avro(USER_V2), SchemaCompatibilityStrategy::Full).unwrap());
        assert!(reg
            .is_compatible(ID, &avro(USER_V2), SchemaCompatibilityStrategy::AlwaysCompatible)
            .unwrap());

        let err = reg
            .put_schema_if_absent(ID, &avro("{broken"), SchemaCompatibilityStrategy::AlwaysCompatible)
            .unwrap_err();
        assert!(matches!(err, MetadataError::InvalidSchemaData(_)));
        let err = reg
            .is_compatible(ID, &avro("{broken"), SchemaCompatibilityStrategy::Full)
            .unwrap_err();
        assert!(matches!(err, MetadataError::InvalidSchemaData(_)));

        assert_eq!(reg.get_all_schemas(ID).unwrap().len(), 1);
    }

    #[test]
    fn test_undefined_uses_default() {
        let pool = Arc::new(WorkerPool::with_defaults().unwrap());
        let reg = SchemaRegistry::new(
            Arc::new(MemoryStore::new()),
            pool,
            8,
            SchemaCompatibilityStrategy::AlwaysCompatible,
        );
        reg.put_schema_if_absent(ID, &avro(USER_V1), SchemaCompatibilityStrategy::Undefined)
            .unwrap();
        let version = reg
            .put_schema_if_absent(ID, &avro(USER_V2), SchemaCompatibilityStrategy::Undefined)
            .unwrap();
        assert_eq!(version.value(), 1);
    }

    #[test]
    fn test_soft_delete() {
        let reg = registry();
        reg.put_schema_if_absent(ID, &avro(USER_V1), SchemaCompatibilityStrategy::Full)
            .unwrap();

        let marker = reg.delete_schema(ID, "ops", false).unwrap();
        assert_eq!(marker, Some(SchemaVersion::new(1)));
        // Repeating returns the same marker.
        assert_eq!(reg.delete_schema(ID, "ops", false).unwrap(), marker);

        assert!(matches!(reg.get_schema(ID).unwrap_err(), MetadataError::Deleted(_)));
        let all = reg.get_all_schemas(ID).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[1].schema.is_deleted);
        assert_eq!(all[1].schema.user, "ops");
        assert_eq!(all[1].schema.timestamp, 1_700_000_000_000);
        assert_eq!(reg.trim_deleted_schema_and_get_list(ID).unwrap().len(), 1);

        // A new generation ignores what came before the marker.
        let version = reg
            .put_schema_if_absent(ID, &avro(USER_V2), SchemaCompatibilityStrategy::FullTransitive)
            .unwrap();
        assert_eq!(version.value(), 2);
        assert_eq!(reg.get_schema(ID).unwrap().version, version);
        assert_eq!(
            reg.get_schema_version(ID, SchemaVersion::new(0)).unwrap().schema.data,
            USER_V1.as_bytes()
        );
        assert!(matches!(
            reg.get_schema_version(ID, SchemaVersion::new(1)).unwrap_err(),
            MetadataError::Deleted(_)
        ));
        assert!(reg.get_schema_version(ID, SchemaVersion::new(9)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_force_delete() {
        let reg = registry();
        reg.put_schema_if_absent(ID, &avro(USER_V1), SchemaCompatibilityStrategy::Full)
            .unwrap();

        assert_eq!(reg.delete_schema(ID, "ops", true).unwrap(), None);
        assert!(reg.get_schema(ID).unwrap_err().is_not_found());
        assert!(reg.trim_deleted_schema_and_get_list(ID).unwrap_err().is_not_found());
        assert!(reg.delete_schema(ID, "ops", true).unwrap_err().is_not_found());
        assert!(reg.delete_schema(ID, "ops", false).unwrap_err().is_not_found());

        // Versions are not reused after an erase.
        let version = reg
            .put_schema_if_absent(ID, &avro(USER_V2), SchemaCompatibilityStrategy::Full)
            .unwrap();
        assert_eq!(version.value(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let reg = registry();
        assert!(reg.get_schema("a/b/c").unwrap_err().is_not_found());
        assert!(reg.get_all_schemas("a/b/c").unwrap_err().is_not_found());
        assert!(reg.delete_schema("a/b/c", "ops", false).unwrap_err().is_not_found());
        assert_eq!(reg.find_schema_version("a/b/c", &avro(USER_V1)).unwrap(), None);
        assert!(reg
            .is_compatible("a/b/c", &avro(USER_V1), SchemaCompatibilityStrategy::AlwaysIncompatible)
            .unwrap());
    }

    #[test]
    fn test_list_schema_ids() {
        let reg = registry();
        let strategy = SchemaCompatibilityStrategy::Full;
        reg.put_schema_if_absent("acme/orders/a", &avro(USER_V1), strategy).unwrap();
        reg.put_schema_if_absent("acme/billing/b", &avro(USER_V1), strategy).unwrap();
        reg.put_schema_if_absent("zeta/ns/c", &avro(USER_V1), strategy).unwrap();
        reg.delete_schema("zeta/ns/c", "ops", true).unwrap();

        assert_eq!(reg.list_schema_ids().unwrap(), vec!["acme/billing/b", "acme/orders/a"]);
    }

    #[test]
    fn test_registered_check_replaces_builtin() {
        struct RejectAll;
        impl SchemaCompatibilityCheck for RejectAll {
            fn validate(&self, _: &SchemaData) -> std::result::Result<(), String> {
                Err("no JSON here".into())
            }

            fn check(
                &self,
                _: &SchemaData,
                _: &SchemaData,
                _: SchemaCompatibilityStrategy,
            ) -> std::result::Result<(), String> {
                Err("never".into())
            }
        }

        let mut reg = registry();
        reg.register_check(SchemaType::Json, Arc::new(RejectAll));
        let json = SchemaData::new(SchemaType::Json, "{}");
        let err = reg
            .put_schema_if_absent(ID, &json, SchemaCompatibilityStrategy::AlwaysCompatible)
            .unwrap_err();
        assert!(err.to_string().contains("no JSON here"));

        let reg = registry().with_checkers(CompatibilityCheckers::empty());
        let version = reg
            .put_schema_if_absent(ID, &avro("not avro at all"), SchemaCompatibilityStrategy::Full)
            .unwrap();
        assert_eq!(version.value(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_assigns_distinct_versions() {
        let pool = Arc::new(WorkerPool::with_defaults().unwrap());
        let reg = Arc::new(SchemaRegistry::new(
            Arc::new(MemoryStore::new()),
            pool,
            1_000,
            SchemaCompatibilityStrategy::AlwaysCompatible,
        ));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let reg = Arc::clone(&reg);
            tasks.push(tokio::spawn(async move {
                let schema = SchemaData::new(SchemaType::String, format!("s{i}").into_bytes());
                reg.put_schema_if_absent_async(ID, &schema, SchemaCompatibilityStrategy::Undefined)
                    .await
                    .unwrap()
            }));
        }
        let mut versions = Vec::new();
        for task in tasks {
            versions.push(task.await.unwrap().value());
        }
        versions.sort_unstable();
        assert_eq!(versions, (0..8).collect::<Vec<u64>>());
    }
}
