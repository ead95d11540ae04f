//! Schema endpoints under `schemas/{tenant}/{namespace}/{topic}`

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{authorize, failure, AccessValidator, RequestContext, Response, RestError, RestResult};
use crate::error::{MetadataError, Result};
use crate::schema::key_value;
use crate::schema::{
    SchemaAndMetadata, SchemaCompatibilityStrategy, SchemaData, SchemaRegistry, SchemaType,
    SchemaVersion, NO_SCHEMA_VERSION,
};
use crate::topic::TopicName;

/// Body of `POST .../schema`, `.../compatibility` and `.../version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSchemaPayload {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub schema: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl PostSchemaPayload {
    pub fn new(schema_type: SchemaType, schema: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            schema: schema.into(),
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSchemaResponse {
    pub version: i64,
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    pub timestamp: i64,
    pub data: String,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAllVersionsSchemaResponse {
    pub get_schema_responses: Vec<GetSchemaResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSchemaResponse {
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSchemaResponse {
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsCompatibilityResponse {
    pub is_compatibility: bool,
    pub schema_compatibility_strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongSchemaVersionResponse {
    pub version: i64,
}

/// Resolves the compatibility strategy in force for a topic
pub trait CompatibilityPolicy: Send + Sync {
    fn strategy_for(&self, topic: &TopicName) -> SchemaCompatibilityStrategy;
}

/// Per-namespace strategies over a process-wide default
#[derive(Debug, Clone)]
pub struct NamespaceCompatibilityPolicy {
    default: SchemaCompatibilityStrategy,
    namespaces: HashMap<String, SchemaCompatibilityStrategy>,
}

impl NamespaceCompatibilityPolicy {
    pub fn new(default: SchemaCompatibilityStrategy) -> Self {
        Self {
            default,
            namespaces: HashMap::new(),
        }
    }

    /// Override the strategy for `tenant/namespace`
    pub fn with_namespace(mut self, namespace: impl Into<String>, strategy: SchemaCompatibilityStrategy) -> Self {
        self.namespaces.insert(namespace.into(), strategy);
        self
    }
}

impl CompatibilityPolicy for NamespaceCompatibilityPolicy {
    fn strategy_for(&self, topic: &TopicName) -> SchemaCompatibilityStrategy {
        let namespace = format!("{}/{}", topic.tenant, topic.namespace);
        self.namespaces
            .get(&namespace)
            .copied()
            .unwrap_or(self.default)
            .resolve(self.default)
    }
}

fn version_or_sentinel(version: Option<SchemaVersion>) -> i64 {
    version.map_or(NO_SCHEMA_VERSION, |v| v.as_long())
}

fn to_response(found: &SchemaAndMetadata) -> Result<GetSchemaResponse> {
    let schema = &found.schema;
    let data = if schema.schema_type == SchemaType::KeyValue {
        key_value::decode(&schema.data, &schema.props)?
    } else {
        schema.data_text()
    };
    Ok(GetSchemaResponse {
        version: found.version.as_long(),
        schema_type: schema.schema_type,
        timestamp: schema.timestamp,
        data,
        properties: schema.props.clone(),
    })
}

pub struct SchemasResource {
    registry: Arc<SchemaRegistry>,
    access: Arc<dyn AccessValidator>,
    policy: Arc<dyn CompatibilityPolicy>,
}

impl SchemasResource {
    pub fn new(registry: Arc<SchemaRegistry>, access: Arc<dyn AccessValidator>) -> Self {
        let policy = Arc::new(NamespaceCompatibilityPolicy::new(registry.default_strategy()));
        Self {
            registry,
            access,
            policy,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn CompatibilityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    fn authorize(&self, ctx: &RequestContext, topic: &TopicName) -> std::result::Result<(), RestError> {
        authorize(
            ctx,
            self.access
                .validate_tenant_admin(&topic.tenant, ctx.principal.as_deref()),
        )
    }

    /// Build the registry form of a submitted schema
    fn candidate(&self, ctx: &RequestContext, payload: &PostSchemaPayload) -> Result<SchemaData> {
        let schema_type: SchemaType = payload.schema_type.parse()?;
        let mut props = payload.properties.clone();
        let data = if schema_type == SchemaType::KeyValue {
            let encoded = key_value::encode(&payload.schema)?;
            props.extend(encoded.props);
            encoded.data
        } else {
            payload.schema.as_bytes().to_vec()
        };
        Ok(SchemaData::new(schema_type, data)
            .with_user(ctx.user())
            .with_timestamp(self.registry.clock().now_millis())
            .with_props(props))
    }

    fn lookup_error(ctx: &RequestContext, operation: &str, topic: &TopicName, err: MetadataError, what: &str) -> RestError {
        match err {
            MetadataError::NotFound(_) => RestError::new(404, what),
            MetadataError::Deleted(_) => RestError::new(404, "Schema is deleted"),
            other => failure(ctx, operation, &topic.to_string(), other),
        }
    }

    /// `GET .../schema`
    pub async fn get_schema(&self, ctx: &RequestContext, topic: &TopicName) -> RestResult<GetSchemaResponse> {
        self.authorize(ctx, topic)?;
        self.registry
            .get_schema_async(&topic.schema_id())
            .await
            .and_then(|found| to_response(&found))
            .map(Response::ok)
            .map_err(|e| Self::lookup_error(ctx, "get schema", topic, e, "Schema not found"))
    }

    /// `GET .../schema/{version}`
    pub async fn get_schema_version(
        &self,
        ctx: &RequestContext,
        topic: &TopicName,
        version: &str,
    ) -> RestResult<GetSchemaResponse> {
        self.authorize(ctx, topic)?;
        let version: SchemaVersion = version
            .parse()
            .map_err(|e| failure(ctx, "get schema version", &topic.to_string(), e))?;
        self.registry
            .get_schema_version_async(&topic.schema_id(), version)
            .await
            .and_then(|found| to_response(&found))
            .map(Response::ok)
            .map_err(|e| Self::lookup_error(ctx, "get schema version", topic, e, "Schema not found"))
    }

    /// `GET .../schemas`, with trailing delete markers trimmed
    pub async fn get_all_schemas(
        &self,
        ctx: &RequestContext,
        topic: &TopicName,
    ) -> RestResult<GetAllVersionsSchemaResponse> {
        self.authorize(ctx, topic)?;
        let schemas = self
            .registry
            .trim_deleted_schema_and_get_list_async(&topic.schema_id())
            .await
            .map_err(|e| Self::lookup_error(ctx, "get all schemas", topic, e, "Schemas not found"))?;
        let get_schema_responses = schemas
            .iter()
            .map(to_response)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| failure(ctx, "get all schemas", &topic.to_string(), e))?;
        Ok(Response::ok(GetAllVersionsSchemaResponse { get_schema_responses }))
    }

    /// `DELETE .../schema?force=`
    pub async fn delete_schema(
        &self,
        ctx: &RequestContext,
        topic: &TopicName,
        force: bool,
    ) -> RestResult<DeleteSchemaResponse> {
        self.authorize(ctx, topic)?;
        self.registry
            .delete_schema_async(&topic.schema_id(), ctx.user(), force)
            .await
            .map(|version| {
                Response::ok(DeleteSchemaResponse {
                    version: version_or_sentinel(version),
                })
            })
            .map_err(|e| failure(ctx, "delete schema", &topic.to_string(), e))
    }

    /// `POST .../schema`
    pub async fn post_schema(
        &self,
        ctx: &RequestContext,
        topic: &TopicName,
        payload: &PostSchemaPayload,
    ) -> RestResult<PostSchemaResponse> {
        self.authorize(ctx, topic)?;
        let strategy = self.policy.strategy_for(topic);
        let candidate = self.candidate(ctx, payload).map_err(RestError::from)?;
        let result = self
            .registry
            .put_schema_if_absent_async(&topic.schema_id(), &candidate, strategy)
            .await;
        match result {
            Ok(version) => Ok(Response::accepted(PostSchemaResponse {
                version: version.as_long(),
            })),
            Err(e @ (MetadataError::IncompatibleSchema(_) | MetadataError::InvalidSchemaData(_))) => {
                Err(RestError::from(e))
            }
            Err(e) => Err(failure(ctx, "post schema", &topic.to_string(), e)),
        }
    }

    /// `POST .../compatibility`
    pub async fn test_compatibility(
        &self,
        ctx: &RequestContext,
        topic: &TopicName,
        payload: &PostSchemaPayload,
    ) -> RestResult<IsCompatibilityResponse> {
        self.authorize(ctx, topic)?;
        let strategy = self.policy.strategy_for(topic);
        let candidate = self
            .candidate(ctx, payload)
            .map_err(|e| failure(ctx, "test compatibility", &topic.to_string(), e))?;
        self.registry
            .is_compatible_async(&topic.schema_id(), &candidate, strategy)
            .await
            .map(|is_compatibility| {
                Response::accepted(IsCompatibilityResponse {
                    is_compatibility,
                    schema_compatibility_strategy: strategy.to_string(),
                })
            })
            .map_err(|e| failure(ctx, "test compatibility", &topic.to_string(), e))
    }

    /// `POST .../version`
    pub async fn get_version_by_schema(
        &self,
        ctx: &RequestContext,
        topic: &TopicName,
        payload: &PostSchemaPayload,
    ) -> RestResult<LongSchemaVersionResponse> {
        self.authorize(ctx, topic)?;
        let candidate = self
            .candidate(ctx, payload)
            .map_err(|e| failure(ctx, "get version by schema", &topic.to_string(), e))?;
        self.registry
            .find_schema_version_async(&topic.schema_id(), &candidate)
            .await
            .map(|version| {
                Response::accepted(LongSchemaVersionResponse {
                    version: version_or_sentinel(version),
                })
            })
            .map_err(|e| failure(ctx, "get version by schema", &topic.to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{AllowAll, RoleTable};
    use crate::clock::FixedClock;
    use crate::pool::WorkerPool;
    use crate::store::MemoryStore;

    const USER_V1: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;
    const USER_V2: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"string"}]}"#;

    fn resource(access: Arc<dyn AccessValidator>) -> SchemasResource {
        let pool = Arc::new(WorkerPool::with_defaults().unwrap());
        let registry = SchemaRegistry::new(
            Arc::new(MemoryStore::new()),
            pool,
            8,
            SchemaCompatibilityStrategy::Full,
        )
        .with_clock(Arc::new(FixedClock(42)));
        SchemasResource::new(Arc::new(registry), access)
    }

    fn topic() -> TopicName {
        TopicName::parse("persistent://acme/orders/checkout").unwrap()
    }

    fn alice() -> RequestContext {
        RequestContext::as_principal("alice")
    }

    #[tokio::test]
    async fn test_post_get_and_dedup() {
        let res = resource(Arc::new(AllowAll));
        let payload = PostSchemaPayload::new(SchemaType::Avro, USER_V1);

        let posted = res.post_schema(&alice(), &topic(), &payload).await.unwrap();
        assert_eq!(posted.status, 202);
        assert_eq!(posted.body.version, 0);

        let again = res.post_schema(&alice(), &topic(), &payload).await.unwrap();
        assert_eq!(again.body.version, 0);

        let got = res.get_schema(&alice(), &topic()).await.unwrap();
        assert_eq!(got.status, 200);
        assert_eq!(got.body.data, USER_V1);
        assert_eq!(got.body.timestamp, 42);
        assert_eq!(got.body.schema_type, SchemaType::Avro);

        // Partitions share the parent's schema.
        let partition = TopicName::parse("persistent://acme/orders/checkout-partition-3").unwrap();
        assert_eq!(res.get_schema(&alice(), &partition).await.unwrap().body.version, 0);

        let version = res.get_version_by_schema(&alice(), &topic(), &payload).await.unwrap();
        assert_eq!(version.body.version, 0);
        let unknown = PostSchemaPayload::new(SchemaType::Avro, USER_V2);
        let version = res.get_version_by_schema(&alice(), &topic(), &unknown).await.unwrap();
        assert_eq!(version.body.version, NO_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_rejections() {
        let res = resource(Arc::new(AllowAll));
        res.post_schema(&alice(), &topic(), &PostSchemaPayload::new(SchemaType::Avro, USER_V1))
            .await
            .unwrap();

        let err = res
            .post_schema(&alice(), &topic(), &PostSchemaPayload::new(SchemaType::Avro, USER_V2))
            .await
            .unwrap_err();
        assert_eq!(err.status, 409);

        let err = res
            .post_schema(&alice(), &topic(), &PostSchemaPayload::new(SchemaType::Avro, "{nope"))
            .await
            .unwrap_err();
        assert_eq!(err.status, 422);

        let payload = PostSchemaPayload {
            schema_type: "XML".into(),
            schema: "<a/>".into(),
            properties: BTreeMap::new(),
        };
        assert_eq!(res.post_schema(&alice(), &topic(), &payload).await.unwrap_err().status, 422);

        let compat = res
            .test_compatibility(&alice(), &topic(), &PostSchemaPayload::new(SchemaType::Avro, USER_V2))
            .await
            .unwrap();
        assert!(!compat.body.is_compatibility);
        assert_eq!(compat.body.schema_compatibility_strategy, "FULL");
    }

    #[tokio::test]
    async fn test_namespace_policy() {
        let policy = NamespaceCompatibilityPolicy::new(SchemaCompatibilityStrategy::Full)
            .with_namespace("acme/orders", SchemaCompatibilityStrategy::AlwaysCompatible);
        let res = resource(Arc::new(AllowAll)).with_policy(Arc::new(policy));

        res.post_schema(&alice(), &topic(), &PostSchemaPayload::new(SchemaType::Avro, USER_V1))
            .await
            .unwrap();
        let posted = res
            .post_schema(&alice(), &topic(), &PostSchemaPayload::new(SchemaType::Avro, USER_V2))
            .await
            .unwrap();
        assert_eq!(posted.body.version, 1);
    }

    #[tokio::test]
    async fn test_delete_flow() {
        let res = resource(Arc::new(AllowAll));
        res.post_schema(&alice(), &topic(), &PostSchemaPayload::new(SchemaType::Avro, USER_V1))
            .await
            .unwrap();

        let deleted = res.delete_schema(&alice(), &topic(), false).await.unwrap();
        assert_eq!(deleted.body.version, 1);

        let err = res.get_schema(&alice(), &topic()).await.unwrap_err();
        assert_eq!(err, RestError::new(404, "Schema is deleted"));
        let all = res.get_all_schemas(&alice(), &topic()).await.unwrap();
        assert_eq!(all.body.get_schema_responses.len(), 1);
        let old = res.get_schema_version(&alice(), &topic(), "0").await.unwrap();
        assert_eq!(old.body.data, USER_V1);

        let forced = res.delete_schema(&alice(), &topic(), true).await.unwrap();
        assert_eq!(forced.body.version, NO_SCHEMA_VERSION);
        let err = res.get_schema(&alice(), &topic()).await.unwrap_err();
        assert_eq!(err, RestError::new(404, "Schema not found"));
        let err = res.get_all_schemas(&alice(), &topic()).await.unwrap_err();
        assert_eq!(err, RestError::new(404, "Schemas not found"));
        assert_eq!(res.delete_schema(&alice(), &topic(), true).await.unwrap_err().status, 404);
    }

    #[tokio::test]
    async fn test_key_value_round_trip() {
        let res = resource(Arc::new(AllowAll));
        let document = r#"{"key":{"name":"k","schema":"","type":"STRING","properties":{}},"value":{"name":"v","schema":{"type":"record","name":"V","fields":[]},"type":"AVRO","properties":{}}}"#;
        let mut payload = PostSchemaPayload::new(SchemaType::KeyValue, document);
        payload.properties.insert("owner".into(), "crm".into());

        assert_eq!(res.post_schema(&alice(), &topic(), &payload).await.unwrap().body.version, 0);
        let got = res.get_schema(&alice(), &topic()).await.unwrap().body;
        assert_eq!(got.schema_type, SchemaType::KeyValue);
        assert_eq!(got.properties["owner"], "crm");
        assert_eq!(got.properties[key_value::VALUE_SCHEMA_TYPE], "AVRO");
        let decoded: serde_json::Value = serde_json::from_str(&got.data).unwrap();
        assert_eq!(decoded["value"]["schema"]["name"], "V");

        // Same document, same version.
        let version = res.get_version_by_schema(&alice(), &topic(), &payload).await.unwrap();
        assert_eq!(version.body.version, 0);

        let bad = PostSchemaPayload::new(SchemaType::KeyValue, "{}");
        assert_eq!(res.post_schema(&alice(), &topic(), &bad).await.unwrap_err().status, 422);
    }

    #[tokio::test]
    async fn test_access_denied_is_unauthorized() {
        let roles = RoleTable::default().with_tenant_admin("acme", "alice");
        let res = resource(Arc::new(roles));

        let err = res
            .get_schema(&RequestContext::as_principal("mallory"), &topic())
            .await
            .unwrap_err();
        assert_eq!(err.status, 401);
        assert_eq!(res.get_schema(&alice(), &topic()).await.unwrap_err().status, 404);
    }

    #[test]
    fn test_dto_field_names() {
        let all = GetAllVersionsSchemaResponse {
            get_schema_responses: vec![],
        };
        assert_eq!(serde_json::to_string(&all).unwrap(), r#"{"getSchemaResponses":[]}"#);

        let compat = IsCompatibilityResponse {
            is_compatibility: true,
            schema_compatibility_strategy: "FULL".into(),
        };
        let json = serde_json::to_value(&compat).unwrap();
        assert_eq!(json["isCompatibility"], true);
        assert_eq!(json["schemaCompatibilityStrategy"], "FULL");

        let payload: PostSchemaPayload =
            serde_json::from_str(r#"{"type":"AVRO","schema":"{}"}"#).unwrap();
        assert!(payload.properties.is_empty());
    }
}
