//! Broker Metadata
//!
//! Cluster metadata resources and a versioned schema registry for a
//! multi-tenant pub/sub broker, layered over a hierarchical metadata store.
//!
//! ## Features
//!
//! - **Typed Resources**: JSON records at slash-separated paths, with
//!   optimistic read-modify-write and bounded conflict retries
//! - **Read-Through Cache**: invalidated by the store's change notifications
//! - **Cluster Registry**: clusters, failure domains and cluster usage checks
//! - **Schema Registry**: append-only schema histories with pluggable
//!   compatibility checks, soft and force deletion
//! - **Admin Handlers**: transport-free request handlers with status mapping
//!
//! ## Layout
//!
//! ```text
//! /clusters/{cluster}
//! /clusters/{cluster}/failureDomain/{domain}
//! /admin/policies/{tenant}/{cluster}/{namespace}
//! /schemas/{tenant}/{namespace}/{topic}
//! ```

pub mod admin;
pub mod cache;
pub mod checksum;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod metadata;
pub mod notification;
pub mod path;
pub mod pool;
pub mod resources;
pub mod schema;
pub mod store;
pub mod topic;

pub use admin::{AccessValidator, AllowAll, ClustersResource, RequestContext, RestError, SchemasResource};
pub use checksum::Checksum;
pub use clock::{Clock, SystemClock};
pub use cluster::{ClusterData, ClusterResources, FailureDomain, FailureDomainResources};
pub use config::MetadataConfig;
pub use error::{MetadataError, Result};
pub use metadata::MetadataResources;
pub use notification::{Notification, NotificationType, Subscription};
pub use path::ResourcePath;
pub use pool::WorkerPool;
pub use resources::{BaseResources, Mutation};
pub use schema::{
    SchemaCompatibilityStrategy, SchemaData, SchemaRegistry, SchemaType, SchemaVersion,
};
pub use store::{ExpectedVersion, MemoryStore, MetadataStore, Stat};
pub use topic::TopicName;
