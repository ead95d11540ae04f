//! Resource paths
//!
//! Every record lives at a node of a slash-separated namespace:
//!
//! ```text
//! /
//! ├── clusters/
//! │   └── {cluster}/
//! │       └── failureDomain/
//! │           └── {domain}
//! ├── admin/
//! │   └── policies/
//! │       └── {tenant}/{cluster}/{namespace}
//! └── schemas/
//!     └── {tenant}/{namespace}/{topic}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MetadataError, Result};

/// Root of all cluster records
pub const CLUSTERS_ROOT: &str = "/clusters";
/// Root of tenant policies (namespace to cluster assignments)
pub const POLICIES_ROOT: &str = "/admin/policies";
/// Root of schema version logs
pub const SCHEMAS_ROOT: &str = "/schemas";
/// Segment holding the failure domains of a cluster
pub const FAILURE_DOMAIN: &str = "failureDomain";

/// An ordered sequence of segments naming a node.
///
/// Ordering and equality follow the rendered string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The namespace root `/`
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a rendered path such as `/clusters/us-east`
    pub fn parse(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| MetadataError::InvalidPath(format!("{path} is not absolute")))?;
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(MetadataError::InvalidPath(format!("{path} has an empty segment")));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Append one segment
    pub fn child(&self, segment: &str) -> Result<Self> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Append several segments in order
    pub fn join<I, S>(&self, segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = self.clone();
        for segment in segments {
            path = path.child(segment.as_ref())?;
        }
        Ok(path)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment, `None` for the root
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `self` equals `other` or lies below it
    pub fn starts_with(&self, other: &ResourcePath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// All proper ancestors, root first, excluding the root itself
    pub fn ancestors(&self) -> Vec<ResourcePath> {
        (1..self.segments.len())
            .map(|len| Self {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment.contains('/') {
        return Err(MetadataError::InvalidPath(format!(
            "invalid path segment '{segment}'"
        )));
    }
    Ok(())
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for ResourcePath {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = MetadataError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.to_string()
    }
}

impl PartialOrd for ResourcePath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourcePath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

fn fixed(root: &'static str) -> ResourcePath {
    ResourcePath {
        segments: root
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    }
}

pub fn clusters_root() -> ResourcePath {
    fixed(CLUSTERS_ROOT)
}

pub fn policies_root() -> ResourcePath {
    fixed(POLICIES_ROOT)
}

pub fn schemas_root() -> ResourcePath {
    fixed(SCHEMAS_ROOT)
}

/// `/clusters/{cluster}`
pub fn cluster_path(cluster: &str) -> Result<ResourcePath> {
    clusters_root().child(cluster)
}

/// `/clusters/{cluster}/failureDomain`
pub fn failure_domains_path(cluster: &str) -> Result<ResourcePath> {
    clusters_root().join([cluster, FAILURE_DOMAIN])
}

/// `/clusters/{cluster}/failureDomain/{domain}`
pub fn failure_domain_path(cluster: &str, domain: &str) -> Result<ResourcePath> {
    clusters_root().join([cluster, FAILURE_DOMAIN, domain])
}

/// `/admin/policies/{tenant}/{cluster}`
pub fn tenant_cluster_path(tenant: &str, cluster: &str) -> Result<ResourcePath> {
    policies_root().join([tenant, cluster])
}

/// `/schemas/{schema id segments...}`
///
/// Schema ids are `tenant/namespace/topic`, so they span several segments.
pub fn schema_path(schema_id: &str) -> Result<ResourcePath> {
    schemas_root().join(schema_id.split('/'))
}

/// Inverse of [`schema_path`]
pub fn schema_id_from_path(path: &ResourcePath) -> Option<String> {
    let root = schemas_root();
    if !path.starts_with(&root) || path.segments().len() == root.segments().len() {
        return None;
    }
    Some(path.segments()[root.segments().len()..].join("/"))
}

pub fn path_represents_cluster_name(path: &str) -> bool {
    path.starts_with(CLUSTERS_ROOT)
}

/// Everything after `/clusters/`, e.g. `us-east` for `/clusters/us-east`
pub fn cluster_name_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(CLUSTERS_ROOT)?.strip_prefix('/')
}

/// Failure-domain notifications: under the cluster root with a `failureDomain` segment
pub fn is_failure_domain_path(path: &str) -> bool {
    path.starts_with(CLUSTERS_ROOT) && path.contains(&format!("/{FAILURE_DOMAIN}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let p = ResourcePath::parse("/clusters/us-east").unwrap();
        assert_eq!(p.segments(), &["clusters".to_string(), "us-east".to_string()]);
        assert_eq!(p.to_string(), "/clusters/us-east");
        assert_eq!(ResourcePath::parse("/").unwrap(), ResourcePath::root());
        assert_eq!(ResourcePath::root().to_string(), "/");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(ResourcePath::parse("clusters").is_err());
        assert!(ResourcePath::parse("/a//b").is_err());
        assert!(ResourcePath::root().child("a/b").is_err());
        assert!(ResourcePath::root().child("").is_err());
    }

    #[test]
    fn test_layout() {
        assert_eq!(
            failure_domain_path("c1", "d1").unwrap().to_string(),
            "/clusters/c1/failureDomain/d1"
        );
        assert_eq!(
            tenant_cluster_path("acme", "us-east").unwrap().to_string(),
            "/admin/policies/acme/us-east"
        );
        let schema = schema_path("acme/ns/orders").unwrap();
        assert_eq!(schema.to_string(), "/schemas/acme/ns/orders");
        assert_eq!(schema_id_from_path(&schema).as_deref(), Some("acme/ns/orders"));
    }

    #[test]
    fn test_parent_and_ancestors() {
        let p = failure_domain_path("c1", "d1").unwrap();
        assert_eq!(p.parent().unwrap(), failure_domains_path("c1").unwrap());
        let ancestors: Vec<String> = p.ancestors().iter().map(|a| a.to_string()).collect();
        assert_eq!(
            ancestors,
            vec!["/clusters", "/clusters/c1", "/clusters/c1/failureDomain"]
        );
        assert!(ResourcePath::root().parent().is_none());
    }

    #[test]
    fn test_ordering_is_by_rendered_string() {
        let a = ResourcePath::parse("/a/b").unwrap();
        let b = ResourcePath::parse("/a-b").unwrap();
        // "/a-b" < "/a/b" because '-' sorts before '/'
        assert!(b < a);
    }

    #[test]
    fn test_cluster_name_helpers() {
        assert!(path_represents_cluster_name("/clusters/c1"));
        assert_eq!(cluster_name_from_path("/clusters/c1"), Some("c1"));
        assert!(is_failure_domain_path("/clusters/c1/failureDomain/d1"));
        assert!(!is_failure_domain_path("/clusters/c1"));
        assert!(!is_failure_domain_path("/admin/failureDomain"));
    }
}
