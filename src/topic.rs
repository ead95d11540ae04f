//! Topic names and the schema ids derived from them

use std::fmt;
use std::str::FromStr;

use crate::error::{MetadataError, Result};

const PARTITION_SUFFIX: &str = "-partition-";
const DEFAULT_TENANT: &str = "public";
const DEFAULT_NAMESPACE: &str = "default";

/// Persistence domain of a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicDomain {
    Persistent,
    NonPersistent,
}

impl TopicDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicDomain::Persistent => "persistent",
            TopicDomain::NonPersistent => "non-persistent",
        }
    }
}

/// A fully-qualified topic name: `{domain}://{tenant}/{namespace}/{local}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    pub domain: TopicDomain,
    pub tenant: String,
    pub namespace: String,
    pub local_name: String,
}

impl TopicName {
    /// Build a persistent topic from its parts
    pub fn new(tenant: &str, namespace: &str, local_name: &str) -> Result<Self> {
        let name = Self {
            domain: TopicDomain::Persistent,
            tenant: tenant.to_string(),
            namespace: namespace.to_string(),
            local_name: local_name.to_string(),
        };
        name.validate()?;
        Ok(name)
    }

    /// Parse `persistent://t/ns/topic`, `t/ns/topic` or a bare `topic`
    /// (which lands in `public/default`).
    pub fn parse(name: &str) -> Result<Self> {
        let (domain, rest) = match name.split_once("://") {
            Some(("persistent", rest)) => (TopicDomain::Persistent, rest),
            Some(("non-persistent", rest)) => (TopicDomain::NonPersistent, rest),
            Some((other, _)) => {
                return Err(MetadataError::InvalidTopicName(format!(
                    "unknown domain '{other}' in {name}"
                )))
            }
            None => (TopicDomain::Persistent, name),
        };

        let parts: Vec<&str> = rest.splitn(3, '/').collect();
        let topic = match parts.as_slice() {
            [local] => Self {
                domain,
                tenant: DEFAULT_TENANT.to_string(),
                namespace: DEFAULT_NAMESPACE.to_string(),
                local_name: local.to_string(),
            },
            [tenant, namespace, local] => Self {
                domain,
                tenant: tenant.to_string(),
                namespace: namespace.to_string(),
                local_name: local.to_string(),
            },
            _ => {
                return Err(MetadataError::InvalidTopicName(format!(
                    "{name} is neither a short name nor tenant/namespace/topic"
                )))
            }
        };
        topic.validate()?;
        Ok(topic)
    }

    fn validate(&self) -> Result<()> {
        for (what, part) in [
            ("tenant", &self.tenant),
            ("namespace", &self.namespace),
            ("topic", &self.local_name),
        ] {
            if part.is_empty() || part.contains('/') {
                return Err(MetadataError::InvalidTopicName(format!(
                    "invalid {what} '{part}'"
                )));
            }
        }
        Ok(())
    }

    /// Partition index if this names one partition of a partitioned topic
    pub fn partition_index(&self) -> Option<u32> {
        let (_, index) = self.local_name.rsplit_once(PARTITION_SUFFIX)?;
        index.parse().ok()
    }

    pub fn is_partitioned(&self) -> bool {
        self.partition_index().is_some()
    }

    /// The parent partitioned topic, or a clone of `self` if not a partition
    pub fn partitioned_topic(&self) -> TopicName {
        match (self.partition_index(), self.local_name.rsplit_once(PARTITION_SUFFIX)) {
            (Some(_), Some((base, _))) => TopicName {
                local_name: base.to_string(),
                ..self.clone()
            },
            _ => self.clone(),
        }
    }

    /// `tenant/namespace/topic`, without the domain
    pub fn schema_name(&self) -> String {
        format!("{}/{}/{}", self.tenant, self.namespace, self.local_name)
    }

    /// Key of the version history for this topic. All partitions share the
    /// id of their parent.
    pub fn schema_id(&self) -> String {
        self.partitioned_topic().schema_name()
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            self.domain.as_str(),
            self.tenant,
            self.namespace,
            self.local_name
        )
    }
}

impl FromStr for TopicName {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
