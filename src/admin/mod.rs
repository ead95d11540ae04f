//! Administrative handlers
//!
//! Transport-free request handlers: each takes the caller's
//! [`RequestContext`] plus the decoded request, and yields a status code with
//! a JSON-serializable body or a [`RestError`]. Errors are logged here and
//! nowhere below.

pub mod clusters;
pub mod schemas;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::MetadataError;

pub use clusters::ClustersResource;
pub use schemas::SchemasResource;

/// Successful handler outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response<T> {
    pub status: u16,
    pub body: T,
}

impl<T> Response<T> {
    pub fn ok(body: T) -> Self {
        Self { status: 200, body }
    }

    pub fn accepted(body: T) -> Self {
        Self { status: 202, body }
    }

    pub fn no_content(body: T) -> Self {
        Self { status: 204, body }
    }
}

/// Failed handler outcome
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{status} {message}")]
pub struct RestError {
    pub status: u16,
    pub message: String,
}

impl RestError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<MetadataError> for RestError {
    fn from(err: MetadataError) -> Self {
        Self::new(err.status_code(), err.to_string())
    }
}

pub type RestResult<T> = std::result::Result<Response<T>, RestError>;

/// Who is calling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub principal: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn as_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
        }
    }

    /// Principal recorded on written records; empty when anonymous
    pub fn user(&self) -> &str {
        self.principal.as_deref().unwrap_or("")
    }

    fn label(&self) -> &str {
        self.principal.as_deref().unwrap_or("anonymous")
    }
}

/// Refusal from an [`AccessValidator`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AccessDenied {
    /// Status the validator would have answered with
    pub status: u16,
    pub message: String,
}

impl AccessDenied {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Authorization hook run before every handler
pub trait AccessValidator: Send + Sync {
    fn validate_tenant_admin(&self, tenant: &str, principal: Option<&str>) -> Result<(), AccessDenied>;

    fn validate_super_user(&self, principal: Option<&str>) -> Result<(), AccessDenied>;
}

/// Lets everyone through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessValidator for AllowAll {
    fn validate_tenant_admin(&self, _tenant: &str, _principal: Option<&str>) -> Result<(), AccessDenied> {
        Ok(())
    }

    fn validate_super_user(&self, _principal: Option<&str>) -> Result<(), AccessDenied> {
        Ok(())
    }
}

/// Static role table: super users may do anything, tenant admins may manage
/// their own tenants.
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    super_users: BTreeSet<String>,
    tenant_admins: BTreeMap<String, BTreeSet<String>>,
}

impl RoleTable {
    pub fn with_super_user(mut self, principal: impl Into<String>) -> Self {
        self.super_users.insert(principal.into());
        self
    }

    pub fn with_tenant_admin(mut self, tenant: impl Into<String>, principal: impl Into<String>) -> Self {
        self.tenant_admins
            .entry(tenant.into())
            .or_default()
            .insert(principal.into());
        self
    }

    fn is_super_user(&self, principal: Option<&str>) -> bool {
        principal.is_some_and(|p| self.super_users.contains(p))
    }
}

impl AccessValidator for RoleTable {
    fn validate_tenant_admin(&self, tenant: &str, principal: Option<&str>) -> Result<(), AccessDenied> {
        if self.is_super_user(principal) {
            return Ok(());
        }
        let Some(principal) = principal else {
            return Err(AccessDenied::new(401, "authentication required"));
        };
        if self
            .tenant_admins
            .get(tenant)
            .is_some_and(|admins| admins.contains(principal))
        {
            Ok(())
        } else {
            Err(AccessDenied::new(
                403,
                format!("{principal} is not an admin of tenant {tenant}"),
            ))
        }
    }

    fn validate_super_user(&self, principal: Option<&str>) -> Result<(), AccessDenied> {
        if self.is_super_user(principal) {
            Ok(())
        } else {
            Err(AccessDenied::new(
                403,
                format!("{} is not a super user", principal.unwrap_or("anonymous")),
            ))
        }
    }
}

/// Every refusal surfaces as `Unauthorized`, whatever status the validator chose
fn authorize(ctx: &RequestContext, outcome: Result<(), AccessDenied>) -> Result<(), RestError> {
    outcome.map_err(|denied| {
        warn!(principal = ctx.label(), status = denied.status, reason = %denied.message, "access denied");
        RestError::from(MetadataError::Unauthorized(denied.message))
    })
}

/// Log a failed operation and turn it into a response
fn failure(ctx: &RequestContext, operation: &str, target: &str, err: MetadataError) -> RestError {
    error!(principal = ctx.label(), operation, target, error = %err, "admin operation failed");
    RestError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_error_from_metadata_error() {
        let err = RestError::from(MetadataError::IncompatibleSchema("field removed".into()));
        assert_eq!(err.status, 409);
        assert!(err.message.contains("field removed"));
    }

    #[test]
    fn test_role_table() {
        let roles = RoleTable::default()
            .with_super_user("root")
            .with_tenant_admin("acme", "alice");

        assert!(roles.validate_tenant_admin("acme", Some("alice")).is_ok());
        assert!(roles.validate_tenant_admin("acme", Some("root")).is_ok());
        assert_eq!(roles.validate_tenant_admin("globex", Some("alice")).unwrap_err().status, 403);
        assert_eq!(roles.validate_tenant_admin("acme", None).unwrap_err().status, 401);
        assert!(roles.validate_super_user(Some("alice")).is_err());
    }

    #[test]
    fn test_denials_become_unauthorized() {
        let ctx = RequestContext::as_principal("mallory");
        let err = authorize(&ctx, Err(AccessDenied::new(403, "nope"))).unwrap_err();
        assert_eq!(err.status, 401);
        assert!(err.message.contains("nope"));
    }
}
