//! Authorization gate for coordinated operations
//!
//! Authentication is done upstream; the coordinator only asks a yes/no
//! question per operation:
//! - Role-based access control (RBAC)
//! - Tenant isolation for multi-tenancy

use serde::{Deserialize, Serialize};

/// Role defining access levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Role {
    /// Full access to all operations including admin
    Admin,
    /// Read and write access to data
    ReadWrite,
    /// Read-only access to data (default)
    #[default]
    ReadOnly,
}

impl Role {
    /// Check if this role can perform write operations
    pub fn can_write(&self) -> bool {
        matches!(self, Role::Admin | Role::ReadWrite)
    }

    /// Check if this role can read data
    pub fn can_read(&self) -> bool {
        true // All roles can read
    }
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub role: Role,
    /// Restricts the principal to one tenant; `None` means any tenant
    #[serde(default)]
    pub tenant: Option<String>,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            tenant: None,
        }
    }

    pub fn scoped_to(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }
}

/// What an operation does to the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Read,
    Create,
    Update,
    Delete,
}

impl Verb {
    pub fn is_write(&self) -> bool {
        !matches!(self, Verb::Read)
    }
}

/// Yes/no gate consulted before any node I/O
pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
        principal: Option<&Principal>,
        verb: Verb,
        class: &str,
        tenant: Option<&str>,
    ) -> crate::Result<()>;
}

/// Gate used when authorization is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(
        &self,
        _principal: Option<&Principal>,
        _verb: Verb,
        _class: &str,
        _tenant: Option<&str>,
    ) -> crate::Result<()> {
        Ok(())
    }
}

/// Role and tenant based gate. Anonymous callers are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

impl Authorizer for RoleAuthorizer {
    fn authorize(
        &self,
        principal: Option<&Principal>,
        verb: Verb,
        class: &str,
        tenant: Option<&str>,
    ) -> crate::Result<()> {
        let principal = principal
            .ok_or_else(|| crate::Error::Forbidden("anonymous access is disabled".into()))?;

        let allowed = if verb.is_write() {
            principal.role.can_write()
        } else {
            principal.role.can_read()
        };
        if !allowed {
            return Err(crate::Error::Forbidden(format!(
                "{} ({:?}) may not {:?} objects of class {}",
                principal.name, principal.role, verb, class
            )));
        }

        if let Some(scope) = &principal.tenant {
            if tenant != Some(scope.as_str()) {
                return Err(crate::Error::Forbidden(format!(
                    "{} is restricted to tenant {}",
                    principal.name, scope
                )));
            }
        }

        Ok(())
    }
}
