//! Authenticated caller identity with its role claims.
//!
//! Roles are resolved once per request; access checks consult the claims, never a list of
//! well-known identities.

use crate::{Job, OwnerId};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Role claim granted to a principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Elevated access: may see and cancel every owner's jobs.
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: OwnerId,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(id: impl Into<OwnerId>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    /// Build from a comma-separated roles claim such as `"admin, instructor"`.
    pub fn from_claims(id: impl Into<OwnerId>, roles_claim: Option<&str>) -> Self {
        let mut principal = Self::new(id);
        for name in roles_claim.unwrap_or("").split(',') {
            let name = name.trim().to_ascii_lowercase();
            if !name.is_empty() {
                principal = principal.with_role(Role::new(name));
            }
        }
        principal
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_elevated(&self) -> bool {
        self.has_role(&Role::ADMIN)
    }

    pub fn can_access(&self, job: &Job) -> bool {
        job.owner == self.id || self.is_elevated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobKind;

    #[test]
    fn roles_claim_is_parsed_and_normalised() {
        let p = Principal::from_claims("u1", Some(" Admin ,instructor,,admin"));
        assert_eq!(p.roles.len(), 2);
        assert!(p.is_elevated());
        assert!(p.has_role(&Role::new("instructor")));
        assert!(!Principal::from_claims("u1", None).is_elevated());
    }

    #[test]
    fn owners_and_admins_can_access() {
        let job = Job::new(
            JobKind::Classification,
            serde_json::json!({}),
            OwnerId::from("u1"),
        );
        assert!(Principal::new("u1").can_access(&job));
        assert!(!Principal::new("u2").can_access(&job));
        assert!(Principal::new("u2").with_role(Role::ADMIN).can_access(&job));
    }
}
