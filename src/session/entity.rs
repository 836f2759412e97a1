//! Principal kinds and their storage/cache namespaces.
//!
//! Users and admins share one session engine. Everything that differs between
//! them (tables, cache namespaces, cookie scope) is looked up through the
//! capability table returned by [`EntityKind::capabilities`], so the two kinds
//! never share a namespace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Storage and cache names owned by one entity kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityCapabilities {
    /// Credential table.
    pub table: &'static str,
    /// Role table joined to produce `{id, name}`.
    pub role_table: &'static str,
    /// Namespace holding per-principal signing secrets.
    pub secret_namespace: &'static str,
    /// Namespace holding the hashes of live tokens.
    pub token_namespace: &'static str,
}

const USER_CAPABILITIES: EntityCapabilities = EntityCapabilities {
    table: "User",
    role_table: "UserRole",
    secret_namespace: "user_secret",
    token_namespace: "user_tokens",
};

const ADMIN_CAPABILITIES: EntityCapabilities = EntityCapabilities {
    table: "Admin",
    role_table: "AdminRole",
    secret_namespace: "admin_secret",
    token_namespace: "admin_tokens",
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Admin,
}

impl EntityKind {
    pub const ALL: [Self; 2] = [Self::User, Self::Admin];

    #[must_use]
    pub const fn capabilities(self) -> &'static EntityCapabilities {
        match self {
            Self::User => &USER_CAPABILITIES,
            Self::Admin => &ADMIN_CAPABILITIES,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Cache key for the per-principal secret, `${entity}:${id}`.
    #[must_use]
    pub fn secret_key(self, user_id: i64) -> String {
        format!("{}:{user_id}", self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}
