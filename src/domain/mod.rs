//! Domain primitives for the access core.
//!
//! Identifiers are newtypes over [`Uuid`] so an account id can never be passed
//! where a center id is expected. The enumerations double as `SeaORM` active
//! enums and are stored as lowercase strings.

pub mod validation;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn value(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an [`Account`](crate::db::Account).
    AccountId
);

uuid_id!(
    /// Identifier of an organizational unit ("center").
    UnitId
);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[sea_orm(string_value = "administrator")]
    Administrator,
    #[sea_orm(string_value = "nurse")]
    Nurse,
    #[sea_orm(string_value = "caregiver")]
    Caregiver,
    #[sea_orm(string_value = "doctor")]
    Doctor,
    #[sea_orm(string_value = "manager")]
    Manager,
    #[sea_orm(string_value = "receptionist")]
    Receptionist,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Nurse => "nurse",
            Self::Caregiver => "caregiver",
            Self::Doctor => "doctor",
            Self::Manager => "manager",
            Self::Receptionist => "receptionist",
        }
    }

    /// Roles allowed to read the audit trail of their centers.
    #[must_use]
    pub const fn can_review_audit(self) -> bool {
        matches!(self, Self::Administrator | Self::Manager)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administrator" | "admin" => Ok(Self::Administrator),
            "nurse" => Ok(Self::Nurse),
            "caregiver" => Ok(Self::Caregiver),
            "doctor" => Ok(Self::Doctor),
            "manager" => Ok(Self::Manager),
            "receptionist" => Ok(Self::Receptionist),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    #[sea_orm(string_value = "CREATE")]
    Create,
    #[sea_orm(string_value = "UPDATE")]
    Update,
    #[sea_orm(string_value = "DELETE")]
    Delete,
    #[sea_orm(string_value = "VIEW")]
    View,
    #[sea_orm(string_value = "LOGIN")]
    Login,
    #[sea_orm(string_value = "LOGOUT")]
    Logout,
    #[sea_orm(string_value = "EXPORT")]
    Export,
    #[sea_orm(string_value = "IMPORT")]
    Import,
}

impl AuditAction {
    /// Actions reported by the security events query.
    pub const SECURITY: [Self; 3] = [Self::Login, Self::Logout, Self::View];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::View => "VIEW",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::Export => "EXPORT",
            Self::Import => "IMPORT",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "VIEW" => Ok(Self::View),
            "LOGIN" => Ok(Self::Login),
            "LOGOUT" => Ok(Self::Logout),
            "EXPORT" => Ok(Self::Export),
            "IMPORT" => Ok(Self::Import),
            other => Err(format!("unknown audit action '{other}'")),
        }
    }
}
