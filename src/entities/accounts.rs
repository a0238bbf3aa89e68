use sea_orm::entity::prelude::*;
use serde::Serialize;

use crate::domain::Role;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub login_name: String,

    /// Upper-cased employee code, unique across accounts.
    #[sea_orm(unique)]
    pub employee_code: String,

    pub display_name: String,

    /// Argon2id password hash
    pub password_hash: String,

    pub role: Role,

    pub is_superuser: bool,

    /// Bypasses center scoping.
    pub is_multi_unit: bool,

    pub is_active: bool,

    pub failed_attempt_count: i32,

    pub last_failed_attempt_at: Option<DateTimeUtc>,

    pub locked_until: Option<DateTimeUtc>,

    pub second_factor_failed_count: i32,

    pub second_factor_locked_until: Option<DateTimeUtc>,

    pub password_changed_at: Option<DateTimeUtc>,

    pub must_change_password: bool,

    pub two_factor_enabled: bool,

    /// `nonce || ciphertext` of the TOTP secret.
    pub totp_secret_enc: Option<Vec<u8>>,

    /// SHA-256 hex of the outstanding reset token.
    pub reset_token_hash: Option<String>,

    pub reset_token_issued_at: Option<DateTimeUtc>,

    pub reset_token_expires_at: Option<DateTimeUtc>,

    pub last_login_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::unit_assignments::Entity")]
    UnitAssignments,
}

impl Related<super::unit_assignments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UnitAssignments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
