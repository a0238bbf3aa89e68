use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Account, AuditEntry, Center};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Public view of an account. Hashes, secrets and counters stay server side.
#[derive(Debug, Serialize, Clone)]
pub struct AccountDto {
    pub id: String,
    pub login_name: String,
    pub employee_code: String,
    pub display_name: String,
    pub role: String,
    pub is_superuser: bool,
    pub is_multi_unit: bool,
    pub two_factor_enabled: bool,
    pub last_login_at: Option<String>,
}

impl From<&Account> for AccountDto {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.to_string(),
            login_name: account.login_name.clone(),
            employee_code: account.employee_code.clone(),
            display_name: account.display_name.clone(),
            role: account.role.as_str().to_string(),
            is_superuser: account.is_superuser,
            is_multi_unit: account.is_multi_unit,
            two_factor_enabled: account.two_factor_enabled,
            last_login_at: account.last_login_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct CenterDto {
    pub id: String,
    pub code: String,
    pub name: String,
    pub capacity: i32,
    pub current: bool,
}

impl CenterDto {
    #[must_use]
    pub fn new(center: &Center, current: Option<&Center>) -> Self {
        Self {
            id: center.id.to_string(),
            code: center.code.clone(),
            name: center.name.clone(),
            capacity: center.capacity,
            current: current.is_some_and(|c| c.id == center.id),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditEntryDto {
    pub id: String,
    pub timestamp: String,
    pub actor_id: Option<String>,
    pub unit_id: Option<String>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub changes: Value,
    pub ip_address: Option<String>,
    pub detail: Value,
}

impl From<AuditEntry> for AuditEntryDto {
    fn from(entry: AuditEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            timestamp: entry.timestamp.to_rfc3339(),
            actor_id: entry.actor_id.map(|id| id.to_string()),
            unit_id: entry.unit_id.map(|id| id.to_string()),
            action: entry.action.as_str().to_string(),
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            changes: entry.changes,
            ip_address: entry.ip_address,
            detail: entry.detail,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
