//! Append-only audit trail.
//!
//! Services call [`AuditRecorder::record`] directly after a successful
//! persistence step, passing the [`RequestContext`] of the request that caused
//! it. Recording never fails the caller: storage errors are logged and the
//! method returns `None`.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::context::RequestContext;
use crate::db::{AuditEntry, AuditQuery};
use crate::domain::{AccountId, AuditAction, UnitId};

/// Field names whose values never appear in a diff.
const REDACTED_FIELDS: &[&str] = &[
    "password_hash",
    "totp_secret_enc",
    "reset_token_hash",
    "token_hash",
];

const REDACTED: &str = "<redacted>";

/// Anything the audit trail can point at.
pub trait AuditedResource: Serialize {
    const RESOURCE_TYPE: &'static str;

    fn resource_id(&self) -> String;

    /// Owning center, when the resource is center scoped.
    fn audit_unit(&self) -> Option<UnitId> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    pub fn of<R: AuditedResource>(resource: &R) -> Self {
        Self::new(R::RESOURCE_TYPE, resource.resource_id())
    }
}

/// One event to append. Actor and unit default to those on the context.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub actor: Option<Option<AccountId>>,
    pub unit: Option<Option<UnitId>>,
    pub resource: Option<ResourceRef>,
    pub changes: Map<String, Value>,
    pub detail: Value,
}

impl AuditRecord {
    #[must_use]
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            actor: None,
            unit: None,
            resource: None,
            changes: Map::new(),
            detail: Value::Object(Map::new()),
        }
    }

    /// Overrides the context actor, e.g. for a login where the context has
    /// none yet.
    #[must_use]
    pub const fn actor(mut self, actor: Option<AccountId>) -> Self {
        self.actor = Some(actor);
        self
    }

    #[must_use]
    pub const fn unit(mut self, unit: Option<UnitId>) -> Self {
        self.unit = Some(unit);
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    #[must_use]
    pub fn changes(mut self, changes: Map<String, Value>) -> Self {
        self.changes = changes;
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Field-level difference between two serialized states.
#[must_use]
pub fn field_diff<T: Serialize>(before: &T, after: &T) -> Map<String, Value> {
    let (Ok(Value::Object(old)), Ok(Value::Object(new))) =
        (serde_json::to_value(before), serde_json::to_value(after))
    else {
        return Map::new();
    };

    let mut changes = Map::new();
    for (field, new_value) in &new {
        let old_value = old.get(field).unwrap_or(&Value::Null);
        if old_value == new_value || field == "updated_at" {
            continue;
        }
        let entry = if REDACTED_FIELDS.contains(&field.as_str()) {
            json!({ "old": REDACTED, "new": REDACTED })
        } else {
            json!({ "old": old_value, "new": new_value })
        };
        changes.insert(field.clone(), entry);
    }
    changes
}

/// Serialized snapshot with secret fields replaced.
#[must_use]
pub fn redacted_snapshot<T: Serialize>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(Value::Object(mut map)) => {
            for field in REDACTED_FIELDS {
                if let Some(slot) = map.get_mut(*field)
                    && !slot.is_null()
                {
                    *slot = Value::String(REDACTED.to_string());
                }
            }
            Value::Object(map)
        }
        Ok(other) => other,
        Err(_) => Value::Null,
    }
}

#[async_trait::async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Appends an entry. Never propagates storage failures.
    async fn record(&self, ctx: &RequestContext, record: AuditRecord) -> Option<AuditEntry>;

    async fn query(&self, query: &AuditQuery) -> anyhow::Result<Vec<AuditEntry>>;

    async fn for_actor(&self, actor: AccountId) -> anyhow::Result<Vec<AuditEntry>> {
        self.query(&AuditQuery {
            actor: Some(actor.value()),
            ..AuditQuery::default()
        })
        .await
    }

    async fn for_unit(&self, unit: UnitId) -> anyhow::Result<Vec<AuditEntry>> {
        self.query(&AuditQuery {
            unit: Some(unit.value()),
            ..AuditQuery::default()
        })
        .await
    }

    async fn for_resource(&self, kind: &str, id: &str) -> anyhow::Result<Vec<AuditEntry>> {
        self.query(&AuditQuery {
            resource_type: Some(kind.to_string()),
            resource_id: Some(id.to_string()),
            ..AuditQuery::default()
        })
        .await
    }

    async fn by_action(&self, action: AuditAction) -> anyhow::Result<Vec<AuditEntry>> {
        self.query(&AuditQuery {
            actions: vec![action],
            ..AuditQuery::default()
        })
        .await
    }

    async fn within_window(&self, days: u32) -> anyhow::Result<Vec<AuditEntry>> {
        self.query(&AuditQuery {
            since: Some(Utc::now() - Duration::days(i64::from(days))),
            ..AuditQuery::default()
        })
        .await
    }

    /// Logins, logouts and views within the window.
    async fn security_events(&self, days: u32) -> anyhow::Result<Vec<AuditEntry>> {
        self.query(&AuditQuery {
            actions: AuditAction::SECURITY.to_vec(),
            since: Some(Utc::now() - Duration::days(i64::from(days))),
            ..AuditQuery::default()
        })
        .await
    }
}

/// Audits a newly persisted resource.
pub async fn audit_created<R>(
    recorder: &dyn AuditRecorder,
    ctx: &RequestContext,
    resource: &R,
) -> Option<AuditEntry>
where
    R: AuditedResource + Sync,
{
    let record = AuditRecord::new(AuditAction::Create)
        .resource(ResourceRef::of(resource))
        .detail(json!({ "created": redacted_snapshot(resource) }));
    recorder.record(ctx, scoped(record, resource)).await
}

/// Audits an update with a field-level diff of the two states.
pub async fn audit_updated<R>(
    recorder: &dyn AuditRecorder,
    ctx: &RequestContext,
    before: &R,
    after: &R,
    detail: Value,
) -> Option<AuditEntry>
where
    R: AuditedResource + Sync,
{
    let record = AuditRecord::new(AuditAction::Update)
        .resource(ResourceRef::of(after))
        .changes(field_diff(before, after))
        .detail(detail);
    recorder.record(ctx, scoped(record, after)).await
}

/// Audits a removal, keeping a redacted snapshot of the last state.
pub async fn audit_deleted<R>(
    recorder: &dyn AuditRecorder,
    ctx: &RequestContext,
    resource: &R,
) -> Option<AuditEntry>
where
    R: AuditedResource + Sync,
{
    let record = AuditRecord::new(AuditAction::Delete)
        .resource(ResourceRef::of(resource))
        .detail(json!({ "deleted": redacted_snapshot(resource) }));
    recorder.record(ctx, scoped(record, resource)).await
}

fn scoped<R: AuditedResource>(record: AuditRecord, resource: &R) -> AuditRecord {
    match resource.audit_unit() {
        Some(unit) => record.unit(Some(unit)),
        None => record,
    }
}

impl AuditedResource for crate::db::Account {
    const RESOURCE_TYPE: &'static str = "account";

    fn resource_id(&self) -> String {
        self.id.to_string()
    }
}

impl AuditedResource for crate::db::Center {
    const RESOURCE_TYPE: &'static str = "center";

    fn resource_id(&self) -> String {
        self.id.to_string()
    }

    fn audit_unit(&self) -> Option<UnitId> {
        Some(UnitId::from(self.id))
    }
}

impl AuditedResource for crate::db::UnitAssignment {
    const RESOURCE_TYPE: &'static str = "unit_assignment";

    fn resource_id(&self) -> String {
        self.id.to_string()
    }

    fn audit_unit(&self) -> Option<UnitId> {
        Some(UnitId::from(self.center_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: String,
        password_hash: String,
        capacity: i32,
        updated_at: i64,
    }

    #[test]
    fn test_field_diff_reports_changes_and_redacts_secrets() {
        let before = Sample {
            name: "North".into(),
            password_hash: "old".into(),
            capacity: 10,
            updated_at: 1,
        };
        let after = Sample {
            name: "North".into(),
            password_hash: "new".into(),
            capacity: 12,
            updated_at: 2,
        };

        let diff = field_diff(&before, &after);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff["capacity"], json!({ "old": 10, "new": 12 }));
        assert_eq!(
            diff["password_hash"],
            json!({ "old": REDACTED, "new": REDACTED })
        );
        assert!(!diff.contains_key("name"));
        assert!(!diff.contains_key("updated_at"));
    }

    #[test]
    fn test_snapshot_redaction() {
        let sample = Sample {
            name: "x".into(),
            password_hash: "secret".into(),
            capacity: 1,
            updated_at: 0,
        };
        let snapshot = redacted_snapshot(&sample);
        assert_eq!(snapshot["password_hash"], json!(REDACTED));
        assert_eq!(snapshot["name"], json!("x"));
    }
}
