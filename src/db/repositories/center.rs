use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::entities::{centers, unit_assignments};

pub struct CenterRepository {
    conn: DatabaseConnection,
}

impl CenterRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, model: centers::ActiveModel) -> Result<centers::Model> {
        model
            .insert(&self.conn)
            .await
            .context("Failed to insert center")
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<centers::Model>> {
        centers::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query center by ID")
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<centers::Model>> {
        centers::Entity::find()
            .filter(centers::Column::Code.eq(code))
            .one(&self.conn)
            .await
            .context("Failed to query center by code")
    }

    pub async fn list_active(&self) -> Result<Vec<centers::Model>> {
        centers::Entity::find()
            .filter(centers::Column::IsActive.eq(true))
            .order_by_asc(centers::Column::Code)
            .all(&self.conn)
            .await
            .context("Failed to list centers")
    }

    /// Active centers reachable through the account's active assignments.
    pub async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<centers::Model>> {
        centers::Entity::find()
            .join(JoinType::InnerJoin, centers::Relation::UnitAssignments.def())
            .filter(unit_assignments::Column::AccountId.eq(account_id))
            .filter(unit_assignments::Column::IsActive.eq(true))
            .filter(centers::Column::IsActive.eq(true))
            .order_by_desc(unit_assignments::Column::IsPrimary)
            .order_by_asc(centers::Column::Code)
            .all(&self.conn)
            .await
            .context("Failed to list centers for account")
    }

    pub async fn primary_for_account(&self, account_id: Uuid) -> Result<Option<centers::Model>> {
        centers::Entity::find()
            .join(JoinType::InnerJoin, centers::Relation::UnitAssignments.def())
            .filter(unit_assignments::Column::AccountId.eq(account_id))
            .filter(unit_assignments::Column::IsActive.eq(true))
            .filter(unit_assignments::Column::IsPrimary.eq(true))
            .filter(centers::Column::IsActive.eq(true))
            .one(&self.conn)
            .await
            .context("Failed to query primary center")
    }

    /// Whether any active assignment points at an active center.
    pub async fn has_any_assignment(&self, account_id: Uuid) -> Result<bool> {
        let count = unit_assignments::Entity::find()
            .join(JoinType::InnerJoin, unit_assignments::Relation::Center.def())
            .filter(unit_assignments::Column::AccountId.eq(account_id))
            .filter(unit_assignments::Column::IsActive.eq(true))
            .filter(centers::Column::IsActive.eq(true))
            .count(&self.conn)
            .await
            .context("Failed to count assignments")?;
        Ok(count > 0)
    }

    /// An active assignment linking the account to an active center.
    pub async fn is_assigned(&self, account_id: Uuid, center_id: Uuid) -> Result<bool> {
        let count = unit_assignments::Entity::find()
            .join(JoinType::InnerJoin, unit_assignments::Relation::Center.def())
            .filter(unit_assignments::Column::AccountId.eq(account_id))
            .filter(unit_assignments::Column::CenterId.eq(center_id))
            .filter(unit_assignments::Column::IsActive.eq(true))
            .filter(centers::Column::IsActive.eq(true))
            .count(&self.conn)
            .await
            .context("Failed to check assignment")?;
        Ok(count > 0)
    }

    pub async fn assignments_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<unit_assignments::Model>> {
        unit_assignments::Entity::find()
            .filter(unit_assignments::Column::AccountId.eq(account_id))
            .order_by_asc(unit_assignments::Column::AssignedAt)
            .all(&self.conn)
            .await
            .context("Failed to list assignments")
    }

    /// Creates or reactivates the assignment.
    ///
    /// A new primary assignment demotes the previous one in the same
    /// transaction, keeping at most one active primary per account.
    pub async fn assign(
        &self,
        account_id: Uuid,
        center_id: Uuid,
        primary: bool,
        assigned_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<unit_assignments::Model> {
        let txn = self.conn.begin().await?;

        if primary {
            unit_assignments::Entity::update_many()
                .col_expr(unit_assignments::Column::IsPrimary, Expr::value(false))
                .filter(unit_assignments::Column::AccountId.eq(account_id))
                .filter(unit_assignments::Column::CenterId.ne(center_id))
                .exec(&txn)
                .await
                .context("Failed to demote previous primary assignment")?;
        }

        let existing = unit_assignments::Entity::find()
            .filter(unit_assignments::Column::AccountId.eq(account_id))
            .filter(unit_assignments::Column::CenterId.eq(center_id))
            .one(&txn)
            .await?;

        let model = if let Some(existing) = existing {
            let mut active: unit_assignments::ActiveModel = existing.into();
            active.is_primary = Set(primary);
            active.is_active = Set(true);
            active.assigned_at = Set(now);
            active.assigned_by = Set(assigned_by);
            active.update(&txn).await?
        } else {
            unit_assignments::ActiveModel {
                id: Set(Uuid::new_v4()),
                account_id: Set(account_id),
                center_id: Set(center_id),
                is_primary: Set(primary),
                is_active: Set(true),
                assigned_at: Set(now),
                assigned_by: Set(assigned_by),
            }
            .insert(&txn)
            .await?
        };

        txn.commit().await?;
        Ok(model)
    }

    /// Soft-deletes the assignment. Returns false when none was active.
    pub async fn revoke(&self, account_id: Uuid, center_id: Uuid) -> Result<bool> {
        let result = unit_assignments::Entity::update_many()
            .col_expr(unit_assignments::Column::IsActive, Expr::value(false))
            .col_expr(unit_assignments::Column::IsPrimary, Expr::value(false))
            .filter(unit_assignments::Column::AccountId.eq(account_id))
            .filter(unit_assignments::Column::CenterId.eq(center_id))
            .filter(unit_assignments::Column::IsActive.eq(true))
            .exec(&self.conn)
            .await
            .context("Failed to revoke assignment")?;
        Ok(result.rows_affected > 0)
    }
}
