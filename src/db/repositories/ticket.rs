use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::entities::login_tickets::{self, TicketKind};
use crate::services::secrets::{generate_token, token_digest};

pub struct TicketRepository {
    conn: DatabaseConnection,
}

impl TicketRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Stores a new ticket and returns the plaintext token, which is never
    /// persisted.
    pub async fn issue(
        &self,
        account_id: Uuid,
        kind: TicketKind,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        let token = generate_token();

        login_tickets::ActiveModel {
            id: Set(Uuid::new_v4()),
            token_hash: Set(token_digest(&token)),
            account_id: Set(account_id),
            kind: Set(kind),
            attempts: Set(0),
            expires_at: Set(expires_at),
            consumed_at: Set(None),
            created_at: Set(now),
        }
        .insert(&self.conn)
        .await
        .context("Failed to store login ticket")?;

        Ok(token)
    }

    /// An unconsumed, unexpired ticket of the given kind.
    pub async fn find_open(
        &self,
        token: &str,
        kind: TicketKind,
        now: DateTime<Utc>,
    ) -> Result<Option<login_tickets::Model>> {
        let ticket = login_tickets::Entity::find()
            .filter(login_tickets::Column::TokenHash.eq(token_digest(token.trim())))
            .filter(login_tickets::Column::Kind.eq(kind))
            .filter(login_tickets::Column::ConsumedAt.is_null())
            .one(&self.conn)
            .await
            .context("Failed to query login ticket")?;

        Ok(ticket.filter(|t| t.expires_at > now))
    }

    /// Increments and returns the wrong-code counter of a ticket.
    pub async fn record_attempt(&self, id: Uuid) -> Result<i32> {
        login_tickets::Entity::update_many()
            .col_expr(
                login_tickets::Column::Attempts,
                Expr::col(login_tickets::Column::Attempts).add(1),
            )
            .filter(login_tickets::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to count ticket attempt")?;

        let ticket = login_tickets::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to re-read login ticket")?;
        Ok(ticket.map_or(i32::MAX, |t| t.attempts))
    }

    /// Marks the ticket used. Returns false if another request got there first.
    pub async fn consume(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = login_tickets::Entity::update_many()
            .col_expr(login_tickets::Column::ConsumedAt, Expr::value(now))
            .filter(login_tickets::Column::Id.eq(id))
            .filter(login_tickets::Column::ConsumedAt.is_null())
            .exec(&self.conn)
            .await
            .context("Failed to consume login ticket")?;
        Ok(result.rows_affected == 1)
    }
}
