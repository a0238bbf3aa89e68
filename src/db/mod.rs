use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tower_sessions_sqlx_store::SqliteStore;
use tracing::info;
use uuid::Uuid;

use crate::entities::{accounts, audit_entries, centers, login_tickets};
use crate::services::lockout::{FailureOutcome, LockoutPolicy, LockoutState};

pub mod migrator;
pub mod repositories;

pub use crate::entities::accounts::Model as Account;
pub use crate::entities::audit_entries::Model as AuditEntry;
pub use crate::entities::centers::Model as Center;
pub use crate::entities::login_tickets::{Model as LoginTicket, TicketKind};
pub use crate::entities::unit_assignments::Model as UnitAssignment;
pub use repositories::account::{IdentityResolution, LockoutCounter};
pub use repositories::audit::AuditQuery;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)
                    .with_context(|| format!("Failed to create database file {path_str}"))?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    /// Session storage sharing this database.
    pub async fn session_store(&self) -> Result<SqliteStore> {
        let store = SqliteStore::new(self.conn.get_sqlite_connection_pool().clone());
        store
            .migrate()
            .await
            .context("Failed to migrate session table")?;
        Ok(store)
    }

    fn account_repo(&self) -> repositories::account::AccountRepository {
        repositories::account::AccountRepository::new(self.conn.clone())
    }

    fn center_repo(&self) -> repositories::center::CenterRepository {
        repositories::center::CenterRepository::new(self.conn.clone())
    }

    fn audit_repo(&self) -> repositories::audit::AuditRepository {
        repositories::audit::AuditRepository::new(self.conn.clone())
    }

    fn ticket_repo(&self) -> repositories::ticket::TicketRepository {
        repositories::ticket::TicketRepository::new(self.conn.clone())
    }

    // Accounts

    pub async fn resolve_identity(&self, identifier: &str) -> Result<IdentityResolution> {
        self.account_repo().resolve(identifier).await
    }

    pub async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        self.account_repo().get(id).await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.account_repo().list().await
    }

    pub async fn locked_accounts(&self, now: DateTime<Utc>) -> Result<Vec<Account>> {
        self.account_repo().list_locked(now).await
    }

    pub async fn password_expired_accounts(
        &self,
        changed_before: DateTime<Utc>,
    ) -> Result<Vec<Account>> {
        self.account_repo().list_password_expired(changed_before).await
    }

    pub async fn identity_taken(&self, values: &[&str]) -> Result<bool> {
        self.account_repo().identity_taken(values).await
    }

    pub async fn insert_account(&self, model: accounts::ActiveModel) -> Result<Account> {
        self.account_repo().insert(model).await
    }

    pub async fn update_account(&self, model: accounts::ActiveModel) -> Result<Account> {
        self.account_repo().update(model).await
    }

    pub async fn record_login_failure(
        &self,
        id: Uuid,
        counter: LockoutCounter,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        self.account_repo()
            .record_failure(id, counter, policy, now)
            .await
    }

    pub async fn record_login_success(
        &self,
        id: Uuid,
        primary: &LockoutState,
        second_factor: &LockoutState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.account_repo()
            .record_success(id, primary, second_factor, now)
            .await
    }

    pub async fn consume_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        new_password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.account_repo()
            .consume_reset_token(id, token_hash, new_password_hash, now)
            .await
    }

    // Centers and assignments

    pub async fn insert_center(&self, model: centers::ActiveModel) -> Result<Center> {
        self.center_repo().insert(model).await
    }

    pub async fn get_center(&self, id: Uuid) -> Result<Option<Center>> {
        self.center_repo().get(id).await
    }

    pub async fn get_center_by_code(&self, code: &str) -> Result<Option<Center>> {
        self.center_repo().get_by_code(code).await
    }

    pub async fn list_active_centers(&self) -> Result<Vec<Center>> {
        self.center_repo().list_active().await
    }

    pub async fn centers_for_account(&self, account_id: Uuid) -> Result<Vec<Center>> {
        self.center_repo().list_for_account(account_id).await
    }

    pub async fn primary_center(&self, account_id: Uuid) -> Result<Option<Center>> {
        self.center_repo().primary_for_account(account_id).await
    }

    pub async fn has_active_assignment(&self, account_id: Uuid) -> Result<bool> {
        self.center_repo().has_any_assignment(account_id).await
    }

    pub async fn is_assigned(&self, account_id: Uuid, center_id: Uuid) -> Result<bool> {
        self.center_repo().is_assigned(account_id, center_id).await
    }

    pub async fn assignments_for_account(&self, account_id: Uuid) -> Result<Vec<UnitAssignment>> {
        self.center_repo().assignments_for_account(account_id).await
    }

    pub async fn assign_unit(
        &self,
        account_id: Uuid,
        center_id: Uuid,
        primary: bool,
        assigned_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<UnitAssignment> {
        self.center_repo()
            .assign(account_id, center_id, primary, assigned_by, now)
            .await
    }

    pub async fn revoke_unit(&self, account_id: Uuid, center_id: Uuid) -> Result<bool> {
        self.center_repo().revoke(account_id, center_id).await
    }

    // Audit trail

    pub async fn append_audit(&self, entry: audit_entries::ActiveModel) -> Result<AuditEntry> {
        self.audit_repo().append(entry).await
    }

    pub async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        self.audit_repo().query(query).await
    }

    // Login tickets

    pub async fn issue_ticket(
        &self,
        account_id: Uuid,
        kind: TicketKind,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        self.ticket_repo()
            .issue(account_id, kind, now, expires_at)
            .await
    }

    pub async fn find_open_ticket(
        &self,
        token: &str,
        kind: TicketKind,
        now: DateTime<Utc>,
    ) -> Result<Option<login_tickets::Model>> {
        self.ticket_repo().find_open(token, kind, now).await
    }

    pub async fn record_ticket_attempt(&self, id: Uuid) -> Result<i32> {
        self.ticket_repo().record_attempt(id).await
    }

    pub async fn consume_ticket(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.ticket_repo().consume(id, now).await
    }
}
