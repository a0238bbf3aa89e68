use sea_orm_migration::prelude::*;

mod m20260301_accounts_and_centers;
mod m20260302_audit_entries;
mod m20260303_login_tickets;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_accounts_and_centers::Migration),
            Box::new(m20260302_audit_entries::Migration),
            Box::new(m20260303_login_tickets::Migration),
        ]
    }
}
