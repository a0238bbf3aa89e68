use crate::entities::prelude::*;
use crate::entities::unit_assignments;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(Accounts)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Centers)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(UnitAssignments)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // One assignment row per (account, center); revocation flips is_active
        manager
            .create_index(
                Index::create()
                    .name("idx_unit_assignments_account_center")
                    .table(UnitAssignments)
                    .col(unit_assignments::Column::AccountId)
                    .col(unit_assignments::Column::CenterId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_unit_assignments_center")
                    .table(UnitAssignments)
                    .col(unit_assignments::Column::CenterId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UnitAssignments).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Centers).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts).to_owned())
            .await
    }
}
