use crate::entities::audit_entries::Column;
use crate::entities::prelude::*;
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
                    .create_table_from_entity(AuditEntries)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        let indexes: [(&str, Vec<Column>); 5] = [
            ("idx_audit_entries_timestamp", vec![Column::Timestamp]),
            (
                "idx_audit_entries_actor",
                vec![Column::ActorId, Column::Timestamp],
            ),
            (
                "idx_audit_entries_unit",
                vec![Column::UnitId, Column::Timestamp],
            ),
            (
                "idx_audit_entries_action",
                vec![Column::Action, Column::Timestamp],
            ),
            (
                "idx_audit_entries_resource",
                vec![Column::ResourceType, Column::ResourceId],
            ),
        ];

        for (name, columns) in indexes {
            let mut index = Index::create();
            index.name(name).table(AuditEntries).if_not_exists();
            for column in columns {
                index.col(column);
            }
            manager.create_index(index.to_owned()).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuditEntries).to_owned())
            .await
    }
}
