use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PrimaryKeyTrait, QueryFilter};

/// Entities owned by a workspace, the column names the owner
///
/// implementing this buys the entity [`find_by_id_scoped`], so tenant
/// checks are a column declaration instead of a hand written query per
/// entity
pub trait WorkspaceScoped: EntityTrait {
    fn workspace_column() -> Self::Column;
}

/// Fetches an entity by primary key, answering None for rows owned by a
/// different workspace, callers never learn whether the id exists at all
/// outside their tenant
pub async fn find_by_id_scoped<E>(
    db: &DatabaseConnection,
    id: <E::PrimaryKey as PrimaryKeyTrait>::ValueType,
    workspace_id: i32,
) -> Result<Option<E::Model>, DbErr>
where
    E: WorkspaceScoped,
{
    E::find_by_id(id)
        .filter(E::workspace_column().eq(workspace_id))
        .one(db)
        .await
}
