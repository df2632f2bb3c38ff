use super::compiler::{self, CompileError};
use crate::modules::task::runtime::{self, ScheduleTask};
use chrono::Utc;
use entity::segment::SegmentTree;
use entity::task::{self, BuildSegmentState, TaskKind, TaskState};
use sea_orm::{DatabaseConnection, DbBackend, DbErr, ConnectionTrait, Statement};
use sea_query::{PostgresQueryBuilder, SelectStatement};

/// slice budget of scheduled segment builds
pub static BUILD_MAX_RUNTIME_SECONDS: i32 = 300;

pub fn to_statement(select: &SelectStatement) -> Statement {
    let (sql, values) = select.build(PostgresQueryBuilder);
    Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
}

pub async fn run_count(db: &DatabaseConnection, select: SelectStatement) -> Result<i64, DbErr> {
    let row = db.query_one(to_statement(&select)).await?;

    match row {
        Some(row) => row.try_get("", "cnt"),
        None => Ok(0),
    }
}

pub enum PreviewError {
    Compile(CompileError),
    Db(DbErr),
}

impl From<DbErr> for PreviewError {
    fn from(err: DbErr) -> Self {
        PreviewError::Db(err)
    }
}

/// Compiles and counts a segment tree without materializing anything, the
/// sample email list of previews is always empty, only the count leaves
/// the workspace
pub async fn preview(
    db: &DatabaseConnection,
    workspace_id: i32,
    tree: &SegmentTree,
) -> Result<i64, PreviewError> {
    let compiled =
        compiler::compile(workspace_id, tree, Utc::now()).map_err(PreviewError::Compile)?;

    Ok(run_count(db, compiler::count_select(compiled.select)).await?)
}

/// Schedules a build task for a segment, idempotent while a build for the
/// same segment is still alive
pub async fn schedule_build(
    db: &DatabaseConnection,
    workspace_id: i32,
    segment_id: i32,
) -> Result<task::Model, DbErr> {
    runtime::schedule(
        db,
        ScheduleTask {
            workspace_id,
            kind: TaskKind::BuildSegment,
            broadcast_id: None,
            segment_id: Some(segment_id),
            initial_state: TaskState::BuildSegment(BuildSegmentState::default()),
            next_run_after: Utc::now(),
            max_runtime_seconds: BUILD_MAX_RUNTIME_SECONDS,
        },
    )
    .await
}
