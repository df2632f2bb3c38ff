use super::processor::{ProcessorContext, TaskProcessor};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use entity::task::{self, TaskKind, TaskState, TaskStatus};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use sea_query::Expr;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{error, info, warn};

/// slice budget applied when a task row carries a non positive
/// max_runtime_seconds
static DEFAULT_MAX_RUNTIME_SECONDS: i64 = 300;

#[derive(Debug, Default, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    /// tasks this call claimed and ran a slice of
    pub executed: u32,

    /// subset of executed whose slice ended with work remaining
    pub timed_out: u32,
}

/// input for scheduling a task, the `(broadcast_id | segment_id |
/// workspace_id, kind)` key makes scheduling idempotent
pub struct ScheduleTask {
    pub workspace_id: i32,
    pub kind: TaskKind,
    pub broadcast_id: Option<i32>,
    pub segment_id: Option<i32>,
    pub initial_state: TaskState,
    pub next_run_after: DateTime<Utc>,
    pub max_runtime_seconds: i32,
}

/// Inserts a pending task unless a live task for the same idempotency key
/// already exists, in which case that task is returned untouched
///
/// free standing so processors (which never see the runtime itself) can
/// schedule follow up tasks, eg: the segment recompute check scheduling
/// builds
pub async fn schedule(db: &DatabaseConnection, input: ScheduleTask) -> Result<task::Model, DbErr> {
    let mut existing = task::Entity::find()
        .filter(task::Column::WorkspaceId.eq(input.workspace_id))
        .filter(task::Column::Kind.eq(input.kind))
        .filter(task::Column::Status.is_in([
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Paused,
        ]));

    if let Some(broadcast_id) = input.broadcast_id {
        existing = existing.filter(task::Column::BroadcastId.eq(broadcast_id));
    }

    if let Some(segment_id) = input.segment_id {
        existing = existing.filter(task::Column::SegmentId.eq(segment_id));
    }

    if let Some(task) = existing.one(db).await? {
        return Ok(task);
    }

    let now = Utc::now();

    task::ActiveModel {
        created_at: Set(now),
        updated_at: Set(now),
        workspace_id: Set(input.workspace_id),
        kind: Set(input.kind),
        status: Set(TaskStatus::Pending),
        progress: Set(0),
        state: Set(input.initial_state),
        max_runtime_seconds: Set(input.max_runtime_seconds),
        next_run_after: Set(input.next_run_after),
        broadcast_id: Set(input.broadcast_id),
        segment_id: Set(input.segment_id),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// The durable task executor, claims due tasks with a compare and swap and
/// advances each one by a single processor slice, persisting whatever the
/// processor returns
///
/// any number of runtimes may run concurrently (in this process or others),
/// the claim CAS guarantees a task is only ever held by one of them
pub struct TaskRuntime {
    db: DatabaseConnection,
    ctx: Arc<ProcessorContext>,
    processors: HashMap<TaskKind, Arc<dyn TaskProcessor>>,
}

impl TaskRuntime {
    pub fn new(ctx: Arc<ProcessorContext>) -> TaskRuntime {
        TaskRuntime {
            db: ctx.db.clone(),
            ctx,
            processors: HashMap::new(),
        }
    }

    pub fn register(&mut self, processor: Arc<dyn TaskProcessor>) {
        self.processors.insert(processor.kind(), processor);
    }

    /// Inserts a pending task unless a live task for the same idempotency
    /// key already exists, in which case that task is returned untouched
    pub async fn schedule(&self, input: ScheduleTask) -> Result<task::Model, DbErr> {
        schedule(&self.db, input).await
    }

    /// Atomically claims a task by flipping it to `running`
    ///
    /// this is the sole mechanism preventing duplicate execution so it must
    /// stay a single conditional UPDATE whose predicate carries the status
    /// and due-time checks, never a read followed by a write
    async fn mark_as_running(&self, task_id: i32, force: bool) -> Result<bool, DbErr> {
        let now = Utc::now();

        let mut update = task::Entity::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Running))
            .col_expr(task::Column::LastRunAt, Expr::value(now))
            .col_expr(task::Column::UpdatedAt, Expr::value(now))
            .filter(task::Column::Id.eq(task_id))
            .filter(task::Column::Status.is_in([TaskStatus::Pending, TaskStatus::Paused]));

        // force execution (operator initiated) skips the due-time gate but
        // never the status gate
        if !force {
            update = update.filter(task::Column::NextRunAfter.lte(now));
        }

        let result = update.exec(&self.db).await?;

        Ok(result.rows_affected == 1)
    }

    /// Claims up to `limit` due tasks and runs one slice of each
    pub async fn execute_pending(&self, limit: u64) -> ExecutionSummary {
        let now = Utc::now();
        let mut summary = ExecutionSummary::default();

        let candidates = match task::Entity::find()
            .filter(task::Column::Status.is_in([TaskStatus::Pending, TaskStatus::Paused]))
            .filter(task::Column::NextRunAfter.lte(now))
            .order_by_asc(task::Column::NextRunAfter)
            .limit(limit)
            .all(&self.db)
            .await
        {
            Ok(tasks) => tasks,
            Err(err) => {
                error!("[TASK] failed to query due tasks: {}", err);
                return summary;
            }
        };

        for candidate in candidates {
            match self.execute_task(candidate.id, false).await {
                // another executor got there first, not an error
                Ok(None) => {}

                Ok(Some(status)) => {
                    summary.executed += 1;

                    if status == TaskStatus::Paused {
                        summary.timed_out += 1;
                    }
                }

                Err(err) => {
                    error!("[TASK] slice of task {} failed: {}", candidate.id, err);
                }
            }
        }

        summary
    }

    /// Runs one slice of one task, `Ok(None)` means the claim was lost to
    /// another executor and nothing ran
    ///
    /// the processor runs on its own tokio task so a panic is contained and
    /// recorded as a `failed` status instead of taking the executor down
    pub async fn execute_task(&self, task_id: i32, force: bool) -> anyhow::Result<Option<TaskStatus>> {
        if !self.mark_as_running(task_id, force).await? {
            return Ok(None);
        }

        let task = task::Entity::find_by_id(task_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task {} vanished after claim", task_id))?;

        let Some(processor) = self.processors.get(&task.kind) else {
            warn!("[TASK] no processor registered for {}", task.kind);
            self.commit_failure(task_id, &task.state, "no processor registered for task kind")
                .await?;
            return Ok(Some(TaskStatus::Failed));
        };

        let max_runtime = if task.max_runtime_seconds > 0 {
            task.max_runtime_seconds as i64
        } else {
            DEFAULT_MAX_RUNTIME_SECONDS
        };
        let deadline = Instant::now() + Duration::from_secs(max_runtime as u64);

        let processor = processor.clone();
        let ctx = self.ctx.clone();
        let state_before = task.state.clone();

        let handle = tokio::spawn(async move { processor.run(ctx, task, deadline).await });

        let outcome = match handle.await {
            Ok(Ok(outcome)) => outcome,

            Ok(Err(err)) => {
                error!("[TASK] processor for task {} errored: {:#}", task_id, err);
                self.commit_failure(task_id, &state_before, &format!("{:#}", err))
                    .await?;
                return Ok(Some(TaskStatus::Failed));
            }

            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "processor panicked"
                } else {
                    "processor was aborted"
                };

                error!("[TASK] {} on task {}", reason, task_id);
                self.commit_failure(task_id, &state_before, reason).await?;
                return Ok(Some(TaskStatus::Failed));
            }
        };

        let status = outcome.status;
        let now = Utc::now();

        let mut update = task::Entity::update_many()
            .col_expr(task::Column::Status, Expr::value(outcome.status))
            .col_expr(task::Column::Progress, Expr::value(outcome.progress.clamp(0, 100)))
            .col_expr(task::Column::State, Expr::value(outcome.state))
            .col_expr(task::Column::Error, Expr::value(outcome.error))
            .col_expr(task::Column::UpdatedAt, Expr::value(now))
            .filter(task::Column::Id.eq(task_id));

        if let Some(next_run_after) = outcome.next_run_after {
            update = update.col_expr(task::Column::NextRunAfter, Expr::value(next_run_after));
        }

        update.exec(&self.db).await?;

        Ok(Some(status))
    }

    async fn commit_failure(
        &self,
        task_id: i32,
        state: &TaskState,
        error: &str,
    ) -> Result<(), DbErr> {
        task::Entity::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Failed))
            .col_expr(task::Column::State, Expr::value(state.clone()))
            .col_expr(task::Column::Error, Expr::value(Some(String::from(error))))
            .col_expr(task::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(task::Column::Id.eq(task_id))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    /// Reverts `running` tasks whose claim leaked (executor crashed between
    /// claim and commit) back to `paused` so they become claimable again
    pub async fn revert_stale_running(&self, stale_after_seconds: i64) -> Result<u64, DbErr> {
        let threshold = Utc::now() - ChronoDuration::seconds(stale_after_seconds);

        let result = task::Entity::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Paused))
            .col_expr(task::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(task::Column::Status.eq(TaskStatus::Running))
            .filter(task::Column::LastRunAt.lt(threshold))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(
                "[TASK] reverted {} leaked running tasks to paused",
                result.rows_affected
            );
        }

        Ok(result.rows_affected)
    }
}
