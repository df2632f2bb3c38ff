use crate::modules::dispatch::Dispatcher;
use crate::modules::webhook::EventBus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::task::{self, TaskKind, TaskState, TaskStatus};
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// headroom a processor should leave when checking its deadline between
/// micro-steps, so the final checkpoint write still fits the slice
static SLICE_HEADROOM: Duration = Duration::from_secs(2);

/// true when a processor should stop starting new work and checkpoint
pub fn deadline_imminent(deadline: Instant) -> bool {
    Instant::now() + SLICE_HEADROOM >= deadline
}

/// Everything a processor may touch, shared by all executor loops of this
/// process, processors read task state from the task envelope only
pub struct ProcessorContext {
    pub db: DatabaseConnection,
    pub dispatcher: Arc<Dispatcher>,
    pub events: EventBus,

    /// recipients fetched and dispatched per orchestrator batch
    pub send_batch_size: u64,

    /// membership rows staged per segment build page
    pub segment_page_size: u64,
}

/// What a processor hands back to the runtime at the end of a slice, the
/// runtime persists this verbatim in a single UPDATE that also clears the
/// `running` claim
pub struct SliceOutcome {
    pub state: TaskState,

    /// `paused` when more work remains, `completed` / `failed` when done,
    /// `pending` re-queues a recurring task for `next_run_after`
    pub status: TaskStatus,

    pub progress: i32,

    pub next_run_after: Option<DateTime<Utc>>,

    pub error: Option<String>,
}

impl SliceOutcome {
    /// more work remains, run the next slice as soon as a executor is free
    pub fn paused(state: TaskState, progress: i32) -> SliceOutcome {
        SliceOutcome {
            state,
            status: TaskStatus::Paused,
            progress,
            next_run_after: None,
            error: None,
        }
    }

    /// more work remains but not before the given instant
    pub fn paused_until(state: TaskState, progress: i32, at: DateTime<Utc>) -> SliceOutcome {
        SliceOutcome {
            state,
            status: TaskStatus::Paused,
            progress,
            next_run_after: Some(at),
            error: None,
        }
    }

    pub fn completed(state: TaskState) -> SliceOutcome {
        SliceOutcome {
            state,
            status: TaskStatus::Completed,
            progress: 100,
            next_run_after: None,
            error: None,
        }
    }

    pub fn failed(state: TaskState, error: String) -> SliceOutcome {
        SliceOutcome {
            state,
            status: TaskStatus::Failed,
            progress: 0,
            next_run_after: None,
            error: Some(error),
        }
    }

    /// work is done for now, re-enter the queue at the given instant
    pub fn recurring(state: TaskState, next_run_after: DateTime<Utc>) -> SliceOutcome {
        SliceOutcome {
            state,
            status: TaskStatus::Pending,
            progress: 100,
            next_run_after: Some(next_run_after),
            error: None,
        }
    }
}

/// Durable mid-slice checkpoint of a tasks state, meant to be called inside
/// the same transaction as the batch side effects it describes, so the
/// counters and the rows they count can never diverge
pub async fn checkpoint_state<C: ConnectionTrait>(
    conn: &C,
    task_id: i32,
    state: &TaskState,
    progress: i32,
) -> Result<(), DbErr> {
    use sea_query::Expr;

    task::Entity::update_many()
        .col_expr(task::Column::State, Expr::value(state.clone()))
        .col_expr(task::Column::Progress, Expr::value(progress.clamp(0, 100)))
        .col_expr(task::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(task::Column::Id.eq(task_id))
        .exec(conn)
        .await?;

    Ok(())
}

/// A processor advances one kind of task by bounded micro-steps until the
/// work completes, a fatal error occurs or the deadline is imminent
///
/// processors must poll `deadline` between batches, the runtime never
/// forcibly interrupts a slice
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn run(
        &self,
        ctx: Arc<ProcessorContext>,
        task: task::Model,
        deadline: Instant,
    ) -> anyhow::Result<SliceOutcome>;
}
