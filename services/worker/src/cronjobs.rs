use crate::modules::task::runtime::{ScheduleTask, TaskRuntime};
use chrono::Utc;
use entity::task::{CheckSegmentRecomputeState, TaskKind, TaskState};
use entity::workspace;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::{sync::Arc, time::Duration};
use tracing::error;

/// slice budget of the daily segment recompute check
static RECOMPUTE_CHECK_MAX_RUNTIME_SECONDS: i32 = 60;

/// starts the executor loops, each claims and advances due tasks on a
/// polling interval, the claim CAS keeps them from stepping on each other
pub fn start_executor_loops(
    runtime: Arc<TaskRuntime>,
    executor_count: u16,
    poll_interval: Duration,
    claim_limit: u64,
) {
    println!(
        "[CRON] starting {} task executors polling every {:?}",
        executor_count, poll_interval
    );

    for _ in 0..executor_count {
        let runtime = runtime.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);

            loop {
                interval.tick().await;
                runtime.execute_pending(claim_limit).await;
            }
        });
    }
}

/// starts a tokio task that reverts leaked `running` claims (executor died
/// between claim and commit) back to `paused` every interval
pub fn start_stale_claim_sweeper(runtime: Arc<TaskRuntime>, stale_after_seconds: i64) {
    println!("[CRON] sweeping leaked task claims older than {}s", stale_after_seconds);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            if let Err(err) = runtime.revert_stale_running(stale_after_seconds).await {
                error!("[CRON] stale claim sweep failed: {}", err);
            }
        }
    });
}

/// makes sure every workspace has its recurring segment recompute check,
/// scheduling is idempotent so restarts never duplicate them
pub async fn ensure_segment_recompute_tasks(db: &DatabaseConnection, runtime: &TaskRuntime) {
    let workspaces = match workspace::Entity::find().all(db).await {
        Ok(workspaces) => workspaces,
        Err(err) => {
            error!("[CRON] failed to list workspaces: {}", err);
            return;
        }
    };

    for ws in workspaces {
        let scheduled = runtime
            .schedule(ScheduleTask {
                workspace_id: ws.id,
                kind: TaskKind::CheckSegmentRecompute,
                broadcast_id: None,
                segment_id: None,
                initial_state: TaskState::CheckSegmentRecompute(
                    CheckSegmentRecomputeState::default(),
                ),
                next_run_after: Utc::now(),
                max_runtime_seconds: RECOMPUTE_CHECK_MAX_RUNTIME_SECONDS,
            })
            .await;

        if let Err(err) = scheduled {
            error!(
                "[CRON] failed to schedule recompute check for workspace {}: {}",
                ws.id, err
            );
        }
    }
}
