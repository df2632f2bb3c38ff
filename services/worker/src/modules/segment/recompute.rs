use super::service;
use crate::modules::task::{ProcessorContext, SliceOutcome, TaskProcessor};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use entity::segment::{self, SegmentStatus};
use entity::task::{self, CheckSegmentRecomputeState, TaskKind, TaskState};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::{sync::Arc, time::Instant};
use tracing::info;

/// Workspace global recurring task, runs daily and schedules a rebuild for
/// every time relative segment whose `recompute_after` has passed
///
/// soft deleted segments are skipped, their recompute instants go stale
/// harmlessly
pub struct CheckSegmentRecomputeProcessor;

#[async_trait]
impl TaskProcessor for CheckSegmentRecomputeProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::CheckSegmentRecompute
    }

    async fn run(
        &self,
        ctx: Arc<ProcessorContext>,
        task: task::Model,
        _deadline: Instant,
    ) -> anyhow::Result<SliceOutcome> {
        let now = Utc::now();

        let due = segment::Entity::find()
            .filter(segment::Column::WorkspaceId.eq(task.workspace_id))
            .filter(segment::Column::RecomputeAfter.lte(now))
            .filter(segment::Column::Status.ne(SegmentStatus::Deleted))
            .all(&ctx.db)
            .await?;

        let mut scheduled = 0;

        for seg in &due {
            service::schedule_build(&ctx.db, seg.workspace_id, seg.id).await?;
            scheduled += 1;
        }

        if scheduled > 0 {
            info!(
                "[SEGMENT] recompute check scheduled {} builds for workspace {}",
                scheduled, task.workspace_id
            );
        }

        let state = TaskState::CheckSegmentRecompute(CheckSegmentRecomputeState {
            last_checked_at: Some(now),
            scheduled,
        });

        Ok(SliceOutcome::recurring(state, now + Duration::days(1)))
    }
}
