use super::compiler;
use super::schedule::next_local_midnight;
use super::service::{run_count, to_statement};
use crate::modules::task::processor::{checkpoint_state, deadline_imminent};
use crate::modules::task::{ProcessorContext, SliceOutcome, TaskProcessor};
use crate::modules::webhook::fanout;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use entity::segment::{self, SegmentStatus};
use entity::segment_membership;
use entity::task::{self, BuildSegmentState, TaskKind, TaskState};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, TransactionTrait,
};
use sea_query::{Alias, Expr, Order};
use serde_json::json;
use shared::dto::events::{AppEvent, EventKind};
use std::{collections::HashSet, sync::Arc, time::Instant};
use tracing::info;

/// Materializes a segments membership set: streams the compiled query in
/// pages into `segment_membership` rows at a bumped version, diffs against
/// the previous version and emits `segment.joined` / `segment.left` events
///
/// resumable, `offset` is the staging cursor and `segment_version` the
/// fence separating this build from the previous one
pub struct BuildSegmentProcessor;

async fn mark_segment_failed(db: &DatabaseConnection, segment_id: i32, error: &str) -> Result<(), DbErr> {
    segment::Entity::update_many()
        .col_expr(segment::Column::Status, Expr::value(SegmentStatus::Failed))
        .col_expr(segment::Column::Error, Expr::value(Some(String::from(error))))
        .col_expr(segment::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(segment::Column::Id.eq(segment_id))
        .exec(db)
        .await?;

    Ok(())
}

impl BuildSegmentProcessor {
    fn progress(state: &BuildSegmentState) -> i32 {
        if state.total <= 0 {
            return 0;
        }

        (((state.offset as f64 / state.total as f64) * 100.0) as i32).min(99)
    }
}

#[async_trait]
impl TaskProcessor for BuildSegmentProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::BuildSegment
    }

    async fn run(
        &self,
        ctx: Arc<ProcessorContext>,
        task: task::Model,
        deadline: Instant,
    ) -> anyhow::Result<SliceOutcome> {
        let TaskState::BuildSegment(mut state) = task.state.clone() else {
            return Ok(SliceOutcome::failed(
                task.state.clone(),
                String::from("task state is not a build_segment checkpoint"),
            ));
        };

        let segment_id = task
            .segment_id
            .ok_or_else(|| anyhow!("build_segment task {} has no segment id", task.id))?;

        let Some(seg) = segment::Entity::find_by_id(segment_id).one(&ctx.db).await? else {
            return Ok(SliceOutcome::failed(
                TaskState::BuildSegment(state),
                String::from("segment not found"),
            ));
        };

        // soft deleted mid build, drop the work
        if seg.status == SegmentStatus::Deleted {
            return Ok(SliceOutcome::completed(TaskState::BuildSegment(state)));
        }

        // relative date windows are resolved against the instant the build
        // started, a resumed slice must page the exact same result set
        let evaluated_at = state.evaluated_at.unwrap_or_else(Utc::now);

        let compiled = match compiler::compile(seg.workspace_id, &seg.tree, evaluated_at) {
            Ok(compiled) => compiled,
            Err(err) => {
                mark_segment_failed(&ctx.db, segment_id, &err.to_string()).await?;

                return Ok(SliceOutcome::failed(
                    TaskState::BuildSegment(state),
                    err.to_string(),
                ));
            }
        };

        // first slice of this build: bump the version fence, freeze the
        // evaluation instant and snapshot the total for progress reporting
        if state.segment_version == 0 {
            let version = seg.version + 1;
            let total = run_count(&ctx.db, compiler::count_select(compiled.select.clone())).await?;

            segment::Entity::update_many()
                .col_expr(segment::Column::Version, Expr::value(version))
                .col_expr(segment::Column::Status, Expr::value(SegmentStatus::Building))
                .col_expr(segment::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(segment::Column::Id.eq(segment_id))
                .exec(&ctx.db)
                .await?;

            state.segment_version = version;
            state.evaluated_at = Some(evaluated_at);
            state.total = total;
        }

        let version = state.segment_version;

        loop {
            if deadline_imminent(deadline) {
                return Ok(SliceOutcome::paused(
                    TaskState::BuildSegment(state.clone()),
                    Self::progress(&state),
                ));
            }

            let mut page_query = compiled.select.clone();
            page_query
                .order_by(Alias::new("email"), Order::Asc)
                .limit(ctx.segment_page_size)
                .offset(state.offset as u64);

            let rows = ctx.db.query_all(to_statement(&page_query)).await?;

            if rows.is_empty() {
                break;
            }

            let emails = rows
                .iter()
                .map(|row| row.try_get::<String>("", "email"))
                .collect::<Result<Vec<_>, _>>()?;

            let existing: HashSet<String> = segment_membership::Entity::find()
                .filter(segment_membership::Column::SegmentId.eq(segment_id))
                .filter(segment_membership::Column::Email.is_in(emails.clone()))
                .all(&ctx.db)
                .await?
                .into_iter()
                .map(|m| m.email)
                .collect();

            let joined: Vec<String> = emails
                .iter()
                .filter(|email| !existing.contains(*email))
                .cloned()
                .collect();

            let now = Utc::now();
            let page_len = emails.len();

            let txn = ctx.db.begin().await?;

            if !existing.is_empty() {
                segment_membership::Entity::update_many()
                    .col_expr(segment_membership::Column::Version, Expr::value(version))
                    .col_expr(segment_membership::Column::MatchedAt, Expr::value(now))
                    .filter(segment_membership::Column::SegmentId.eq(segment_id))
                    .filter(
                        segment_membership::Column::Email
                            .is_in(existing.iter().cloned().collect::<Vec<_>>()),
                    )
                    .exec(&txn)
                    .await?;
            }

            let mut events = Vec::with_capacity(joined.len());

            if !joined.is_empty() {
                let memberships = joined.iter().map(|email| segment_membership::ActiveModel {
                    segment_id: Set(segment_id),
                    email: Set(email.clone()),
                    workspace_id: Set(seg.workspace_id),
                    version: Set(version),
                    matched_at: Set(now),
                });

                segment_membership::Entity::insert_many(memberships)
                    .exec_without_returning(&txn)
                    .await?;

                for email in &joined {
                    let event = AppEvent::new(
                        EventKind::SegmentJoined,
                        seg.workspace_id,
                        email,
                        json!({ "segment_id": segment_id }),
                    );

                    fanout::append_to_timeline(&txn, &event).await?;
                    events.push(event);
                }
            }

            state.offset += page_len as i64;
            state.added += joined.len() as i64;
            state.unchanged += existing.len() as i64;

            checkpoint_state(&txn, task.id, &TaskState::BuildSegment(state.clone()), Self::progress(&state)).await?;

            txn.commit().await?;

            for event in events {
                ctx.events.publish(event);
            }

            if (page_len as u64) < ctx.segment_page_size {
                break;
            }
        }

        // the staged set is complete, everything still on an older version
        // left the segment
        let leavers = segment_membership::Entity::find()
            .filter(segment_membership::Column::SegmentId.eq(segment_id))
            .filter(segment_membership::Column::Version.lt(version))
            .all(&ctx.db)
            .await?;

        let users_count = state.added + state.unchanged;
        state.removed = leavers.len() as i64;

        let recompute_after = if compiled.time_relative {
            next_local_midnight(&seg.timezone, Utc::now())
        } else {
            None
        };

        let txn = ctx.db.begin().await?;

        let mut events = Vec::with_capacity(leavers.len());

        if !leavers.is_empty() {
            segment_membership::Entity::delete_many()
                .filter(segment_membership::Column::SegmentId.eq(segment_id))
                .filter(segment_membership::Column::Version.lt(version))
                .exec(&txn)
                .await?;

            for leaver in &leavers {
                let event = AppEvent::new(
                    EventKind::SegmentLeft,
                    seg.workspace_id,
                    &leaver.email,
                    json!({ "segment_id": segment_id }),
                );

                fanout::append_to_timeline(&txn, &event).await?;
                events.push(event);
            }
        }

        segment::Entity::update_many()
            .col_expr(segment::Column::UsersCount, Expr::value(users_count))
            .col_expr(segment::Column::Status, Expr::value(SegmentStatus::Active))
            .col_expr(segment::Column::RecomputeAfter, Expr::value(recompute_after))
            .col_expr(segment::Column::Error, Expr::value(Option::<String>::None))
            .col_expr(segment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(segment::Column::Id.eq(segment_id))
            .exec(&txn)
            .await?;

        checkpoint_state(&txn, task.id, &TaskState::BuildSegment(state.clone()), 100).await?;

        txn.commit().await?;

        for event in events {
            ctx.events.publish(event);
        }

        info!(
            "[SEGMENT] build of segment {} v{} done: +{} -{} ={}",
            segment_id, version, state.added, state.removed, state.unchanged
        );

        Ok(SliceOutcome::completed(TaskState::BuildSegment(state)))
    }
}
