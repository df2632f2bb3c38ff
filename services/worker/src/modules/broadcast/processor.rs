use super::audience::{self, Recipient};
use super::service;
use super::winner;
use crate::config::app_config;
use crate::modules::dispatch::{OutgoingEmail, SendOutcome};
use crate::modules::task::processor::{checkpoint_state, deadline_imminent};
use crate::modules::task::{ProcessorContext, SliceOutcome, TaskProcessor};
use crate::modules::tracking;
use crate::modules::webhook::fanout;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use entity::broadcast::{self, BroadcastStatus, Variation};
use entity::message_history::{self, MessageStatus};
use entity::task::{self, SendBroadcastState, SendPhase, TaskKind, TaskState, VariationCounters};
use entity::{email_integration, template};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use sea_query::{Expr, OnConflict};
use serde_json::json;
use shared::dto::events::{AppEvent, EventKind};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};
use tracing::{info, warn};
use uuid::Uuid;

/// how long a slice waits before re-checking a broadcast that is paused,
/// waiting on a manual winner, or throttled
static POLL_SECONDS: i64 = 60;

/// statuses a broadcast can be in while its send task is actively slicing
static SENDABLE: [BroadcastStatus; 5] = [
    BroadcastStatus::Scheduled,
    BroadcastStatus::Sending,
    BroadcastStatus::Testing,
    BroadcastStatus::TestCompleted,
    BroadcastStatus::WinnerSelected,
];

/// why a send loop stopped before its phase finished
enum PhaseEnd {
    /// the audience cursor is exhausted, the phase is done
    Exhausted,

    /// the test phase sample target was reached
    QuotaMet,

    /// slice deadline, checkpointed, resume on the next slice
    Deadline,

    /// rate limiter starved the slice budget
    Throttled,

    /// the circuit breaker opened, the broadcast was paused
    BreakerOpen,
}

/// which template each recipient of the running phase receives
enum Assignment<'a> {
    Fixed(i32),
    ByVariation(&'a [Variation]),
}

/// Advances a broadcast through its phased send: `single` for plain
/// broadcasts, `test` then `winner` for A/B tested ones
///
/// every batch commits its message history rows, timeline events and the
/// task state checkpoint in one transaction, so `sent_count + failed_count
/// == recipient_offset` holds at every durable point
pub struct SendBroadcastProcessor;

#[async_trait]
impl TaskProcessor for SendBroadcastProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::SendBroadcast
    }

    async fn run(
        &self,
        ctx: Arc<ProcessorContext>,
        task: task::Model,
        deadline: Instant,
    ) -> anyhow::Result<SliceOutcome> {
        let TaskState::SendBroadcast(mut state) = task.state.clone() else {
            return Ok(SliceOutcome::failed(
                task.state.clone(),
                String::from("task state is not a send_broadcast checkpoint"),
            ));
        };

        let broadcast_id = task
            .broadcast_id
            .ok_or_else(|| anyhow!("send_broadcast task {} has no broadcast id", task.id))?;

        let Some(mut bc) = broadcast::Entity::find_by_id(broadcast_id).one(&ctx.db).await? else {
            return Ok(SliceOutcome::failed(
                TaskState::SendBroadcast(state),
                String::from("broadcast not found"),
            ));
        };

        // terminal or externally held statuses first
        match bc.status {
            BroadcastStatus::Sent | BroadcastStatus::Cancelled => {
                return Ok(SliceOutcome::completed(TaskState::SendBroadcast(state)));
            }

            BroadcastStatus::Failed => {
                return Ok(SliceOutcome::failed(
                    TaskState::SendBroadcast(state),
                    String::from("broadcast is failed"),
                ));
            }

            BroadcastStatus::Draft => {
                return Ok(SliceOutcome::failed(
                    TaskState::SendBroadcast(state),
                    String::from("broadcast was never scheduled"),
                ));
            }

            // an explicit resume flips the status back and re-nudges the task
            BroadcastStatus::Paused => {
                let state_progress = progress(&state);
                return Ok(SliceOutcome::paused_until(
                    TaskState::SendBroadcast(state),
                    state_progress,
                    Utc::now() + ChronoDuration::seconds(POLL_SECONDS),
                ));
            }

            _ => {}
        }

        let Some(integration) = resolve_integration(&ctx.db, &bc).await? else {
            fail_broadcast(&ctx.db, bc.id).await?;
            return Ok(SliceOutcome::failed(
                TaskState::SendBroadcast(state),
                String::from("no email integration configured for the workspace"),
            ));
        };

        // freeze the audience size on the very first slice, used as the
        // progress denominator only, completion derives from the cursor
        if state.total_recipients == 0 && state.recipient_offset == 0 {
            match audience::count(&ctx.db, bc.workspace_id, &bc.audience).await {
                Ok(total) => state.total_recipients = total,
                Err(err) => {
                    fail_broadcast(&ctx.db, bc.id).await?;
                    return Ok(SliceOutcome::failed(
                        TaskState::SendBroadcast(state),
                        err.to_string(),
                    ));
                }
            }
        }

        loop {
            match state.phase {
                SendPhase::Single => {
                    let Some(template_id) = bc.template_id else {
                        fail_broadcast(&ctx.db, bc.id).await?;
                        return Ok(SliceOutcome::failed(
                            TaskState::SendBroadcast(state),
                            String::from("broadcast has no template"),
                        ));
                    };

                    service::transition_status(
                        &ctx.db,
                        bc.id,
                        &[BroadcastStatus::Scheduled],
                        BroadcastStatus::Sending,
                    )
                    .await?;

                    let templates = load_templates(&ctx.db, &[template_id]).await?;

                    let end = send_loop(
                        &ctx,
                        task.id,
                        &bc,
                        &integration,
                        &templates,
                        &mut state,
                        Assignment::Fixed(template_id),
                        None,
                        false,
                        deadline,
                    )
                    .await?;

                    match end {
                        PhaseEnd::Exhausted => {
                            return finalize_sent(&ctx.db, &bc, state).await;
                        }
                        other => return Ok(pause_outcome(other, state)),
                    }
                }

                SendPhase::Test => {
                    let Some(test) = bc
                        .test_settings
                        .clone()
                        .filter(|t| t.enabled && !t.variations.is_empty())
                    else {
                        // scheduled as a test but the settings vanished,
                        // treat as a single phase send
                        state.phase = SendPhase::Single;
                        continue;
                    };

                    if state.test_started_at.is_none() {
                        service::transition_status(
                            &ctx.db,
                            bc.id,
                            &[BroadcastStatus::Scheduled, BroadcastStatus::Sending],
                            BroadcastStatus::Testing,
                        )
                        .await?;

                        let quota = sample_quota(state.total_recipients, test.sample_percentage);

                        let template_ids: Vec<i32> =
                            test.variations.iter().map(|v| v.template_id).collect();
                        let templates = load_templates(&ctx.db, &template_ids).await?;

                        let end = send_loop(
                            &ctx,
                            task.id,
                            &bc,
                            &integration,
                            &templates,
                            &mut state,
                            Assignment::ByVariation(&test.variations),
                            Some(quota),
                            false,
                            deadline,
                        )
                        .await?;

                        match end {
                            PhaseEnd::Exhausted | PhaseEnd::QuotaMet => {
                                state.test_started_at = Some(Utc::now());
                                checkpoint_state(
                                    &ctx.db,
                                    task.id,
                                    &TaskState::SendBroadcast(state.clone()),
                                    progress(&state),
                                )
                                .await?;
                            }
                            other => return Ok(pause_outcome(other, state)),
                        }
                    }

                    // the sample is out, wait for the test window, a manual
                    // selection, or auto-complete
                    bc = broadcast::Entity::find_by_id(bc.id)
                        .one(&ctx.db)
                        .await?
                        .ok_or_else(|| anyhow!("broadcast {} vanished mid test", bc.id))?;

                    if bc.status == BroadcastStatus::WinnerSelected {
                        state.phase = SendPhase::Winner;
                        state.last_recipient_cursor = None;
                        continue;
                    }

                    let started = state.test_started_at.unwrap_or_else(Utc::now);
                    let test_ends = started + ChronoDuration::hours(test.test_duration_hours as i64);

                    if Utc::now() < test_ends {
                        return Ok(SliceOutcome::paused_until(
                            TaskState::SendBroadcast(state.clone()),
                            progress(&state),
                            test_ends.min(Utc::now() + ChronoDuration::seconds(POLL_SECONDS)),
                        ));
                    }

                    // window elapsed
                    if test.auto_send_winner {
                        let stats = winner::load_variation_stats(&ctx.db, bc.id).await?;
                        let Some(winning) =
                            winner::pick_winner(&test.variations, &stats, test.winner_metric)
                        else {
                            fail_broadcast(&ctx.db, bc.id).await?;
                            return Ok(SliceOutcome::failed(
                                TaskState::SendBroadcast(state),
                                String::from("test has no variations to pick a winner from"),
                            ));
                        };

                        // same CAS as the manual path, so both converge
                        service::select_winner_cas(&ctx.db, bc.id, winning).await?;

                        state.winning_template_id = Some(winning);
                        state.phase = SendPhase::Winner;
                        state.last_recipient_cursor = None;

                        info!("[BROADCAST] {} auto selected winner {}", bc.id, winning);
                        continue;
                    }

                    service::transition_status(
                        &ctx.db,
                        bc.id,
                        &[BroadcastStatus::Testing],
                        BroadcastStatus::TestCompleted,
                    )
                    .await?;

                    return Ok(SliceOutcome::paused_until(
                        TaskState::SendBroadcast(state.clone()),
                        progress(&state),
                        Utc::now() + ChronoDuration::seconds(POLL_SECONDS),
                    ));
                }

                SendPhase::Winner => {
                    bc = broadcast::Entity::find_by_id(bc.id)
                        .one(&ctx.db)
                        .await?
                        .ok_or_else(|| anyhow!("broadcast {} vanished mid send", bc.id))?;

                    let Some(template_id) = bc.winning_template_id else {
                        // winner phase without a winner, wait for selection
                        return Ok(SliceOutcome::paused_until(
                            TaskState::SendBroadcast(state.clone()),
                            progress(&state),
                            Utc::now() + ChronoDuration::seconds(POLL_SECONDS),
                        ));
                    };

                    state.winning_template_id = Some(template_id);

                    service::transition_status(
                        &ctx.db,
                        bc.id,
                        &[BroadcastStatus::WinnerSelected, BroadcastStatus::TestCompleted],
                        BroadcastStatus::Sending,
                    )
                    .await?;

                    let templates = load_templates(&ctx.db, &[template_id]).await?;

                    let end = send_loop(
                        &ctx,
                        task.id,
                        &bc,
                        &integration,
                        &templates,
                        &mut state,
                        Assignment::Fixed(template_id),
                        None,
                        // the untested complement: skip everyone already
                        // holding a message history row for this broadcast
                        true,
                        deadline,
                    )
                    .await?;

                    match end {
                        PhaseEnd::Exhausted => {
                            return finalize_sent(&ctx.db, &bc, state).await;
                        }
                        other => return Ok(pause_outcome(other, state)),
                    }
                }
            }
        }
    }
}

fn progress(state: &SendBroadcastState) -> i32 {
    if state.total_recipients <= 0 {
        return 0;
    }

    (((state.recipient_offset as f64 / state.total_recipients as f64) * 100.0) as i32).min(99)
}

/// ceil(total * percentage / 100), at least one recipient for non empty
/// audiences so a tiny sample still tests something
fn sample_quota(total_recipients: i64, sample_percentage: u8) -> i64 {
    if total_recipients <= 0 {
        return 0;
    }

    let quota = (total_recipients * sample_percentage.min(100) as i64 + 99) / 100;
    quota.max(1)
}

/// stable FNV-1a hash so a recipient keeps its variation across slices,
/// executors and process restarts
fn variation_index(email: &str, variations: usize) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;

    for byte in email.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }

    (hash % variations as u64) as usize
}

fn pause_outcome(end: PhaseEnd, state: SendBroadcastState) -> SliceOutcome {
    let prog = progress(&state);

    match end {
        PhaseEnd::Deadline => SliceOutcome::paused(TaskState::SendBroadcast(state), prog),

        PhaseEnd::Throttled | PhaseEnd::BreakerOpen => SliceOutcome::paused_until(
            TaskState::SendBroadcast(state),
            prog,
            Utc::now() + ChronoDuration::seconds(POLL_SECONDS),
        ),

        PhaseEnd::Exhausted | PhaseEnd::QuotaMet => {
            SliceOutcome::paused(TaskState::SendBroadcast(state), prog)
        }
    }
}

async fn resolve_integration(
    db: &DatabaseConnection,
    bc: &broadcast::Model,
) -> Result<Option<email_integration::Model>, sea_orm::DbErr> {
    let mut select = email_integration::Entity::find()
        .filter(email_integration::Column::WorkspaceId.eq(bc.workspace_id));

    select = match bc.email_integration_id {
        Some(id) => select.filter(email_integration::Column::Id.eq(id)),
        None => select.filter(email_integration::Column::IsDefault.eq(true)),
    };

    select.one(db).await
}

async fn load_templates(
    db: &DatabaseConnection,
    template_ids: &[i32],
) -> anyhow::Result<HashMap<i32, template::Model>> {
    let templates = template::Entity::find()
        .filter(template::Column::Id.is_in(template_ids.iter().copied()))
        .all(db)
        .await?;

    let map: HashMap<i32, template::Model> =
        templates.into_iter().map(|t| (t.id, t)).collect();

    for id in template_ids {
        if !map.contains_key(id) {
            return Err(anyhow!("template {} not found", id));
        }
    }

    Ok(map)
}

async fn fail_broadcast(db: &DatabaseConnection, broadcast_id: i32) -> Result<(), sea_orm::DbErr> {
    broadcast::Entity::update_many()
        .col_expr(broadcast::Column::Status, Expr::value(BroadcastStatus::Failed))
        .col_expr(broadcast::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(broadcast::Column::Id.eq(broadcast_id))
        .exec(db)
        .await?;

    Ok(())
}

async fn finalize_sent(
    db: &DatabaseConnection,
    bc: &broadcast::Model,
    state: SendBroadcastState,
) -> anyhow::Result<SliceOutcome> {
    service::transition_status(db, bc.id, &SENDABLE, BroadcastStatus::Sent).await?;

    info!(
        "[BROADCAST] {} sent: {} ok, {} failed, {} enumerated",
        bc.id, state.sent_count, state.failed_count, state.recipient_offset
    );

    Ok(SliceOutcome::completed(TaskState::SendBroadcast(state)))
}

fn bump_variation_counter(state: &mut SendBroadcastState, template_id: i32, sent: bool) {
    let counter = match state
        .test_variation_counters
        .iter_mut()
        .find(|c| c.template_id == template_id)
    {
        Some(counter) => counter,
        None => {
            state.test_variation_counters.push(VariationCounters {
                template_id,
                sent: 0,
                failed: 0,
            });
            state.test_variation_counters.last_mut().unwrap()
        }
    };

    if sent {
        counter.sent += 1;
    } else {
        counter.failed += 1;
    }
}

/// Runs send batches until the phase finishes or the slice must stop,
/// committing every batch (message history + timeline + task checkpoint)
/// in one transaction
#[allow(clippy::too_many_arguments)]
async fn send_loop(
    ctx: &ProcessorContext,
    task_id: i32,
    bc: &broadcast::Model,
    integration: &email_integration::Model,
    templates: &HashMap<i32, template::Model>,
    state: &mut SendBroadcastState,
    assignment: Assignment<'_>,
    quota: Option<i64>,
    skip_already_messaged: bool,
    deadline: Instant,
) -> anyhow::Result<PhaseEnd> {
    let in_test_phase = matches!(assignment, Assignment::ByVariation(_));

    loop {
        if deadline_imminent(deadline) {
            return Ok(PhaseEnd::Deadline);
        }

        if let Some(quota) = quota {
            if state.recipient_offset >= quota {
                return Ok(PhaseEnd::QuotaMet);
            }
        }

        let batch_size = match quota {
            Some(quota) => (quota - state.recipient_offset).min(ctx.send_batch_size as i64) as u64,
            None => ctx.send_batch_size,
        };

        let page = audience::fetch_page(
            &ctx.db,
            bc.workspace_id,
            &bc.audience,
            state.last_recipient_cursor.as_ref(),
            batch_size,
        )
        .await?;

        // an empty page before the counters line up is legitimate
        // (unsubscribes mid send), exhaustion of the cursor is the terminal
        // condition, never the counter
        if page.is_empty() {
            return Ok(PhaseEnd::Exhausted);
        }

        let already_messaged: HashSet<String> = if skip_already_messaged {
            message_history::Entity::find()
                .filter(message_history::Column::BroadcastId.eq(bc.id))
                .filter(
                    message_history::Column::RecipientEmail
                        .is_in(page.iter().map(|r| r.email.clone()).collect::<Vec<_>>()),
                )
                .all(&ctx.db)
                .await?
                .into_iter()
                .map(|m| m.recipient_email)
                .collect()
        } else {
            HashSet::new()
        };

        let mut history_rows = Vec::new();
        let mut events = Vec::new();
        let mut hard_bounced: Vec<(String, Uuid)> = Vec::new();
        let mut stopped: Option<PhaseEnd> = None;

        for recipient in &page {
            let cursor_before = state.last_recipient_cursor.clone();
            state.last_recipient_cursor = Some(recipient.cursor());

            if already_messaged.contains(&recipient.email) {
                continue;
            }

            let template_id = match &assignment {
                Assignment::Fixed(template_id) => *template_id,
                Assignment::ByVariation(variations) => {
                    variations[variation_index(&recipient.email, variations.len())].template_id
                }
            };

            let template = templates
                .get(&template_id)
                .ok_or_else(|| anyhow!("template {} not loaded", template_id))?;

            let message_id = Uuid::new_v4();
            let email = build_email(bc, integration, template, recipient, message_id);

            let budget = deadline.saturating_duration_since(Instant::now());
            let outcome = ctx
                .dispatcher
                .send_to_recipient(integration, email, budget)
                .await;

            let now = Utc::now();

            match outcome {
                SendOutcome::Sent { .. } => {
                    state.recipient_offset += 1;
                    state.sent_count += 1;
                    state.failure_run_count = 0;

                    if in_test_phase {
                        bump_variation_counter(state, template_id, true);
                    }

                    history_rows.push(message_history::ActiveModel {
                        id: Set(message_id),
                        workspace_id: Set(bc.workspace_id),
                        broadcast_id: Set(Some(bc.id)),
                        template_id: Set(template_id),
                        recipient_email: Set(recipient.email.clone()),
                        status: Set(MessageStatus::Sent),
                        sent_at: Set(now),
                        // provider acceptance is delivery, there is no
                        // asynchronous delivery callback to wait for
                        delivered_at: Set(Some(now)),
                        ..Default::default()
                    });

                    events.push(AppEvent::new(
                        EventKind::MessageSent,
                        bc.workspace_id,
                        &recipient.email,
                        json!({
                            "message_id": message_id,
                            "broadcast_id": bc.id,
                            "template_id": template_id,
                        }),
                    ));
                }

                SendOutcome::Failed { permanent, error } => {
                    state.recipient_offset += 1;
                    state.failed_count += 1;
                    state.failure_run_count += 1;
                    state.last_failure_at = Some(now);

                    if in_test_phase {
                        bump_variation_counter(state, template_id, false);
                    }

                    if permanent {
                        // a provider rejection is a hard bounce, suppress
                        // the address on its lists
                        hard_bounced.push((recipient.email.clone(), message_id));
                    } else {
                        warn!(
                            "[BROADCAST] {} transient failure for {}: {}",
                            bc.id, recipient.email, error
                        );
                    }

                    history_rows.push(message_history::ActiveModel {
                        id: Set(message_id),
                        workspace_id: Set(bc.workspace_id),
                        broadcast_id: Set(Some(bc.id)),
                        template_id: Set(template_id),
                        recipient_email: Set(recipient.email.clone()),
                        status: Set(MessageStatus::Failed),
                        sent_at: Set(now),
                        bounced_at: Set(permanent.then_some(now)),
                        error: Set(Some(error.clone())),
                        ..Default::default()
                    });

                    events.push(AppEvent::new(
                        EventKind::MessageFailed,
                        bc.workspace_id,
                        &recipient.email,
                        json!({
                            "message_id": message_id,
                            "broadcast_id": bc.id,
                            "template_id": template_id,
                            "error": error,
                        }),
                    ));
                }

                // the recipient was not attempted, roll the cursor back so
                // the retry picks them up again
                SendOutcome::Throttled => {
                    state.last_recipient_cursor = cursor_before;
                    stopped = Some(PhaseEnd::Throttled);
                }

                SendOutcome::Suppressed => {
                    state.last_recipient_cursor = cursor_before;
                    stopped = Some(PhaseEnd::BreakerOpen);
                }
            }

            if stopped.is_some() {
                break;
            }

            if let Some(quota) = quota {
                if state.recipient_offset >= quota {
                    break;
                }
            }
        }

        // breaker tripped mid batch: pause the broadcast so executors stop
        // spinning on suppressed sends, an explicit resume restarts it
        if matches!(stopped, Some(PhaseEnd::BreakerOpen)) {
            service::transition_status(&ctx.db, bc.id, &SENDABLE, BroadcastStatus::Paused).await?;
        }

        let txn = ctx.db.begin().await?;

        if !history_rows.is_empty() {
            message_history::Entity::insert_many(history_rows)
                .on_conflict(
                    OnConflict::columns([
                        message_history::Column::BroadcastId,
                        message_history::Column::RecipientEmail,
                        message_history::Column::TemplateId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }

        for event in &events {
            fanout::append_to_timeline(&txn, event).await?;
        }

        for (email, message_id) in &hard_bounced {
            let bounce = crate::modules::contact::service::record_hard_bounce(
                &txn,
                bc.workspace_id,
                email,
                *message_id,
                bc.id,
            )
            .await?;

            if let Some(bounce) = bounce {
                events.push(bounce);
            }
        }

        checkpoint_state(
            &txn,
            task_id,
            &TaskState::SendBroadcast(state.clone()),
            progress(state),
        )
        .await?;

        txn.commit().await?;

        for event in events {
            ctx.events.publish(event);
        }

        if let Some(end) = stopped {
            return Ok(end);
        }
    }
}

fn build_email(
    bc: &broadcast::Model,
    integration: &email_integration::Model,
    template: &template::Model,
    recipient: &Recipient,
    message_id: Uuid,
) -> OutgoingEmail {
    let mut html = template.body_html.clone();

    if bc.tracking_enabled {
        html.push_str(&tracking::links::open_pixel_tag(
            &app_config().public_url,
            message_id,
            bc.workspace_id,
            Utc::now(),
        ));
    }

    OutgoingEmail {
        from: integration.settings.sender.clone(),
        to: recipient.email.clone(),
        subject: template.subject.clone(),
        html,
        text: template.body_text.clone(),
        reply_to: None,
        cc: vec![],
        bcc: vec![],
        message_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_quota_rounds_up_and_never_drops_to_zero() {
        assert_eq!(sample_quota(1000, 50), 500);
        assert_eq!(sample_quota(20, 50), 10);
        assert_eq!(sample_quota(3, 50), 2);
        assert_eq!(sample_quota(1, 10), 1);
        assert_eq!(sample_quota(0, 50), 0);
        assert_eq!(sample_quota(100, 100), 100);
    }

    #[test]
    fn variation_assignment_is_stable_and_in_range() {
        for email in ["a@b.co", "jhon@gmail.com", "x@y.z", "long.address+tag@mail.io"] {
            let first = variation_index(email, 3);
            assert!(first < 3);

            // same email, same variation, every time
            for _ in 0..10 {
                assert_eq!(variation_index(email, 3), first);
            }
        }
    }

    #[test]
    fn variation_assignment_spreads_recipients() {
        let mut buckets = [0usize; 2];

        for i in 0..1000 {
            let email = format!("contact{}@example.com", i);
            buckets[variation_index(&email, 2)] += 1;
        }

        // a crude balance check, each arm gets a meaningful share
        assert!(buckets[0] > 300);
        assert!(buckets[1] > 300);
    }

    #[test]
    fn progress_is_a_clamped_percentage() {
        let mut state = SendBroadcastState::default();
        assert_eq!(progress(&state), 0);

        state.total_recipients = 200;
        state.recipient_offset = 50;
        assert_eq!(progress(&state), 25);

        // never reports 100 from the denominator alone, completion does
        state.recipient_offset = 200;
        assert_eq!(progress(&state), 99);
    }

    #[test]
    fn variation_counters_accumulate_per_template() {
        let mut state = SendBroadcastState::default();

        bump_variation_counter(&mut state, 1, true);
        bump_variation_counter(&mut state, 1, true);
        bump_variation_counter(&mut state, 1, false);
        bump_variation_counter(&mut state, 2, true);

        let one = state
            .test_variation_counters
            .iter()
            .find(|c| c.template_id == 1)
            .unwrap();
        assert_eq!((one.sent, one.failed), (2, 1));

        let two = state
            .test_variation_counters
            .iter()
            .find(|c| c.template_id == 2)
            .unwrap();
        assert_eq!((two.sent, two.failed), (1, 0));
    }
}
