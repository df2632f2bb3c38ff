use crate::modules::task::runtime::{self, ScheduleTask};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use entity::broadcast::{self, BroadcastSchedule, BroadcastStatus};
use entity::task::{self, SendBroadcastState, SendPhase, TaskKind, TaskState, TaskStatus};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use sea_query::Expr;
use std::fmt::Display;

/// slice budget of send_broadcast tasks
pub static SEND_MAX_RUNTIME_SECONDS: i32 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleParseError {
    MissingFields,
    BadDate(String),
    BadTime(String),
    BadTimezone(String),
    /// the local date / time does not exist in the timezone (DST gap)
    NonexistentLocalTime,
}

impl Display for ScheduleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleParseError::MissingFields => {
                write!(f, "scheduled_date, scheduled_time and timezone are required")
            }
            ScheduleParseError::BadDate(v) => write!(f, "not a YYYY-MM-DD date: {}", v),
            ScheduleParseError::BadTime(v) => write!(f, "not a HH:MM time: {}", v),
            ScheduleParseError::BadTimezone(v) => write!(f, "unknown timezone: {}", v),
            ScheduleParseError::NonexistentLocalTime => {
                write!(f, "the scheduled local time does not exist in that timezone")
            }
        }
    }
}

/// Resolves a broadcast schedule to the UTC instant its send task becomes
/// due, `send_now` wins over the date fields
pub fn scheduled_at(
    schedule: &BroadcastSchedule,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleParseError> {
    if schedule.send_now {
        return Ok(now);
    }

    let (Some(date), Some(time), Some(timezone)) = (
        schedule.scheduled_date.as_deref(),
        schedule.scheduled_time.as_deref(),
        schedule.timezone.as_deref(),
    ) else {
        return Err(ScheduleParseError::MissingFields);
    };

    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ScheduleParseError::BadDate(String::from(date)))?;

    let time = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|_| ScheduleParseError::BadTime(String::from(time)))?;

    let tz: Tz = timezone
        .parse()
        .map_err(|_| ScheduleParseError::BadTimezone(String::from(timezone)))?;

    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(ScheduleParseError::NonexistentLocalTime)
}

/// true when the broadcast runs an A/B test before the full send
pub fn is_ab_test(broadcast: &broadcast::Model) -> bool {
    broadcast
        .test_settings
        .as_ref()
        .map(|t| t.enabled && !t.variations.is_empty())
        .unwrap_or(false)
}

/// Creates (idempotently) the send task of a broadcast, due at `run_at`
pub async fn schedule_send_task(
    db: &DatabaseConnection,
    broadcast: &broadcast::Model,
    run_at: DateTime<Utc>,
) -> Result<task::Model, DbErr> {
    let phase = if is_ab_test(broadcast) {
        SendPhase::Test
    } else {
        SendPhase::Single
    };

    runtime::schedule(
        db,
        ScheduleTask {
            workspace_id: broadcast.workspace_id,
            kind: TaskKind::SendBroadcast,
            broadcast_id: Some(broadcast.id),
            segment_id: None,
            initial_state: TaskState::SendBroadcast(SendBroadcastState {
                phase,
                ..Default::default()
            }),
            next_run_after: run_at,
            max_runtime_seconds: SEND_MAX_RUNTIME_SECONDS,
        },
    )
    .await
}

/// Conditionally moves a broadcast between statuses, the returned bool is
/// whether the transition happened, a `false` means the broadcast was not
/// in any of the expected source statuses
pub async fn transition_status(
    db: &DatabaseConnection,
    broadcast_id: i32,
    from: &[BroadcastStatus],
    to: BroadcastStatus,
) -> Result<bool, DbErr> {
    let result = broadcast::Entity::update_many()
        .col_expr(broadcast::Column::Status, Expr::value(to))
        .col_expr(broadcast::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(broadcast::Column::Id.eq(broadcast_id))
        .filter(broadcast::Column::Status.is_in(from.iter().cloned()))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

/// The manual winner selection CAS: only lands while the broadcast is still
/// in `testing` or `test_completed`, which is what lets a manual selection
/// and the auto-complete slice race and converge
pub async fn select_winner_cas(
    db: &DatabaseConnection,
    broadcast_id: i32,
    template_id: i32,
) -> Result<bool, DbErr> {
    let result = broadcast::Entity::update_many()
        .col_expr(
            broadcast::Column::WinningTemplateId,
            Expr::value(Some(template_id)),
        )
        .col_expr(
            broadcast::Column::Status,
            Expr::value(BroadcastStatus::WinnerSelected),
        )
        .col_expr(broadcast::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(broadcast::Column::Id.eq(broadcast_id))
        .filter(broadcast::Column::Status.is_in([
            BroadcastStatus::Testing,
            BroadcastStatus::TestCompleted,
        ]))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Makes the live send task of a broadcast due now, used after resumes and
/// winner selections so the next ExecutePending call picks it up
pub async fn nudge_send_task(db: &DatabaseConnection, broadcast_id: i32) -> Result<(), DbErr> {
    task::Entity::update_many()
        .col_expr(task::Column::NextRunAfter, Expr::value(Utc::now()))
        .filter(task::Column::BroadcastId.eq(broadcast_id))
        .filter(task::Column::Kind.eq(TaskKind::SendBroadcast))
        .filter(task::Column::Status.is_in([TaskStatus::Pending, TaskStatus::Paused]))
        .exec(db)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn schedule(date: &str, time: &str, tz: &str) -> BroadcastSchedule {
        BroadcastSchedule {
            send_now: false,
            scheduled_date: Some(String::from(date)),
            scheduled_time: Some(String::from(time)),
            timezone: Some(String::from(tz)),
            use_recipient_timezone: false,
        }
    }

    #[test]
    fn send_now_resolves_to_now() {
        let now = Utc::now();

        let sched = BroadcastSchedule {
            send_now: true,
            ..Default::default()
        };

        assert_eq!(scheduled_at(&sched, now).unwrap(), now);
    }

    #[test]
    fn local_schedules_resolve_in_their_timezone() {
        let now = Utc::now();

        // 09:30 in New York during EDT is 13:30 UTC
        let at = scheduled_at(&schedule("2024-06-01", "09:30", "America/New_York"), now).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 6, 1, 13, 30, 0).unwrap());
    }

    #[test]
    fn missing_fields_and_junk_are_rejected() {
        let now = Utc::now();

        let sched = BroadcastSchedule::default();
        assert_eq!(
            scheduled_at(&sched, now).unwrap_err(),
            ScheduleParseError::MissingFields
        );

        assert!(matches!(
            scheduled_at(&schedule("junk", "09:30", "UTC"), now),
            Err(ScheduleParseError::BadDate(_))
        ));

        assert!(matches!(
            scheduled_at(&schedule("2024-06-01", "9h30", "UTC"), now),
            Err(ScheduleParseError::BadTime(_))
        ));

        assert!(matches!(
            scheduled_at(&schedule("2024-06-01", "09:30", "Atlantis/Sunken"), now),
            Err(ScheduleParseError::BadTimezone(_))
        ));
    }

    #[test]
    fn dst_gap_times_are_rejected() {
        let now = Utc::now();

        // 2024-03-10 02:30 does not exist in New York, clocks jump to 03:00
        assert_eq!(
            scheduled_at(&schedule("2024-03-10", "02:30", "America/New_York"), now).unwrap_err(),
            ScheduleParseError::NonexistentLocalTime
        );
    }
}
