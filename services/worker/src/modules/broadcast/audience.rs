use crate::modules::segment::service::{run_count, to_statement};
use chrono::{DateTime, Utc};
use entity::broadcast::BroadcastAudience;
use entity::task::RecipientCursor;
use entity::{contact, contact_list, segment, segment_membership};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr};
use sea_query::{
    Alias, Condition, Expr, Order, Query, SelectStatement, UnionType,
};
use std::fmt::Display;

/// One audience member as enumerated by the cursor
#[derive(Debug, Clone)]
pub struct Recipient {
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl Recipient {
    pub fn cursor(&self) -> RecipientCursor {
        RecipientCursor {
            created_at: self.created_at,
            email: self.email.clone(),
        }
    }
}

#[derive(Debug)]
pub enum AudienceError {
    /// the audience names neither a list nor a segment
    Empty,
    Db(DbErr),
}

impl Display for AudienceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudienceError::Empty => write!(f, "audience names neither a list nor a segment"),
            AudienceError::Db(err) => write!(f, "audience query failed: {}", err),
        }
    }
}

impl std::error::Error for AudienceError {}

impl From<DbErr> for AudienceError {
    fn from(err: DbErr) -> Self {
        AudienceError::Db(err)
    }
}

/// membership statuses that are always suppressed from sends regardless of
/// the `exclude_unsubscribed` flag
static HARD_SUPPRESSED: [&str; 2] = ["bounced", "complained"];

/// Builds the set expression enumerating `(email, created_at)` of every
/// audience member, list and segment sources union when both are named
pub fn base_select(
    workspace_id: i32,
    audience: &BroadcastAudience,
) -> Result<SelectStatement, AudienceError> {
    let list = audience.list_id.map(|list_id| {
        let mut select = contact_columns();

        select
            .inner_join(
                contact_list::Entity,
                Condition::all()
                    .add(
                        Expr::col((contact_list::Entity, contact_list::Column::Email))
                            .equals((contact::Entity, contact::Column::Email)),
                    )
                    .add(
                        Expr::col((contact_list::Entity, contact_list::Column::WorkspaceId))
                            .equals((contact::Entity, contact::Column::WorkspaceId)),
                    ),
            )
            .and_where(Expr::col((contact::Entity, contact::Column::WorkspaceId)).eq(workspace_id))
            .and_where(Expr::col((contact_list::Entity, contact_list::Column::ListId)).eq(list_id));

        if audience.exclude_unsubscribed {
            select.and_where(
                Expr::col((contact_list::Entity, contact_list::Column::Status)).eq("active"),
            );
        } else {
            select.and_where(
                Expr::col((contact_list::Entity, contact_list::Column::Status))
                    .is_not_in(HARD_SUPPRESSED),
            );
        }

        select
    });

    let segment = audience.segment_id.map(|segment_id| {
        let current_version = Query::select()
            .column(segment::Column::Version)
            .from(segment::Entity)
            .and_where(Expr::col(segment::Column::Id).eq(segment_id))
            .to_owned();

        let mut select = contact_columns();

        select
            .inner_join(
                segment_membership::Entity,
                Condition::all()
                    .add(
                        Expr::col((segment_membership::Entity, segment_membership::Column::Email))
                            .equals((contact::Entity, contact::Column::Email)),
                    )
                    .add(
                        Expr::col((
                            segment_membership::Entity,
                            segment_membership::Column::WorkspaceId,
                        ))
                        .equals((contact::Entity, contact::Column::WorkspaceId)),
                    ),
            )
            .and_where(Expr::col((contact::Entity, contact::Column::WorkspaceId)).eq(workspace_id))
            .and_where(
                Expr::col((segment_membership::Entity, segment_membership::Column::SegmentId))
                    .eq(segment_id),
            )
            // only rows at the segments current version are authoritative
            .and_where(
                Expr::col((segment_membership::Entity, segment_membership::Column::Version))
                    .in_subquery(current_version),
            );

        if audience.exclude_unsubscribed {
            let unsubscribed = Query::select()
                .expr(Expr::cust("1"))
                .from(contact_list::Entity)
                .and_where(
                    Expr::col((contact_list::Entity, contact_list::Column::WorkspaceId))
                        .equals((contact::Entity, contact::Column::WorkspaceId)),
                )
                .and_where(
                    Expr::col((contact_list::Entity, contact_list::Column::Email))
                        .equals((contact::Entity, contact::Column::Email)),
                )
                .and_where(
                    Expr::col((contact_list::Entity, contact_list::Column::Status)).ne("active"),
                )
                .to_owned();

            select.cond_where(Condition::any().add(Expr::exists(unsubscribed)).not());
        }

        select
    });

    match (list, segment) {
        (Some(list), None) => Ok(list),
        (None, Some(segment)) => Ok(segment),

        (Some(mut list), Some(segment)) => {
            let union_type = if audience.skip_duplicate_emails {
                UnionType::Distinct
            } else {
                UnionType::All
            };

            list.union(union_type, segment);
            Ok(list)
        }

        (None, None) => Err(AudienceError::Empty),
    }
}

fn contact_columns() -> SelectStatement {
    Query::select()
        .column((contact::Entity, contact::Column::Email))
        .column((contact::Entity, contact::Column::CreatedAt))
        .from(contact::Entity)
        .to_owned()
}

/// Applies the composite `(created_at, email)` cursor, ordering and batch
/// limit on top of a audience set expression
///
/// plain OFFSET pagination skips rows when many contacts share a creation
/// timestamp (bulk imports), the lexicographic tie-breaker on email is what
/// makes the cursor stable
pub fn page_select(
    base: SelectStatement,
    cursor: Option<&RecipientCursor>,
    batch_size: u64,
) -> SelectStatement {
    let email = Alias::new("email");
    let created_at = Alias::new("created_at");

    let mut select = Query::select()
        .column(email.clone())
        .column(created_at.clone())
        .from_subquery(base, Alias::new("aud"))
        .to_owned();

    if let Some(cursor) = cursor {
        select.cond_where(
            Condition::any()
                .add(Expr::col(created_at.clone()).gt(cursor.created_at))
                .add(
                    Condition::all()
                        .add(Expr::col(created_at.clone()).eq(cursor.created_at))
                        .add(Expr::col(email.clone()).gt(cursor.email.clone())),
                ),
        );
    }

    select
        .order_by(created_at, Order::Asc)
        .order_by(email, Order::Asc)
        .limit(batch_size);

    select
}

/// Fetches the next batch of recipients after the cursor
pub async fn fetch_page(
    db: &DatabaseConnection,
    workspace_id: i32,
    audience: &BroadcastAudience,
    cursor: Option<&RecipientCursor>,
    batch_size: u64,
) -> Result<Vec<Recipient>, AudienceError> {
    let base = base_select(workspace_id, audience)?;

    let rows = db
        .query_all(to_statement(&page_select(base, cursor, batch_size)))
        .await
        .map_err(AudienceError::from)?;

    let mut recipients = Vec::with_capacity(rows.len());

    for row in rows {
        recipients.push(Recipient {
            email: row.try_get("", "email").map_err(AudienceError::from)?,
            created_at: row.try_get("", "created_at").map_err(AudienceError::from)?,
        });
    }

    Ok(recipients)
}

/// Counts the audience at this instant, used once to freeze
/// `total_recipients` as the progress denominator
pub async fn count(
    db: &DatabaseConnection,
    workspace_id: i32,
    audience: &BroadcastAudience,
) -> Result<i64, AudienceError> {
    let base = base_select(workspace_id, audience)?;

    let wrapped = Query::select()
        .expr_as(Expr::cust("count(*)"), Alias::new("cnt"))
        .from_subquery(base, Alias::new("aud"))
        .to_owned();

    Ok(run_count(db, wrapped).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::PostgresQueryBuilder;

    fn list_audience() -> BroadcastAudience {
        BroadcastAudience {
            list_id: Some(3),
            segment_id: None,
            exclude_unsubscribed: true,
            skip_duplicate_emails: true,
        }
    }

    fn cursor() -> RecipientCursor {
        RecipientCursor {
            created_at: "2024-06-01T12:00:00Z".parse().unwrap(),
            email: String::from("m@acme.io"),
        }
    }

    #[test]
    fn list_audiences_join_active_memberships() {
        let q = base_select(1, &list_audience())
            .unwrap()
            .to_string(PostgresQueryBuilder);

        assert!(q.contains("\"contact_list\""));
        assert!(q.contains("\"list_id\" = 3"));
        assert!(q.contains("'active'"));
    }

    #[test]
    fn keeping_unsubscribed_still_suppresses_bounces_and_complaints() {
        let mut audience = list_audience();
        audience.exclude_unsubscribed = false;

        let q = base_select(1, &audience)
            .unwrap()
            .to_string(PostgresQueryBuilder);

        assert!(q.contains("NOT IN ('bounced', 'complained')"));
    }

    #[test]
    fn segment_audiences_are_fenced_on_the_current_version() {
        let audience = BroadcastAudience {
            list_id: None,
            segment_id: Some(9),
            exclude_unsubscribed: false,
            skip_duplicate_emails: true,
        };

        let q = base_select(1, &audience)
            .unwrap()
            .to_string(PostgresQueryBuilder);

        assert!(q.contains("\"segment_membership\""));
        assert!(q.contains("\"segment_id\" = 9"));
        assert!(q.contains("\"version\" IN (SELECT \"version\""));
    }

    #[test]
    fn naming_both_sources_unions_them() {
        let audience = BroadcastAudience {
            list_id: Some(3),
            segment_id: Some(9),
            exclude_unsubscribed: true,
            skip_duplicate_emails: true,
        };

        let q = base_select(1, &audience)
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(q.contains("UNION"));
        assert!(!q.contains("UNION ALL"));

        let mut audience = audience;
        audience.skip_duplicate_emails = false;

        let q = base_select(1, &audience)
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(q.contains("UNION ALL"));
    }

    #[test]
    fn empty_audiences_are_rejected() {
        let audience = BroadcastAudience {
            list_id: None,
            segment_id: None,
            exclude_unsubscribed: true,
            skip_duplicate_emails: true,
        };

        assert!(matches!(
            base_select(1, &audience),
            Err(AudienceError::Empty)
        ));
    }

    #[test]
    fn the_cursor_condition_handles_created_at_ties() {
        let q = page_select(base_select(1, &list_audience()).unwrap(), Some(&cursor()), 50)
            .to_string(PostgresQueryBuilder);

        // rows sharing the cursor timestamp are kept when their email sorts
        // after the cursor email
        assert!(q.contains("\"created_at\" >"));
        assert!(q.contains("\"created_at\" ="));
        assert!(q.contains("\"email\" >"));
        assert!(q.contains("ORDER BY \"created_at\" ASC, \"email\" ASC"));
        assert!(q.contains("LIMIT 50"));
    }

    #[test]
    fn the_first_page_has_no_cursor_condition() {
        let q = page_select(base_select(1, &list_audience()).unwrap(), None, 50)
            .to_string(PostgresQueryBuilder);

        assert!(!q.contains("\"email\" >"));
        assert!(q.contains("ORDER BY \"created_at\" ASC, \"email\" ASC"));
    }
}
