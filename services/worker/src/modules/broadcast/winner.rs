use entity::broadcast::{Variation, WinnerMetric};
use entity::message_history;
use sea_orm::{DatabaseConnection, DbBackend, DbErr, ConnectionTrait, Statement};
use sea_query::{Alias, Expr, PostgresQueryBuilder, Query};
use serde::Serialize;

/// engagement counters of one A/B variation, aggregated from message history
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VariationStats {
    pub template_id: i32,
    pub sent: i64,
    pub delivered: i64,
    pub opened: i64,
    pub clicked: i64,
}

impl VariationStats {
    /// opens over deliveries, zero when nothing was delivered
    pub fn open_rate(&self) -> f64 {
        if self.delivered <= 0 {
            return 0.0;
        }

        self.opened as f64 / self.delivered as f64
    }

    /// clicks over deliveries, zero when nothing was delivered
    pub fn click_rate(&self) -> f64 {
        if self.delivered <= 0 {
            return 0.0;
        }

        self.clicked as f64 / self.delivered as f64
    }

    pub fn rate(&self, metric: WinnerMetric) -> f64 {
        match metric {
            WinnerMetric::OpenRate => self.open_rate(),
            WinnerMetric::ClickRate => self.click_rate(),
        }
    }
}

/// Aggregates per variation counters for a broadcast
pub async fn load_variation_stats(
    db: &DatabaseConnection,
    broadcast_id: i32,
) -> Result<Vec<VariationStats>, DbErr> {
    let select = Query::select()
        .column(message_history::Column::TemplateId)
        .expr_as(Expr::cust("count(*)"), Alias::new("sent"))
        .expr_as(Expr::cust("count(\"delivered_at\")"), Alias::new("delivered"))
        .expr_as(Expr::cust("count(\"opened_at\")"), Alias::new("opened"))
        .expr_as(Expr::cust("count(\"clicked_at\")"), Alias::new("clicked"))
        .from(message_history::Entity)
        .and_where(Expr::col(message_history::Column::BroadcastId).eq(broadcast_id))
        .and_where(Expr::col(message_history::Column::Status).eq("sent"))
        .group_by_col(message_history::Column::TemplateId)
        .to_owned();

    let (sql, values) = select.build(PostgresQueryBuilder);
    let rows = db
        .query_all(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
        .await?;

    let mut stats = Vec::with_capacity(rows.len());

    for row in rows {
        stats.push(VariationStats {
            template_id: row.try_get("", "template_id")?,
            sent: row.try_get("", "sent")?,
            delivered: row.try_get("", "delivered")?,
            opened: row.try_get("", "opened")?,
            clicked: row.try_get("", "clicked")?,
        });
    }

    Ok(stats)
}

/// Picks the variation maximizing the metric, ties (including the
/// all-zeroes case) resolve to the lowest variation ordinal
pub fn pick_winner(
    variations: &[Variation],
    stats: &[VariationStats],
    metric: WinnerMetric,
) -> Option<i32> {
    let mut winner: Option<(i32, f64)> = None;

    for variation in variations {
        let rate = stats
            .iter()
            .find(|s| s.template_id == variation.template_id)
            .map(|s| s.rate(metric))
            .unwrap_or(0.0);

        match winner {
            Some((_, best)) if rate <= best => {}
            _ => winner = Some((variation.template_id, rate)),
        }
    }

    winner.map(|(template_id, _)| template_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variation(template_id: i32) -> Variation {
        Variation {
            template_id,
            variation_name: format!("variation {}", template_id),
        }
    }

    fn stats(template_id: i32, delivered: i64, opened: i64, clicked: i64) -> VariationStats {
        VariationStats {
            template_id,
            sent: delivered,
            delivered,
            opened,
            clicked,
        }
    }

    #[test]
    fn picks_the_highest_open_rate() {
        let variations = vec![variation(1), variation(2)];
        let stats = vec![stats(1, 10, 2, 5), stats(2, 10, 7, 0)];

        assert_eq!(
            pick_winner(&variations, &stats, WinnerMetric::OpenRate),
            Some(2)
        );
    }

    #[test]
    fn the_metric_picks_a_different_winner() {
        let variations = vec![variation(1), variation(2)];
        let stats = vec![stats(1, 10, 2, 5), stats(2, 10, 7, 0)];

        assert_eq!(
            pick_winner(&variations, &stats, WinnerMetric::ClickRate),
            Some(1)
        );
    }

    #[test]
    fn ties_resolve_to_the_lowest_ordinal() {
        let variations = vec![variation(7), variation(3)];
        let stats = vec![stats(7, 10, 5, 0), stats(3, 10, 5, 0)];

        // template 7 is ordinal 0, it wins the tie despite the higher id
        assert_eq!(
            pick_winner(&variations, &stats, WinnerMetric::OpenRate),
            Some(7)
        );
    }

    #[test]
    fn no_deliveries_means_rate_zero_not_a_division_error() {
        let s = stats(1, 0, 0, 0);
        assert_eq!(s.open_rate(), 0.0);
        assert_eq!(s.click_rate(), 0.0);

        let variations = vec![variation(1), variation(2)];
        assert_eq!(
            pick_winner(&variations, &[], WinnerMetric::OpenRate),
            Some(1)
        );
    }

    #[test]
    fn no_variations_no_winner() {
        assert_eq!(pick_winner(&[], &[], WinnerMetric::OpenRate), None);
    }
}
