use crate::config::app_config;
use crate::modules::webhook::signer;
use chrono::Utc;
use entity::{contact_event, webhook_subscription};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter,
};
use shared::dto::events::{AppEvent, WebhookEnvelope};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

static USER_AGENT: &str = concat!("Broadcast-Webhooks/", env!("CARGO_PKG_VERSION"));

/// The maximum variation from the retry schedule when applying jitter to a
/// webhook delivery retry, in percent deviation
const JITTER_DELTA: f32 = 0.2;

/// base delays between delivery attempts, truncated by `webhook_max_attempts`
static RETRY_SCHEDULE_SECONDS: &[u64] = &[5, 30, 120, 600, 3600];

/// Handle used by event producers to hand events to the fan-out worker,
/// cheap to clone, senders never block
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl EventBus {
    pub fn new() -> (EventBus, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventBus { tx }, rx)
    }

    /// publish a event for webhook fan-out, should be called after the
    /// transaction that persisted the event side effects committed
    pub fn publish(&self, event: AppEvent) {
        if self.tx.send(event).is_err() {
            error!("[FANOUT] event bus receiver dropped");
        }
    }
}

/// Appends a event to the contact timeline, meant to be called inside the
/// same transaction as the mutation that produced the event
pub async fn append_to_timeline<C: ConnectionTrait>(conn: &C, event: &AppEvent) -> Result<(), DbErr> {
    contact_event::ActiveModel {
        workspace_id: Set(event.workspace_id),
        email: Set(event.email.clone()),
        kind: Set(event.kind.to_string()),
        occurred_at: Set(event.occurred_at),
        payload: Set(event.payload.clone()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    Ok(())
}

/// if a subscription wants a event: it must be enabled, contain the event
/// kind on its event types and every filter key must match the payload
pub fn subscription_matches(sub: &webhook_subscription::Model, event: &AppEvent) -> bool {
    if !sub.enabled {
        return false;
    }

    if !sub.event_types.0.iter().any(|k| k == &event.kind.to_string()) {
        return false;
    }

    match &sub.filters {
        None => true,
        Some(filters) => match filters.as_object() {
            None => true,
            Some(filters) => filters
                .iter()
                .all(|(key, expected)| event.payload.get(key) == Some(expected)),
        },
    }
}

type DeliveryJob = (webhook_subscription::Model, WebhookEnvelope);

/// spawns the sequential delivery worker of one subscription, deliveries
/// (including their retries) run one at a time in enqueue order
fn spawn_delivery_worker(client: Arc<reqwest::Client>) -> mpsc::UnboundedSender<DeliveryJob> {
    let (tx, mut jobs) = mpsc::unbounded_channel::<DeliveryJob>();

    tokio::spawn(async move {
        while let Some((sub, envelope)) = jobs.recv().await {
            deliver_with_retry(client.clone(), sub, envelope).await;
        }
    });

    tx
}

/// Consumes the event bus, matching every event against the workspace
/// webhook subscriptions and delivering signed envelopes, at least once
/// with bounded retries
///
/// every subscription gets its own delivery worker so deliveries towards
/// one endpoint stay FIFO, a later event never overtakes an earlier one
/// still mid retry
pub async fn start_fanout_loop(db: DatabaseConnection, mut rx: mpsc::UnboundedReceiver<AppEvent>) {
    let client = Arc::new(
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Invalid reqwest Client configuration"),
    );

    let mut workers: HashMap<i32, mpsc::UnboundedSender<DeliveryJob>> = HashMap::new();

    println!("[FANOUT] webhook fan-out loop started");

    while let Some(event) = rx.recv().await {
        let subscriptions = match webhook_subscription::Entity::find()
            .filter(webhook_subscription::Column::WorkspaceId.eq(event.workspace_id))
            .filter(webhook_subscription::Column::Enabled.eq(true))
            .all(&db)
            .await
        {
            Ok(subs) => subs,
            Err(err) => {
                error!("[FANOUT] failed to load subscriptions: {}", err);
                continue;
            }
        };

        for sub in subscriptions {
            if !subscription_matches(&sub, &event) {
                continue;
            }

            let envelope = WebhookEnvelope {
                id: Uuid::new_v4(),
                kind: event.kind,
                workspace_id: event.workspace_id,
                timestamp: event.occurred_at,
                data: event.payload.clone(),
            };

            let sub_id = sub.id;
            let worker = workers
                .entry(sub_id)
                .or_insert_with(|| spawn_delivery_worker(client.clone()));

            if let Err(mpsc::error::SendError(job)) = worker.send((sub, envelope)) {
                error!("[FANOUT] delivery worker of subscription {} died", sub_id);

                let worker = spawn_delivery_worker(client.clone());
                let _ = worker.send(job);
                workers.insert(sub_id, worker);
            }
        }
    }
}

/// Delivers one envelope to one subscriber, retrying on any non success
/// response following the retry schedule with jitter applied, duplicates
/// are possible and are the receivers responsibility (via `webhook-id`)
#[tracing::instrument(skip_all, fields(url = %sub.url, webhook_id = %envelope.id))]
async fn deliver_with_retry(
    client: Arc<reqwest::Client>,
    sub: webhook_subscription::Model,
    envelope: WebhookEnvelope,
) {
    let cfg = app_config();

    let body = match serde_json::to_string(&envelope) {
        Ok(body) => body,
        Err(err) => {
            error!("[FANOUT] failed to serialize envelope: {}", err);
            return;
        }
    };

    let webhook_id = envelope.id.to_string();

    for attempt in 0..cfg.webhook_max_attempts {
        let timestamp = Utc::now().timestamp();
        let signature = signer::sign(&sub.secret, &webhook_id, timestamp, &body);

        let res = client
            .post(&sub.url)
            .header("webhook-id", &webhook_id)
            .header("webhook-timestamp", timestamp.to_string())
            .header("webhook-signature", &signature)
            .header("user-agent", USER_AGENT)
            .header("content-type", "application/json")
            .timeout(Duration::from_secs(cfg.webhook_timeout_seconds))
            .body(body.clone())
            .send()
            .await;

        match res {
            Ok(res) if res.status().is_success() => {
                debug!("[FANOUT] delivered on attempt {}", attempt + 1);
                return;
            }
            Ok(res) => {
                warn!("[FANOUT] subscriber answered {}", res.status());
            }
            Err(err) => {
                warn!("[FANOUT] delivery error: {}", err);
            }
        }

        let schedule_idx = (attempt as usize).min(RETRY_SCHEDULE_SECONDS.len() - 1);
        let base = Duration::from_secs(RETRY_SCHEDULE_SECONDS[schedule_idx]);

        // apply jitter with a maximum variation of JITTER_DELTA
        let wait = rand::thread_rng()
            .gen_range(base.mul_f32(1.0 - JITTER_DELTA)..base.mul_f32(1.0 + JITTER_DELTA));

        tokio::time::sleep(wait).await;
    }

    error!("[FANOUT] delivery attempts exhausted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::webhook_subscription::EventTypes;
    use serde_json::json;
    use shared::dto::events::EventKind;

    fn subscription(event_types: Vec<&str>, filters: Option<serde_json::Value>) -> webhook_subscription::Model {
        webhook_subscription::Model {
            id: 1,
            created_at: Utc::now(),
            workspace_id: 1,
            url: String::from("http://localhost:8071/hooks"),
            secret: String::from("whsec"),
            event_types: EventTypes(event_types.into_iter().map(String::from).collect()),
            filters,
            enabled: true,
        }
    }

    fn opened_event() -> AppEvent {
        AppEvent::new(
            EventKind::MessageOpened,
            1,
            "jhon@gmail.com",
            json!({ "broadcast_id": 7, "goal_type": "newsletter" }),
        )
    }

    #[test]
    fn matches_on_event_kind_containment() {
        let sub = subscription(vec!["message.opened", "message.clicked"], None);
        assert!(subscription_matches(&sub, &opened_event()));

        let sub = subscription(vec!["segment.joined"], None);
        assert!(!subscription_matches(&sub, &opened_event()));
    }

    #[test]
    fn disabled_subscriptions_never_match() {
        let mut sub = subscription(vec!["message.opened"], None);
        sub.enabled = false;
        assert!(!subscription_matches(&sub, &opened_event()));
    }

    #[test]
    fn filters_are_a_payload_subset_match() {
        let sub = subscription(
            vec!["message.opened"],
            Some(json!({ "goal_type": "newsletter" })),
        );
        assert!(subscription_matches(&sub, &opened_event()));

        let sub = subscription(
            vec!["message.opened"],
            Some(json!({ "goal_type": "onboarding" })),
        );
        assert!(!subscription_matches(&sub, &opened_event()));

        // filter key absent from the payload never matches
        let sub = subscription(vec!["message.opened"], Some(json!({ "list_id": 3 })));
        assert!(!subscription_matches(&sub, &opened_event()));
    }
}
