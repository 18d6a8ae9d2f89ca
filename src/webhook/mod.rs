use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub code: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Allow-listed delivery events forwarded to the commerce platform.
/// IN_TRANSIT and CANCELLED never appear here.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum WebhookEvent {
    #[serde(rename = "DELIVERY_ASSIGNED_V1")]
    DeliveryAssigned {
        seller_order_id: String,
        channel_id: String,
        delivery_id: Uuid,
        driver_id: Uuid,
        assignment_id: Uuid,
        assigned_at: DateTime<Utc>,
    },
    #[serde(rename = "DELIVERY_PICKED_UP_V1")]
    DeliveryPickedUp {
        seller_order_id: String,
        channel_id: String,
        delivery_id: Uuid,
        pickup_proof_url: Option<String>,
        picked_up_at: DateTime<Utc>,
    },
    #[serde(rename = "DELIVERY_DELIVERED_V1")]
    DeliveryDelivered {
        seller_order_id: String,
        channel_id: String,
        delivery_id: Uuid,
        delivery_proof_url: Option<String>,
        delivered_at: DateTime<Utc>,
    },
    #[serde(rename = "DELIVERY_FAILED_V1")]
    DeliveryFailed {
        seller_order_id: String,
        channel_id: String,
        delivery_id: Uuid,
        failure: FailureDetail,
    },
}

impl WebhookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WebhookEvent::DeliveryAssigned { .. } => "DELIVERY_ASSIGNED_V1",
            WebhookEvent::DeliveryPickedUp { .. } => "DELIVERY_PICKED_UP_V1",
            WebhookEvent::DeliveryDelivered { .. } => "DELIVERY_DELIVERED_V1",
            WebhookEvent::DeliveryFailed { .. } => "DELIVERY_FAILED_V1",
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    event: &'a WebhookEvent,
    version: u8,
    timestamp: DateTime<Utc>,
}

/// Fire-and-forget handoff from the status machine. Queue pressure is
/// logged, never propagated to the committed transition.
pub fn emit(state: &AppState, event: WebhookEvent) {
    if let Err(err) = state.webhook_tx.try_send(event) {
        state
            .metrics
            .webhooks_total
            .with_label_values(&["dropped"])
            .inc();
        warn!(error = %err, "webhook queue unavailable; event dropped");
    }
}

pub async fn run_webhook_emitter(state: Arc<AppState>, mut event_rx: mpsc::Receiver<WebhookEvent>) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(state.config.webhook_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "failed to build webhook client");
            return;
        }
    };

    info!("webhook emitter started");

    while let Some(event) = event_rx.recv().await {
        let Some(url) = state.config.commerce_webhook_url.clone() else {
            state
                .metrics
                .webhooks_total
                .with_label_values(&["skipped"])
                .inc();
            debug!(event = event.name(), "no commerce webhook url configured; event skipped");
            continue;
        };
        deliver(&state, &client, &url, &event).await;
    }

    warn!("webhook emitter stopped: queue channel closed");
}

async fn deliver(state: &AppState, client: &reqwest::Client, url: &str, event: &WebhookEvent) {
    let envelope = Envelope {
        event,
        version: 1,
        timestamp: Utc::now(),
    };

    let mut request = client.post(url).json(&envelope);
    if let Some(secret) = &state.config.commerce_webhook_secret {
        request = request.header("X-Webhook-Secret", secret);
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => {
            state
                .metrics
                .webhooks_total
                .with_label_values(&["delivered"])
                .inc();
            debug!(event = event.name(), "webhook delivered");
        }
        Ok(response) => {
            state
                .metrics
                .webhooks_total
                .with_label_values(&["failed"])
                .inc();
            warn!(
                event = event.name(),
                status = %response.status(),
                "webhook rejected by receiver"
            );
        }
        Err(err) => {
            state
                .metrics
                .webhooks_total
                .with_label_values(&["failed"])
                .inc();
            warn!(event = event.name(), error = %err, "webhook delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{Envelope, FailureDetail, WebhookEvent};

    #[test]
    fn envelope_matches_the_commerce_contract() {
        let event = WebhookEvent::DeliveryAssigned {
            seller_order_id: "ORD-1001".to_string(),
            channel_id: "chan-1".to_string(),
            delivery_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            assignment_id: Uuid::new_v4(),
            assigned_at: Utc::now(),
        };
        let envelope = Envelope {
            event: &event,
            version: 1,
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event"], "DELIVERY_ASSIGNED_V1");
        assert_eq!(value["version"], 1);
        assert_eq!(value["sellerOrderId"], "ORD-1001");
        assert_eq!(value["channelId"], "chan-1");
        assert!(value["timestamp"].is_string());
        assert!(value.get("seller_order_id").is_none());
    }

    #[test]
    fn failure_payload_nests_the_structured_detail() {
        let occurred_at = Utc::now();
        let event = WebhookEvent::DeliveryFailed {
            seller_order_id: "ORD-1002".to_string(),
            channel_id: "chan-1".to_string(),
            delivery_id: Uuid::new_v4(),
            failure: FailureDetail {
                code: Some("CUSTOMER_UNREACHABLE".to_string()),
                reason: Some("no answer at the door".to_string()),
                occurred_at,
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "DELIVERY_FAILED_V1");
        assert_eq!(value["failure"]["code"], "CUSTOMER_UNREACHABLE");
        assert_eq!(value["failure"]["reason"], "no answer at the door");
        assert!(value["failure"]["occurredAt"].is_string());
    }
}
