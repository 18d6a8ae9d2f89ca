use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::dispatch::{self, DispatchJob};
use crate::engine::drivers;
use crate::error::AppError;
use crate::geo::{self, GeoPoint};
use crate::models::assignment::Assignment;
use crate::models::delivery::{Delivery, DeliveryEvent, DeliveryStatus, ProofType};
use crate::realtime::protocol::Outbound;
use crate::state::AppState;
use crate::webhook::{self, FailureDetail, WebhookEvent};

#[derive(Debug, Clone, Deserialize)]
pub struct OrderReadyPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub label: Option<String>,
}

/// Body of the commerce platform's order-ready webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderReady {
    pub seller_order_id: String,
    pub channel_id: String,
    pub pickup: OrderReadyPoint,
    #[serde(rename = "drop")]
    pub drop_off: OrderReadyPoint,
}

pub async fn create_from_order_ready(
    state: &AppState,
    order: OrderReady,
) -> Result<Delivery, AppError> {
    let seller_order_id = order.seller_order_id.trim().to_string();
    let channel_id = order.channel_id.trim().to_string();
    if seller_order_id.is_empty() {
        return Err(AppError::BadRequest(
            "seller_order_id must not be empty".to_string(),
        ));
    }
    if channel_id.is_empty() {
        return Err(AppError::BadRequest(
            "channel_id must not be empty".to_string(),
        ));
    }
    let pickup = GeoPoint {
        lat: order.pickup.lat,
        lon: order.pickup.lon,
    };
    let drop_off = GeoPoint {
        lat: order.drop_off.lat,
        lon: order.drop_off.lon,
    };
    geo::validate_point(&pickup)?;
    geo::validate_point(&drop_off)?;

    // Replayed webhooks return the original delivery instead of dispatching twice.
    if let Some(existing) = state
        .store
        .delivery_by_seller_order(&seller_order_id)
        .await?
    {
        info!(
            delivery_id = %existing.id,
            seller_order_id = %seller_order_id,
            "order already ingested; returning existing delivery"
        );
        return Ok(existing);
    }

    let now = Utc::now();
    let delivery = Delivery {
        id: Uuid::new_v4(),
        seller_order_id,
        channel_id,
        pickup,
        pickup_label: order.pickup.label,
        drop_off,
        status: DeliveryStatus::Pending,
        driver_id: None,
        pickup_proof_url: None,
        delivery_proof_url: None,
        failure_code: None,
        failure_reason: None,
        assigned_at: None,
        picked_up_at: None,
        delivered_at: None,
        failed_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_delivery(delivery.clone()).await?;
    dispatch::enqueue(
        state,
        DispatchJob {
            delivery_id: delivery.id,
        },
    )
    .await?;

    info!(
        delivery_id = %delivery.id,
        seller_order_id = %delivery.seller_order_id,
        "delivery created and queued for dispatch"
    );
    Ok(delivery)
}

pub async fn get_delivery(state: &AppState, id: Uuid) -> Result<Delivery, AppError> {
    state
        .store
        .delivery(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delivery {id}")))
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: DeliveryStatus,
    pub proof_url: Option<String>,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl StatusChange {
    pub fn to(status: DeliveryStatus) -> Self {
        Self {
            status,
            proof_url: None,
            failure_code: None,
            failure_reason: None,
            metadata: None,
        }
    }
}

/// Advances the delivery lifecycle. PENDING and ASSIGNED are never set
/// through here; assignment goes through `assign_driver`.
pub async fn update_status(
    state: &AppState,
    delivery_id: Uuid,
    change: StatusChange,
) -> Result<Delivery, AppError> {
    if matches!(
        change.status,
        DeliveryStatus::Pending | DeliveryStatus::Assigned
    ) {
        return Err(AppError::BadRequest(format!(
            "status {} cannot be set directly",
            change.status
        )));
    }

    let mut delivery = get_delivery(state, delivery_id).await?;
    if !delivery.status.can_transition_to(change.status) {
        return Err(AppError::Conflict(format!(
            "delivery {} cannot transition from {} to {}",
            delivery_id, delivery.status, change.status
        )));
    }

    let now = Utc::now();
    let previous = delivery.status;
    delivery.status = change.status;
    delivery.updated_at = now;
    match change.status {
        DeliveryStatus::PickedUp => {
            delivery.picked_up_at = Some(now);
            if change.proof_url.is_some() {
                delivery.pickup_proof_url = change.proof_url.clone();
            }
        }
        DeliveryStatus::Delivered => {
            delivery.delivered_at = Some(now);
            if change.proof_url.is_some() {
                delivery.delivery_proof_url = change.proof_url.clone();
            }
        }
        DeliveryStatus::Failed => {
            delivery.failed_at = Some(now);
            delivery.failure_code = change.failure_code.clone();
            delivery.failure_reason = change.failure_reason.clone();
        }
        DeliveryStatus::Cancelled => {
            delivery.cancelled_at = Some(now);
        }
        DeliveryStatus::Pending | DeliveryStatus::Assigned | DeliveryStatus::InTransit => {}
    }

    // Durability checkpoint: nothing past this write may fail the transition.
    state.store.update_delivery(delivery.clone()).await?;
    let event = append_event(state, &delivery, change.proof_url, change.metadata).await?;
    fan_out(state, &delivery, &event);

    if delivery.status.is_terminal() {
        if let Some(driver_id) = delivery.driver_id {
            if let Err(err) = drivers::free_driver(state, driver_id).await {
                warn!(
                    driver_id = %driver_id,
                    error = %err,
                    "failed to free driver after terminal delivery"
                );
            }
        }
    }

    info!(
        delivery_id = %delivery.id,
        from = %previous,
        to = %delivery.status,
        "delivery transitioned"
    );
    Ok(delivery)
}

/// PENDING → ASSIGNED with the assignment record, event, webhook and
/// channel push. The delivery's driver is set exactly once.
pub async fn assign_driver(
    state: &AppState,
    delivery_id: Uuid,
    driver_id: Uuid,
    distance_to_pickup_km: f64,
    distance_pickup_to_drop_km: f64,
) -> Result<(Delivery, Assignment), AppError> {
    let mut delivery = get_delivery(state, delivery_id).await?;
    if delivery.driver_id.is_some() {
        return Err(AppError::Conflict(format!(
            "delivery {delivery_id} already has a driver"
        )));
    }
    if !delivery.status.can_transition_to(DeliveryStatus::Assigned) {
        return Err(AppError::Conflict(format!(
            "delivery {} cannot transition from {} to {}",
            delivery_id,
            delivery.status,
            DeliveryStatus::Assigned
        )));
    }

    let now = Utc::now();
    delivery.driver_id = Some(driver_id);
    delivery.status = DeliveryStatus::Assigned;
    delivery.assigned_at = Some(now);
    delivery.updated_at = now;

    let assignment = Assignment {
        id: Uuid::new_v4(),
        delivery_id,
        seller_order_id: delivery.seller_order_id.clone(),
        channel_id: delivery.channel_id.clone(),
        driver_id,
        distance_to_pickup_km,
        distance_pickup_to_drop_km,
        created_at: now,
    };

    // Durability checkpoint: nothing past these writes may fail the transition.
    state.store.update_delivery(delivery.clone()).await?;
    state.store.insert_assignment(assignment.clone()).await?;
    let event = DeliveryEvent {
        id: Uuid::new_v4(),
        delivery_id,
        seller_order_id: delivery.seller_order_id.clone(),
        event_type: DeliveryStatus::Assigned,
        proof_url: None,
        failure_code: None,
        failure_reason: None,
        metadata: Some(json!({
            "driver_id": driver_id,
            "assignment_id": assignment.id,
        })),
        created_at: now,
    };
    state.store.append_event(event).await?;

    webhook::emit(
        state,
        WebhookEvent::DeliveryAssigned {
            seller_order_id: delivery.seller_order_id.clone(),
            channel_id: delivery.channel_id.clone(),
            delivery_id,
            driver_id,
            assignment_id: assignment.id,
            assigned_at: now,
        },
    );

    let pushed = state.hub.send(
        driver_id,
        Outbound::AssignmentCreated {
            assignment_id: assignment.id,
            delivery_id,
            seller_order_id: delivery.seller_order_id.clone(),
            pickup: delivery.pickup,
            pickup_label: delivery.pickup_label.clone(),
            drop_off: delivery.drop_off,
            distance_to_pickup_km,
            distance_pickup_to_drop_km,
            assigned_at: now,
        },
    );
    if !pushed {
        debug!(driver_id = %driver_id, "driver channel closed; assignment not pushed");
    }

    info!(
        delivery_id = %delivery_id,
        driver_id = %driver_id,
        assignment_id = %assignment.id,
        "driver assigned"
    );
    Ok((delivery, assignment))
}

/// Proof upload from the driver channel. Maps PICKUP → PICKED_UP and
/// DELIVERY → DELIVERED through the status machine.
pub async fn record_proof(
    state: &AppState,
    driver_id: Uuid,
    delivery_id: Uuid,
    proof_type: ProofType,
    image_url: String,
    location: GeoPoint,
) -> Result<Delivery, AppError> {
    geo::validate_point(&location)?;
    let image_url = image_url.trim().to_string();
    if image_url.is_empty() {
        return Err(AppError::BadRequest(
            "image_url must not be empty".to_string(),
        ));
    }

    let delivery = get_delivery(state, delivery_id).await?;
    if delivery.driver_id != Some(driver_id) {
        return Err(AppError::Conflict(format!(
            "delivery {delivery_id} is not assigned to driver {driver_id}"
        )));
    }

    let mut change = StatusChange::to(proof_type.target_status());
    change.proof_url = Some(image_url);
    change.metadata = Some(json!({"lat": location.lat, "lon": location.lon}));
    update_status(state, delivery_id, change).await
}

async fn append_event(
    state: &AppState,
    delivery: &Delivery,
    proof_url: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<DeliveryEvent, AppError> {
    let event = DeliveryEvent {
        id: Uuid::new_v4(),
        delivery_id: delivery.id,
        seller_order_id: delivery.seller_order_id.clone(),
        event_type: delivery.status,
        proof_url,
        failure_code: delivery.failure_code.clone(),
        failure_reason: delivery.failure_reason.clone(),
        metadata,
        created_at: delivery.updated_at,
    };
    state.store.append_event(event.clone()).await?;
    Ok(event)
}

// Fire-and-forget: neither push nor webhook can fail the committed transition.
fn fan_out(state: &AppState, delivery: &Delivery, event: &DeliveryEvent) {
    if let Some(driver_id) = delivery.driver_id {
        let proof_type = match delivery.status {
            DeliveryStatus::PickedUp => Some(ProofType::Pickup),
            DeliveryStatus::Delivered => Some(ProofType::Delivery),
            _ => None,
        };
        if let Some(proof_type) = proof_type {
            let pushed = state.hub.send(
                driver_id,
                Outbound::ProofAccepted {
                    delivery_id: delivery.id,
                    proof_id: event.id,
                    proof_type,
                    accepted_at: event.created_at,
                },
            );
            if !pushed {
                debug!(driver_id = %driver_id, "driver channel closed; proof ack not pushed");
            }
        }
    }

    if let Some(webhook_event) = webhook_event_for(delivery) {
        webhook::emit(state, webhook_event);
    }
}

// ASSIGNED is emitted by assign_driver with the assignment attached.
// IN_TRANSIT and CANCELLED are recorded but stay internal.
fn webhook_event_for(delivery: &Delivery) -> Option<WebhookEvent> {
    match delivery.status {
        DeliveryStatus::PickedUp => Some(WebhookEvent::DeliveryPickedUp {
            seller_order_id: delivery.seller_order_id.clone(),
            channel_id: delivery.channel_id.clone(),
            delivery_id: delivery.id,
            pickup_proof_url: delivery.pickup_proof_url.clone(),
            picked_up_at: delivery.picked_up_at.unwrap_or(delivery.updated_at),
        }),
        DeliveryStatus::Delivered => Some(WebhookEvent::DeliveryDelivered {
            seller_order_id: delivery.seller_order_id.clone(),
            channel_id: delivery.channel_id.clone(),
            delivery_id: delivery.id,
            delivery_proof_url: delivery.delivery_proof_url.clone(),
            delivered_at: delivery.delivered_at.unwrap_or(delivery.updated_at),
        }),
        DeliveryStatus::Failed => Some(WebhookEvent::DeliveryFailed {
            seller_order_id: delivery.seller_order_id.clone(),
            channel_id: delivery.channel_id.clone(),
            delivery_id: delivery.id,
            failure: FailureDetail {
                code: delivery.failure_code.clone(),
                reason: delivery.failure_reason.clone(),
                occurred_at: delivery.failed_at.unwrap_or(delivery.updated_at),
            },
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::config::Config;
    use crate::engine::dispatch::DispatchJob;
    use crate::engine::drivers;
    use crate::geo::GeoPoint;
    use crate::models::delivery::{DeliveryStatus, ProofType};
    use crate::models::driver::DriverStatus;
    use crate::state::AppState;
    use crate::webhook::WebhookEvent;

    use super::{
        assign_driver, create_from_order_ready, record_proof, update_status, OrderReady,
        OrderReadyPoint, StatusChange,
    };

    const PICKUP: GeoPoint = GeoPoint {
        lat: 12.9352,
        lon: 77.6245,
    };
    const DROP: GeoPoint = GeoPoint {
        lat: 12.9141,
        lon: 77.6411,
    };

    fn order(seller_order_id: &str) -> OrderReady {
        OrderReady {
            seller_order_id: seller_order_id.to_string(),
            channel_id: "chan-1".to_string(),
            pickup: OrderReadyPoint {
                lat: PICKUP.lat,
                lon: PICKUP.lon,
                label: Some("Koramangala kitchen".to_string()),
            },
            drop_off: OrderReadyPoint {
                lat: DROP.lat,
                lon: DROP.lon,
                label: None,
            },
        }
    }

    fn test_state() -> (
        Arc<AppState>,
        mpsc::Receiver<DispatchJob>,
        mpsc::Receiver<WebhookEvent>,
    ) {
        let (state, dispatch_rx, webhook_rx) = AppState::new(Config::default());
        (Arc::new(state), dispatch_rx, webhook_rx)
    }

    #[tokio::test]
    async fn order_ready_creates_once_and_queues_once() {
        let (state, mut dispatch_rx, _webhook_rx) = test_state();

        let first = create_from_order_ready(&state, order("ORD-1"))
            .await
            .unwrap();
        assert_eq!(first.status, DeliveryStatus::Pending);
        assert_eq!(dispatch_rx.try_recv().unwrap().delivery_id, first.id);

        let replay = create_from_order_ready(&state, order("ORD-1"))
            .await
            .unwrap();
        assert_eq!(replay.id, first.id);
        assert!(dispatch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pending_and_assigned_are_not_settable_directly() {
        let (state, _dispatch_rx, _webhook_rx) = test_state();
        let delivery = create_from_order_ready(&state, order("ORD-2"))
            .await
            .unwrap();

        for status in [DeliveryStatus::Pending, DeliveryStatus::Assigned] {
            let result = update_status(&state, delivery.id, StatusChange::to(status)).await;
            assert!(result.is_err());
        }
    }

    #[tokio::test]
    async fn out_of_order_transition_is_a_conflict() {
        let (state, _dispatch_rx, _webhook_rx) = test_state();
        let delivery = create_from_order_ready(&state, order("ORD-3"))
            .await
            .unwrap();

        let result =
            update_status(&state, delivery.id, StatusChange::to(DeliveryStatus::PickedUp)).await;
        assert!(result.is_err());

        let stored = state.store.delivery(delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert!(state
            .store
            .events_for_delivery(delivery.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn a_delivery_takes_exactly_one_driver() {
        let (state, _dispatch_rx, _webhook_rx) = test_state();
        let delivery = create_from_order_ready(&state, order("ORD-4"))
            .await
            .unwrap();
        let first = drivers::create_driver(&state, "Asha".to_string(), "+911111111111".to_string())
            .await
            .unwrap();
        let second = drivers::create_driver(&state, "Ravi".to_string(), "+912222222222".to_string())
            .await
            .unwrap();

        assign_driver(&state, delivery.id, first.id, 1.2, 2.9)
            .await
            .unwrap();
        let result = assign_driver(&state, delivery.id, second.id, 0.4, 2.9).await;
        assert!(result.is_err());

        let stored = state.store.delivery(delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.driver_id, Some(first.id));
        assert_eq!(stored.status, DeliveryStatus::Assigned);
    }

    #[tokio::test]
    async fn full_lifecycle_emits_only_allow_listed_webhooks() {
        let (state, _dispatch_rx, mut webhook_rx) = test_state();
        let delivery = create_from_order_ready(&state, order("ORD-5"))
            .await
            .unwrap();
        let driver = drivers::create_driver(&state, "Asha".to_string(), "+911111111111".to_string())
            .await
            .unwrap();
        drivers::record_heartbeat(&state, driver.id, PICKUP)
            .await
            .unwrap();

        assign_driver(&state, delivery.id, driver.id, 0.0, 2.9)
            .await
            .unwrap();
        drivers::occupy_driver(&state, driver.id).await.unwrap();

        record_proof(
            &state,
            driver.id,
            delivery.id,
            ProofType::Pickup,
            "https://proofs.test/pickup.jpg".to_string(),
            PICKUP,
        )
        .await
        .unwrap();
        update_status(
            &state,
            delivery.id,
            StatusChange::to(DeliveryStatus::InTransit),
        )
        .await
        .unwrap();
        record_proof(
            &state,
            driver.id,
            delivery.id,
            ProofType::Delivery,
            "https://proofs.test/drop.jpg".to_string(),
            DROP,
        )
        .await
        .unwrap();

        let mut names = Vec::new();
        while let Ok(event) = webhook_rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "DELIVERY_ASSIGNED_V1",
                "DELIVERY_PICKED_UP_V1",
                "DELIVERY_DELIVERED_V1"
            ]
        );

        // Terminal transition frees the driver for the next match.
        let freed = state.store.driver(driver.id).await.unwrap().unwrap();
        assert_eq!(freed.status, DriverStatus::Available);

        let events = state
            .store
            .events_for_delivery(delivery.id)
            .await
            .unwrap();
        let kinds: Vec<_> = events.iter().map(|event| event.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                DeliveryStatus::Assigned,
                DeliveryStatus::PickedUp,
                DeliveryStatus::InTransit,
                DeliveryStatus::Delivered
            ]
        );
    }

    #[tokio::test]
    async fn failure_carries_the_structured_detail() {
        let (state, _dispatch_rx, mut webhook_rx) = test_state();
        let delivery = create_from_order_ready(&state, order("ORD-6"))
            .await
            .unwrap();
        let driver = drivers::create_driver(&state, "Asha".to_string(), "+911111111111".to_string())
            .await
            .unwrap();
        assign_driver(&state, delivery.id, driver.id, 1.0, 2.9)
            .await
            .unwrap();
        let _ = webhook_rx.try_recv();

        let mut change = StatusChange::to(DeliveryStatus::Failed);
        change.failure_code = Some("CUSTOMER_UNREACHABLE".to_string());
        change.failure_reason = Some("no answer at the door".to_string());
        let failed = update_status(&state, delivery.id, change).await.unwrap();
        assert_eq!(failed.failure_code.as_deref(), Some("CUSTOMER_UNREACHABLE"));
        assert!(failed.failed_at.is_some());

        match webhook_rx.try_recv().unwrap() {
            WebhookEvent::DeliveryFailed { failure, .. } => {
                assert_eq!(failure.code.as_deref(), Some("CUSTOMER_UNREACHABLE"));
                assert_eq!(failure.reason.as_deref(), Some("no answer at the door"));
            }
            other => panic!("unexpected webhook: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_stays_internal() {
        let (state, _dispatch_rx, mut webhook_rx) = test_state();
        let delivery = create_from_order_ready(&state, order("ORD-7"))
            .await
            .unwrap();

        update_status(
            &state,
            delivery.id,
            StatusChange::to(DeliveryStatus::Cancelled),
        )
        .await
        .unwrap();
        assert!(webhook_rx.try_recv().is_err());

        let events = state
            .store
            .events_for_delivery(delivery.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, DeliveryStatus::Cancelled);
    }

    #[tokio::test]
    async fn proof_from_the_wrong_driver_is_rejected() {
        let (state, _dispatch_rx, _webhook_rx) = test_state();
        let delivery = create_from_order_ready(&state, order("ORD-8"))
            .await
            .unwrap();
        let assigned =
            drivers::create_driver(&state, "Asha".to_string(), "+911111111111".to_string())
                .await
                .unwrap();
        let stranger =
            drivers::create_driver(&state, "Ravi".to_string(), "+912222222222".to_string())
                .await
                .unwrap();
        assign_driver(&state, delivery.id, assigned.id, 1.0, 2.9)
            .await
            .unwrap();

        let result = record_proof(
            &state,
            stranger.id,
            delivery.id,
            ProofType::Pickup,
            "https://proofs.test/pickup.jpg".to_string(),
            PICKUP,
        )
        .await;
        assert!(result.is_err());
    }
}
