use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::deliveries::{self, StatusChange};
use crate::engine::dispatch::{self, DispatchOutcome};
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::delivery::{Delivery, DeliveryEvent, DeliveryStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/events", get(list_events))
        .route("/deliveries/:id/status", patch(update_status))
        .route("/deliveries/:id/dispatch", post(dispatch_now))
        .route("/assignments", get(list_assignments))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
    pub proof_url: Option<String>,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct AssignmentsQuery {
    pub seller_order_id: String,
}

#[derive(Serialize)]
pub struct DispatchResponse {
    pub outcome: &'static str,
    pub driver_id: Option<Uuid>,
    pub offer_id: Option<Uuid>,
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = deliveries::get_delivery(&state, id).await?;
    Ok(Json(delivery))
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryEvent>>, AppError> {
    deliveries::get_delivery(&state, id).await?;
    Ok(Json(state.store.events_for_delivery(id).await?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    let change = StatusChange {
        status: payload.status,
        proof_url: payload.proof_url,
        failure_code: payload.failure_code,
        failure_reason: payload.failure_reason,
        metadata: payload.metadata,
    };
    let delivery = deliveries::update_status(&state, id, change).await?;
    Ok(Json(delivery))
}

/// Manual dispatch, bypassing the queue. Operators use this to retry a
/// delivery that stayed pending after earlier attempts.
async fn dispatch_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchResponse>, AppError> {
    match dispatch::process_job(&state, id).await? {
        DispatchOutcome::Assigned { driver_id } => Ok(Json(DispatchResponse {
            outcome: "assigned",
            driver_id: Some(driver_id),
            offer_id: None,
        })),
        DispatchOutcome::Offered { offer_id } => Ok(Json(DispatchResponse {
            outcome: "offered",
            driver_id: None,
            offer_id: Some(offer_id),
        })),
        DispatchOutcome::NoDrivers => Err(AppError::NoAvailableDrivers),
        DispatchOutcome::Skipped => {
            Err(AppError::Conflict(format!("delivery {id} is not pending")))
        }
    }
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssignmentsQuery>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    let delivery = state
        .store
        .delivery_by_seller_order(&query.seller_order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("seller order {}", query.seller_order_id)))?;
    Ok(Json(state.store.assignments_for_delivery(delivery.id).await?))
}
