use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::{deliveries, drivers, offers};
use crate::error::AppError;
use crate::models::offer::{Offer, RejectionReason};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/deliveries/:id/offers",
            post(create_offer).get(list_delivery_offers),
        )
        .route("/drivers/:id/offers", get(list_driver_offers))
        .route("/drivers/:id/offers/:offer_id/accept", post(accept_offer))
        .route("/drivers/:id/offers/:offer_id/reject", patch(reject_offer))
}

#[derive(Deserialize)]
pub struct CreateOfferRequest {
    pub driver_id: Uuid,
    pub expires_in_secs: Option<u64>,
}

#[derive(Deserialize)]
pub struct RejectOfferRequest {
    pub reason: Option<RejectionReason>,
}

async fn create_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateOfferRequest>,
) -> Result<Json<Offer>, AppError> {
    let offer =
        offers::create_offer(&state, payload.driver_id, id, payload.expires_in_secs).await?;
    Ok(Json(offer))
}

async fn list_delivery_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Offer>>, AppError> {
    deliveries::get_delivery(&state, id).await?;
    Ok(Json(state.store.offers_for_delivery(id).await?))
}

async fn list_driver_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Offer>>, AppError> {
    drivers::get_driver(&state, id).await?;
    Ok(Json(state.store.offers_for_driver(id).await?))
}

async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Path((id, offer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Offer>, AppError> {
    let offer = offers::accept_offer(&state, id, offer_id).await?;
    Ok(Json(offer))
}

async fn reject_offer(
    State(state): State<Arc<AppState>>,
    Path((id, offer_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<RejectOfferRequest>,
) -> Result<Json<Offer>, AppError> {
    let offer = offers::reject_offer(&state, id, offer_id, payload.reason).await?;
    Ok(Json(offer))
}
