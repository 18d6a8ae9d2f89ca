use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Json;
use axum::Router;

use crate::engine::deliveries::{self, OrderReady};
use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events/seller-order-ready", post(seller_order_ready))
}

/// Commerce platform intake. The shared secret is only enforced when one
/// is configured, so local setups can post without it.
async fn seller_order_ready(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<OrderReady>,
) -> Result<Json<Delivery>, AppError> {
    if let Some(secret) = &state.config.order_ready_webhook_secret {
        let presented = headers
            .get("x-webhook-secret")
            .and_then(|value| value.to_str().ok());
        if presented != Some(secret.as_str()) {
            return Err(AppError::Unauthorized("invalid webhook secret".to_string()));
        }
    }

    let delivery = deliveries::create_from_order_ready(&state, payload).await?;
    Ok(Json(delivery))
}
