use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::engine::drivers;
use crate::error::AppError;
use crate::realtime::auth;
use crate::realtime::session;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Driver channel entry point. The token is checked before the upgrade,
/// so a bad credential never gets a socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)
        .or(query.token.as_deref())
        .ok_or_else(|| AppError::Unauthorized("missing channel token".to_string()))?;
    let driver_id = auth::verify_token(token, &state.config.channel_jwt_secret)?;

    let driver = drivers::get_driver(&state, driver_id)
        .await
        .map_err(|_| AppError::Unauthorized(format!("unknown driver {driver_id}")))?;
    if !driver.is_active {
        return Err(AppError::Unauthorized(format!(
            "driver {driver_id} is disabled"
        )));
    }

    Ok(ws.on_upgrade(move |socket| session::run(socket, state, driver_id)))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}
