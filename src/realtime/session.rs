use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{deliveries, drivers};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::DriverStatus;
use crate::realtime::protocol::{Inbound, Outbound};
use crate::state::AppState;

/// One authenticated driver connection. Everything pushed at this driver
/// flows through the hub group; replies use the same path.
pub async fn run(socket: WebSocket, state: Arc<AppState>, driver_id: Uuid) {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let conn_id = state.hub.register(driver_id, out_tx.clone());
    state.metrics.ws_connections_active.inc();
    info!(driver_id = %driver_id, "driver channel connected");

    mark_connected(&state, driver_id).await;

    let (mut sender, mut receiver) = socket.split();

    let metrics = state.metrics.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize channel message");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            metrics
                .ws_messages_total
                .with_label_values(&["outbound"])
                .inc();
        }
    });

    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            recv_state
                .metrics
                .ws_messages_total
                .with_label_values(&["inbound"])
                .inc();

            if let Some(reply) = handle_message(&recv_state, driver_id, text.as_str()).await {
                if out_tx.send(reply).is_err() {
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.hub.unregister(driver_id, conn_id);
    state.metrics.ws_connections_active.dec();
    info!(driver_id = %driver_id, "driver channel disconnected");

    spawn_offline_grace(state, driver_id);
}

// A reconnect during an active delivery must not free the driver.
async fn mark_connected(state: &AppState, driver_id: Uuid) {
    match drivers::get_driver(state, driver_id).await {
        Ok(driver) if driver.status == DriverStatus::Offline => {
            if let Err(err) =
                drivers::set_driver_status(state, driver_id, DriverStatus::Available).await
            {
                warn!(
                    driver_id = %driver_id,
                    error = %err,
                    "failed to mark driver available on connect"
                );
            }
        }
        Ok(_) => {}
        Err(err) => {
            warn!(driver_id = %driver_id, error = %err, "driver lookup failed on connect");
        }
    }
}

/// Grace window before a dropped connection takes the driver out of
/// matching. A reconnect within the window leaves everything untouched.
fn spawn_offline_grace(state: Arc<AppState>, driver_id: Uuid) {
    tokio::spawn(async move {
        tokio::time::sleep(state.config.disconnect_grace()).await;
        if state.hub.is_connected(driver_id) {
            return;
        }
        let Ok(driver) = drivers::get_driver(&state, driver_id).await else {
            return;
        };
        if !driver.is_active || driver.status == DriverStatus::Offline {
            return;
        }

        match drivers::set_driver_status(&state, driver_id, DriverStatus::Offline).await {
            Ok(_) => {
                info!(driver_id = %driver_id, "disconnect grace elapsed; driver marked offline");
            }
            Err(err) => {
                warn!(
                    driver_id = %driver_id,
                    error = %err,
                    "failed to mark driver offline after disconnect"
                );
            }
        }
    });
}

/// Handles one inbound frame. Failures become `ERROR_V1` replies; the
/// connection itself is never torn down over a bad message.
async fn handle_message(state: &AppState, driver_id: Uuid, text: &str) -> Option<Outbound> {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(err) => {
            return Some(Outbound::Error {
                code: "BAD_REQUEST".to_string(),
                message: format!("unrecognized message: {err}"),
            });
        }
    };

    match dispatch_inbound(state, driver_id, inbound).await {
        Ok(reply) => reply,
        Err(err) => Some(Outbound::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }),
    }
}

async fn dispatch_inbound(
    state: &AppState,
    driver_id: Uuid,
    inbound: Inbound,
) -> Result<Option<Outbound>, AppError> {
    match inbound {
        Inbound::Ping => Ok(Some(Outbound::Pong {
            timestamp: Utc::now(),
        })),
        Inbound::LocationUpdate {
            lat,
            lon,
            delivery_id,
            ..
        } => {
            drivers::record_heartbeat(state, driver_id, GeoPoint { lat, lon }).await?;
            Ok(Some(Outbound::LocationAck {
                driver_id,
                delivery_id,
                ack_at: Utc::now(),
            }))
        }
        Inbound::StatusChange { status, .. } => {
            drivers::set_driver_status(state, driver_id, status).await?;
            Ok(None)
        }
        Inbound::ProofUploaded {
            delivery_id,
            proof_type,
            image_url,
            lat,
            lon,
            ..
        } => {
            deliveries::record_proof(
                state,
                driver_id,
                delivery_id,
                proof_type,
                image_url,
                GeoPoint { lat, lon },
            )
            .await?;
            // PROOF_ACCEPTED_V1 arrives through the hub once the transition lands.
            Ok(None)
        }
    }
}
