use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{drivers, matching};
use crate::error::AppError;
use crate::geo::{self, GeoPoint};
use crate::models::driver::{Driver, DriverStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/available", get(available_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/active", patch(update_driver_active))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/location", patch(update_driver_location))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub phone: String,
}

#[derive(Deserialize)]
pub struct UpdateActiveRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Deserialize)]
pub struct AvailableQuery {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AvailableDriver {
    pub driver_id: Uuid,
    pub name: String,
    pub distance_km: f64,
    pub location: Option<GeoPoint>,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = drivers::create_driver(&state, payload.name, payload.phone).await?;
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(state.store.drivers().await?))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let driver = drivers::get_driver(&state, id).await?;
    Ok(Json(driver))
}

async fn available_drivers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<AvailableDriver>>, AppError> {
    let origin = GeoPoint {
        lat: query.lat,
        lon: query.lon,
    };
    geo::validate_point(&origin)?;
    let radius_km = query.radius_km.unwrap_or(state.config.default_radius_km);
    geo::validate_radius(radius_km)?;
    let limit = query.limit.unwrap_or(state.config.max_candidates);

    let candidates = matching::find_candidates(&state, &origin, radius_km, limit).await?;
    let available = candidates
        .into_iter()
        .map(|candidate| AvailableDriver {
            driver_id: candidate.driver.id,
            name: candidate.driver.name,
            distance_km: candidate.distance_km,
            location: candidate.driver.location,
        })
        .collect();
    Ok(Json(available))
}

async fn update_driver_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateActiveRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = drivers::set_driver_active(&state, id, payload.is_active).await?;
    Ok(Json(driver))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = drivers::set_driver_status(&state, id, payload.status).await?;
    Ok(Json(driver))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<Driver>, AppError> {
    let location = GeoPoint {
        lat: payload.lat,
        lon: payload.lon,
    };
    let driver = drivers::record_heartbeat(&state, id, location).await?;
    Ok(Json(driver))
}
