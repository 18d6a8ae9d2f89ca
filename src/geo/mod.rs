use serde::{Deserialize, Serialize};

use crate::error::AppError;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub const MAX_SEARCH_RADIUS_KM: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lon = (delta_lon / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&point.lat) {
        return Err(AppError::BadRequest(format!(
            "latitude {} is out of range",
            point.lat
        )));
    }
    if !(-180.0..=180.0).contains(&point.lon) {
        return Err(AppError::BadRequest(format!(
            "longitude {} is out of range",
            point.lon
        )));
    }
    Ok(())
}

pub fn validate_radius(radius_km: f64) -> Result<(), AppError> {
    if radius_km <= 0.0 || radius_km > MAX_SEARCH_RADIUS_KM {
        return Err(AppError::BadRequest(format!(
            "radius_km must be within (0, {MAX_SEARCH_RADIUS_KM}]"
        )));
    }
    Ok(())
}
