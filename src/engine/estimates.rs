use chrono::{DateTime, Duration, Utc};

use crate::geo::{self, GeoPoint};
use crate::models::offer::OfferPayload;

pub const AVERAGE_SPEED_KMH: f64 = 25.0;
pub const BASE_FARE: f64 = 30.0;
pub const PER_KM_RATE: f64 = 8.0;
// Parking, handover and proof capture at both ends.
pub const HANDOVER_BUFFER_MINUTES: i64 = 10;

pub fn minutes_at_speed(distance_km: f64) -> u32 {
    (distance_km / AVERAGE_SPEED_KMH * 60.0).ceil() as u32
}

pub fn earning_for(distance_km: f64) -> f64 {
    round2(BASE_FARE + PER_KM_RATE * distance_km)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn offer_payload(
    driver_location: &GeoPoint,
    pickup: &GeoPoint,
    pickup_label: Option<String>,
    drop_off: &GeoPoint,
    now: DateTime<Utc>,
) -> OfferPayload {
    let pickup_leg_km = geo::haversine_km(driver_location, pickup);
    let drop_leg_km = geo::haversine_km(pickup, drop_off);
    let total_km = pickup_leg_km + drop_leg_km;
    let travel_minutes = i64::from(minutes_at_speed(total_km));

    OfferPayload {
        pickup: *pickup,
        pickup_label,
        estimated_pickup_minutes: minutes_at_speed(pickup_leg_km),
        estimated_completion_at: now + Duration::minutes(travel_minutes + HANDOVER_BUFFER_MINUTES),
        estimated_distance_km: round2(total_km),
        estimated_earning: earning_for(total_km),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::geo::GeoPoint;

    use super::{minutes_at_speed, offer_payload, round2};

    const DRIVER: GeoPoint = GeoPoint {
        lat: 12.9716,
        lon: 77.5946,
    };
    const PICKUP: GeoPoint = GeoPoint {
        lat: 12.9352,
        lon: 77.6245,
    };
    const DROP: GeoPoint = GeoPoint {
        lat: 12.9600,
        lon: 77.6400,
    };

    #[test]
    fn travel_minutes_round_up() {
        assert_eq!(minutes_at_speed(5.1846), 13);
        assert_eq!(minutes_at_speed(25.0), 60);
        assert_eq!(minutes_at_speed(0.0), 0);
    }

    #[test]
    fn payload_derives_from_real_distances() {
        let now = Utc.with_ymd_and_hms(2026, 8, 22, 10, 0, 0).unwrap();
        let payload = offer_payload(&DRIVER, &PICKUP, Some("MG Road".to_string()), &DROP, now);

        assert_eq!(payload.estimated_pickup_minutes, 13);
        assert!((payload.estimated_distance_km - 8.41).abs() < 0.01);
        // 21 travel minutes for 8.41 km at 25 km/h, plus the handover buffer.
        assert_eq!(payload.estimated_completion_at, now + Duration::minutes(31));
        assert!((payload.estimated_earning - 97.31).abs() < 0.05);
        assert_eq!(payload.pickup, PICKUP);
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        assert_eq!(round2(5.18461), 5.18);
        assert_eq!(round2(5.185), 5.19);
        assert_eq!(round2(5.0), 5.0);
    }
}
