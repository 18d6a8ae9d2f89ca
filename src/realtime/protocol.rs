use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::delivery::ProofType;
use crate::models::driver::DriverStatus;
use crate::models::offer::OfferPayload;

/// Driver-originated channel messages. The `type` tag is versioned so the
/// mobile client and the server can evolve independently.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    #[serde(rename = "LOCATION_UPDATE_V1")]
    LocationUpdate {
        lat: f64,
        lon: f64,
        #[serde(default)]
        accuracy: Option<f64>,
        #[serde(default)]
        delivery_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "STATUS_CHANGE_V1")]
    StatusChange {
        status: DriverStatus,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "PROOF_UPLOADED_V1")]
    ProofUploaded {
        delivery_id: Uuid,
        proof_type: ProofType,
        image_url: String,
        lat: f64,
        lon: f64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "PING_V1")]
    Ping,
}

/// Server pushes, always targeted at a single driver's group.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "ASSIGNMENT_CREATED_V1")]
    AssignmentCreated {
        assignment_id: Uuid,
        delivery_id: Uuid,
        seller_order_id: String,
        pickup: GeoPoint,
        pickup_label: Option<String>,
        drop_off: GeoPoint,
        distance_to_pickup_km: f64,
        distance_pickup_to_drop_km: f64,
        assigned_at: DateTime<Utc>,
    },
    #[serde(rename = "OFFER_CREATED_V1")]
    OfferCreated {
        offer_id: Uuid,
        delivery_id: Uuid,
        expires_at: DateTime<Utc>,
        payload: OfferPayload,
    },
    #[serde(rename = "PROOF_ACCEPTED_V1")]
    ProofAccepted {
        delivery_id: Uuid,
        proof_id: Uuid,
        proof_type: ProofType,
        accepted_at: DateTime<Utc>,
    },
    #[serde(rename = "LOCATION_ACK_V1")]
    LocationAck {
        driver_id: Uuid,
        delivery_id: Option<Uuid>,
        ack_at: DateTime<Utc>,
    },
    #[serde(rename = "ERROR_V1")]
    Error { code: String, message: String },
    #[serde(rename = "PONG_V1")]
    Pong { timestamp: DateTime<Utc> },
}
