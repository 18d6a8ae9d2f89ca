use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::assignment::Assignment;
use crate::models::delivery::{Delivery, DeliveryEvent};
use crate::models::driver::Driver;
use crate::models::offer::Offer;

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    Missing(String),
}

/// Durable record store. Writes here settle before any event is
/// published or any realtime message is fanned out.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_driver(&self, driver: Driver) -> Result<(), StoreError>;
    async fn driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError>;
    async fn drivers(&self) -> Result<Vec<Driver>, StoreError>;
    async fn update_driver(&self, driver: Driver) -> Result<(), StoreError>;

    async fn insert_delivery(&self, delivery: Delivery) -> Result<(), StoreError>;
    async fn delivery(&self, id: Uuid) -> Result<Option<Delivery>, StoreError>;
    async fn delivery_by_seller_order(
        &self,
        seller_order_id: &str,
    ) -> Result<Option<Delivery>, StoreError>;
    async fn deliveries(&self) -> Result<Vec<Delivery>, StoreError>;
    async fn update_delivery(&self, delivery: Delivery) -> Result<(), StoreError>;

    async fn insert_offer(&self, offer: Offer) -> Result<(), StoreError>;
    async fn offer(&self, id: Uuid) -> Result<Option<Offer>, StoreError>;
    async fn update_offer(&self, offer: Offer) -> Result<(), StoreError>;
    async fn offers_for_driver(&self, driver_id: Uuid) -> Result<Vec<Offer>, StoreError>;
    async fn offers_for_delivery(&self, delivery_id: Uuid) -> Result<Vec<Offer>, StoreError>;
    async fn pending_offer_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<Offer>, StoreError>;
    async fn pending_offer_for_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<Offer>, StoreError>;
    async fn expired_pending_offers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Offer>, StoreError>;

    async fn insert_assignment(&self, assignment: Assignment) -> Result<(), StoreError>;
    async fn assignments_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<Assignment>, StoreError>;

    async fn append_event(&self, event: DeliveryEvent) -> Result<(), StoreError>;
    async fn events_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<DeliveryEvent>, StoreError>;

    async fn driver_count(&self) -> usize;
    async fn delivery_count(&self) -> usize;
}
