use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::assignment::Assignment;
use crate::models::delivery::{Delivery, DeliveryEvent};
use crate::models::driver::Driver;
use crate::models::offer::{Offer, OfferStatus};

use super::{Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    drivers: DashMap<Uuid, Driver>,
    deliveries: DashMap<Uuid, Delivery>,
    seller_orders: DashMap<String, Uuid>,
    offers: DashMap<Uuid, Offer>,
    pending_by_delivery: DashMap<Uuid, Uuid>,
    pending_by_driver: DashMap<Uuid, Uuid>,
    assignments: DashMap<Uuid, Assignment>,
    events: RwLock<Vec<DeliveryEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Copy the id out so no guard is held while touching the offers map.
    fn pending_offer_id(index: &DashMap<Uuid, Uuid>, key: Uuid) -> Option<Uuid> {
        index.get(&key).map(|entry| *entry.value())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_driver(&self, driver: Driver) -> Result<(), StoreError> {
        self.drivers.insert(driver.id, driver);
        Ok(())
    }

    async fn driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn drivers(&self) -> Result<Vec<Driver>, StoreError> {
        Ok(self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_driver(&self, driver: Driver) -> Result<(), StoreError> {
        match self.drivers.get_mut(&driver.id) {
            Some(mut entry) => {
                *entry = driver;
                Ok(())
            }
            None => Err(StoreError::Missing(format!("driver {}", driver.id))),
        }
    }

    async fn insert_delivery(&self, delivery: Delivery) -> Result<(), StoreError> {
        self.seller_orders
            .insert(delivery.seller_order_id.clone(), delivery.id);
        self.deliveries.insert(delivery.id, delivery);
        Ok(())
    }

    async fn delivery(&self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
        Ok(self.deliveries.get(&id).map(|entry| entry.value().clone()))
    }

    async fn delivery_by_seller_order(
        &self,
        seller_order_id: &str,
    ) -> Result<Option<Delivery>, StoreError> {
        let id = self
            .seller_orders
            .get(seller_order_id)
            .map(|entry| *entry.value());
        match id {
            Some(id) => self.delivery(id).await,
            None => Ok(None),
        }
    }

    async fn deliveries(&self) -> Result<Vec<Delivery>, StoreError> {
        Ok(self
            .deliveries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_delivery(&self, delivery: Delivery) -> Result<(), StoreError> {
        match self.deliveries.get_mut(&delivery.id) {
            Some(mut entry) => {
                *entry = delivery;
                Ok(())
            }
            None => Err(StoreError::Missing(format!("delivery {}", delivery.id))),
        }
    }

    async fn insert_offer(&self, offer: Offer) -> Result<(), StoreError> {
        if offer.status == OfferStatus::Pending {
            self.pending_by_delivery.insert(offer.delivery_id, offer.id);
            self.pending_by_driver.insert(offer.driver_id, offer.id);
        }
        self.offers.insert(offer.id, offer);
        Ok(())
    }

    async fn offer(&self, id: Uuid) -> Result<Option<Offer>, StoreError> {
        Ok(self.offers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_offer(&self, offer: Offer) -> Result<(), StoreError> {
        if offer.status != OfferStatus::Pending {
            self.pending_by_delivery
                .remove_if(&offer.delivery_id, |_, id| *id == offer.id);
            self.pending_by_driver
                .remove_if(&offer.driver_id, |_, id| *id == offer.id);
        }
        match self.offers.get_mut(&offer.id) {
            Some(mut entry) => {
                *entry = offer;
                Ok(())
            }
            None => Err(StoreError::Missing(format!("offer {}", offer.id))),
        }
    }

    async fn offers_for_driver(&self, driver_id: Uuid) -> Result<Vec<Offer>, StoreError> {
        let mut found: Vec<Offer> = self
            .offers
            .iter()
            .filter(|entry| entry.value().driver_id == driver_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|offer| offer.created_at);
        Ok(found)
    }

    async fn offers_for_delivery(&self, delivery_id: Uuid) -> Result<Vec<Offer>, StoreError> {
        let mut found: Vec<Offer> = self
            .offers
            .iter()
            .filter(|entry| entry.value().delivery_id == delivery_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|offer| offer.created_at);
        Ok(found)
    }

    async fn pending_offer_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<Offer>, StoreError> {
        match Self::pending_offer_id(&self.pending_by_delivery, delivery_id) {
            Some(id) => self.offer(id).await,
            None => Ok(None),
        }
    }

    async fn pending_offer_for_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<Offer>, StoreError> {
        match Self::pending_offer_id(&self.pending_by_driver, driver_id) {
            Some(id) => self.offer(id).await,
            None => Ok(None),
        }
    }

    async fn expired_pending_offers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Offer>, StoreError> {
        Ok(self
            .offers
            .iter()
            .filter(|entry| {
                let offer = entry.value();
                offer.status == OfferStatus::Pending && offer.expires_at <= now
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<(), StoreError> {
        self.assignments.insert(assignment.id, assignment);
        Ok(())
    }

    async fn assignments_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<Assignment>, StoreError> {
        let mut found: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| entry.value().delivery_id == delivery_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|assignment| assignment.created_at);
        Ok(found)
    }

    async fn append_event(&self, event: DeliveryEvent) -> Result<(), StoreError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn events_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<DeliveryEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|event| event.delivery_id == delivery_id)
            .cloned()
            .collect())
    }

    async fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    async fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::models::driver::DriverStatus;
    use crate::models::offer::{OfferPayload, OfferStatus, RejectionReason};
    use crate::models::{delivery::Delivery, delivery::DeliveryStatus, driver::Driver, offer::Offer};
    use crate::store::{MemoryStore, Store};

    fn sample_driver() -> Driver {
        let now = Utc::now();
        Driver {
            id: Uuid::new_v4(),
            name: "Asha".to_string(),
            phone: "+911234567890".to_string(),
            is_active: true,
            status: DriverStatus::Offline,
            location: None,
            last_active_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_delivery() -> Delivery {
        let now = Utc::now();
        Delivery {
            id: Uuid::new_v4(),
            seller_order_id: format!("ORD-{}", Uuid::new_v4()),
            channel_id: "chan-1".to_string(),
            pickup: crate::geo::GeoPoint {
                lat: 12.9716,
                lon: 77.5946,
            },
            pickup_label: Some("MG Road".to_string()),
            drop_off: crate::geo::GeoPoint {
                lat: 12.9600,
                lon: 77.6400,
            },
            status: DeliveryStatus::Pending,
            driver_id: None,
            pickup_proof_url: None,
            delivery_proof_url: None,
            failure_code: None,
            failure_reason: None,
            assigned_at: None,
            picked_up_at: None,
            delivered_at: None,
            failed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_offer(delivery: &Delivery, driver_id: Uuid) -> Offer {
        let now = Utc::now();
        Offer {
            id: Uuid::new_v4(),
            delivery_id: delivery.id,
            driver_id,
            status: OfferStatus::Pending,
            payload: OfferPayload {
                pickup: delivery.pickup,
                pickup_label: delivery.pickup_label.clone(),
                estimated_pickup_minutes: 13,
                estimated_completion_at: now + Duration::minutes(45),
                estimated_distance_km: 8.41,
                estimated_earning: 70.0,
            },
            created_at: now,
            expires_at: now + Duration::seconds(30),
            accepted_at: None,
            rejected_at: None,
            rejection_reason: None,
            response_time_ms: None,
        }
    }

    #[tokio::test]
    async fn update_missing_driver_is_an_error() {
        let store = MemoryStore::new();
        let driver = sample_driver();
        assert!(store.update_driver(driver).await.is_err());
    }

    #[tokio::test]
    async fn seller_order_lookup_round_trips() {
        let store = MemoryStore::new();
        let delivery = sample_delivery();
        let seller_order_id = delivery.seller_order_id.clone();
        store.insert_delivery(delivery.clone()).await.unwrap();

        let found = store
            .delivery_by_seller_order(&seller_order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, delivery.id);
        assert!(store
            .delivery_by_seller_order("ORD-unknown")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn pending_offer_indexes_clear_on_terminal_update() {
        let store = MemoryStore::new();
        let delivery = sample_delivery();
        let driver_id = Uuid::new_v4();
        let mut offer = sample_offer(&delivery, driver_id);
        store.insert_offer(offer.clone()).await.unwrap();

        assert!(store
            .pending_offer_for_delivery(delivery.id)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .pending_offer_for_driver(driver_id)
            .await
            .unwrap()
            .is_some());

        offer.status = OfferStatus::Rejected;
        offer.rejected_at = Some(Utc::now());
        offer.rejection_reason = Some(RejectionReason::TooFar);
        store.update_offer(offer).await.unwrap();

        assert!(store
            .pending_offer_for_delivery(delivery.id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .pending_offer_for_driver(driver_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_sweep_only_reports_overdue_pending_offers() {
        let store = MemoryStore::new();
        let delivery = sample_delivery();
        let mut overdue = sample_offer(&delivery, Uuid::new_v4());
        overdue.expires_at = Utc::now() - Duration::seconds(1);
        let fresh = sample_offer(&sample_delivery(), Uuid::new_v4());

        store.insert_offer(overdue.clone()).await.unwrap();
        store.insert_offer(fresh).await.unwrap();

        let expired = store.expired_pending_offers(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, overdue.id);
    }
}
