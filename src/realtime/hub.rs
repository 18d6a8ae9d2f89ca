use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::Outbound;

/// Per-driver connection groups. A driver may briefly hold more than one
/// open connection while reconnecting; pushes fan out to all of them.
#[derive(Default)]
pub struct Hub {
    groups: DashMap<Uuid, Vec<(Uuid, mpsc::UnboundedSender<Outbound>)>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, driver_id: Uuid, tx: mpsc::UnboundedSender<Outbound>) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.groups
            .entry(driver_id)
            .or_default()
            .push((conn_id, tx));
        conn_id
    }

    pub fn unregister(&self, driver_id: Uuid, conn_id: Uuid) {
        if let Some(mut group) = self.groups.get_mut(&driver_id) {
            group.retain(|(id, _)| *id != conn_id);
        }
        // The guard above must be released before taking the entry again.
        self.groups.remove_if(&driver_id, |_, group| group.is_empty());
    }

    pub fn is_connected(&self, driver_id: Uuid) -> bool {
        self.groups
            .get(&driver_id)
            .is_some_and(|group| !group.is_empty())
    }

    /// Returns whether at least one open connection took the message.
    pub fn send(&self, driver_id: Uuid, message: Outbound) -> bool {
        match self.groups.get(&driver_id) {
            Some(group) => group
                .iter()
                .fold(false, |delivered, (_, tx)| {
                    tx.send(message.clone()).is_ok() || delivered
                }),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::realtime::protocol::Outbound;

    use super::Hub;

    fn pong() -> Outbound {
        Outbound::Pong {
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_and_unregister_track_connectivity() {
        let hub = Hub::new();
        let driver_id = Uuid::new_v4();
        assert!(!hub.is_connected(driver_id));

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = hub.register(driver_id, tx);
        assert!(hub.is_connected(driver_id));

        hub.unregister(driver_id, conn_id);
        assert!(!hub.is_connected(driver_id));
    }

    #[tokio::test]
    async fn send_fans_out_to_every_open_connection() {
        let hub = Hub::new();
        let driver_id = Uuid::new_v4();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.register(driver_id, tx_a);
        let conn_b = hub.register(driver_id, tx_b);

        assert!(hub.send(driver_id, pong()));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        hub.unregister(driver_id, conn_b);
        assert!(hub.is_connected(driver_id));
    }

    #[tokio::test]
    async fn send_without_a_group_reports_undelivered() {
        let hub = Hub::new();
        assert!(!hub.send(Uuid::new_v4(), pong()));
    }
}
