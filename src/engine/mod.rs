pub mod deliveries;
pub mod dispatch;
pub mod drivers;
pub mod estimates;
pub mod matching;
pub mod offers;
pub mod reconcile;
