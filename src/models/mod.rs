pub mod assignment;
pub mod delivery;
pub mod driver;
pub mod offer;
