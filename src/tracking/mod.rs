pub mod controller;
pub mod distance;
pub mod manager;
pub mod metrics;
pub mod route;
pub mod session;

pub use manager::TripSessionManager;
