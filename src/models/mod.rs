pub mod message;
pub mod trip;
pub mod waypoint;
