//! Skyhaul Fleet
//!
//! Mission orchestration and fleet availability engine for drone deliveries.
//!
//! This crate provides:
//! - SQLite-backed entity store (drones, pilots, catalog, missions, orders, tracks)
//! - Availability filter over drones and pilots held by active missions
//! - Mission state machine with atomic drone/pilot reservation
//! - GPS track ingestion, single and batch
//! - Order binding with snapshot weights and derived status
//! - Fleet statistics and per-resource mission history
//! - Capability-based authorization for the transport boundary

pub mod access;
pub mod availability;
pub mod error;
pub mod mission;
pub mod model;
pub mod orders;
pub mod stats;
pub mod store;
pub mod tracking;

// Re-export key types for convenience
pub use access::{authorize, Capability, Principal, Role};
pub use availability::{BusySet, Resource, MIN_DISPATCH_BATTERY_PCT};
pub use error::{FleetError, Result};
pub use mission::{MissionStatus, RATING_RANGE};
pub use model::*;
pub use orders::{
    Catalog, OrderDetail, OrderLineDetail, OrderStatus, OrderTracking, OrderView,
    DEFAULT_ORDER_KIND,
};
pub use stats::{
    DateCount, DronePerformance, MissionHistory, MissionStats, OrderStats, Overview,
    PerformanceSummary, PilotPerformance, RatingDistribution, MISSION_DATE_WINDOW,
};
pub use store::EntityStore;
pub use tracking::{MissionDetail, DRONE_TRAIL_LIMIT};
