//! Fleet records
//!
//! Plain data types persisted by the [`EntityStore`](crate::store::EntityStore),
//! together with the creation and patch payloads accepted for each of them.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::mission::MissionStatus;

pub type DroneId = i64;
pub type PilotId = i64;
pub type ProductId = i64;
pub type MissionId = i64;
pub type OrderId = i64;
pub type UserId = i64;

/// Decimal places kept for GPS coordinates (sub-meter resolution)
pub const COORDINATE_PRECISION: i32 = 8;

/// Decimal places kept for weights and capacities
pub const WEIGHT_PRECISION: i32 = 2;

/// Round `value` to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// WGS84 position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

impl Coordinates {
    /// Build a validated position rounded to storage precision
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        Self { lat, lng }.validated()
    }

    /// Check ranges and round to storage precision
    pub fn validated(self) -> Result<Self> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(FleetError::validation(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(FleetError::validation(format!(
                "longitude {} outside [-180, 180]",
                self.lng
            )));
        }
        Ok(Self {
            lat: round_to(self.lat, COORDINATE_PRECISION),
            lng: round_to(self.lng, COORDINATE_PRECISION),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    pub id: DroneId,
    pub model: String,
    /// Maximum payload in kilograms
    pub capacity_kg: f64,
    /// Battery level, percent
    pub battery_pct: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDrone {
    pub model: String,
    pub capacity_kg: f64,
    /// Defaults to a full battery
    #[serde(default)]
    pub battery_pct: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DronePatch {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub capacity_kg: Option<f64>,
    #[serde(default)]
    pub battery_pct: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pilot {
    pub id: PilotId,
    pub first_name: String,
    pub last_name: String,
    /// Shift label, e.g. "morning"
    pub shift: String,
    pub license: String,
}

impl Pilot {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPilot {
    pub first_name: String,
    pub last_name: String,
    pub shift: String,
    pub license: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PilotPatch {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub shift: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

/// Catalog entry; only its weight matters to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub weight_kg: f64,
    pub category: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub weight_kg: f64,
    #[serde(default)]
    pub category: String,
}

/// A scheduled delivery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub pickup: Coordinates,
    pub delivery: Coordinates,
    /// Customer rating, 1-10
    pub rating: Option<u8>,
    pub comment: Option<String>,
    pub drone_id: Option<DroneId>,
    pub pilot_id: Option<PilotId>,
    pub status: MissionStatus,
}

impl Mission {
    /// Whether this mission holds its drone and pilot
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMission {
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub pickup: Coordinates,
    pub delivery: Coordinates,
    #[serde(default)]
    pub drone_id: Option<DroneId>,
    #[serde(default)]
    pub pilot_id: Option<PilotId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionPatch {
    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub scheduled_time: Option<NaiveTime>,
    #[serde(default)]
    pub pickup: Option<Coordinates>,
    #[serde(default)]
    pub delivery: Option<Coordinates>,
    #[serde(default)]
    pub drone_id: Option<DroneId>,
    #[serde(default)]
    pub pilot_id: Option<PilotId>,
    #[serde(default)]
    pub status: Option<MissionStatus>,
}

impl MissionPatch {
    pub(crate) fn touches_geometry(&self) -> bool {
        self.pickup.is_some() || self.delivery.is_some()
    }
}

/// Listing filter for missions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionFilter {
    #[serde(default)]
    pub status: Option<MissionStatus>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Customer order; `total_weight_kg` is fixed at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub kind: String,
    pub total_weight_kg: f64,
    pub created_at: DateTime<Utc>,
    pub address: String,
    pub customer_id: UserId,
    pub mission_id: Option<MissionId>,
}

/// One product line of an order, keyed by (order, product)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: ProductId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

impl LineRequest {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOrder {
    /// Defaults to "Standard"
    #[serde(default)]
    pub kind: Option<String>,
    pub address: String,
    #[serde(default)]
    pub lines: Vec<LineRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderPatch {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub mission_id: Option<MissionId>,
}

/// One GPS sample, keyed by (drone, mission, recorded_at)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub drone_id: DroneId,
    pub mission_id: MissionId,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub position: Coordinates,
}

/// Loosely-typed point as received from a telemetry feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackPointRequest {
    #[serde(default)]
    pub mission_id: Option<MissionId>,
    #[serde(default)]
    pub drone_id: Option<DroneId>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    /// Ingestion time when absent
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}
