//! Capability-based authorization
//!
//! The auth collaborator hands every request a [`Principal`]. Role checks
//! happen once, at the boundary, through [`authorize`]; checks that need
//! data (assigned pilot, order owner) stay inside the core operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FleetError, Result};
use crate::model::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Pilot,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Pilot => "pilot",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "pilot" => Ok(Role::Pilot),
            "admin" => Ok(Role::Admin),
            other => Err(FleetError::validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Authenticated caller. Pilots carry their pilot record id as `user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Protected operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ViewFleet,
    /// Availability pools and per-resource mission history
    PlanDispatch,
    ManageFleet,
    ReportBattery,
    ManageMissions,
    AdvanceMissionStatus,
    IngestTrack,
    ViewTracks,
    PlaceOrder,
    ViewOrders,
    ManageOrders,
    RateMission,
    ViewStatistics,
}

const EVERYONE: &[Role] = &[Role::Customer, Role::Pilot, Role::Admin];
const CREW: &[Role] = &[Role::Pilot, Role::Admin];
const ADMIN: &[Role] = &[Role::Admin];

impl Capability {
    /// Roles allowed to exercise this capability
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Capability::ViewFleet
            | Capability::ViewTracks
            | Capability::PlaceOrder
            | Capability::ViewOrders => EVERYONE,
            Capability::ReportBattery
            | Capability::AdvanceMissionStatus
            | Capability::IngestTrack => CREW,
            Capability::ManageFleet
            | Capability::PlanDispatch
            | Capability::ManageMissions
            | Capability::ManageOrders
            | Capability::ViewStatistics => ADMIN,
            Capability::RateMission => &[Role::Customer],
        }
    }

    pub fn permits(&self, role: Role) -> bool {
        self.allowed_roles().contains(&role)
    }
}

/// Single role check evaluated before any core operation runs
pub fn authorize(principal: Option<&Principal>, capability: Capability) -> Result<&Principal> {
    let principal = principal.ok_or(FleetError::Unauthenticated)?;
    if !capability.permits(principal.role) {
        tracing::warn!(
            user_id = principal.user_id,
            role = %principal.role,
            capability = ?capability,
            "Authorization denied"
        );
        return Err(FleetError::Forbidden(format!(
            "role {} may not perform {:?}",
            principal.role, capability
        )));
    }
    Ok(principal)
}
