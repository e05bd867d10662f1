//! Mission lifecycle management
//!
//! Missions move `scheduled -> in_progress -> completed`, or to `cancelled`
//! from either non-terminal state. Drone and pilot assignment is reserved
//! atomically: the busy check and the write share one IMMEDIATE transaction,
//! so two concurrent requests cannot commit the same resource twice.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::access::{Principal, Role};
use crate::availability::{active_mission_holding, Resource, MIN_DISPATCH_BATTERY_PCT};
use crate::error::{FleetError, Result};
use crate::model::{Coordinates, Mission, MissionFilter, MissionId, MissionPatch, NewMission};
use crate::store::EntityStore;

/// Lowest and highest accepted customer rating
pub const RATING_RANGE: std::ops::RangeInclusive<i64> = 1..=10;

/// SQL predicate matching missions that hold their drone and pilot
pub(crate) const ACTIVE_STATUS_SQL: &str = "status IN ('scheduled', 'in_progress')";

pub(crate) const MISSION_COLUMNS: &str = "id, scheduled_date, scheduled_time, pickup_lat, pickup_lng, \
     delivery_lat, delivery_lng, rating, comment, drone_id, pilot_id, status";

/// Mission lifecycle states
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    /// Created, resources reserved, not yet flying
    #[default]
    Scheduled,
    /// Drone airborne
    InProgress,
    /// Delivered
    Completed,
    /// Abandoned before completion
    Cancelled,
}

impl MissionStatus {
    pub const ALL: [MissionStatus; 4] = [
        MissionStatus::Scheduled,
        MissionStatus::InProgress,
        MissionStatus::Completed,
        MissionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Scheduled => "scheduled",
            MissionStatus::InProgress => "in_progress",
            MissionStatus::Completed => "completed",
            MissionStatus::Cancelled => "cancelled",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == label)
    }

    /// Check if state is terminal (completed or cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionStatus::Completed | MissionStatus::Cancelled)
    }

    /// Whether a mission in this state holds its drone and pilot
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if transition to new state is valid
    pub fn can_transition_to(&self, new_state: MissionStatus) -> bool {
        match (self, new_state) {
            // From Scheduled
            (MissionStatus::Scheduled, MissionStatus::InProgress) => true,
            (MissionStatus::Scheduled, MissionStatus::Cancelled) => true,
            // From InProgress
            (MissionStatus::InProgress, MissionStatus::Completed) => true,
            (MissionStatus::InProgress, MissionStatus::Cancelled) => true,
            // Terminal states cannot transition
            (MissionStatus::Completed, _) => false,
            (MissionStatus::Cancelled, _) => false,
            // Invalid transitions
            _ => false,
        }
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_label(s).ok_or_else(|| {
            FleetError::validation(format!(
                "unknown mission status '{}' (expected scheduled, in_progress, completed or cancelled)",
                s
            ))
        })
    }
}

impl ToSql for MissionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MissionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let label = value.as_str()?;
        Self::from_label(label)
            .ok_or_else(|| FromSqlError::Other(format!("unknown mission status '{}'", label).into()))
    }
}

pub(crate) fn mission_from_row(row: &Row<'_>) -> rusqlite::Result<Mission> {
    Ok(Mission {
        id: row.get(0)?,
        scheduled_date: row.get(1)?,
        scheduled_time: row.get(2)?,
        pickup: Coordinates {
            lat: row.get(3)?,
            lng: row.get(4)?,
        },
        delivery: Coordinates {
            lat: row.get(5)?,
            lng: row.get(6)?,
        },
        rating: row.get(7)?,
        comment: row.get(8)?,
        drone_id: row.get(9)?,
        pilot_id: row.get(10)?,
        status: row.get(11)?,
    })
}

pub(crate) fn fetch_mission(conn: &Connection, id: MissionId) -> Result<Mission> {
    conn.query_row(
        &format!("SELECT {} FROM missions WHERE id = ?1", MISSION_COLUMNS),
        [id],
        mission_from_row,
    )
    .optional()?
    .ok_or_else(|| FleetError::not_found("mission", id))
}

/// Refuse the reservation unless `id` exists, can fly, and is held by no
/// other active mission. Must run inside the transaction that writes it.
fn check_reservation(
    conn: &Connection,
    resource: Resource,
    id: i64,
    mission: Option<MissionId>,
) -> Result<()> {
    let exists: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", resource.table()),
        [id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(FleetError::not_found(resource.label(), id));
    }

    if resource == Resource::Drone {
        let battery: u8 =
            conn.query_row("SELECT battery_pct FROM drones WHERE id = ?1", [id], |row| {
                row.get(0)
            })?;
        if battery < MIN_DISPATCH_BATTERY_PCT {
            return Err(FleetError::validation(format!(
                "drone {} battery at {}%, below the {}% dispatch minimum",
                id, battery, MIN_DISPATCH_BATTERY_PCT
            )));
        }
    }

    if let Some(holder) = active_mission_holding(conn, resource, id, mission)? {
        warn!(
            resource = resource.label(),
            id = id,
            mission_id = holder,
            "Reservation refused: resource busy"
        );
        return Err(FleetError::ResourceBusy {
            resource: resource.label(),
            id,
            mission_id: holder,
        });
    }

    Ok(())
}

impl EntityStore {
    /// Schedule a mission, reserving its drone and pilot if given
    pub fn create_mission(&mut self, mission: NewMission) -> Result<Mission> {
        let pickup = mission.pickup.validated()?;
        let delivery = mission.delivery.validated()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(drone_id) = mission.drone_id {
            check_reservation(&tx, Resource::Drone, drone_id, None)?;
        }
        if let Some(pilot_id) = mission.pilot_id {
            check_reservation(&tx, Resource::Pilot, pilot_id, None)?;
        }

        tx.execute(
            "INSERT INTO missions (scheduled_date, scheduled_time, pickup_lat, pickup_lng,
                delivery_lat, delivery_lng, drone_id, pilot_id, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                mission.scheduled_date,
                mission.scheduled_time,
                pickup.lat,
                pickup.lng,
                delivery.lat,
                delivery.lng,
                mission.drone_id,
                mission.pilot_id,
                MissionStatus::Scheduled,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let created = fetch_mission(&tx, id)?;
        tx.commit()?;

        info!(
            mission_id = id,
            drone_id = ?created.drone_id,
            pilot_id = ?created.pilot_id,
            date = %created.scheduled_date,
            "Mission scheduled"
        );
        Ok(created)
    }

    pub fn get_mission(&self, id: MissionId) -> Result<Mission> {
        fetch_mission(&self.conn, id)
    }

    /// Missions matching `filter`, most recent schedule first
    pub fn list_missions(&self, filter: &MissionFilter) -> Result<Vec<Mission>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM missions
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR scheduled_date = ?2)
             ORDER BY scheduled_date DESC, scheduled_time DESC, id DESC",
            MISSION_COLUMNS
        ))?;
        let missions = stmt
            .query_map(params![filter.status, filter.date], mission_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(count = missions.len(), status = ?filter.status, "Listed missions");
        Ok(missions)
    }

    /// Partial update of a non-terminal mission.
    ///
    /// A new drone or pilot goes through the same reservation as creation.
    /// Pickup and delivery are locked once the drone is airborne.
    pub fn update_mission(&mut self, id: MissionId, patch: MissionPatch) -> Result<Mission> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut mission = fetch_mission(&tx, id)?;

        if mission.status.is_terminal() {
            return Err(FleetError::validation(format!(
                "mission {} is {} and can no longer be edited",
                id, mission.status
            )));
        }
        if let Some(to) = patch.status {
            if to != mission.status && !mission.status.can_transition_to(to) {
                warn!(mission_id = id, from = %mission.status, to = %to, "Invalid transition refused");
                return Err(FleetError::InvalidTransition {
                    from: mission.status,
                    to,
                });
            }
            mission.status = to;
        }

        // Checked against the post-patch status
        if patch.touches_geometry() && mission.status != MissionStatus::Scheduled {
            return Err(FleetError::validation(format!(
                "mission {} is {}; pickup and delivery are locked",
                id, mission.status
            )));
        }

        // Resources only need reserving while the mission stays active
        if mission.status.is_active() {
            if let Some(drone_id) = patch.drone_id.filter(|d| Some(*d) != mission.drone_id) {
                check_reservation(&tx, Resource::Drone, drone_id, Some(id))?;
            }
            if let Some(pilot_id) = patch.pilot_id.filter(|p| Some(*p) != mission.pilot_id) {
                check_reservation(&tx, Resource::Pilot, pilot_id, Some(id))?;
            }
        }

        if let Some(date) = patch.scheduled_date {
            mission.scheduled_date = date;
        }
        if let Some(time) = patch.scheduled_time {
            mission.scheduled_time = time;
        }
        if let Some(pickup) = patch.pickup {
            mission.pickup = pickup.validated()?;
        }
        if let Some(delivery) = patch.delivery {
            mission.delivery = delivery.validated()?;
        }
        if patch.drone_id.is_some() {
            mission.drone_id = patch.drone_id;
        }
        if patch.pilot_id.is_some() {
            mission.pilot_id = patch.pilot_id;
        }

        tx.execute(
            "UPDATE missions SET scheduled_date = ?1, scheduled_time = ?2, pickup_lat = ?3,
                pickup_lng = ?4, delivery_lat = ?5, delivery_lng = ?6, drone_id = ?7,
                pilot_id = ?8, status = ?9
             WHERE id = ?10",
            params![
                mission.scheduled_date,
                mission.scheduled_time,
                mission.pickup.lat,
                mission.pickup.lng,
                mission.delivery.lat,
                mission.delivery.lng,
                mission.drone_id,
                mission.pilot_id,
                mission.status,
                id,
            ],
        )?;
        tx.commit()?;

        info!(mission_id = id, status = %mission.status, "Mission updated");
        Ok(mission)
    }

    /// Move a mission along its lifecycle.
    ///
    /// Allowed for admins and for the pilot assigned to the mission.
    /// Re-submitting the current status of a live mission changes nothing.
    pub fn advance_status(
        &mut self,
        actor: &Principal,
        id: MissionId,
        to: MissionStatus,
    ) -> Result<Mission> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut mission = fetch_mission(&tx, id)?;

        let permitted = match actor.role {
            Role::Admin => true,
            Role::Pilot => mission.pilot_id == Some(actor.user_id),
            Role::Customer => false,
        };
        if !permitted {
            warn!(mission_id = id, user_id = actor.user_id, "Status change refused");
            return Err(FleetError::Forbidden(format!(
                "only the assigned pilot or an admin may change mission {}",
                id
            )));
        }

        let from = mission.status;
        if from == to && !from.is_terminal() {
            debug!(mission_id = id, status = %to, "Status unchanged");
            return Ok(mission);
        }
        if !from.can_transition_to(to) {
            warn!(mission_id = id, from = %from, to = %to, "Invalid transition refused");
            return Err(FleetError::InvalidTransition { from, to });
        }

        tx.execute(
            "UPDATE missions SET status = ?1 WHERE id = ?2",
            params![to, id],
        )?;
        tx.commit()?;
        mission.status = to;

        info!(mission_id = id, from = %from, to = %to, "Mission status advanced");
        Ok(mission)
    }

    /// Record the customer rating of a completed mission, replacing any earlier one
    pub fn rate_mission(
        &mut self,
        actor: &Principal,
        id: MissionId,
        rating: i64,
        comment: Option<String>,
    ) -> Result<Mission> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut mission = fetch_mission(&tx, id)?;

        let owns_order: bool = actor.role == Role::Customer
            && tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM orders WHERE mission_id = ?1 AND customer_id = ?2)",
                params![id, actor.user_id],
                |row| row.get(0),
            )?;
        if !owns_order {
            return Err(FleetError::Forbidden(format!(
                "mission {} can only be rated by a customer it delivered to",
                id
            )));
        }

        if mission.status != MissionStatus::Completed {
            return Err(FleetError::validation(format!(
                "mission {} is {}; only completed missions can be rated",
                id, mission.status
            )));
        }
        if !RATING_RANGE.contains(&rating) {
            return Err(FleetError::validation(format!(
                "rating {} outside [1, 10]",
                rating
            )));
        }
        let rating = rating as u8;

        tx.execute(
            "UPDATE missions SET rating = ?1, comment = ?2 WHERE id = ?3",
            params![rating, comment, id],
        )?;
        tx.commit()?;

        mission.rating = Some(rating);
        mission.comment = comment;

        info!(mission_id = id, rating = rating, "Mission rated");
        Ok(mission)
    }

    /// Delete a mission with its track points; bound orders fall back to pending
    pub fn delete_mission(&mut self, id: MissionId) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM missions WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(FleetError::not_found("mission", id));
        }

        let unbound = tx.execute(
            "UPDATE orders SET mission_id = NULL WHERE mission_id = ?1",
            [id],
        )?;
        let points = tx.execute("DELETE FROM track_points WHERE mission_id = ?1", [id])?;
        tx.execute("DELETE FROM missions WHERE id = ?1", [id])?;
        tx.commit()?;

        info!(
            mission_id = id,
            orders_unbound = unbound,
            track_points_removed = points,
            "Mission deleted"
        );
        Ok(())
    }
}
