//! Availability Filter
//!
//! A drone or pilot is busy while any mission in `scheduled` or
//! `in_progress` references it, no matter how many such missions exist.
//! Drones additionally need [`MIN_DISPATCH_BATTERY_PCT`] to be dispatchable.
//! Everything here is read-only.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::Result;
use crate::mission::ACTIVE_STATUS_SQL;
use crate::model::{Drone, DroneId, MissionId, Pilot, PilotId};
use crate::store::{drone_from_row, pilot_from_row, EntityStore};

/// Minimum battery level for a drone to be offered for dispatch
pub const MIN_DISPATCH_BATTERY_PCT: u8 = 20;

/// Exclusive resources a mission can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Drone,
    Pilot,
}

impl Resource {
    pub(crate) fn table(self) -> &'static str {
        match self {
            Resource::Drone => "drones",
            Resource::Pilot => "pilots",
        }
    }

    pub(crate) fn mission_column(self) -> &'static str {
        match self {
            Resource::Drone => "drone_id",
            Resource::Pilot => "pilot_id",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Resource::Drone => "drone",
            Resource::Pilot => "pilot",
        }
    }
}

/// Drones and pilots held by active missions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusySet {
    pub drones: BTreeSet<DroneId>,
    pub pilots: BTreeSet<PilotId>,
}

/// First active mission holding `resource`, ignoring `excluding`.
///
/// Takes a bare connection so callers can run it inside their own transaction.
pub(crate) fn active_mission_holding(
    conn: &Connection,
    resource: Resource,
    id: i64,
    excluding: Option<MissionId>,
) -> rusqlite::Result<Option<MissionId>> {
    conn.query_row(
        &format!(
            "SELECT id FROM missions WHERE {} = ?1 AND {} AND (?2 IS NULL OR id != ?2) ORDER BY id LIMIT 1",
            resource.mission_column(),
            ACTIVE_STATUS_SQL
        ),
        rusqlite::params![id, excluding],
        |row| row.get(0),
    )
    .optional()
}

impl EntityStore {
    /// Identities referenced by any scheduled or in-progress mission
    pub fn busy_set(&self) -> Result<BusySet> {
        Ok(BusySet {
            drones: self.busy_ids(Resource::Drone)?,
            pilots: self.busy_ids(Resource::Pilot)?,
        })
    }

    fn busy_ids(&self, resource: Resource) -> Result<BTreeSet<i64>> {
        let column = resource.mission_column();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {col} FROM missions WHERE {active} AND {col} IS NOT NULL",
            col = column,
            active = ACTIVE_STATUS_SQL
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<BTreeSet<i64>, _>>()?;
        Ok(ids)
    }

    /// Drones not in the busy set with enough battery to fly
    pub fn available_drones(&self) -> Result<Vec<Drone>> {
        // NULL references must stay out of the subquery or NOT IN matches nothing
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, model, capacity_kg, battery_pct FROM drones
             WHERE battery_pct >= ?1
               AND id NOT IN (SELECT drone_id FROM missions WHERE {} AND drone_id IS NOT NULL)
             ORDER BY id",
            ACTIVE_STATUS_SQL
        ))?;
        let drones = stmt
            .query_map([MIN_DISPATCH_BATTERY_PCT], drone_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(available = drones.len(), "Computed available drones");
        Ok(drones)
    }

    /// Pilots not in the busy set, optionally restricted to one shift
    pub fn available_pilots(&self, shift: Option<&str>) -> Result<Vec<Pilot>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, first_name, last_name, shift, license FROM pilots
             WHERE (?1 IS NULL OR shift = ?1)
               AND id NOT IN (SELECT pilot_id FROM missions WHERE {} AND pilot_id IS NOT NULL)
             ORDER BY id",
            ACTIVE_STATUS_SQL
        ))?;
        let pilots = stmt
            .query_map([shift], pilot_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(available = pilots.len(), shift = ?shift, "Computed available pilots");
        Ok(pilots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Principal, Role};
    use crate::mission::MissionStatus;
    use crate::model::{Coordinates, NewDrone, NewMission, NewPilot};
    use chrono::{NaiveDate, NaiveTime};

    fn admin() -> Principal {
        Principal::new(1, Role::Admin)
    }

    fn mission(drone: Option<DroneId>, pilot: Option<PilotId>) -> NewMission {
        NewMission {
            scheduled_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            scheduled_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            pickup: Coordinates { lat: 45.0, lng: 9.0 },
            delivery: Coordinates { lat: 45.1, lng: 9.1 },
            drone_id: drone,
            pilot_id: pilot,
        }
    }

    fn seed(store: &mut EntityStore, battery: u8) -> (DroneId, PilotId) {
        let drone = store
            .create_drone(NewDrone {
                model: "Quad".into(),
                capacity_kg: 3.0,
                battery_pct: Some(battery),
            })
            .unwrap();
        let pilot = store
            .create_pilot(NewPilot {
                first_name: "Anna".into(),
                last_name: "Bianchi".into(),
                shift: "morning".into(),
                license: "A2".into(),
            })
            .unwrap();
        (drone.id, pilot.id)
    }

    #[test]
    fn test_idle_resources_are_available() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let (drone, pilot) = seed(&mut store, 50);

        assert_eq!(store.available_drones().unwrap()[0].id, drone);
        assert_eq!(store.available_pilots(None).unwrap()[0].id, pilot);
        assert_eq!(store.busy_set().unwrap(), BusySet::default());
    }

    #[test]
    fn test_low_battery_drone_excluded() {
        let mut store = EntityStore::open_in_memory().unwrap();
        seed(&mut store, MIN_DISPATCH_BATTERY_PCT - 1);
        let (ok_drone, _) = seed(&mut store, MIN_DISPATCH_BATTERY_PCT);

        let available = store.available_drones().unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, ok_drone);
    }

    #[test]
    fn test_active_mission_makes_resources_busy() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let (drone, pilot) = seed(&mut store, 50);
        let (other_drone, other_pilot) = seed(&mut store, 50);

        store.create_mission(mission(Some(drone), Some(pilot))).unwrap();

        let drones: Vec<_> = store.available_drones().unwrap().iter().map(|d| d.id).collect();
        let pilots: Vec<_> = store.available_pilots(None).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(drones, vec![other_drone]);
        assert_eq!(pilots, vec![other_pilot]);

        let busy = store.busy_set().unwrap();
        assert!(busy.drones.contains(&drone));
        assert!(busy.pilots.contains(&pilot));
    }

    #[test]
    fn test_unassigned_active_mission_does_not_hide_everyone() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let (drone, pilot) = seed(&mut store, 50);

        // Active mission with NULL references
        store.create_mission(mission(None, None)).unwrap();

        assert_eq!(store.available_drones().unwrap()[0].id, drone);
        assert_eq!(store.available_pilots(None).unwrap()[0].id, pilot);
    }

    #[test]
    fn test_terminal_mission_releases_resources() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let (drone, pilot) = seed(&mut store, 50);

        let m = store.create_mission(mission(Some(drone), Some(pilot))).unwrap();
        store.advance_status(&admin(), m.id, MissionStatus::Cancelled).unwrap();

        assert_eq!(store.available_drones().unwrap().len(), 1);
        assert_eq!(store.available_pilots(None).unwrap().len(), 1);
    }

    #[test]
    fn test_shift_filter() {
        let mut store = EntityStore::open_in_memory().unwrap();
        seed(&mut store, 50);
        store
            .create_pilot(NewPilot {
                first_name: "Marco".into(),
                last_name: "Verdi".into(),
                shift: "night".into(),
                license: "B1".into(),
            })
            .unwrap();

        let night = store.available_pilots(Some("night")).unwrap();
        assert_eq!(night.len(), 1);
        assert_eq!(night[0].first_name, "Marco");
        assert!(store.available_pilots(Some("evening")).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_reads_are_equal() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let (drone, _) = seed(&mut store, 50);
        seed(&mut store, 10);
        store.create_mission(mission(Some(drone), None)).unwrap();

        assert_eq!(store.available_drones().unwrap(), store.available_drones().unwrap());
        assert_eq!(store.available_pilots(None).unwrap(), store.available_pilots(None).unwrap());
    }
}
