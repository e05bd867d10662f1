//! Track Ingestion
//!
//! GPS samples keyed by (drone, mission, recorded_at). A repeated key
//! replaces the earlier sample. Timestamps are kept at millisecond
//! resolution; points without one are stamped at ingestion.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::mission::fetch_mission;
use crate::model::{Coordinates, DroneId, Mission, MissionId, TrackPoint, TrackPointRequest};
use crate::store::{from_millis, now_millis, to_millis, EntityStore};

/// Upper bound on points returned by a per-drone read
pub const DRONE_TRAIL_LIMIT: usize = 100;

/// Mission record together with its flown path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDetail {
    #[serde(flatten)]
    pub mission: Mission,
    pub tracks: Vec<TrackPoint>,
}

const POINT_COLUMNS: &str = "drone_id, mission_id, recorded_at, lat, lng";

fn point_from_row(row: &Row<'_>) -> rusqlite::Result<TrackPoint> {
    Ok(TrackPoint {
        drone_id: row.get(0)?,
        mission_id: row.get(1)?,
        recorded_at: from_millis(2, row.get(2)?)?,
        position: Coordinates {
            lat: row.get(3)?,
            lng: row.get(4)?,
        },
    })
}

/// Turn a loose request into a storable point.
///
/// The drone comes from the request when given, else from the mission.
fn resolve(conn: &Connection, req: &TrackPointRequest, stamp: DateTime<Utc>) -> Result<TrackPoint> {
    let mission_id = req
        .mission_id
        .ok_or_else(|| FleetError::validation("track point requires a mission_id"))?;
    let (lat, lng) = match (req.lat, req.lng) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => return Err(FleetError::validation("track point requires lat and lng")),
    };
    let position = Coordinates::new(lat, lng)?;

    let mission = fetch_mission(conn, mission_id)?;
    let drone_id = req.drone_id.or(mission.drone_id).ok_or_else(|| {
        FleetError::validation(format!("mission {} has no drone assigned", mission_id))
    })?;

    let recorded_at = req
        .recorded_at
        .map(|ts| from_millis(0, to_millis(&ts)))
        .transpose()?
        .unwrap_or(stamp);

    Ok(TrackPoint {
        drone_id,
        mission_id,
        recorded_at,
        position,
    })
}

fn insert(conn: &Connection, point: &TrackPoint) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO track_points (drone_id, mission_id, recorded_at, lat, lng)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            point.drone_id,
            point.mission_id,
            to_millis(&point.recorded_at),
            point.position.lat,
            point.position.lng,
        ],
    )?;
    Ok(())
}

impl EntityStore {
    /// Record a position for a mission's assigned drone
    pub fn append_point(
        &mut self,
        mission_id: MissionId,
        lat: f64,
        lng: f64,
        recorded_at: Option<DateTime<Utc>>,
    ) -> Result<TrackPoint> {
        self.append_point_request(TrackPointRequest {
            mission_id: Some(mission_id),
            drone_id: None,
            lat: Some(lat),
            lng: Some(lng),
            recorded_at,
        })
    }

    /// Record one position; the drone may be named explicitly
    pub fn append_point_request(&mut self, req: TrackPointRequest) -> Result<TrackPoint> {
        let point = resolve(&self.conn, &req, now_millis())?;
        insert(&self.conn, &point)?;

        debug!(
            mission_id = point.mission_id,
            drone_id = point.drone_id,
            "Track point recorded"
        );
        Ok(point)
    }

    /// Insert every well-formed item and return how many were stored.
    ///
    /// Items missing a mission or coordinates, or whose drone cannot be
    /// resolved, are skipped without failing the batch.
    pub fn append_batch(&mut self, requests: &[TrackPointRequest]) -> Result<usize> {
        let stamp = now_millis();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        for (index, req) in requests.iter().enumerate() {
            let point = match resolve(&tx, req, stamp) {
                Ok(point) => point,
                Err(FleetError::Database(e)) => return Err(FleetError::Database(e)),
                Err(e) => {
                    debug!(index = index, reason = %e, "Skipping batch track point");
                    continue;
                }
            };
            insert(&tx, &point)?;
            inserted += 1;
        }
        tx.commit()?;

        info!(
            received = requests.len(),
            inserted = inserted,
            "Track batch ingested"
        );
        Ok(inserted)
    }

    /// Flown path of a mission, oldest point first
    pub fn mission_path(&self, mission_id: MissionId) -> Result<Vec<TrackPoint>> {
        fetch_mission(&self.conn, mission_id)?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM track_points WHERE mission_id = ?1 ORDER BY recorded_at ASC, drone_id ASC",
            POINT_COLUMNS
        ))?;
        let points = stmt
            .query_map([mission_id], point_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(points)
    }

    pub fn get_mission_detail(&self, mission_id: MissionId) -> Result<MissionDetail> {
        let mission = fetch_mission(&self.conn, mission_id)?;
        let tracks = self.mission_path(mission_id)?;
        Ok(MissionDetail { mission, tracks })
    }

    /// Most recent point of a mission, if any were recorded
    pub fn latest_position(&self, mission_id: MissionId) -> Result<Option<TrackPoint>> {
        fetch_mission(&self.conn, mission_id)?;

        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM track_points WHERE mission_id = ?1
                     ORDER BY recorded_at DESC, drone_id DESC LIMIT 1",
                    POINT_COLUMNS
                ),
                [mission_id],
                point_from_row,
            )
            .optional()?)
    }

    /// Newest points flown by a drone across all missions, capped at [`DRONE_TRAIL_LIMIT`]
    pub fn drone_trail(&self, drone_id: DroneId, limit: Option<usize>) -> Result<Vec<TrackPoint>> {
        let limit = limit.unwrap_or(DRONE_TRAIL_LIMIT).min(DRONE_TRAIL_LIMIT);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM track_points WHERE drone_id = ?1
             ORDER BY recorded_at DESC, mission_id DESC LIMIT ?2",
            POINT_COLUMNS
        ))?;
        let points = stmt
            .query_map(params![drone_id, limit as i64], point_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(points)
    }
}
