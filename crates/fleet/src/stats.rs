//! Fleet Statistics
//!
//! Read-only aggregates over the mission and order history.

use chrono::NaiveDate;
use rusqlite::{params, Row};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::mission::{mission_from_row, MissionStatus, MISSION_COLUMNS, RATING_RANGE};
use crate::model::{round_to, Drone, DroneId, Mission, Pilot, PilotId};
use crate::store::{drone_from_row, pilot_from_row, EntityStore};

/// Number of distinct mission dates reported by [`EntityStore::mission_stats`]
pub const MISSION_DATE_WINDOW: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub orders_total: u64,
    pub missions_total: u64,
    pub missions_completed: u64,
    pub missions_in_progress: u64,
    pub drones_total: u64,
    pub drones_available: u64,
    pub pilots_total: u64,
    /// Distinct customers that placed at least one order
    pub customers_total: u64,
    /// Mean over rated missions, one decimal
    pub mean_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateCount {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissionStats {
    /// Every status, including those with no missions
    pub by_status: BTreeMap<MissionStatus, u64>,
    /// Most recent dates first
    pub by_date: Vec<DateCount>,
}

/// Totals for one drone or pilot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_missions: u64,
    pub completed_missions: u64,
    /// Mean over rated missions, one decimal
    pub mean_rating: Option<f64>,
}

impl PerformanceSummary {
    fn from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<Self> {
        let total: i64 = row.get(first)?;
        let completed: i64 = row.get(first + 1)?;
        let mean: Option<f64> = row.get(first + 2)?;
        Ok(Self {
            total_missions: total as u64,
            completed_missions: completed as u64,
            mean_rating: mean.map(|m| round_to(m, 1)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DronePerformance {
    #[serde(flatten)]
    pub drone: Drone,
    #[serde(flatten)]
    pub summary: PerformanceSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PilotPerformance {
    #[serde(flatten)]
    pub pilot: Pilot,
    pub name: String,
    #[serde(flatten)]
    pub summary: PerformanceSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingDistribution {
    /// One bucket per label 1-10, empty ones included
    pub buckets: BTreeMap<u8, u64>,
    pub rated_total: u64,
    /// Two decimals
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderStats {
    pub by_kind: BTreeMap<String, u64>,
    /// Two decimals
    pub mean_weight_kg: Option<f64>,
    pub total: u64,
}

/// Missions flown by one drone or pilot, most recent first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionHistory {
    pub missions: Vec<Mission>,
    pub summary: PerformanceSummary,
}

const SUMMARY_COLUMNS: &str =
    "COUNT(m.id), COALESCE(SUM(m.status = 'completed'), 0), AVG(m.rating)";

impl EntityStore {
    pub fn overview(&self) -> Result<Overview> {
        let mean: Option<f64> = self.conn.query_row(
            "SELECT AVG(rating) FROM missions WHERE rating IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(Overview {
            orders_total: self.count("SELECT COUNT(*) FROM orders")?,
            missions_total: self.count("SELECT COUNT(*) FROM missions")?,
            missions_completed: self
                .count("SELECT COUNT(*) FROM missions WHERE status = 'completed'")?,
            missions_in_progress: self
                .count("SELECT COUNT(*) FROM missions WHERE status = 'in_progress'")?,
            drones_total: self.count("SELECT COUNT(*) FROM drones")?,
            drones_available: self.available_drones()?.len() as u64,
            pilots_total: self.count("SELECT COUNT(*) FROM pilots")?,
            customers_total: self.count("SELECT COUNT(DISTINCT customer_id) FROM orders")?,
            mean_rating: mean.map(|m| round_to(m, 1)),
        })
    }

    pub fn mission_stats(&self) -> Result<MissionStats> {
        let mut by_status: BTreeMap<MissionStatus, u64> =
            MissionStatus::ALL.into_iter().map(|s| (s, 0)).collect();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM missions GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, MissionStatus>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            by_status.insert(status, count as u64);
        }

        let mut stmt = self.conn.prepare(
            "SELECT scheduled_date, COUNT(*) FROM missions
             GROUP BY scheduled_date ORDER BY scheduled_date DESC LIMIT ?1",
        )?;
        let by_date = stmt
            .query_map([MISSION_DATE_WINDOW as i64], |row| {
                Ok(DateCount {
                    date: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(MissionStats { by_status, by_date })
    }

    /// Drone leaderboard, busiest first
    pub fn drone_performance(&self) -> Result<Vec<DronePerformance>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT d.id, d.model, d.capacity_kg, d.battery_pct, {}
             FROM drones d LEFT JOIN missions m ON m.drone_id = d.id
             GROUP BY d.id ORDER BY d.id",
            SUMMARY_COLUMNS
        ))?;
        let mut board = stmt
            .query_map([], |row| {
                Ok(DronePerformance {
                    drone: drone_from_row(row)?,
                    summary: PerformanceSummary::from_row(row, 4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        board.sort_by(|a, b| b.summary.total_missions.cmp(&a.summary.total_missions));
        Ok(board)
    }

    /// Pilot leaderboard, best rated first; unrated pilots rank as 0
    pub fn pilot_performance(&self) -> Result<Vec<PilotPerformance>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT p.id, p.first_name, p.last_name, p.shift, p.license, {}
             FROM pilots p LEFT JOIN missions m ON m.pilot_id = p.id
             GROUP BY p.id ORDER BY p.id",
            SUMMARY_COLUMNS
        ))?;
        let mut board = stmt
            .query_map([], |row| {
                let pilot = pilot_from_row(row)?;
                Ok(PilotPerformance {
                    name: pilot.full_name(),
                    pilot,
                    summary: PerformanceSummary::from_row(row, 5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let rank = |p: &PilotPerformance| p.summary.mean_rating.unwrap_or(0.0);
        board.sort_by(|a, b| rank(b).total_cmp(&rank(a)));
        Ok(board)
    }

    pub fn rating_distribution(&self) -> Result<RatingDistribution> {
        let mut buckets: BTreeMap<u8, u64> =
            RATING_RANGE.map(|label| (label as u8, 0)).collect();

        let mut stmt = self.conn.prepare(
            "SELECT rating, COUNT(*) FROM missions WHERE rating IS NOT NULL GROUP BY rating",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (rating, count) = row?;
            buckets.insert(rating, count as u64);
        }

        let (rated_total, mean): (i64, Option<f64>) = self.conn.query_row(
            "SELECT COUNT(*), AVG(rating) FROM missions WHERE rating IS NOT NULL",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(RatingDistribution {
            buckets,
            rated_total: rated_total as u64,
            mean: mean.map(|m| round_to(m, 2)),
        })
    }

    pub fn order_stats(&self) -> Result<OrderStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM orders GROUP BY kind ORDER BY kind")?;
        let by_kind = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

        let (total, mean): (i64, Option<f64>) = self.conn.query_row(
            "SELECT COUNT(*), AVG(total_weight_kg) FROM orders",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(OrderStats {
            by_kind,
            mean_weight_kg: mean.map(|m| round_to(m, 2)),
            total: total as u64,
        })
    }

    pub fn drone_history(&self, drone_id: DroneId) -> Result<MissionHistory> {
        self.get_drone(drone_id)?;
        self.history("drone_id", drone_id)
    }

    pub fn pilot_history(&self, pilot_id: PilotId) -> Result<MissionHistory> {
        self.get_pilot(pilot_id)?;
        self.history("pilot_id", pilot_id)
    }

    fn history(&self, column: &str, id: i64) -> Result<MissionHistory> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM missions WHERE {} = ?1
             ORDER BY scheduled_date DESC, scheduled_time DESC, id DESC",
            MISSION_COLUMNS, column
        ))?;
        let missions = stmt
            .query_map(params![id], mission_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let summary = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM missions m WHERE m.{} = ?1",
                    SUMMARY_COLUMNS, column
                ),
                params![id],
                |row| PerformanceSummary::from_row(row, 0),
            )?;

        Ok(MissionHistory { missions, summary })
    }
}
