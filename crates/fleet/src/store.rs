//! Entity Store - SQLite-backed records for the delivery fleet
//!
//! Holds drones, pilots, catalog products, missions, orders (with their
//! product lines) and GPS track points. Mission, order and track operations
//! live next to their domain logic in sibling modules; this module owns the
//! connection, the schema and the fleet resources (drones, pilots, products).
//!
//! # Referential rules
//!
//! - A drone or pilot referenced by an active mission cannot be deleted;
//!   historical missions keep running with the reference cleared.
//! - Deleting a mission removes its track points and unbinds its orders.
//! - Deleting an order removes its product lines.
//! - Track points and order lines use composite natural keys.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::availability::{active_mission_holding, Resource};
use crate::error::{FleetError, Result};
use crate::model::{
    round_to, Drone, DroneId, DronePatch, NewDrone, NewPilot, NewProduct, Pilot, PilotId,
    PilotPatch, Product, ProductId, WEIGHT_PRECISION,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS drones (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        model TEXT NOT NULL,
        capacity_kg REAL NOT NULL,
        battery_pct INTEGER NOT NULL CHECK (battery_pct BETWEEN 0 AND 100)
    );

    CREATE TABLE IF NOT EXISTS pilots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        shift TEXT NOT NULL,
        license TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        weight_kg REAL NOT NULL,
        category TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS missions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scheduled_date TEXT NOT NULL,
        scheduled_time TEXT NOT NULL,
        pickup_lat REAL NOT NULL,
        pickup_lng REAL NOT NULL,
        delivery_lat REAL NOT NULL,
        delivery_lng REAL NOT NULL,
        rating INTEGER CHECK (rating BETWEEN 1 AND 10),
        comment TEXT,
        drone_id INTEGER REFERENCES drones(id) ON DELETE SET NULL,
        pilot_id INTEGER REFERENCES pilots(id) ON DELETE SET NULL,
        status TEXT NOT NULL DEFAULT 'scheduled'
    );

    CREATE INDEX IF NOT EXISTS idx_missions_status ON missions(status);
    CREATE INDEX IF NOT EXISTS idx_missions_drone ON missions(drone_id);
    CREATE INDEX IF NOT EXISTS idx_missions_pilot ON missions(pilot_id);
    CREATE INDEX IF NOT EXISTS idx_missions_date ON missions(scheduled_date);

    CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        total_weight_kg REAL NOT NULL,
        created_at INTEGER NOT NULL,
        address TEXT NOT NULL,
        customer_id INTEGER NOT NULL,
        mission_id INTEGER REFERENCES missions(id) ON DELETE SET NULL
    );

    CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id);
    CREATE INDEX IF NOT EXISTS idx_orders_mission ON orders(mission_id);

    CREATE TABLE IF NOT EXISTS order_lines (
        order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        product_id INTEGER NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        PRIMARY KEY (order_id, product_id)
    );

    CREATE TABLE IF NOT EXISTS track_points (
        drone_id INTEGER NOT NULL,
        mission_id INTEGER NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
        recorded_at INTEGER NOT NULL,
        lat REAL NOT NULL,
        lng REAL NOT NULL,
        PRIMARY KEY (drone_id, mission_id, recorded_at)
    );

    CREATE INDEX IF NOT EXISTS idx_track_mission_time ON track_points(mission_id, recorded_at);
    CREATE INDEX IF NOT EXISTS idx_track_drone_time ON track_points(drone_id, recorded_at);
"#;

const DRONE_COLUMNS: &str = "id, model, capacity_kg, battery_pct";
const PILOT_COLUMNS: &str = "id, first_name, last_name, shift, license";
const PRODUCT_COLUMNS: &str = "id, name, weight_kg, category";

pub(crate) fn drone_from_row(row: &Row<'_>) -> rusqlite::Result<Drone> {
    Ok(Drone {
        id: row.get(0)?,
        model: row.get(1)?,
        capacity_kg: row.get(2)?,
        battery_pct: row.get(3)?,
    })
}

pub(crate) fn pilot_from_row(row: &Row<'_>) -> rusqlite::Result<Pilot> {
    Ok(Pilot {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        shift: row.get(3)?,
        license: row.get(4)?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        weight_kg: row.get(2)?,
        category: row.get(3)?,
    })
}

pub(crate) fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

/// Current time truncated to storage resolution
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

fn validate_battery(pct: u8) -> Result<u8> {
    if pct > 100 {
        return Err(FleetError::validation(format!(
            "battery level {} outside [0, 100]",
            pct
        )));
    }
    Ok(pct)
}

fn validate_weight(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(FleetError::validation(format!(
            "{} must be a non-negative number, got {}",
            field, value
        )));
    }
    Ok(round_to(value, WEIGHT_PRECISION))
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FleetError::validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// SQLite-backed store for every fleet record
pub struct EntityStore {
    pub(crate) conn: Connection,
}

impl EntityStore {
    /// Create or open a store at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening entity store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn)
    }

    /// Open a transient store, used by tests and `:memory:` deployments
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Get the database path (empty for in-memory stores)
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(self.conn.path().unwrap_or(""))
    }

    pub(crate) fn count(&self, sql: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    // ---- drones ---------------------------------------------------------

    pub fn create_drone(&mut self, drone: NewDrone) -> Result<Drone> {
        require_text("model", &drone.model)?;
        let capacity = validate_weight("capacity_kg", drone.capacity_kg)?;
        let battery = validate_battery(drone.battery_pct.unwrap_or(100))?;

        self.conn.execute(
            "INSERT INTO drones (model, capacity_kg, battery_pct) VALUES (?1, ?2, ?3)",
            params![drone.model, capacity, battery],
        )?;
        let id = self.conn.last_insert_rowid();

        info!(drone_id = id, model = %drone.model, "Drone registered");

        self.get_drone(id)
    }

    pub fn get_drone(&self, id: DroneId) -> Result<Drone> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM drones WHERE id = ?1", DRONE_COLUMNS),
                [id],
                drone_from_row,
            )
            .optional()?
            .ok_or_else(|| FleetError::not_found("drone", id))
    }

    pub fn list_drones(&self) -> Result<Vec<Drone>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM drones ORDER BY id", DRONE_COLUMNS))?;
        let drones = stmt
            .query_map([], drone_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(drones)
    }

    /// Partial update: only the supplied fields change
    pub fn update_drone(&mut self, id: DroneId, patch: DronePatch) -> Result<Drone> {
        let mut drone = self.get_drone(id)?;

        if let Some(model) = patch.model {
            require_text("model", &model)?;
            drone.model = model;
        }
        if let Some(capacity) = patch.capacity_kg {
            drone.capacity_kg = validate_weight("capacity_kg", capacity)?;
        }
        if let Some(battery) = patch.battery_pct {
            drone.battery_pct = validate_battery(battery)?;
        }

        self.conn.execute(
            "UPDATE drones SET model = ?1, capacity_kg = ?2, battery_pct = ?3 WHERE id = ?4",
            params![drone.model, drone.capacity_kg, drone.battery_pct, id],
        )?;

        debug!(drone_id = id, "Drone updated");
        Ok(drone)
    }

    /// Battery report from the drone or its pilot.
    ///
    /// Takes a wide integer so out-of-range reports are rejected rather than truncated.
    pub fn set_battery(&mut self, id: DroneId, battery_pct: i64) -> Result<Drone> {
        let pct = u8::try_from(battery_pct)
            .ok()
            .filter(|pct| *pct <= 100)
            .ok_or_else(|| {
                FleetError::validation(format!("battery level {} outside [0, 100]", battery_pct))
            })?;

        self.update_drone(
            id,
            DronePatch {
                battery_pct: Some(pct),
                ..Default::default()
            },
        )
    }

    pub fn delete_drone(&mut self, id: DroneId) -> Result<()> {
        self.delete_resource(Resource::Drone, id)
    }

    // ---- pilots ---------------------------------------------------------

    pub fn create_pilot(&mut self, pilot: NewPilot) -> Result<Pilot> {
        require_text("first_name", &pilot.first_name)?;
        require_text("last_name", &pilot.last_name)?;

        self.conn.execute(
            "INSERT INTO pilots (first_name, last_name, shift, license) VALUES (?1, ?2, ?3, ?4)",
            params![pilot.first_name, pilot.last_name, pilot.shift, pilot.license],
        )?;
        let id = self.conn.last_insert_rowid();

        info!(pilot_id = id, shift = %pilot.shift, "Pilot registered");

        self.get_pilot(id)
    }

    pub fn get_pilot(&self, id: PilotId) -> Result<Pilot> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM pilots WHERE id = ?1", PILOT_COLUMNS),
                [id],
                pilot_from_row,
            )
            .optional()?
            .ok_or_else(|| FleetError::not_found("pilot", id))
    }

    /// All pilots, optionally restricted to one shift
    pub fn list_pilots(&self, shift: Option<&str>) -> Result<Vec<Pilot>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pilots WHERE (?1 IS NULL OR shift = ?1) ORDER BY id",
            PILOT_COLUMNS
        ))?;
        let pilots = stmt
            .query_map([shift], pilot_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pilots)
    }

    pub fn update_pilot(&mut self, id: PilotId, patch: PilotPatch) -> Result<Pilot> {
        let mut pilot = self.get_pilot(id)?;

        if let Some(first_name) = patch.first_name {
            require_text("first_name", &first_name)?;
            pilot.first_name = first_name;
        }
        if let Some(last_name) = patch.last_name {
            require_text("last_name", &last_name)?;
            pilot.last_name = last_name;
        }
        if let Some(shift) = patch.shift {
            pilot.shift = shift;
        }
        if let Some(license) = patch.license {
            pilot.license = license;
        }

        self.conn.execute(
            "UPDATE pilots SET first_name = ?1, last_name = ?2, shift = ?3, license = ?4 WHERE id = ?5",
            params![pilot.first_name, pilot.last_name, pilot.shift, pilot.license, id],
        )?;

        debug!(pilot_id = id, "Pilot updated");
        Ok(pilot)
    }

    pub fn delete_pilot(&mut self, id: PilotId) -> Result<()> {
        self.delete_resource(Resource::Pilot, id)
    }

    fn delete_resource(&mut self, resource: Resource, id: i64) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", resource.table()),
            [id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(FleetError::not_found(resource.label(), id));
        }

        if let Some(mission_id) = active_mission_holding(&tx, resource, id, None)? {
            warn!(
                resource = resource.label(),
                id = id,
                mission_id = mission_id,
                "Delete refused: resource referenced by active mission"
            );
            return Err(FleetError::ReferentialConflict(format!(
                "{} {} is referenced by active mission {}",
                resource.label(),
                id,
                mission_id
            )));
        }

        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", resource.table()),
            [id],
        )?;
        tx.commit()?;

        info!(resource = resource.label(), id = id, "Fleet resource deleted");
        Ok(())
    }

    // ---- catalog --------------------------------------------------------

    pub fn create_product(&mut self, product: NewProduct) -> Result<Product> {
        require_text("name", &product.name)?;
        let weight = validate_weight("weight_kg", product.weight_kg)?;

        self.conn.execute(
            "INSERT INTO products (name, weight_kg, category) VALUES (?1, ?2, ?3)",
            params![product.name, weight, product.category],
        )?;
        let id = self.conn.last_insert_rowid();

        debug!(product_id = id, "Product added to catalog");
        self.get_product(id)
    }

    pub fn get_product(&self, id: ProductId) -> Result<Product> {
        self.find_product(id)?
            .ok_or_else(|| FleetError::not_found("product", id))
    }

    pub(crate) fn find_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
                [id],
                product_from_row,
            )
            .optional()?)
    }

    /// Change a catalog weight. Existing orders keep their snapshot.
    pub fn set_product_weight(&mut self, id: ProductId, weight_kg: f64) -> Result<Product> {
        let weight = validate_weight("weight_kg", weight_kg)?;
        let changed = self.conn.execute(
            "UPDATE products SET weight_kg = ?1 WHERE id = ?2",
            params![weight, id],
        )?;
        if changed == 0 {
            return Err(FleetError::not_found("product", id));
        }
        self.get_product(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drone(model: &str, battery: Option<u8>) -> NewDrone {
        NewDrone {
            model: model.to_string(),
            capacity_kg: 5.5,
            battery_pct: battery,
        }
    }

    fn pilot(first: &str, shift: &str) -> NewPilot {
        NewPilot {
            first_name: first.to_string(),
            last_name: "Rossi".to_string(),
            shift: shift.to_string(),
            license: "A2".to_string(),
        }
    }

    #[test]
    fn test_store_creation_on_disk() {
        let db_path =
            std::env::temp_dir().join(format!("test_store_{}.db", uuid::Uuid::new_v4()));

        {
            let mut store = EntityStore::open(&db_path).unwrap();
            store.create_drone(drone("X8", None)).unwrap();
            assert!(!store.db_path().as_os_str().is_empty());
        }

        // Reopen and read back
        let store = EntityStore::open(&db_path).unwrap();
        assert_eq!(store.list_drones().unwrap().len(), 1);

        std::fs::remove_file(&db_path).ok();
    }

    #[test]
    fn test_create_drone_defaults_full_battery() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let created = store.create_drone(drone("X8", None)).unwrap();

        assert_eq!(created.battery_pct, 100);
        assert_eq!(created.capacity_kg, 5.5);
        assert_eq!(store.get_drone(created.id).unwrap(), created);
    }

    #[test]
    fn test_create_drone_rejects_bad_input() {
        let mut store = EntityStore::open_in_memory().unwrap();

        assert!(matches!(
            store.create_drone(drone("X8", Some(101))),
            Err(FleetError::Validation(_))
        ));
        assert!(matches!(
            store.create_drone(NewDrone {
                model: "X8".into(),
                capacity_kg: -1.0,
                battery_pct: None,
            }),
            Err(FleetError::Validation(_))
        ));
        assert!(store.list_drones().unwrap().is_empty());
    }

    #[test]
    fn test_get_unknown_drone() {
        let store = EntityStore::open_in_memory().unwrap();
        assert!(matches!(
            store.get_drone(42),
            Err(FleetError::NotFound { entity: "drone", id: 42 })
        ));
    }

    #[test]
    fn test_update_drone_is_partial() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let created = store.create_drone(drone("X8", Some(80))).unwrap();

        let updated = store
            .update_drone(
                created.id,
                DronePatch {
                    battery_pct: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.battery_pct, 0);
        assert_eq!(updated.model, "X8");
        assert_eq!(updated.capacity_kg, 5.5);
    }

    #[test]
    fn test_set_battery_range() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let created = store.create_drone(drone("X8", Some(80))).unwrap();

        assert_eq!(store.set_battery(created.id, 35).unwrap().battery_pct, 35);
        assert!(matches!(
            store.set_battery(created.id, 101),
            Err(FleetError::Validation(_))
        ));
        assert!(matches!(
            store.set_battery(created.id, -5),
            Err(FleetError::Validation(_))
        ));
        assert_eq!(store.get_drone(created.id).unwrap().battery_pct, 35);
    }

    #[test]
    fn test_list_pilots_by_shift() {
        let mut store = EntityStore::open_in_memory().unwrap();
        store.create_pilot(pilot("Anna", "morning")).unwrap();
        store.create_pilot(pilot("Luca", "night")).unwrap();
        store.create_pilot(pilot("Sara", "morning")).unwrap();

        assert_eq!(store.list_pilots(None).unwrap().len(), 3);
        let morning = store.list_pilots(Some("morning")).unwrap();
        assert_eq!(morning.len(), 2);
        assert!(morning.iter().all(|p| p.shift == "morning"));
    }

    #[test]
    fn test_update_pilot_is_partial() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let created = store.create_pilot(pilot("Anna", "morning")).unwrap();

        let updated = store
            .update_pilot(
                created.id,
                PilotPatch {
                    shift: Some("night".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.shift, "night");
        assert_eq!(updated.first_name, "Anna");
        assert_eq!(updated.full_name(), "Anna Rossi");
    }

    #[test]
    fn test_delete_idle_resources() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let d = store.create_drone(drone("X8", None)).unwrap();
        let p = store.create_pilot(pilot("Anna", "morning")).unwrap();

        store.delete_drone(d.id).unwrap();
        store.delete_pilot(p.id).unwrap();

        assert!(store.get_drone(d.id).is_err());
        assert!(matches!(
            store.delete_pilot(p.id),
            Err(FleetError::NotFound { .. })
        ));
    }

    #[test]
    fn test_product_weight_change() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let product = store
            .create_product(NewProduct {
                name: "Medkit".into(),
                weight_kg: 1.256,
                category: "health".into(),
            })
            .unwrap();
        assert_eq!(product.weight_kg, 1.26);

        let changed = store.set_product_weight(product.id, 3.0).unwrap();
        assert_eq!(changed.weight_kg, 3.0);
        assert!(store.set_product_weight(999, 1.0).is_err());
    }
}
