//! Order Binding
//!
//! An order's weight is fixed from catalog data when it is placed. Its
//! status is never stored: it mirrors the bound mission at read time, or
//! reads `pending` while unbound.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::access::{Principal, Role};
use crate::error::{FleetError, Result};
use crate::mission::{fetch_mission, MissionStatus};
use crate::model::{
    round_to, Coordinates, LineRequest, Mission, MissionId, NewOrder, Order, OrderId, OrderLine,
    OrderPatch, ProductId, TrackPoint, UserId, WEIGHT_PRECISION,
};
use crate::store::{from_millis, now_millis, require_text, to_millis, EntityStore};

/// Type label used when an order does not name one
pub const DEFAULT_ORDER_KIND: &str = "Standard";

/// Product weight lookup consulted only while an order is being placed
pub trait Catalog {
    /// Weight in kilograms, or `None` for products the catalog does not know
    fn product_weight(&self, id: ProductId) -> Result<Option<f64>>;
}

impl Catalog for EntityStore {
    fn product_weight(&self, id: ProductId) -> Result<Option<f64>> {
        Ok(self.find_product(id)?.map(|product| product.weight_kg))
    }
}

impl Catalog for HashMap<ProductId, f64> {
    fn product_weight(&self, id: ProductId) -> Result<Option<f64>> {
        Ok(self.get(&id).copied())
    }
}

/// Displayed order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl From<Option<MissionStatus>> for OrderStatus {
    fn from(mission: Option<MissionStatus>) -> Self {
        match mission {
            None => OrderStatus::Pending,
            Some(MissionStatus::Scheduled) => OrderStatus::Scheduled,
            Some(MissionStatus::InProgress) => OrderStatus::InProgress,
            Some(MissionStatus::Completed) => OrderStatus::Completed,
            Some(MissionStatus::Cancelled) => OrderStatus::Cancelled,
        }
    }
}

/// Order together with its derived status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLineDetail {
    pub product_id: ProductId,
    pub name: String,
    pub weight_kg: f64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub view: OrderView,
    pub lines: Vec<OrderLineDetail>,
    pub mission: Option<Mission>,
}

/// Where an order's delivery currently stands
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrderTracking {
    AwaitingAssignment {
        order_id: OrderId,
    },
    Assigned {
        order_id: OrderId,
        mission_id: MissionId,
        status: MissionStatus,
        current_position: Option<TrackPoint>,
        path: Vec<TrackPoint>,
        pickup: Coordinates,
        delivery: Coordinates,
    },
}

const VIEW_SELECT: &str = "SELECT o.id, o.kind, o.total_weight_kg, o.created_at, o.address, \
     o.customer_id, o.mission_id, m.status \
     FROM orders o LEFT JOIN missions m ON m.id = o.mission_id";

fn view_from_row(row: &Row<'_>) -> rusqlite::Result<OrderView> {
    let mission_status: Option<MissionStatus> = row.get(7)?;
    Ok(OrderView {
        order: Order {
            id: row.get(0)?,
            kind: row.get(1)?,
            total_weight_kg: row.get(2)?,
            created_at: from_millis(3, row.get(3)?)?,
            address: row.get(4)?,
            customer_id: row.get(5)?,
            mission_id: row.get(6)?,
        },
        status: mission_status.into(),
    })
}

/// Collapse repeated products into one line each
fn merge_lines(lines: &[LineRequest]) -> Result<BTreeMap<ProductId, u32>> {
    let mut merged = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(FleetError::validation(format!(
                "quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        let entry: &mut u32 = merged.entry(line.product_id).or_insert(0);
        *entry = entry.checked_add(line.quantity).ok_or_else(|| {
            FleetError::validation(format!("quantity overflow for product {}", line.product_id))
        })?;
    }
    Ok(merged)
}

/// Σ weight × quantity over the products the catalog knows
fn snapshot_weight<C: Catalog + ?Sized>(
    catalog: &C,
    lines: &BTreeMap<ProductId, u32>,
) -> Result<f64> {
    let mut total = 0.0;
    for (&product_id, &quantity) in lines {
        match catalog.product_weight(product_id)? {
            Some(weight) => total += weight * f64::from(quantity),
            None => debug!(product_id = product_id, "Unknown product left out of order weight"),
        }
    }
    Ok(round_to(total, WEIGHT_PRECISION))
}

fn ensure_can_read(principal: &Principal, order: &Order) -> Result<()> {
    if principal.role == Role::Customer && order.customer_id != principal.user_id {
        warn!(
            order_id = order.id,
            user_id = principal.user_id,
            "Order access refused"
        );
        return Err(FleetError::Forbidden(format!(
            "order {} belongs to another customer",
            order.id
        )));
    }
    Ok(())
}

impl EntityStore {
    /// Place an order, weighing it against the store's own catalog
    pub fn create_order(&mut self, customer: UserId, order: NewOrder) -> Result<OrderView> {
        let lines = merge_lines(&order.lines)?;
        let weight = snapshot_weight(&*self, &lines)?;
        self.insert_order(customer, order, lines, weight)
    }

    /// Place an order, weighing it against an external catalog
    pub fn create_order_with<C: Catalog + ?Sized>(
        &mut self,
        catalog: &C,
        customer: UserId,
        order: NewOrder,
    ) -> Result<OrderView> {
        let lines = merge_lines(&order.lines)?;
        let weight = snapshot_weight(catalog, &lines)?;
        self.insert_order(customer, order, lines, weight)
    }

    fn insert_order(
        &mut self,
        customer: UserId,
        order: NewOrder,
        lines: BTreeMap<ProductId, u32>,
        weight: f64,
    ) -> Result<OrderView> {
        require_text("address", &order.address)?;
        let kind = order
            .kind
            .filter(|kind| !kind.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ORDER_KIND.to_string());

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO orders (kind, total_weight_kg, created_at, address, customer_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![kind, weight, to_millis(&now_millis()), order.address, customer],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO order_lines (order_id, product_id, quantity) VALUES (?1, ?2, ?3)",
            )?;
            for (product_id, quantity) in &lines {
                stmt.execute(params![id, product_id, quantity])?;
            }
        }
        tx.commit()?;

        info!(
            order_id = id,
            customer_id = customer,
            lines = lines.len(),
            total_weight_kg = weight,
            "Order placed"
        );
        self.get_order(id)
    }

    pub fn get_order(&self, id: OrderId) -> Result<OrderView> {
        self.conn
            .query_row(&format!("{} WHERE o.id = ?1", VIEW_SELECT), [id], view_from_row)
            .optional()?
            .ok_or_else(|| FleetError::not_found("order", id))
    }

    /// Persisted product lines, including products since dropped from the catalog
    pub fn order_lines(&self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT order_id, product_id, quantity FROM order_lines
             WHERE order_id = ?1 ORDER BY product_id",
        )?;
        let lines = stmt
            .query_map([order_id], |row| {
                Ok(OrderLine {
                    order_id: row.get(0)?,
                    product_id: row.get(1)?,
                    quantity: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    /// Order with catalog lines and bound mission. Customers see only their own.
    pub fn get_order_detail(&self, principal: &Principal, id: OrderId) -> Result<OrderDetail> {
        let view = self.get_order(id)?;
        ensure_can_read(principal, &view.order)?;

        let mut stmt = self.conn.prepare(
            "SELECT l.product_id, p.name, p.weight_kg, l.quantity
             FROM order_lines l JOIN products p ON p.id = l.product_id
             WHERE l.order_id = ?1 ORDER BY l.product_id",
        )?;
        let lines = stmt
            .query_map([id], |row| {
                Ok(OrderLineDetail {
                    product_id: row.get(0)?,
                    name: row.get(1)?,
                    weight_kg: row.get(2)?,
                    quantity: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mission = view
            .order
            .mission_id
            .map(|mission_id| fetch_mission(&self.conn, mission_id))
            .transpose()?;

        Ok(OrderDetail {
            view,
            lines,
            mission,
        })
    }

    /// Customers get their own orders, everyone else gets all. Newest first.
    pub fn list_orders(&self, principal: &Principal) -> Result<Vec<OrderView>> {
        let owner = (principal.role == Role::Customer).then_some(principal.user_id);
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE (?1 IS NULL OR o.customer_id = ?1) ORDER BY o.created_at DESC, o.id DESC",
            VIEW_SELECT
        ))?;
        let orders = stmt
            .query_map([owner], view_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// Change kind or address, or bind the order to a mission
    pub fn update_order(&mut self, id: OrderId, patch: OrderPatch) -> Result<OrderView> {
        let mut order = self.get_order(id)?.order;

        if let Some(kind) = patch.kind {
            require_text("kind", &kind)?;
            order.kind = kind;
        }
        if let Some(address) = patch.address {
            require_text("address", &address)?;
            order.address = address;
        }
        if let Some(mission_id) = patch.mission_id {
            fetch_mission(&self.conn, mission_id)?;
            order.mission_id = Some(mission_id);
        }

        self.conn.execute(
            "UPDATE orders SET kind = ?1, address = ?2, mission_id = ?3 WHERE id = ?4",
            params![order.kind, order.address, order.mission_id, id],
        )?;

        info!(order_id = id, mission_id = ?order.mission_id, "Order updated");
        self.get_order(id)
    }

    pub fn delete_order(&mut self, id: OrderId) -> Result<()> {
        let removed = self.conn.execute("DELETE FROM orders WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(FleetError::not_found("order", id));
        }
        info!(order_id = id, "Order deleted");
        Ok(())
    }

    /// Delivery progress as seen by the ordering customer
    pub fn order_tracking(&self, principal: &Principal, id: OrderId) -> Result<OrderTracking> {
        let view = self.get_order(id)?;
        ensure_can_read(principal, &view.order)?;

        let Some(mission_id) = view.order.mission_id else {
            return Ok(OrderTracking::AwaitingAssignment { order_id: id });
        };

        let mission = fetch_mission(&self.conn, mission_id)?;
        let path = self.mission_path(mission_id)?;
        let current_position = path.last().cloned();

        Ok(OrderTracking::Assigned {
            order_id: id,
            mission_id,
            status: mission.status,
            current_position,
            path,
            pickup: mission.pickup,
            delivery: mission.delivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewMission, NewProduct};
    use chrono::{NaiveDate, NaiveTime};

    fn admin() -> Principal {
        Principal::new(1, Role::Admin)
    }

    fn new_order(lines: Vec<LineRequest>) -> NewOrder {
        NewOrder {
            kind: None,
            address: "Via Dante 12, Milano".into(),
            lines,
        }
    }

    fn product(store: &mut EntityStore, name: &str, weight: f64) -> ProductId {
        store
            .create_product(NewProduct {
                name: name.into(),
                weight_kg: weight,
                category: "general".into(),
            })
            .unwrap()
            .id
    }

    fn mission(store: &mut EntityStore) -> MissionId {
        store
            .create_mission(NewMission {
                scheduled_date: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
                scheduled_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                pickup: Coordinates { lat: 45.0, lng: 9.0 },
                delivery: Coordinates { lat: 45.2, lng: 9.3 },
                drone_id: None,
                pilot_id: None,
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_weight_snapshot() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let a = product(&mut store, "Flour", 2.0);
        let b = product(&mut store, "Oil", 1.5);

        let order = store
            .create_order(7, new_order(vec![LineRequest::new(a, 2), LineRequest::new(b, 1)]))
            .unwrap();
        assert_eq!(order.order.total_weight_kg, 5.5);
        assert_eq!(order.order.kind, DEFAULT_ORDER_KIND);
        assert_eq!(order.status, OrderStatus::Pending);

        store.set_product_weight(a, 10.0).unwrap();
        assert_eq!(store.get_order(order.order.id).unwrap().order.total_weight_kg, 5.5);
    }

    #[test]
    fn test_unknown_products_skipped_in_weight_but_kept_as_lines() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let a = product(&mut store, "Flour", 2.0);

        let order = store
            .create_order(7, new_order(vec![LineRequest::new(a, 1), LineRequest::new(999, 3)]))
            .unwrap();
        assert_eq!(order.order.total_weight_kg, 2.0);
        assert_eq!(store.order_lines(order.order.id).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_lines_merge() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let a = product(&mut store, "Flour", 0.5);

        let order = store
            .create_order(7, new_order(vec![LineRequest::new(a, 1), LineRequest::new(a, 3)]))
            .unwrap();
        let lines = store.order_lines(order.order.id).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 4);
        assert_eq!(order.order.total_weight_kg, 2.0);
    }

    #[test]
    fn test_zero_quantity_rejected_without_writes() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let a = product(&mut store, "Flour", 2.0);

        assert!(matches!(
            store.create_order(7, new_order(vec![LineRequest::new(a, 0)])),
            Err(FleetError::Validation(_))
        ));
        assert!(store.list_orders(&admin()).unwrap().is_empty());
    }

    #[test]
    fn test_external_catalog() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let catalog: HashMap<ProductId, f64> = [(1, 0.25), (2, 4.0)].into_iter().collect();

        let order = store
            .create_order_with(
                &catalog,
                7,
                new_order(vec![LineRequest::new(1, 4), LineRequest::new(2, 1)]),
            )
            .unwrap();
        assert_eq!(order.order.total_weight_kg, 5.0);
    }

    #[test]
    fn test_status_mirrors_bound_mission() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let order = store.create_order(7, new_order(vec![])).unwrap();
        let mission_id = mission(&mut store);

        let bound = store
            .update_order(
                order.order.id,
                OrderPatch {
                    mission_id: Some(mission_id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(bound.status, OrderStatus::Scheduled);

        store
            .advance_status(&admin(), mission_id, MissionStatus::InProgress)
            .unwrap();
        assert_eq!(
            store.get_order(order.order.id).unwrap().status,
            OrderStatus::InProgress
        );

        store.delete_mission(mission_id).unwrap();
        let reverted = store.get_order(order.order.id).unwrap();
        assert_eq!(reverted.status, OrderStatus::Pending);
        assert_eq!(reverted.order.mission_id, None);
    }

    #[test]
    fn test_bind_to_unknown_mission() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let order = store.create_order(7, new_order(vec![])).unwrap();

        assert!(matches!(
            store.update_order(
                order.order.id,
                OrderPatch {
                    mission_id: Some(404),
                    ..Default::default()
                }
            ),
            Err(FleetError::NotFound { entity: "mission", .. })
        ));
    }

    #[test]
    fn test_customers_only_see_their_own_orders() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let a = product(&mut store, "Flour", 2.0);
        let mine = store.create_order(7, new_order(vec![LineRequest::new(a, 1)])).unwrap();
        store.create_order(8, new_order(vec![])).unwrap();

        let me = Principal::new(7, Role::Customer);
        let other = Principal::new(8, Role::Customer);

        assert_eq!(store.list_orders(&me).unwrap().len(), 1);
        assert_eq!(store.list_orders(&admin()).unwrap().len(), 2);

        let detail = store.get_order_detail(&me, mine.order.id).unwrap();
        assert_eq!(detail.lines[0].name, "Flour");
        assert!(detail.mission.is_none());

        assert!(matches!(
            store.get_order_detail(&other, mine.order.id),
            Err(FleetError::Forbidden(_))
        ));
        assert!(matches!(
            store.order_tracking(&other, mine.order.id),
            Err(FleetError::Forbidden(_))
        ));
    }

    #[test]
    fn test_tracking_view() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let drone = store
            .create_drone(crate::model::NewDrone {
                model: "Quad".into(),
                capacity_kg: 3.0,
                battery_pct: None,
            })
            .unwrap();
        let order = store.create_order(7, new_order(vec![])).unwrap();
        let me = Principal::new(7, Role::Customer);

        assert_eq!(
            store.order_tracking(&me, order.order.id).unwrap(),
            OrderTracking::AwaitingAssignment {
                order_id: order.order.id
            }
        );

        let mission_id = mission(&mut store);
        store
            .update_mission(
                mission_id,
                crate::model::MissionPatch {
                    drone_id: Some(drone.id),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .update_order(
                order.order.id,
                OrderPatch {
                    mission_id: Some(mission_id),
                    ..Default::default()
                },
            )
            .unwrap();
        store.append_point(mission_id, 45.05, 9.1, None).unwrap();

        match store.order_tracking(&me, order.order.id).unwrap() {
            OrderTracking::Assigned {
                status,
                current_position,
                path,
                pickup,
                ..
            } => {
                assert_eq!(status, MissionStatus::Scheduled);
                assert_eq!(path.len(), 1);
                assert_eq!(current_position.unwrap().position.lat, 45.05);
                assert_eq!(pickup, Coordinates { lat: 45.0, lng: 9.0 });
            }
            other => panic!("unexpected tracking view: {:?}", other),
        }
    }

    #[test]
    fn test_delete_order_cascades_lines() {
        let mut store = EntityStore::open_in_memory().unwrap();
        let a = product(&mut store, "Flour", 2.0);
        let order = store.create_order(7, new_order(vec![LineRequest::new(a, 2)])).unwrap();

        store.delete_order(order.order.id).unwrap();
        assert!(store.order_lines(order.order.id).unwrap().is_empty());
        assert!(matches!(
            store.delete_order(order.order.id),
            Err(FleetError::NotFound { .. })
        ));
    }
}
