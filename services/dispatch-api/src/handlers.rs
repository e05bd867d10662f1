use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use skyhaul_fleet::{
    Capability, Drone, DroneId, DronePatch, Mission, MissionDetail, MissionFilter,
    MissionHistory, MissionId, MissionPatch, MissionStats, MissionStatus, NewDrone, NewMission,
    NewOrder, NewPilot, NewProduct, OrderDetail, OrderId, OrderPatch, OrderStats, OrderTracking,
    OrderView, Overview, Pilot, PilotId, PilotPatch, Product, ProductId, RatingDistribution,
    TrackPoint, TrackPointRequest,
};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;

type Shared = State<Arc<AppState>>;
type ApiResult<T> = Result<Json<T>, ApiError>;
type Created<T> = Result<(StatusCode, Json<T>), ApiError>;

#[derive(Debug, Deserialize)]
pub struct ShiftQuery {
    pub shift: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrailQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BatteryBody {
    pub battery_pct: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RatingBody {
    pub rating: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    #[serde(default)]
    pub points: Vec<TrackPointRequest>,
}

fn deleted(entity: &str, id: i64) -> Json<Value> {
    Json(json!({ "id": id, "entity": entity, "deleted": true }))
}

// ---- drones -------------------------------------------------------------

pub async fn list_drones(State(state): Shared, caller: Caller) -> ApiResult<Vec<Drone>> {
    caller.require(Capability::ViewFleet)?;
    Ok(Json(state.store()?.list_drones()?))
}

pub async fn available_drones(State(state): Shared, caller: Caller) -> ApiResult<Vec<Drone>> {
    caller.require(Capability::PlanDispatch)?;
    Ok(Json(state.store()?.available_drones()?))
}

pub async fn create_drone(
    State(state): Shared,
    caller: Caller,
    ApiJson(body): ApiJson<NewDrone>,
) -> Created<Drone> {
    caller.require(Capability::ManageFleet)?;
    let drone = state.store()?.create_drone(body)?;
    Ok((StatusCode::CREATED, Json(drone)))
}

pub async fn get_drone(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<DroneId>,
) -> ApiResult<Drone> {
    caller.require(Capability::ViewFleet)?;
    Ok(Json(state.store()?.get_drone(id)?))
}

pub async fn update_drone(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<DroneId>,
    ApiJson(patch): ApiJson<DronePatch>,
) -> ApiResult<Drone> {
    caller.require(Capability::ManageFleet)?;
    Ok(Json(state.store()?.update_drone(id, patch)?))
}

pub async fn report_battery(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<DroneId>,
    ApiJson(body): ApiJson<BatteryBody>,
) -> ApiResult<Drone> {
    caller.require(Capability::ReportBattery)?;
    Ok(Json(state.store()?.set_battery(id, body.battery_pct)?))
}

pub async fn delete_drone(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<DroneId>,
) -> ApiResult<Value> {
    caller.require(Capability::ManageFleet)?;
    state.store()?.delete_drone(id)?;
    Ok(deleted("drone", id))
}

pub async fn drone_history(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<DroneId>,
) -> ApiResult<MissionHistory> {
    caller.require(Capability::PlanDispatch)?;
    Ok(Json(state.store()?.drone_history(id)?))
}

// ---- pilots -------------------------------------------------------------

pub async fn list_pilots(
    State(state): Shared,
    caller: Caller,
    Query(query): Query<ShiftQuery>,
) -> ApiResult<Vec<Pilot>> {
    caller.require(Capability::ViewFleet)?;
    Ok(Json(state.store()?.list_pilots(query.shift.as_deref())?))
}

pub async fn available_pilots(
    State(state): Shared,
    caller: Caller,
    Query(query): Query<ShiftQuery>,
) -> ApiResult<Vec<Pilot>> {
    caller.require(Capability::PlanDispatch)?;
    Ok(Json(state.store()?.available_pilots(query.shift.as_deref())?))
}

pub async fn create_pilot(
    State(state): Shared,
    caller: Caller,
    ApiJson(body): ApiJson<NewPilot>,
) -> Created<Pilot> {
    caller.require(Capability::ManageFleet)?;
    let pilot = state.store()?.create_pilot(body)?;
    Ok((StatusCode::CREATED, Json(pilot)))
}

pub async fn get_pilot(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<PilotId>,
) -> ApiResult<Pilot> {
    caller.require(Capability::ViewFleet)?;
    Ok(Json(state.store()?.get_pilot(id)?))
}

pub async fn update_pilot(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<PilotId>,
    ApiJson(patch): ApiJson<PilotPatch>,
) -> ApiResult<Pilot> {
    caller.require(Capability::ManageFleet)?;
    Ok(Json(state.store()?.update_pilot(id, patch)?))
}

pub async fn delete_pilot(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<PilotId>,
) -> ApiResult<Value> {
    caller.require(Capability::ManageFleet)?;
    state.store()?.delete_pilot(id)?;
    Ok(deleted("pilot", id))
}

pub async fn pilot_history(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<PilotId>,
) -> ApiResult<MissionHistory> {
    caller.require(Capability::PlanDispatch)?;
    Ok(Json(state.store()?.pilot_history(id)?))
}

// ---- catalog ------------------------------------------------------------

pub async fn create_product(
    State(state): Shared,
    caller: Caller,
    ApiJson(body): ApiJson<NewProduct>,
) -> Created<Product> {
    caller.require(Capability::ManageFleet)?;
    let product = state.store()?.create_product(body)?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn get_product(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<ProductId>,
) -> ApiResult<Product> {
    caller.require(Capability::PlaceOrder)?;
    Ok(Json(state.store()?.get_product(id)?))
}

// ---- missions -----------------------------------------------------------

pub async fn list_missions(
    State(state): Shared,
    caller: Caller,
    Query(filter): Query<MissionFilter>,
) -> ApiResult<Vec<Mission>> {
    caller.require(Capability::ViewFleet)?;
    Ok(Json(state.store()?.list_missions(&filter)?))
}

pub async fn create_mission(
    State(state): Shared,
    caller: Caller,
    ApiJson(body): ApiJson<NewMission>,
) -> Created<Mission> {
    caller.require(Capability::ManageMissions)?;
    let mission = state.store()?.create_mission(body)?;
    Ok((StatusCode::CREATED, Json(mission)))
}

pub async fn get_mission(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<MissionId>,
) -> ApiResult<MissionDetail> {
    caller.require(Capability::ViewFleet)?;
    Ok(Json(state.store()?.get_mission_detail(id)?))
}

pub async fn update_mission(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<MissionId>,
    ApiJson(patch): ApiJson<MissionPatch>,
) -> ApiResult<Mission> {
    caller.require(Capability::ManageMissions)?;
    Ok(Json(state.store()?.update_mission(id, patch)?))
}

pub async fn delete_mission(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<MissionId>,
) -> ApiResult<Value> {
    caller.require(Capability::ManageMissions)?;
    state.store()?.delete_mission(id)?;
    Ok(deleted("mission", id))
}

pub async fn advance_status(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<MissionId>,
    ApiJson(body): ApiJson<StatusBody>,
) -> ApiResult<Mission> {
    let principal = caller.require(Capability::AdvanceMissionStatus)?;
    let to: MissionStatus = body.status.parse()?;
    Ok(Json(state.store()?.advance_status(&principal, id, to)?))
}

pub async fn rate_mission(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<MissionId>,
    ApiJson(body): ApiJson<RatingBody>,
) -> ApiResult<Mission> {
    let principal = caller.require(Capability::RateMission)?;
    Ok(Json(state.store()?.rate_mission(
        &principal,
        id,
        body.rating,
        body.comment,
    )?))
}

// ---- tracks -------------------------------------------------------------

pub async fn mission_path(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<MissionId>,
) -> ApiResult<Vec<TrackPoint>> {
    caller.require(Capability::ViewTracks)?;
    Ok(Json(state.store()?.mission_path(id)?))
}

pub async fn latest_position(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<MissionId>,
) -> ApiResult<Option<TrackPoint>> {
    caller.require(Capability::ViewTracks)?;
    Ok(Json(state.store()?.latest_position(id)?))
}

pub async fn drone_trail(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<DroneId>,
    Query(query): Query<TrailQuery>,
) -> ApiResult<Vec<TrackPoint>> {
    caller.require(Capability::ViewTracks)?;
    Ok(Json(state.store()?.drone_trail(id, query.limit)?))
}

pub async fn append_point(
    State(state): Shared,
    caller: Caller,
    ApiJson(body): ApiJson<TrackPointRequest>,
) -> Created<TrackPoint> {
    caller.require(Capability::IngestTrack)?;
    let point = state.store()?.append_point_request(body)?;
    Ok((StatusCode::CREATED, Json(point)))
}

pub async fn append_batch(
    State(state): Shared,
    caller: Caller,
    ApiJson(body): ApiJson<BatchBody>,
) -> Created<Value> {
    let principal = caller.require(Capability::IngestTrack)?;
    let inserted = state.store()?.append_batch(&body.points)?;

    info!(
        user_id = principal.user_id,
        received = body.points.len(),
        inserted = inserted,
        "Batch track upload"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "received": body.points.len(), "inserted": inserted })),
    ))
}

// ---- orders -------------------------------------------------------------

pub async fn list_orders(State(state): Shared, caller: Caller) -> ApiResult<Vec<OrderView>> {
    let principal = caller.require(Capability::ViewOrders)?;
    Ok(Json(state.store()?.list_orders(&principal)?))
}

pub async fn create_order(
    State(state): Shared,
    caller: Caller,
    ApiJson(body): ApiJson<NewOrder>,
) -> Created<OrderView> {
    let principal = caller.require(Capability::PlaceOrder)?;
    let order = state.store()?.create_order(principal.user_id, body)?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> ApiResult<OrderDetail> {
    let principal = caller.require(Capability::ViewOrders)?;
    Ok(Json(state.store()?.get_order_detail(&principal, id)?))
}

pub async fn update_order(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<OrderId>,
    ApiJson(patch): ApiJson<OrderPatch>,
) -> ApiResult<OrderView> {
    caller.require(Capability::ManageOrders)?;
    Ok(Json(state.store()?.update_order(id, patch)?))
}

pub async fn delete_order(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> ApiResult<Value> {
    caller.require(Capability::ManageOrders)?;
    state.store()?.delete_order(id)?;
    Ok(deleted("order", id))
}

pub async fn order_tracking(
    State(state): Shared,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> ApiResult<OrderTracking> {
    let principal = caller.require(Capability::ViewOrders)?;
    Ok(Json(state.store()?.order_tracking(&principal, id)?))
}

// ---- statistics ---------------------------------------------------------

pub async fn stats_overview(State(state): Shared, caller: Caller) -> ApiResult<Overview> {
    caller.require(Capability::ViewStatistics)?;
    Ok(Json(state.store()?.overview()?))
}

pub async fn stats_missions(State(state): Shared, caller: Caller) -> ApiResult<MissionStats> {
    caller.require(Capability::ViewStatistics)?;
    Ok(Json(state.store()?.mission_stats()?))
}

pub async fn stats_drones(State(state): Shared, caller: Caller) -> ApiResult<Value> {
    caller.require(Capability::ViewStatistics)?;
    let board = state.store()?.drone_performance()?;
    Ok(Json(json!({ "drones": board })))
}

pub async fn stats_pilots(State(state): Shared, caller: Caller) -> ApiResult<Value> {
    caller.require(Capability::ViewStatistics)?;
    let board = state.store()?.pilot_performance()?;
    Ok(Json(json!({ "pilots": board })))
}

pub async fn stats_ratings(State(state): Shared, caller: Caller) -> ApiResult<RatingDistribution> {
    caller.require(Capability::ViewStatistics)?;
    Ok(Json(state.store()?.rating_distribution()?))
}

pub async fn stats_orders(State(state): Shared, caller: Caller) -> ApiResult<OrderStats> {
    caller.require(Capability::ViewStatistics)?;
    Ok(Json(state.store()?.order_stats()?))
}
