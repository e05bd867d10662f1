use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;

use crate::handlers;
use crate::state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/drones", get(handlers::list_drones).post(handlers::create_drone))
        .route("/drones/available", get(handlers::available_drones))
        .route(
            "/drones/:id",
            get(handlers::get_drone)
                .patch(handlers::update_drone)
                .delete(handlers::delete_drone),
        )
        .route("/drones/:id/battery", patch(handlers::report_battery))
        .route("/drones/:id/missions", get(handlers::drone_history))
        .route("/pilots", get(handlers::list_pilots).post(handlers::create_pilot))
        .route("/pilots/available", get(handlers::available_pilots))
        .route(
            "/pilots/:id",
            get(handlers::get_pilot)
                .patch(handlers::update_pilot)
                .delete(handlers::delete_pilot),
        )
        .route("/pilots/:id/missions", get(handlers::pilot_history))
        .route("/products", post(handlers::create_product))
        .route("/products/:id", get(handlers::get_product))
        .route(
            "/missions",
            get(handlers::list_missions).post(handlers::create_mission),
        )
        .route(
            "/missions/:id",
            get(handlers::get_mission)
                .patch(handlers::update_mission)
                .delete(handlers::delete_mission),
        )
        .route("/missions/:id/status", patch(handlers::advance_status))
        .route("/missions/:id/rating", post(handlers::rate_mission))
        .route("/missions/:id/tracks", get(handlers::mission_path))
        .route("/missions/:id/tracks/latest", get(handlers::latest_position))
        .route("/tracks", post(handlers::append_point))
        .route("/tracks/batch", post(handlers::append_batch))
        .route("/tracks/drone/:id", get(handlers::drone_trail))
        .route("/orders", get(handlers::list_orders).post(handlers::create_order))
        .route(
            "/orders/:id",
            get(handlers::get_order)
                .patch(handlers::update_order)
                .delete(handlers::delete_order),
        )
        .route("/orders/:id/tracking", get(handlers::order_tracking))
        .route("/stats/overview", get(handlers::stats_overview))
        .route("/stats/missions", get(handlers::stats_missions))
        .route("/stats/drones", get(handlers::stats_drones))
        .route("/stats/pilots", get(handlers::stats_pilots))
        .route("/stats/ratings", get(handlers::stats_ratings))
        .route("/stats/orders", get(handlers::stats_orders));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .with_state(state)
        .layer(ServiceBuilder::new().into_inner())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let storage = if state.config.is_in_memory() {
        "memory"
    } else {
        "sqlite"
    };
    Ok(Json(json!({
        "status": "healthy",
        "service": "dispatch-api",
        "storage": storage,
        "timestamp": Utc::now().to_rfc3339()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use skyhaul_core::Config;
    use skyhaul_fleet::EntityStore;
    use tower::ServiceExt;

    const ADMIN: (i64, &str) = (1, "admin");

    fn test_app() -> Router {
        let mut config = Config::default_config();
        config.database.path = skyhaul_core::config::IN_MEMORY_DB.to_string();
        let store = EntityStore::open_in_memory().unwrap();
        app(Arc::new(AppState::with_store(config, store)))
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        who: Option<(i64, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = who {
            builder = builder
                .header("x-user-id", id.to_string())
                .header("x-user-role", role);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn mission_body(drone_id: Option<i64>, pilot_id: Option<i64>) -> Value {
        json!({
            "scheduled_date": "2024-11-02",
            "scheduled_time": "10:15:00",
            "pickup": { "lat": 45.07, "lng": 7.68 },
            "delivery": { "lat": 45.05, "lng": 7.66 },
            "drone_id": drone_id,
            "pilot_id": pilot_id
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn test_missing_or_malformed_identity_is_401() {
        let app = test_app();
        let (status, body) = call(&app, "GET", "/api/drones", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, "GET", "/api/drones", Some((1, "superuser")), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_checks_are_403() {
        let app = test_app();
        let drone = json!({ "model": "X4", "capacity_kg": 2.5 });

        let (status, _) = call(&app, "POST", "/api/drones", Some((5, "customer")), Some(drone.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, "GET", "/api/stats/overview", Some((5, "pilot")), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, "POST", "/api/drones", Some(ADMIN), Some(drone)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["battery_pct"], 100);
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_400() {
        let app = test_app();

        let mut missing_lng = mission_body(None, None);
        missing_lng["pickup"] = json!({ "lat": 1.0 });
        let (status, body) = call(&app, "POST", "/api/missions", Some(ADMIN), Some(missing_lng)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let too_charged = json!({ "model": "X4", "capacity_kg": 1.0, "battery_pct": 300 });
        let (status, _) = call(&app, "POST", "/api/drones", Some(ADMIN), Some(too_charged)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let over_range = json!({ "model": "X4", "capacity_kg": 1.0, "battery_pct": 101 });
        let (status, _) = call(&app, "POST", "/api/drones", Some(ADMIN), Some(over_range)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "POST", "/api/orders", Some((9, "customer")), Some(json!([1, 2]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_availability_and_history_are_admin_only() {
        let app = test_app();
        let customer = Some((5, "customer"));
        for uri in [
            "/api/drones/available",
            "/api/pilots/available",
            "/api/drones/1/missions",
            "/api/pilots/1/missions",
        ] {
            let (status, _) = call(&app, "GET", uri, customer, None).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        }

        let (status, _) = call(&app, "GET", "/api/drones", customer, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", "/api/drones/available", Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mission_flow_over_http() {
        let app = test_app();
        let (_, drone) = call(
            &app,
            "POST",
            "/api/drones",
            Some(ADMIN),
            Some(json!({ "model": "X4", "capacity_kg": 2.5, "battery_pct": 60 })),
        )
        .await;
        let drone_id = drone["id"].as_i64().unwrap();

        let (status, mission) = call(
            &app,
            "POST",
            "/api/missions",
            Some(ADMIN),
            Some(mission_body(Some(drone_id), None)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(mission["status"], "scheduled");
        let mission_id = mission["id"].as_i64().unwrap();

        let (_, available) = call(&app, "GET", "/api/drones/available", Some(ADMIN), None).await;
        assert_eq!(available.as_array().unwrap().len(), 0);

        // Second booking of the same drone
        let (status, _) = call(
            &app,
            "POST",
            "/api/missions",
            Some(ADMIN),
            Some(mission_body(Some(drone_id), None)),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let status_uri = format!("/api/missions/{}/status", mission_id);
        let (status, _) = call(&app, "PATCH", &status_uri, Some(ADMIN), Some(json!({ "status": "flying" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, "PATCH", &status_uri, Some(ADMIN), Some(json!({ "status": "completed" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = call(&app, "PATCH", &status_uri, Some(ADMIN), Some(json!({ "status": "in_progress" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "in_progress");

        let (status, body) = call(&app, "DELETE", &format!("/api/drones/{}", drone_id), Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("active mission"));

        let (status, _) = call(&app, "GET", "/api/missions/999", Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_tracks_and_order_tracking() {
        let app = test_app();
        let (_, drone) = call(
            &app,
            "POST",
            "/api/drones",
            Some(ADMIN),
            Some(json!({ "model": "X4", "capacity_kg": 2.5 })),
        )
        .await;
        let (_, mission) = call(
            &app,
            "POST",
            "/api/missions",
            Some(ADMIN),
            Some(mission_body(drone["id"].as_i64(), None)),
        )
        .await;
        let mission_id = mission["id"].as_i64().unwrap();

        let customer = (77, "customer");
        let (status, order) = call(
            &app,
            "POST",
            "/api/orders",
            Some(customer),
            Some(json!({ "address": "Via Po 3" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["status"], "pending");
        assert_eq!(order["kind"], "Standard");
        let order_id = order["id"].as_i64().unwrap();

        let tracking_uri = format!("/api/orders/{}/tracking", order_id);
        let (_, tracking) = call(&app, "GET", &tracking_uri, Some(customer), None).await;
        assert_eq!(tracking["state"], "awaiting_assignment");

        let (status, _) = call(
            &app,
            "PATCH",
            &format!("/api/orders/{}", order_id),
            Some(ADMIN),
            Some(json!({ "mission_id": mission_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let batch = json!({ "points": [
            { "mission_id": mission_id, "lat": 45.06, "lng": 7.67, "recorded_at": "2024-11-02T10:20:00Z" },
            { "mission_id": mission_id, "lat": 45.055, "lng": 7.665, "recorded_at": "2024-11-02T10:21:00Z" },
            { "mission_id": mission_id, "lng": 7.665 },
            { "lat": 45.0, "lng": 7.0 }
        ]});
        let (status, _) = call(&app, "POST", "/api/tracks/batch", Some(customer), Some(batch.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = call(&app, "POST", "/api/tracks/batch", Some((3, "pilot")), Some(batch)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["inserted"], 2);
        assert_eq!(body["received"], 4);

        let (_, tracking) = call(&app, "GET", &tracking_uri, Some(customer), None).await;
        assert_eq!(tracking["state"], "assigned");
        assert_eq!(tracking["path"].as_array().unwrap().len(), 2);
        assert_eq!(tracking["current_position"]["lat"], 45.055);

        let (status, detail) = call(&app, "GET", &format!("/api/missions/{}", mission_id), Some(customer), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["id"], mission_id);
        assert_eq!(detail["tracks"].as_array().unwrap().len(), 2);

        let (status, _) = call(&app, "GET", &tracking_uri, Some((78, "customer")), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
