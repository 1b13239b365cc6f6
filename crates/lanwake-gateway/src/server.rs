//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post, put},
};
use lanwake_core::LanWakeConfig;
use lanwake_core::traits::{HistoryRecorder, MachineDirectory};
use lanwake_db::WakeDb;
use lanwake_monitor::{MonitorPolicy, MonitorRegistry};
use lanwake_scheduler::WakeAction;
use lanwake_wol::{Reachability, WakeSender, WolInfo};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LanWakeConfig>,
    pub db: Arc<WakeDb>,
    /// Wake funnel shared with the scheduler loop.
    pub waker: Arc<WakeAction>,
    pub monitors: Arc<MonitorRegistry>,
    pub probe: Arc<dyn Reachability>,
    pub wol_info: WolInfo,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the monitor registry and wake funnel around the store.
    pub fn new(
        config: LanWakeConfig,
        db: Arc<WakeDb>,
        sender: Arc<dyn WakeSender>,
        probe: Arc<dyn Reachability>,
        wol_info: WolInfo,
    ) -> Self {
        let directory: Arc<dyn MachineDirectory> = db.clone();
        let history: Arc<dyn HistoryRecorder> = db.clone();
        let monitors = Arc::new(MonitorRegistry::new(
            directory.clone(),
            probe.clone(),
            MonitorPolicy::from(&config.monitor),
        ));
        let waker = Arc::new(WakeAction::new(directory, history, sender, monitors.clone()));
        Self {
            config: Arc::new(config),
            db,
            waker,
            monitors,
            probe,
            wol_info,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/system/info", get(routes::system_info))
        // Machines
        .route("/api/machines", get(routes::list_machines).post(routes::create_machine))
        .route("/api/machines/status/all", get(routes::all_machine_status))
        .route(
            "/api/machines/{id}",
            get(routes::get_machine)
                .put(routes::update_machine)
                .delete(routes::delete_machine),
        )
        .route("/api/machines/{id}/wake", post(routes::wake_machine))
        .route("/api/machines/{id}/status", get(routes::machine_status))
        // Groups
        .route("/api/groups", get(routes::list_groups).post(routes::create_group))
        .route(
            "/api/groups/{id}",
            get(routes::get_group)
                .put(routes::update_group)
                .delete(routes::delete_group),
        )
        .route("/api/groups/{id}/machines", get(routes::group_machines))
        .route("/api/groups/{id}/wake", post(routes::wake_group))
        // Wake & monitors
        .route("/api/wake/batch", post(routes::batch_wake))
        .route("/api/wake/monitors", get(routes::list_monitors))
        .route(
            "/api/wake/monitors/{id}",
            get(routes::get_monitor).delete(routes::cancel_monitor),
        )
        // History
        .route("/api/history", get(routes::list_history).delete(routes::clear_history))
        .route("/api/history/count", get(routes::history_count))
        // Scheduled tasks
        .route("/api/scheduled", get(routes::list_tasks).post(routes::create_task))
        .route(
            "/api/scheduled/{id}",
            put(routes::update_task).delete(routes::delete_task),
        )
        .route("/health", get(routes::health_check));

    api.layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

fn cors_layer() -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    // e.g. LANWAKE_CORS_ORIGINS=http://nas.lan:3000,http://localhost:5173
    match std::env::var("LANWAKE_CORS_ORIGINS") {
        Ok(origins) => cors.allow_origin(
            origins
                .split(',')
                .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ),
        Err(_) => cors.allow_origin(Any),
    }
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = build_router_from_arc(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 LanWake listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use lanwake_core::types::NewMachine;
    use lanwake_wol::{PingProbe, WolSender};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let sender = WolSender::default();
        let info = sender.info();
        Arc::new(AppState::new(
            LanWakeConfig::default(),
            Arc::new(WakeDb::open_in_memory().unwrap()),
            Arc::new(sender),
            Arc::new(PingProbe::default()),
            info,
        ))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = build_router_from_arc(state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_found_is_json() {
        let app = build_router_from_arc(state());
        let response = app
            .oneshot(Request::get("/api/machines/99").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "Machine 99 not found");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = build_router_from_arc(state());
        let response = app
            .oneshot(
                Request::post("/api/machines")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": 5}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["ok"], false);
    }

    #[tokio::test]
    async fn test_status_all_route_precedes_id_route() {
        let shared = state();
        shared
            .db
            .create_machine(&NewMachine::new("nas", "aa:bb:cc:dd:ee:01"))
            .unwrap();
        let app = build_router_from_arc(shared);
        let response = app
            .oneshot(Request::get("/api/machines/status/all").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["1"].is_null());
    }
}
