//! HTTP 接口：控制器仿真、引擎操作与 PNML 导出。
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::controller::Controller;
use crate::engine::EngineSnapshot;
use crate::irrigation::StateUpdate;
use crate::session::{SessionError, SessionHandle};

pub const PNML_FILE_NAME: &str = "irrigation-petri-net.pnml";

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub controller: Arc<Mutex<Controller>>,
}

impl AppState {
    pub fn new(session: SessionHandle, controller: Controller) -> Self {
        Self {
            session,
            controller: Arc::new(Mutex::new(controller)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/petri-simulation",
            get(controller_marking_handler).post(controller_fire_handler),
        )
        .route("/api/net", get(snapshot_handler))
        .route("/api/net/fire", post(fire_handler))
        .route("/api/net/fire-all", post(fire_all_handler))
        .route("/api/net/start-all-pumps", post(start_all_pumps_handler))
        .route("/api/net/state", post(update_state_handler))
        .route("/api/export-pnml", get(export_pnml_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct FireRequest {
    #[serde(default)]
    pub transition: Option<String>,
}

fn handle_error(err: SessionError) -> (StatusCode, String) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!("Something went wrong: {err}"),
    )
}

fn bad_request(error: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "error": error.into() })),
    )
}

pub async fn controller_marking_handler(State(state): State<AppState>) -> Json<Value> {
    let controller = state.controller.lock().await;
    Json(json!({ "marking": controller.marking() }))
}

pub async fn controller_fire_handler(
    State(state): State<AppState>,
    Json(request): Json<FireRequest>,
) -> (StatusCode, Json<Value>) {
    let Some(transition) = request.transition.filter(|t| !t.is_empty()) else {
        return bad_request("Transition is required");
    };
    let mut controller = state.controller.lock().await;
    match controller.apply_transition(&transition) {
        Ok(marking) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "marking": marking })),
        ),
        Err(err) => {
            log::debug!("controller refused `{}`: {}", transition, err);
            bad_request(err.to_string())
        }
    }
}

pub async fn snapshot_handler(
    State(state): State<AppState>,
) -> Result<Json<EngineSnapshot>, (StatusCode, String)> {
    state.session.snapshot().await.map(Json).map_err(handle_error)
}

pub async fn fire_handler(
    State(state): State<AppState>,
    Json(request): Json<FireRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let Some(transition) = request.transition else {
        return Err((StatusCode::BAD_REQUEST, "Transition is required".into()));
    };
    let applied = state
        .session
        .fire_with_snapshot(transition)
        .await
        .map_err(handle_error)?;
    Ok(Json(json!({ "fired": applied.value, "snapshot": applied.snapshot })))
}

pub async fn fire_all_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let applied = state
        .session
        .fire_all_with_snapshot()
        .await
        .map_err(handle_error)?;
    Ok(Json(json!({ "fired": applied.value, "snapshot": applied.snapshot })))
}

pub async fn start_all_pumps_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let applied = state
        .session
        .start_all_pumps_with_snapshot()
        .await
        .map_err(handle_error)?;
    Ok(Json(json!({ "started": applied.value, "snapshot": applied.snapshot })))
}

pub async fn update_state_handler(
    State(state): State<AppState>,
    Json(update): Json<StateUpdate>,
) -> Result<Json<EngineSnapshot>, (StatusCode, String)> {
    state
        .session
        .update_state(update)
        .await
        .map(Json)
        .map_err(handle_error)
}

pub async fn export_pnml_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let document = state
        .session
        .export_document()
        .await
        .map_err(handle_error)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/xml".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{PNML_FILE_NAME}\""),
            ),
        ],
        document,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::irrigation;
    use crate::session::Session;

    fn app_state() -> AppState {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let (session, _task) = Session::spawn(engine);
        AppState::new(session, Controller::new(2).unwrap())
    }

    fn fire_request(transition: &str) -> Json<FireRequest> {
        Json(FireRequest {
            transition: Some(transition.to_string()),
        })
    }

    #[tokio::test]
    async fn controller_route_reports_guard_errors() {
        let state = app_state();
        let (status, Json(body)) =
            controller_fire_handler(State(state.clone()), fire_request("t_startPump")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["marking"]["pumpBusy"], 1);

        let (status, Json(body)) =
            controller_fire_handler(State(state.clone()), fire_request("t_irrig2")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "not zone 2's turn");

        let (status, Json(body)) =
            controller_fire_handler(State(state), Json(FireRequest::default())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Transition is required");
    }

    #[tokio::test]
    async fn engine_routes_go_through_the_session() {
        let state = app_state();
        let Json(snapshot) = update_state_handler(
            State(state.clone()),
            Json(StateUpdate {
                soil_dry: Some(vec![true]),
                ..StateUpdate::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(snapshot.enabled, vec![irrigation::start_pump(0)]);

        let Json(body) = fire_handler(State(state.clone()), fire_request(&irrigation::start_pump(0)))
            .await
            .unwrap();
        assert_eq!(body["fired"], true);
        assert_eq!(body["snapshot"]["marking"]["reservoir"], 40);

        assert_eq!(body["snapshot"]["marking"]["pump_on_0"], 1);
        assert_eq!(body["snapshot"]["revision"], 2);

        // irrigate_0 要等自己的定时器，批量发生无事可做
        let Json(body) = fire_all_handler(State(state.clone())).await.unwrap();
        assert_eq!(body["fired"], 0);
        assert_eq!(body["snapshot"]["marking"]["watering_0"], 0);
        assert_eq!(body["snapshot"]["pendingTimers"], 1);

        // 强制置干与启动都反映在返回的快照中
        let Json(body) = start_all_pumps_handler(State(state)).await.unwrap();
        assert_eq!(body["started"], 1);
        assert_eq!(body["snapshot"]["revision"], 4);
        assert_eq!(body["snapshot"]["marking"]["reservoir"], 30);
        assert_eq!(body["snapshot"]["pendingTimers"], 2);
    }
}
