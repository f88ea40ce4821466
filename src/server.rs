use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::core::activity::{SubmitActivityRequest, SubmitActivityResponse};
use crate::core::service::{
    Action, ActionOutput, ActionParameter, NewInstance, PresentationHints, Service, ServiceId,
};
use crate::inmemory_db::Db;

/// In-process execution service speaking the `/api` contract the poller
/// consumes. Activities complete after a fixed number of list calls.
pub struct Server {
    state: ServerState,
}

#[derive(Clone)]
pub struct ServerState {
    db: Db,
    polls_to_complete: u32,
    available: Arc<AtomicBool>,
}

/// Switches the service between answering and returning 503 on every route.
#[derive(Clone)]
pub struct Availability(Arc<AtomicBool>);

impl Availability {
    pub fn set(&self, up: bool) {
        self.0.store(up, Ordering::SeqCst);
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn unavailable(state: &ServerState) -> Option<Response> {
    if state.available.load(Ordering::SeqCst) {
        None
    } else {
        Some(error(StatusCode::SERVICE_UNAVAILABLE, "service unavailable"))
    }
}

async fn handle_list_services(State(state): State<ServerState>) -> Response {
    if let Some(res) = unavailable(&state) {
        return res;
    }
    Json(state.db.list_services().await).into_response()
}

async fn handle_list_instances(State(state): State<ServerState>) -> Response {
    if let Some(res) = unavailable(&state) {
        return res;
    }
    Json(state.db.list_instances().await).into_response()
}

async fn handle_create_instance(
    State(state): State<ServerState>,
    Json(payload): Json<NewInstance>,
) -> Response {
    if let Some(res) = unavailable(&state) {
        return res;
    }
    match state.db.create_instance(payload).await {
        Some(instance) => {
            info!(instance_id = %instance.id, "instance created");
            (StatusCode::CREATED, Json(instance)).into_response()
        }
        None => error(StatusCode::BAD_REQUEST, "unknown service"),
    }
}

async fn handle_list_activities(State(state): State<ServerState>) -> Response {
    if let Some(res) = unavailable(&state) {
        return res;
    }
    Json(state.db.poll_activities().await).into_response()
}

async fn handle_submit_activity(
    State(state): State<ServerState>,
    Json(payload): Json<SubmitActivityRequest>,
) -> Response {
    if let Some(res) = unavailable(&state) {
        return res;
    }
    let operation = payload.operation_name.clone();
    match state.db.add_activity(payload, state.polls_to_complete).await {
        Some(activity_id) => {
            debug!(%activity_id, %operation, "activity accepted");
            Json(SubmitActivityResponse { activity_id }).into_response()
        }
        None => error(StatusCode::BAD_REQUEST, "unknown instance"),
    }
}

/// A forecasting service like the one the console's forecast button drives.
pub fn forecast_service() -> Service {
    Service {
        id: ServiceId::new("prophet"),
        name: "Prophet".to_string(),
        description: "Time series forecasting".to_string(),
        tags: vec!["Category=Forecast".to_string()],
        actions: vec![Action {
            name: "Forecast".to_string(),
            description: "Forecast future values".to_string(),
            parameters: vec![ActionParameter {
                name: "Days".to_string(),
                description: "How many days to forecast".to_string(),
                default: Some("365".to_string()),
            }],
            output: Some(ActionOutput {
                default_database: Some("ds-bucket".to_string()),
                default_measurement: Some("forecasting".to_string()),
                default_tags: None,
            }),
            presentation_hints: Some(PresentationHints {
                default_fields: vec!["yhat".to_string()],
            }),
        }],
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            state: ServerState {
                db: Db::new(),
                polls_to_complete: 2,
                available: Arc::new(AtomicBool::new(true)),
            },
        }
    }

    /// Number of `GET /api/activities` calls an activity stays unfinished for.
    pub fn with_polls_to_complete(mut self, polls: u32) -> Self {
        self.state.polls_to_complete = polls;
        self
    }

    pub async fn with_service(self, service: Service) -> Self {
        self.state.db.add_service(service).await;
        self
    }

    pub fn db(&self) -> Db {
        self.state.db.clone()
    }

    pub fn availability(&self) -> Availability {
        Availability(self.state.available.clone())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/services", get(handle_list_services))
            .route(
                "/api/instances",
                get(handle_list_instances).post(handle_create_instance),
            )
            .route(
                "/api/activities",
                get(handle_list_activities).post(handle_submit_activity),
            )
            .with_state(self.state.clone())
    }

    pub async fn run(self, listener: TcpListener) -> io::Result<()> {
        let app = self.router();
        axum::serve(listener, app).await
    }

    /// Binds an ephemeral loopback port and serves on a background task.
    pub async fn spawn(self) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        info!(%addr, "execution service listening");
        tokio::task::spawn(async move {
            if let Err(e) = self.run(listener).await {
                tracing::error!(error = %e, "execution service stopped");
            }
        });
        Ok(addr)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}
