use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use vibe_core::activity::{ActivityReporter, NoopReporter};
use vibe_core::ids::{IdSource, RoomId, UuidIdSource};
use vibe_core::messages::JoinRequest;
use vibe_core::participant::{Role, UserDecl};
use vibe_store::{RoomRepo, StoreError};

use crate::activity::{self, ChannelReporter};
use crate::registry::{self, RoomRegistry};
use crate::room::RoomSummary;
use crate::ws;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub reaper_interval: Duration,
    /// Inert rooms untouched for this long are evicted.
    pub room_idle_timeout: Duration,
    pub activity_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8000,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            reaper_interval: Duration::from_secs(60),
            room_idle_timeout: Duration::from_secs(3600),
            activity_queue: 1024,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub ids: Arc<dyn IdSource>,
    pub store: Option<RoomRepo>,
    pub config: Arc<ServerConfig>,
    pub connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig, registry: Arc<RoomRegistry>, store: Option<RoomRepo>) -> Self {
        Self {
            registry,
            ids: Arc::new(UuidIdSource),
            store,
            config: Arc::new(config),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/rooms", get(list_rooms_handler).post(create_room_handler))
        .route("/ws/{room_id}", get(ws_join_handler))
        .route("/ws/{room_id}/{role}", get(ws_role_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    store: Option<RoomRepo>,
) -> Result<ServerHandle, std::io::Error> {
    let recorder_stop = CancellationToken::new();
    let mut recorder = None;
    let reporter: Arc<dyn ActivityReporter> = match &store {
        Some(repo) => {
            match repo.close_all() {
                Ok(0) => {}
                Ok(closed) => tracing::info!(closed, "Marked stale rooms closed"),
                Err(e) => tracing::warn!(error = %e, "Failed to reset room listing"),
            }
            let (reporter, rx) = ChannelReporter::new(config.activity_queue);
            recorder = Some(activity::spawn_recorder(repo.clone(), rx, recorder_stop.clone()));
            Arc::new(reporter)
        }
        None => Arc::new(NoopReporter),
    };

    let registry = Arc::new(RoomRegistry::new(reporter));
    let reaper = registry::start_reaper_task(
        Arc::clone(&registry),
        config.reaper_interval,
        config.room_idle_timeout,
    );

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let state = AppState::new(config, Arc::clone(&registry), store);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "Vibe relay started");

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        shutdown,
        server,
        reaper,
        recorder,
        recorder_stop,
    })
}

/// Keeps the server and its background tasks alive until `shutdown()`.
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<RoomRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    reaper: tokio::task::JoinHandle<()>,
    recorder: Option<tokio::task::JoinHandle<()>>,
    recorder_stop: CancellationToken,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Stop accepting connections, wait for the server to wind down, then let
    /// the activity recorder flush what is still queued.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        self.reaper.abort();

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.server).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Server task failed"),
            Err(_) => {
                tracing::warn!("Server did not stop within grace period");
                self.server.abort();
            }
        }

        self.recorder_stop.cancel();
        if let Some(recorder) = self.recorder {
            if let Err(e) = recorder.await {
                tracing::warn!(error = %e, "Activity recorder failed");
            }
        }
        tracing::info!("Vibe relay stopped");
    }
}

#[derive(Debug, Default, Deserialize)]
struct JoinQuery {
    id: Option<String>,
    name: Option<String>,
}

impl JoinQuery {
    fn into_user(self) -> Option<UserDecl> {
        if self.id.is_none() && self.name.is_none() {
            return None;
        }
        Some(UserDecl {
            id: self.id,
            name: self.name,
        })
    }
}

/// Room listing derived from the in-memory registry.
#[derive(Debug, Serialize)]
struct LiveListing {
    active_rooms: Vec<RoomSummary>,
    closed_rooms: Vec<RoomSummary>,
    total: usize,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "vibe relay running" }))
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "rooms": state.registry.count(),
        "connections": state.connections.load(Ordering::Relaxed),
    }))
}

async fn list_rooms_handler(State(state): State<AppState>) -> Response {
    match &state.store {
        Some(repo) => match repo.list() {
            Ok(listing) => Json(listing).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to list rooms");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "room listing unavailable")
            }
        },
        None => {
            let summaries = state.registry.snapshot();
            let total = summaries.len();
            let (active_rooms, closed_rooms) = summaries.into_iter().partition(|s| s.active);
            Json(LiveListing {
                active_rooms,
                closed_rooms,
                total,
            })
            .into_response()
        }
    }
}

/// Whether the listing already has a room with this id. Store failures count
/// as taken so a code is never handed out twice.
fn known_to_store(store: Option<&RoomRepo>, room_id: &RoomId) -> bool {
    let Some(repo) = store else {
        return false;
    };
    match repo.get(room_id) {
        Ok(_) => true,
        Err(StoreError::NotFound(_)) => false,
        Err(e) => {
            tracing::warn!(room_id = %room_id, error = %e, "Room lookup failed during allocation");
            true
        }
    }
}

async fn create_room_handler(State(state): State<AppState>) -> Response {
    let allocated = state
        .registry
        .allocate_room_code_excluding(|code| known_to_store(state.store.as_ref(), code));
    match allocated {
        Some(room_id) => {
            state.registry.get_or_create(&room_id);
            tracing::info!(room_id = %room_id, "Room code allocated");
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "room_id": room_id })),
            )
                .into_response()
        }
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "no room code available"),
    }
}

/// WebSocket whose first message must be a join request.
async fn ws_join_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Response {
    let room_id = match RoomId::parse(&room_id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    ws.on_upgrade(move |socket| ws::serve_socket(socket, state, room_id, None))
}

/// WebSocket with the role (and optionally `?id=&name=`) given in the URL.
async fn ws_role_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((room_id, role)): Path<(String, String)>,
    Query(query): Query<JoinQuery>,
) -> Response {
    let room_id = match RoomId::parse(&room_id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let role: Role = match role.parse() {
        Ok(role) => role,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{e}")),
    };
    let preset = JoinRequest::new(role, query.into_user());
    ws.on_upgrade(move |socket| ws::serve_socket(socket, state, room_id, Some(preset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_core::participant::Role;
    use vibe_store::Database;

    use crate::test_support::{client, participant};

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1".into(),
            port: 0, // Random port
            ..Default::default()
        }
    }

    fn url(handle: &ServerHandle, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", handle.port)
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start(test_config(), None).await.unwrap();
        assert!(handle.port > 0);

        let resp = reqwest::get(url(&handle, "/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);

        let body: serde_json::Value = reqwest::get(url(&handle, "/"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "vibe relay running");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn create_room_returns_resident_code() {
        let handle = start(test_config(), None).await.unwrap();
        let resp = reqwest::Client::new()
            .post(url(&handle, "/rooms"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = resp.json().await.unwrap();
        let room_id = RoomId::parse(body["room_id"].as_str().unwrap()).unwrap();
        assert!(handle.registry().get(&room_id).is_some());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn live_listing_partitions_rooms() {
        let handle = start(test_config(), None).await.unwrap();
        let busy = handle
            .registry()
            .get_or_create(&RoomId::parse("BUSY").unwrap());
        handle
            .registry()
            .get_or_create(&RoomId::parse("QUIET").unwrap());
        let (r, _rx) = client(8);
        busy.join(participant("R1", Role::Receiver), r);

        let body: serde_json::Value = reqwest::get(url(&handle, "/rooms"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["total"], 2);
        assert_eq!(body["active_rooms"][0]["room_id"], "BUSY");
        assert_eq!(body["active_rooms"][0]["receiver_count"], 1);
        assert_eq!(body["closed_rooms"][0]["room_id"], "QUIET");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stored_listing_reflects_activity() {
        let repo = RoomRepo::new(Database::in_memory().unwrap());
        let handle = start(test_config(), Some(repo)).await.unwrap();
        let room = handle
            .registry()
            .get_or_create(&RoomId::parse("ABCDEF").unwrap());
        let (s, _rx) = client(8);
        room.join(participant("S", Role::Sender), s);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let body: serde_json::Value = reqwest::get(url(&handle, "/rooms"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["total"], 1);
        assert_eq!(body["active_rooms"][0]["room_id"], "ABCDEF");
        assert_eq!(body["active_rooms"][0]["sender"]["id"], "S");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_queued_activity() {
        let repo = RoomRepo::new(Database::in_memory().unwrap());
        let handle = start(test_config(), Some(repo.clone())).await.unwrap();
        let room = handle
            .registry()
            .get_or_create(&RoomId::parse("FLUSH1").unwrap());
        let (r, _rx) = client(8);
        room.join(participant("R1", Role::Receiver), r);

        handle.shutdown().await;
        let record = repo.get(&RoomId::parse("FLUSH1").unwrap()).unwrap();
        assert!(record.active);
        assert_eq!(record.receivers, 1);
    }

    #[test]
    fn stored_rooms_count_as_taken() {
        let repo = RoomRepo::new(Database::in_memory().unwrap());
        let closed = RoomId::parse("ABCDEF").unwrap();
        repo.apply(&vibe_core::activity::ActivityEvent::RoomEmptied(
            vibe_core::activity::RoomActivity {
                room_id: closed.clone(),
                sender: None,
                receiver_count: 0,
            },
        ))
        .unwrap();

        assert!(known_to_store(Some(&repo), &closed));
        assert!(!known_to_store(Some(&repo), &RoomId::parse("GHJKLM").unwrap()));
        assert!(!known_to_store(None, &closed));
    }

    #[tokio::test]
    async fn websocket_route_requires_upgrade() {
        let handle = start(test_config(), None).await.unwrap();
        let resp = reqwest::get(url(&handle, "/ws/ABCDEF/sender")).await.unwrap();
        assert!(resp.status().is_client_error());
        handle.shutdown().await;
    }

    #[test]
    fn join_query_without_fields_has_no_user() {
        assert!(JoinQuery::default().into_user().is_none());
        let user = JoinQuery {
            id: Some("U1".into()),
            name: None,
        }
        .into_user()
        .unwrap();
        assert_eq!(user.id.as_deref(), Some("U1"));
    }

    #[test]
    fn build_router_creates_routes() {
        let registry = Arc::new(RoomRegistry::new(Arc::new(NoopReporter)));
        let state = AppState::new(test_config(), registry, None);
        let _router = build_router(state);
    }
}
