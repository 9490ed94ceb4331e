use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use terraplan_engine::geometry::SnapResult;
use terraplan_engine::{
    Catalog, EditError, Editor, EditorSession, InputOutcome, LoadOutcome, MapSummary,
    SaveOutcome, SqliteStore,
};
use terraplan_protocol::{
    events, GridConfig, KeyInput, MapState, MapUpdate, ModularPiece, Point, PointerClick,
    Rotation, TerrainType,
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub mod config;

pub use config::{Cli, ServerConfig};


#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    pub session: Arc<Mutex<EditorSession>>,
    pub config: ServerConfig,
    /// Last revision seen by the update feed.
    pub published_rev: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let store = SqliteStore::new(config.db_path.clone());
        let catalog = store.load_catalog()?;
        log::info!("catalog: {} pieces", catalog.len());
        let map = MapState {
            grid_config: config.grid.clone(),
            ..MapState::default()
        };
        let mut editor = Editor::new(map, catalog, &config.editor());
        let published_rev = Arc::new(AtomicU64::new(0));
        spawn_update_feed(editor.subscribe(), published_rev.clone());
        Ok(Self {
            store,
            session: Arc::new(Mutex::new(EditorSession::new(editor))),
            config,
            published_rev,
        })
    }

    fn session(&self) -> MutexGuard<'_, EditorSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reload_catalog(&self) -> Result<(), ApiError> {
        let catalog = self.store.load_catalog()?;
        self.session().editor_mut().set_catalog(catalog)?;
        Ok(())
    }

    /// Check `next` against the live map, then persist it with `write`.
    /// A failed write puts the previous inventory back.
    fn change_catalog<T>(
        &self,
        next: Catalog,
        write: impl FnOnce(&SqliteStore) -> anyhow::Result<T>,
    ) -> Result<T, ApiError> {
        let mut session = self.session();
        if session.is_loading() {
            return Err(ApiError::busy());
        }
        let editor = session.editor_mut();
        let previous = editor.catalog().clone();
        editor.set_catalog(next)?;
        write(&self.store).map_err(|err| {
            if let Err(e) = editor.set_catalog(previous) {
                log::warn!("catalog: could not restore previous inventory: {e}");
            }
            ApiError::from(err)
        })
    }
}

/// Drains editor updates off the request path. Exits once the editor is gone.
fn spawn_update_feed(rx: crossbeam_channel::Receiver<MapUpdate>, rev: Arc<AtomicU64>) {
    std::thread::spawn(move || {
        for update in rx {
            log::debug!("update {} {}", update.revision, update.event);
            rev.store(update.revision, Ordering::Relaxed);
        }
    });
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/state", get(api_state))
        .route("/api/rev", get(api_rev))
        .route("/api/maps", get(api_list_maps))
        .route("/api/maps/new", post(api_new_map))
        .route("/api/maps/save", post(api_save_map))
        .route("/api/maps/{id}/open", post(api_open_map))
        .route("/api/maps/{id}", delete(api_delete_map))
        .route("/api/catalog", get(api_catalog))
        .route("/api/catalog/pieces", put(api_upsert_piece))
        .route("/api/catalog/pieces/{id}", delete(api_delete_catalog_piece))
        .route("/api/catalog/terrain", put(api_upsert_terrain))
        .route("/api/pieces", post(api_place))
        .route("/api/pieces/{id}", delete(api_delete_piece))
        .route("/api/pieces/{id}/move", post(api_move))
        .route("/api/pieces/{id}/rotate", post(api_rotate))
        .route("/api/map/clear", post(api_clear))
        .route("/api/map/grid", put(api_set_grid))
        .route("/api/map/levels", post(api_add_level))
        .route("/api/map/levels/{level}", delete(api_remove_level))
        .route("/api/map/active-level", put(api_set_active_level))
        .route("/api/selection", post(api_select_many).delete(api_clear_selection))
        .route("/api/selection/rotate", post(api_rotate_selected))
        .route("/api/selection/delete", post(api_delete_selected))
        .route("/api/history/undo", post(api_undo))
        .route("/api/history/redo", post(api_redo))
        .route("/api/input/key", post(api_key))
        .route("/api/input/click", post(api_click))
        .route("/api/snap", post(api_snap))
        .with_state(Arc::new(state))
        // Outermost first: CORS answers preflights, then loopback + Tailscale only.
        .layer(
            ServiceBuilder::new()
                .layer(local_only_cors())
                .layer(middleware::from_fn(ip_allowlist)),
        )
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn busy() -> Self {
        Self::new(StatusCode::CONFLICT, "map load in progress")
    }
}

impl From<EditError> for ApiError {
    fn from(err: EditError) -> Self {
        let status = match &err {
            EditError::Collision { .. }
            | EditError::EmptyHistory(_)
            | EditError::PieceInUse(_) => StatusCode::CONFLICT,
            EditError::InvalidReference(_) => StatusCode::NOT_FOUND,
            EditError::UnknownPiece(_)
            | EditError::UnknownLevel(_)
            | EditError::LevelNotEmpty(_)
            | EditError::NonFinite { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        log::error!("storage: {err:#}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run one edit against the live editor and reply with the resulting state.
fn edit<F>(state: &AppState, event: &str, f: F) -> ApiResult<MapUpdate>
where
    F: FnOnce(&mut Editor) -> Result<(), EditError>,
{
    let mut session = state.session();
    if session.is_loading() {
        return Err(ApiError::busy());
    }
    let editor = session.editor_mut();
    f(editor)?;
    Ok(Json(editor.snapshot(event)))
}

async fn health() -> &'static str {
    "ok"
}

async fn api_state(State(state): State<Arc<AppState>>) -> Json<MapUpdate> {
    Json(state.session().editor().snapshot("state"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RevReply {
    editor_rev: u64,
    published_rev: u64,
    db_rev: i64,
}

async fn api_rev(State(state): State<Arc<AppState>>) -> ApiResult<RevReply> {
    let editor_rev = state.session().editor().revision();
    Ok(Json(RevReply {
        editor_rev,
        published_rev: state.published_rev.load(Ordering::Relaxed),
        db_rev: state.store.get_rev()?,
    }))
}

async fn api_list_maps(State(state): State<Arc<AppState>>) -> ApiResult<Vec<MapSummary>> {
    Ok(Json(state.store.list_maps()?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMapInput {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
}

async fn api_new_map(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewMapInput>,
) -> ApiResult<MapUpdate> {
    let defaults = MapState::default();
    let map = MapState {
        name: input.name,
        description: input.description,
        width: input.width.unwrap_or(defaults.width),
        height: input.height.unwrap_or(defaults.height),
        grid_config: state.config.grid.clone(),
        ..defaults
    };
    let mut session = state.session();
    session.new_map(map);
    Ok(Json(session.editor().snapshot(events::MAP_LOADED)))
}

#[derive(Debug, Serialize)]
struct SaveReply {
    id: String,
    #[serde(flatten)]
    outcome: SaveOutcome,
}

async fn api_save_map(State(state): State<Arc<AppState>>) -> ApiResult<SaveReply> {
    let mut session = state.session();
    if session.is_loading() {
        return Err(ApiError::busy());
    }
    let map = session.editor().map();
    let (id, outcome) = match session.map_id() {
        Some(id) => (id.to_string(), state.store.save_map(id, map)?),
        None => {
            let id = state.store.create_map(map)?;
            (id, SaveOutcome { rev: 1, changed: true })
        }
    };
    session.mark_saved(id.clone());
    log::info!("saved map {id} rev {} changed={}", outcome.rev, outcome.changed);
    Ok(Json(SaveReply { id, outcome }))
}

async fn api_open_map(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<MapUpdate> {
    let ticket = state.session().request_load(id.clone());
    // The session lock is released while reading so a newer open can supersede this one.
    let (snapshot, failure) = match state.store.load_map(&id) {
        Ok(snapshot) => (snapshot, None),
        Err(e) => (None, Some(e)),
    };
    let mut session = state.session();
    let outcome = session.complete_load(&ticket, snapshot);
    if let Some(e) = failure {
        return Err(e.into());
    }
    match outcome {
        LoadOutcome::Applied => Ok(Json(session.editor().snapshot(events::MAP_LOADED))),
        LoadOutcome::Missing => Err(ApiError::new(StatusCode::NOT_FOUND, format!("no map {id}"))),
        LoadOutcome::Stale => Err(ApiError::new(
            StatusCode::CONFLICT,
            "superseded by a newer load",
        )),
    }
}

async fn api_delete_map(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let deleted = state.store.delete_map(&id)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CatalogReply {
    pieces: Vec<ModularPiece>,
    terrain_types: Vec<TerrainType>,
}

async fn api_catalog(State(state): State<Arc<AppState>>) -> Json<CatalogReply> {
    let session = state.session();
    let catalog = session.editor().catalog();
    let reply = CatalogReply {
        pieces: catalog.pieces().cloned().collect(),
        terrain_types: catalog.terrain_types().cloned().collect(),
    };
    Json(reply)
}

async fn api_upsert_piece(
    State(state): State<Arc<AppState>>,
    Json(piece): Json<ModularPiece>,
) -> ApiResult<ModularPiece> {
    let mut pieces = state.store.list_pieces()?;
    pieces.retain(|p| p.id != piece.id);
    pieces.push(piece.clone());
    let next = Catalog::new(pieces, state.store.list_terrain_types()?);
    state.change_catalog(next, |store| store.upsert_piece(&piece))?;
    Ok(Json(piece))
}

async fn api_delete_catalog_piece(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let mut pieces = state.store.list_pieces()?;
    pieces.retain(|p| p.id != id);
    let next = Catalog::new(pieces, state.store.list_terrain_types()?);
    let deleted = state.change_catalog(next, |store| store.delete_piece(&id))?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn api_upsert_terrain(
    State(state): State<Arc<AppState>>,
    Json(terrain): Json<TerrainType>,
) -> ApiResult<TerrainType> {
    state.store.upsert_terrain_type(&terrain)?;
    state.reload_catalog()?;
    Ok(Json(terrain))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceInput {
    piece_id: String,
    x: f64,
    y: f64,
    #[serde(default)]
    rotation: Option<Rotation>,
    #[serde(default)]
    level: Option<i32>,
    /// Run the drop point through grid/magnetic snapping first.
    #[serde(default)]
    snap: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceReply {
    placed_id: String,
    state: MapUpdate,
}

async fn api_place(
    State(state): State<Arc<AppState>>,
    Json(input): Json<PlaceInput>,
) -> ApiResult<PlaceReply> {
    let mut placed_id = String::new();
    let Json(update) = edit(&state, events::PIECE_PLACED, |ed| {
        let level = input.level.unwrap_or(ed.map().level);
        let mut rotation = match input.rotation {
            Some(r) => r,
            None => ed
                .catalog()
                .piece(&input.piece_id)
                .map(|p| p.default_rotation)
                .unwrap_or_default(),
        };
        let mut at = Point::new(input.x, input.y);
        if input.snap {
            let hit = ed.snap_preview(&input.piece_id, at, rotation, level)?;
            at = hit.point;
            rotation = hit.rotation;
        }
        placed_id = ed.place_piece(&input.piece_id, at.x, at.y, rotation, level)?;
        Ok(())
    })?;
    Ok(Json(PlaceReply {
        placed_id,
        state: update,
    }))
}

#[derive(Debug, Deserialize)]
struct MoveInput {
    x: f64,
    y: f64,
}

async fn api_move(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<MoveInput>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::PIECE_MOVED, |ed| ed.move_piece(&id, input.x, input.y))
}

#[derive(Debug, Deserialize)]
struct RotateInput {
    rotation: Rotation,
}

async fn api_rotate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<RotateInput>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::PIECE_ROTATED, |ed| ed.rotate_piece(&id, input.rotation))
}

async fn api_delete_piece(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::PIECE_DELETED, |ed| ed.delete_piece(&id))
}

async fn api_clear(State(state): State<Arc<AppState>>) -> ApiResult<MapUpdate> {
    edit(&state, events::MAP_CLEARED, |ed| {
        ed.clear_map();
        Ok(())
    })
}

async fn api_set_grid(
    State(state): State<Arc<AppState>>,
    Json(grid): Json<GridConfig>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::GRID_CHANGED, |ed| {
        ed.set_grid_config(grid);
        Ok(())
    })
}

#[derive(Debug, Deserialize)]
struct LevelInput {
    level: i32,
}

async fn api_add_level(
    State(state): State<Arc<AppState>>,
    Json(input): Json<LevelInput>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::LEVELS_CHANGED, |ed| {
        ed.add_level(input.level);
        Ok(())
    })
}

async fn api_remove_level(
    State(state): State<Arc<AppState>>,
    Path(level): Path<i32>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::LEVELS_CHANGED, |ed| ed.remove_level(level))
}

async fn api_set_active_level(
    State(state): State<Arc<AppState>>,
    Json(input): Json<LevelInput>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::LEVELS_CHANGED, |ed| ed.set_active_level(input.level))
}

#[derive(Debug, Deserialize)]
struct SelectInput {
    ids: Vec<String>,
}

async fn api_select_many(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SelectInput>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::SELECTION, |ed| {
        ed.select_many(&input.ids);
        Ok(())
    })
}

async fn api_clear_selection(State(state): State<Arc<AppState>>) -> ApiResult<MapUpdate> {
    edit(&state, events::SELECTION, |ed| {
        ed.clear_selection();
        Ok(())
    })
}

async fn api_rotate_selected(State(state): State<Arc<AppState>>) -> ApiResult<MapUpdate> {
    edit(&state, events::BATCH, |ed| ed.rotate_selected().map(drop))
}

async fn api_delete_selected(State(state): State<Arc<AppState>>) -> ApiResult<MapUpdate> {
    edit(&state, events::BATCH, |ed| {
        ed.delete_selected();
        Ok(())
    })
}

/// Empty history is not an error for the caller; the state comes back unchanged.
fn tolerate_empty(res: Result<(), EditError>) -> Result<(), EditError> {
    match res {
        Err(EditError::EmptyHistory(which)) => {
            log::debug!("{which}: nothing to do");
            Ok(())
        }
        other => other,
    }
}

async fn api_undo(State(state): State<Arc<AppState>>) -> ApiResult<MapUpdate> {
    edit(&state, events::UNDO, |ed| tolerate_empty(ed.undo()))
}

async fn api_redo(State(state): State<Arc<AppState>>) -> ApiResult<MapUpdate> {
    edit(&state, events::REDO, |ed| tolerate_empty(ed.redo()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyReply {
    handled: bool,
    state: MapUpdate,
}

async fn api_key(
    State(state): State<Arc<AppState>>,
    Json(key): Json<KeyInput>,
) -> ApiResult<KeyReply> {
    let mut handled = false;
    let Json(update) = edit(&state, "input.key", |ed| match ed.handle_key(&key) {
        InputOutcome::Ignored | InputOutcome::NoOp(_) => Ok(()),
        InputOutcome::Applied(_) => {
            handled = true;
            Ok(())
        }
        InputOutcome::Rejected(cmd, err) => {
            log::info!("{cmd:?} rejected: {err}");
            Err(err)
        }
    })?;
    Ok(Json(KeyReply {
        handled,
        state: update,
    }))
}

async fn api_click(
    State(state): State<Arc<AppState>>,
    Json(click): Json<PointerClick>,
) -> ApiResult<MapUpdate> {
    edit(&state, events::SELECTION, |ed| ed.handle_click(&click))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapInput {
    piece_id: String,
    x: f64,
    y: f64,
    #[serde(default)]
    rotation: Rotation,
    #[serde(default)]
    level: Option<i32>,
}

async fn api_snap(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SnapInput>,
) -> ApiResult<SnapResult> {
    let session = state.session();
    let editor = session.editor();
    let level = input.level.unwrap_or(editor.map().level);
    let at = Point::new(input.x, input.y);
    let hit = editor.snap_preview(&input.piece_id, at, input.rotation, level)?;
    Ok(Json(hit))
}

pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    serve_listener(listener, config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("ctrl-c handler: {e}");
            std::future::pending::<()>().await
        }
        log::info!("shutting down");
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    config: ServerConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let state = AppState::new(config)?;
    let app = build_router(state);
    let addr = listener.local_addr()?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(addr)
}

async fn ip_allowlist(
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let ip = peer.ip();
    if is_allowed_peer_ip(ip) {
        return next.run(req).await;
    }
    log::warn!("rejected peer {ip}");
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

fn is_allowed_peer_ip(ip: IpAddr) -> bool {
    if ip.is_loopback() {
        return true;
    }

    // Tailscale CGNAT range (100.64.0.0/10).
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 100 && (64..=127).contains(&o[1])
        }
        IpAddr::V6(_v6) => false,
    }
}

fn local_only_cors() -> CorsLayer {
    use axum::http::header;
    use axum::http::HeaderValue;
    use axum::http::Method;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req| {
            is_allowed_local_origin(origin)
        }))
}

fn is_allowed_local_origin(origin: &axum::http::HeaderValue) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };
    is_http_origin_for_host(s, "localhost") || is_http_origin_for_host(s, "127.0.0.1")
}

fn is_http_origin_for_host(origin: &str, host: &str) -> bool {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = origin.strip_prefix(scheme) {
            if let Some(after) = rest.strip_prefix(host) {
                // scheme://host[:port] only
                return after.is_empty() || after.starts_with(':');
            }
        }
    }
    false
}
