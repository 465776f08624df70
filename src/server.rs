use crate::config::AppConfig;
use crate::coordinator::{Coordinator, Transition, ViewState};
use crate::error::ChoroplethError;
use crate::hover::{ElementStyles, HoverController, Label};
use crate::join::QualityReport;
use crate::render::{render_chart, render_map, render_page, MapLayers, PageMode};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use geo::algorithm::contains::Contains;
use geo::bounding_rect::BoundingRect;
use geo::Point;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info};

// Wrapper for RTree indexing
pub struct AreaIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Mutable view state. Only one request touches it at a time.
pub struct Session {
    pub coordinator: Coordinator,
    pub hover: HoverController,
}

pub struct AppState {
    pub config: AppConfig,
    pub layers: MapLayers,
    pub tree: RTree<AreaIndex>,
    /// Join and CSV counters from startup; fixed for the server's lifetime.
    pub report: QualityReport,
    pub session: Mutex<Session>,
}

impl AppState {
    pub fn new(config: AppConfig, coordinator: Coordinator, layers: MapLayers, report: QualityReport) -> Self {
        let tree_items: Vec<AreaIndex> = coordinator
            .parishes()
            .iter()
            .enumerate()
            .filter_map(|(i, parish)| {
                let rect = parish.geometry.bounding_rect()?;
                Some(AreaIndex {
                    index: i,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();
        let tree = RTree::bulk_load(tree_items);
        debug!(entries = tree.size(), "Spatial index built");

        let hover = HoverController::new(
            &config.hover,
            coordinator.parishes(),
            (config.map.width + config.chart.width, config.map.height),
        );

        Self {
            config,
            layers,
            tree,
            report,
            session: Mutex::new(Session { coordinator, hover }),
        }
    }
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct QueryResponse {
    geoid: String,
    name: String,
    value: Option<f64>,
    values: BTreeMap<String, f64>,
}

#[derive(Serialize)]
pub struct AttributeInfo {
    key: String,
    label: String,
    title: String,
    selected: bool,
}

#[derive(Deserialize)]
pub struct SelectRequest {
    attribute: String,
}

#[derive(Serialize)]
pub struct SelectResponse {
    changed: bool,
    view: ViewState,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PointerEvent {
    Enter { geoid: String },
    Move { x: f64, y: f64 },
    Leave { geoid: String },
}

#[derive(Serialize)]
pub struct PointerResponse {
    label: Option<Label>,
    /// Elements whose stroke changed with this event
    styles: Vec<(String, ElementStyles)>,
}

pub struct ApiError(ChoroplethError);

impl From<ChoroplethError> for ApiError {
    fn from(err: ChoroplethError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ChoroplethError::UnknownAttribute(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.output.dir);

    Router::new()
        .route("/", get(index_handler))
        .route("/map.svg", get(map_handler))
        .route("/chart.svg", get(chart_handler))
        .route("/api/attributes", get(attributes_handler))
        .route("/api/view", get(view_handler))
        .route("/api/select", post(select_handler))
        .route("/api/pointer", post(pointer_handler))
        .route("/api/query", get(query_handler))
        .route("/api/report", get(report_handler))
        .nest_service("/static", static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(
    config: AppConfig,
    coordinator: Coordinator,
    layers: MapLayers,
    report: QualityReport,
) -> Result<()> {
    let port = config.server.port;
    let state = Arc::new(AppState::new(config, coordinator, layers, report));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    let session = state.session.lock().await;
    let c = &session.coordinator;
    Html(render_page(c.attributes(), c.selected(), PageMode::Live))
}

async fn map_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session.lock().await;
    let svg = render_map(
        &state.layers,
        session.coordinator.view(),
        &state.config.map,
        &session.hover,
    );
    ([(header::CONTENT_TYPE, "image/svg+xml")], svg)
}

async fn chart_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session.lock().await;
    let svg = render_chart(session.coordinator.view(), &state.config.chart, &session.hover);
    ([(header::CONTENT_TYPE, "image/svg+xml")], svg)
}

async fn attributes_handler(State(state): State<Arc<AppState>>) -> Json<Vec<AttributeInfo>> {
    let session = state.session.lock().await;
    let selected = session.coordinator.selected();
    let attrs = session
        .coordinator
        .attributes()
        .iter()
        .map(|a| AttributeInfo {
            key: a.key.clone(),
            label: a.label.clone(),
            title: a.title().to_string(),
            selected: a.key == selected,
        })
        .collect();
    Json(attrs)
}

async fn report_handler(State(state): State<Arc<AppState>>) -> Json<QualityReport> {
    Json(state.report.clone())
}

async fn view_handler(State(state): State<Arc<AppState>>) -> Json<ViewState> {
    let session = state.session.lock().await;
    Json(session.coordinator.view().clone())
}

async fn select_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<SelectResponse>, ApiError> {
    let mut session = state.session.lock().await;
    let transition = session.coordinator.select(&req.attribute)?;

    let changed = matches!(transition, Transition::Changed { .. });
    if changed {
        // A label showing the previous attribute's value would be stale
        if let Some(geoid) = session.hover.label().map(|l| l.geoid.clone()) {
            session.hover.leave(&geoid);
        }
    }

    Ok(Json(SelectResponse {
        changed,
        view: session.coordinator.view().clone(),
    }))
}

async fn pointer_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<PointerEvent>,
) -> Json<PointerResponse> {
    let mut guard = state.session.lock().await;
    let Session { coordinator, hover } = &mut *guard;

    let mut touched = Vec::new();
    match event {
        PointerEvent::Enter { geoid } => {
            if let Some(prev) = hover.label().map(|l| l.geoid.clone()) {
                touched.push(prev);
            }
            hover.enter(&geoid, coordinator.view());
            touched.push(geoid);
        }
        PointerEvent::Move { x, y } => {
            hover.move_to(x, y);
        }
        PointerEvent::Leave { geoid } => {
            hover.leave(&geoid);
            touched.push(geoid);
        }
    }

    let styles = touched
        .into_iter()
        .filter_map(|g| hover.style(&g).cloned().map(|s| (g, s)))
        .collect();

    Json(PointerResponse {
        label: hover.label().cloned(),
        styles,
    })
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    let point = Point::new(params.lon, params.lat);
    let envelope = AABB::from_point([params.lon, params.lat]);

    let session = state.session.lock().await;
    let coordinator = &session.coordinator;
    let parishes = coordinator.parishes();

    // Query RTree
    for candidate in state.tree.locate_in_envelope_intersecting(&envelope) {
        if let Some(parish) = parishes.get(candidate.index) {
            if parish.geometry.contains(&point) {
                return Json(Some(QueryResponse {
                    geoid: parish.geoid.clone(),
                    name: parish.name.clone(),
                    value: parish.value(coordinator.selected()),
                    values: parish.values.clone(),
                }));
            }
        }
    }

    Json(None)
}
