//! Axum routes for the pad replay service.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::{AuthorBlock, CohesionGraph, TimelineColumn};
use crate::feed::DocumentStatus;
use crate::store::{PostgresRevisionStore, RevisionSource};
use crate::types::{LoginSession, ScrollEvent};
use crate::SCHEMA_VERSION;

use super::middleware::record_ingest;
use super::state::{PolicyRef, ServiceState, StoreHealth};

/// Type alias for the service state with PostgresRevisionStore.
pub type AppState = ServiceState<PostgresRevisionStore>;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response to an ingest request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedResponse {
    /// Number of events queued.
    pub queued: usize,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub schema_version: String,
    pub policy_ref: PolicyRef,
    pub tracked_documents: usize,
    /// Database connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseHealth>,
}

/// Database health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub pool_size: u32,
    pub pool_idle: usize,
    pub pool_max: u32,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        tracing::warn!(code = %self.code, error = %self.error, "Request error");
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Route Handlers
// ============================================================================

/// Track `pad` on first reference when the store knows it, catching it up
/// once so the first response is not empty. Store failures are logged and
/// the registry's empty output is served.
async fn ensure_tracked<S>(state: &ServiceState<S>, pad: &str)
where
    S: RevisionSource + StoreHealth + 'static,
{
    if let Err(e) = state.registry.track_if_known(pad).await {
        tracing::warn!(pad, error = %e, "could not look up pad");
    }
}

/// Ingest targets must be pads the store knows.
async fn require_known<S>(state: &ServiceState<S>, pad: &str) -> Result<(), HandlerError>
where
    S: RevisionSource + StoreHealth + 'static,
{
    match state.registry.track_if_known(pad).await {
        Ok(true) => Ok(()),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("PAD_NOT_FOUND", "pad has no revisions").with_details(pad)),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("STORE_UNAVAILABLE", e.to_string()).with_details(pad)),
        )),
    }
}

/// Cohesion graph of a pad.
async fn cohesion_handler<S>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(pad): Path<String>,
) -> Json<CohesionGraph>
where
    S: RevisionSource + StoreHealth + 'static,
{
    ensure_tracked(&state, &pad).await;
    Json(state.registry.cohesion(&pad).await)
}

/// Author blocks of a pad.
async fn blocks_handler<S>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(pad): Path<String>,
) -> Json<Vec<AuthorBlock>>
where
    S: RevisionSource + StoreHealth + 'static,
{
    ensure_tracked(&state, &pad).await;
    Json(state.registry.blocks(&pad).await)
}

/// Timeline of a pad, including today's provisional column.
async fn timeline_handler<S>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(pad): Path<String>,
) -> Result<Json<Vec<TimelineColumn>>, HandlerError>
where
    S: RevisionSource + StoreHealth + 'static,
{
    ensure_tracked(&state, &pad).await;
    let columns = state.registry.timeline(&pad).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("TIMELINE_FAILED", e.to_string()).with_details(pad.clone())),
        )
    })?;
    Ok(Json(columns))
}

/// Replay progress of a pad.
async fn status_handler<S>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(pad): Path<String>,
) -> Json<DocumentStatus>
where
    S: RevisionSource + StoreHealth + 'static,
{
    ensure_tracked(&state, &pad).await;
    Json(state.registry.status(&pad).await)
}

/// Queue scroll events for a pad.
async fn scroll_handler<S>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(pad): Path<String>,
    Json(events): Json<Vec<ScrollEvent>>,
) -> Result<(StatusCode, Json<QueuedResponse>), HandlerError>
where
    S: RevisionSource + StoreHealth + 'static,
{
    if let Some(bad) = events.iter().find(|e| e.start_paragraph > e.end_paragraph) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(
                ErrorResponse::new("INVALID_SCROLL_EVENT", "start_paragraph exceeds end_paragraph")
                    .with_details(format!(
                        "{} {}..{}",
                        bad.user, bad.start_paragraph, bad.end_paragraph
                    )),
            ),
        ));
    }
    require_known(&state, &pad).await?;
    let queued = state.registry.ingest_scroll_events(&pad, events);
    record_ingest("scroll", queued);
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { queued })))
}

/// Queue login sessions for a pad.
async fn sessions_handler<S>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(pad): Path<String>,
    Json(sessions): Json<Vec<LoginSession>>,
) -> Result<(StatusCode, Json<QueuedResponse>), HandlerError>
where
    S: RevisionSource + StoreHealth + 'static,
{
    if let Some(bad) = sessions.iter().find(|s| s.logout < s.login) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(
                ErrorResponse::new("INVALID_SESSION", "logout precedes login")
                    .with_details(bad.user.to_string()),
            ),
        ));
    }
    require_known(&state, &pad).await?;
    let queued = state.registry.ingest_login_sessions(&pad, sessions);
    record_ingest("session", queued);
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { queued })))
}

/// Health check endpoint (detailed).
///
/// Returns full service status including database health.
async fn health_handler<S>(State(state): State<Arc<ServiceState<S>>>) -> Json<HealthResponse>
where
    S: RevisionSource + StoreHealth + 'static,
{
    let db_healthy = state.store().is_healthy().await;
    let database = state.store().pool_stats().map(|stats| DatabaseHealth {
        connected: db_healthy,
        pool_size: stats.size,
        pool_idle: stats.idle,
        pool_max: stats.max,
    });

    Json(HealthResponse {
        status: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        policy_ref: state.policy_ref.clone(),
        tracked_documents: state.registry.pads().len(),
        database,
    })
}

/// Liveness check endpoint.
///
/// Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness check endpoint.
///
/// Returns 200 if the store answers, 503 otherwise.
async fn readiness_handler<S>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)>
where
    S: RevisionSource + StoreHealth + 'static,
{
    if state.store().is_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
                details: Some("Database connection failed".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the pad replay service.
pub fn create_router<S>(state: ServiceState<S>) -> Router
where
    S: RevisionSource + StoreHealth + 'static,
{
    let state = Arc::new(state);

    Router::new()
        // Analytics
        .route("/api/pads/:pad/cohesion", get(cohesion_handler::<S>))
        .route("/api/pads/:pad/blocks", get(blocks_handler::<S>))
        .route("/api/pads/:pad/timeline", get(timeline_handler::<S>))
        .route("/api/pads/:pad/status", get(status_handler::<S>))
        // External events
        .route("/api/pads/:pad/scroll", post(scroll_handler::<S>))
        .route("/api/pads/:pad/sessions", post(sessions_handler::<S>))
        // Health checks
        .route("/health", get(health_handler::<S>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::DocumentRegistry;
    use crate::policy::AnalyticsPolicyV1;
    use crate::store::InMemoryRevisionStore;
    use crate::types::{NoOpMetrics, AUTHOR_KEY};

    fn state() -> Arc<ServiceState<InMemoryRevisionStore>> {
        let store = Arc::new(InMemoryRevisionStore::new());
        store.push_attribute("pad", AUTHOR_KEY, "A");
        store.push_attribute("pad", AUTHOR_KEY, "B");
        store.append_revision("pad", "A", 0, 1, 5, "+4*0", "abcd");
        store.append_revision("pad", "B", 600_000, 5, 7, "=4+2*1", "ef");
        let registry = DocumentRegistry::with_clock(
            store,
            AnalyticsPolicyV1::default(),
            Arc::new(NoOpMetrics),
            Arc::new(|| 1_200_000i64),
        );
        Arc::new(ServiceState::new(registry))
    }

    #[tokio::test]
    async fn test_first_request_catches_up() {
        let state = state();
        let Json(blocks) = blocks_handler(State(state.clone()), Path("pad".to_string())).await;
        assert_eq!(blocks.len(), 2);

        let Json(status) = status_handler(State(state.clone()), Path("pad".to_string())).await;
        assert_eq!(status.last_applied, Some(1));
        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_pad_gives_empty_graph() {
        let state = state();
        let Json(graph) = cohesion_handler(State(state.clone()), Path("missing".to_string())).await;
        assert!(graph.is_empty());
        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_pads_stay_untracked() {
        let state = state();
        for i in 0..50 {
            let pad = format!("missing-{i}");
            cohesion_handler(State(state.clone()), Path(pad.clone())).await;
            blocks_handler(State(state.clone()), Path(pad.clone())).await;
            timeline_handler(State(state.clone()), Path(pad.clone()))
                .await
                .unwrap();
            let Json(status) = status_handler(State(state.clone()), Path(pad)).await;
            assert_eq!(status.passes, 0);
        }
        assert!(state.registry.pads().is_empty());
        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_ingest_for_unknown_pad_is_not_found() {
        let state = state();
        let events = vec![ScrollEvent::new("A", 10, 1, 2)];
        let (status, Json(body)) =
            scroll_handler(State(state.clone()), Path("missing".to_string()), Json(events))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, "PAD_NOT_FOUND");

        let sessions = vec![LoginSession::new("A", 0, 100)];
        let (status, _) =
            sessions_handler(State(state.clone()), Path("missing".to_string()), Json(sessions))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(state.registry.pads().is_empty());
    }

    #[tokio::test]
    async fn test_scroll_ingest_is_accepted() {
        let state = state();
        let events = vec![ScrollEvent::new("A", 10, 1, 2)];
        let (status, Json(body)) =
            scroll_handler(State(state.clone()), Path("pad".to_string()), Json(events))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.queued, 1);
        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_inverted_scroll_range_is_rejected() {
        let state = state();
        let events = vec![ScrollEvent::new("A", 10, 3, 2)];
        let (status, _) = scroll_handler(State(state.clone()), Path("pad".to_string()), Json(events))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_policy() {
        let state = state();
        let Json(health) = health_handler(State(state.clone())).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.policy_ref.policy_id, "analytics_policy_v1");
        assert!(health.database.is_none());
    }

    #[tokio::test]
    async fn test_router_serves_pad_status() {
        use axum::body::{to_bytes, Body};
        use axum::http::Request;
        use tower::ServiceExt;

        let state = state();
        let app = create_router((*state).clone());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/pads/pad/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status["pad"], "pad");
        assert_eq!(status["last_applied"], 1);
        state.registry.shutdown().await;
    }
}
