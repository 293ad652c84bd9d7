use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{ActorContext, DossierId, TransitionPayload};
use super::repository::{DossierRepository, NotificationChannel};
use super::service::{DossierLifecycleService, LifecycleError};
use super::status::DossierStatus;
use super::timeline::TimelineFilter;

/// Body of a transition request. The actor is assumed already authenticated
/// by the edge; this layer only carries the identity through.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRequest {
    pub target: DossierStatus,
    pub actor: ActorContext,
    #[serde(default)]
    pub payload: TransitionPayload,
}

/// Router builder exposing HTTP endpoints for the dossier workflow.
pub fn dossier_router<R, N>(service: Arc<DossierLifecycleService<R, N>>) -> Router
where
    R: DossierRepository + 'static,
    N: NotificationChannel + 'static,
{
    Router::new()
        .route(
            "/api/v1/dossiers/:dossier_id/transition",
            post(transition_handler::<R, N>),
        )
        .route(
            "/api/v1/dossiers/:dossier_id/timeline",
            get(timeline_handler::<R, N>),
        )
        .route(
            "/api/v1/dossiers/:dossier_id/commission/preview",
            get(commission_preview_handler::<R, N>),
        )
        .route(
            "/api/v1/dossiers/:dossier_id/commission/final",
            post(commission_final_handler::<R, N>),
        )
        .with_state(service)
}

pub(crate) async fn transition_handler<R, N>(
    State(service): State<Arc<DossierLifecycleService<R, N>>>,
    Path(dossier_id): Path<String>,
    axum::Json(request): axum::Json<TransitionRequest>,
) -> Response
where
    R: DossierRepository + 'static,
    N: NotificationChannel + 'static,
{
    let id = DossierId(dossier_id);
    match service.request_transition(&id, request.target, &request.actor, &request.payload) {
        Ok(receipt) => (StatusCode::OK, axum::Json(receipt)).into_response(),
        Err(error) => lifecycle_error_response(error),
    }
}

pub(crate) async fn timeline_handler<R, N>(
    State(service): State<Arc<DossierLifecycleService<R, N>>>,
    Path(dossier_id): Path<String>,
    Query(filter): Query<TimelineFilter>,
) -> Response
where
    R: DossierRepository + 'static,
    N: NotificationChannel + 'static,
{
    let id = DossierId(dossier_id);
    match service.timeline(&id, &filter) {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(error) => lifecycle_error_response(error),
    }
}

pub(crate) async fn commission_preview_handler<R, N>(
    State(service): State<Arc<DossierLifecycleService<R, N>>>,
    Path(dossier_id): Path<String>,
) -> Response
where
    R: DossierRepository + 'static,
    N: NotificationChannel + 'static,
{
    let id = DossierId(dossier_id);
    match service.commission_preview(&id) {
        Ok(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        Err(error) => lifecycle_error_response(error),
    }
}

pub(crate) async fn commission_final_handler<R, N>(
    State(service): State<Arc<DossierLifecycleService<R, N>>>,
    Path(dossier_id): Path<String>,
) -> Response
where
    R: DossierRepository + 'static,
    N: NotificationChannel + 'static,
{
    let id = DossierId(dossier_id);
    match service.commission_final(&id) {
        Ok(invoice) => (StatusCode::OK, axum::Json(invoice)).into_response(),
        Err(error) => lifecycle_error_response(error),
    }
}

fn lifecycle_error_response(error: LifecycleError) -> Response {
    match error {
        LifecycleError::IllegalTransition(detail) => {
            let payload = json!({
                "error": detail.to_string(),
                "from": detail.from.as_str(),
                "requested": detail.requested.as_str(),
                "allowed_next": detail
                    .allowed_next
                    .iter()
                    .map(|status| status.as_str())
                    .collect::<Vec<_>>(),
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        LifecycleError::StaleWriteConflict | LifecycleError::FinalAmountLocked => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        LifecycleError::NotFound => {
            let payload = json!({ "error": "dossier not found" });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        LifecycleError::MissingComputationInput { .. } => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        other => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}
