// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP handlers of the dashboard API.
//
// Every handler goes through the Session's store or parts workflow; none of
// them keep state of their own. Engine errors turn into JSON error responses
// through SyncError's IntoResponse implementation.
// =============================================================================

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use workorder_sync::models::*;
use workorder_sync::views::{self, MissingPartRow};
use workorder_sync::SyncResult;

use crate::AppState;

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness probe - the process answers.
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "workorder-sync".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe - at least one work order refresh has succeeded.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let snapshot = state.session.store().snapshot();
    let ready = snapshot.last_updated.is_some();

    let response = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        last_updated: snapshot.last_updated,
        work_orders: snapshot.work_orders.len(),
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

// =============================================================================
// METRICS ENDPOINT
// =============================================================================
/// Prometheus metrics in text exposition format.
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

// =============================================================================
// WORK ORDER ENDPOINTS
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Refresh from the backend before answering (default: false)
    #[serde(default)]
    pub refresh: bool,
}

/// Canonical work order list.
///
/// GET /api/v1/workorders
/// GET /api/v1/workorders?refresh=true
pub async fn list_work_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> SyncResult<Json<WorkOrderListView>> {
    let store = state.session.store();
    if params.refresh {
        store.refresh_list().await?;
    }

    let snapshot = store.snapshot();
    Ok(Json(WorkOrderListView {
        work_orders: snapshot.work_orders.clone(),
        last_updated: snapshot.last_updated,
    }))
}

/// Select a work order and return it with its station detail.
///
/// GET /api/v1/workorders/:id
pub async fn get_work_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SyncResult<Json<WorkOrderView>> {
    let id = WorkOrderId::new(id);
    let store = state.session.store();
    store.select_work_order(&id).await?;

    let snapshot = store.snapshot();
    Ok(Json(WorkOrderView {
        work_order: snapshot.work_order(&id).cloned(),
        detail: snapshot.detail(&id).cloned(),
        part_requests: snapshot.part_requests_for(&id).cloned().collect(),
    }))
}

/// POST /api/v1/workorders
///
/// # Request Body
/// ```json
/// { "product_number": "P-100", "quantity": 4 }
/// ```
pub async fn create_work_order(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateWorkOrderInput>,
) -> SyncResult<(StatusCode, Json<CreatedWorkOrder>)> {
    let work_order_id = state
        .session
        .store()
        .create_work_order(&input.product_number, input.quantity)
        .await?;

    Ok((StatusCode::CREATED, Json(CreatedWorkOrder { work_order_id })))
}

/// Ask the backend to complete a work order.
///
/// `completed: false` (HTTP 200) means stations are still unfinished.
///
/// POST /api/v1/workorders/:id/complete
pub async fn complete_work_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SyncResult<Json<CompletionOutcome>> {
    let work_order_id = WorkOrderId::new(id);
    let completed = state
        .session
        .store()
        .complete_work_order(&work_order_id)
        .await?;

    Ok(Json(CompletionOutcome {
        work_order_id,
        completed,
    }))
}

// =============================================================================
// PART REQUEST ENDPOINTS
// =============================================================================

/// POST /api/v1/parts/requests
///
/// # Request Body
/// ```json
/// {
///   "work_order_id": "WO0000002",
///   "part_number": "123",
///   "quantity_requested": 5,
///   "unit_number": "1",
///   "station_number": "2"
/// }
/// ```
pub async fn submit_part_request(
    State(state): State<Arc<AppState>>,
    Json(input): Json<PartRequestInput>,
) -> SyncResult<(StatusCode, Json<SubmittedPartRequest>)> {
    let request_id = state.session.parts().submit(input).await?;
    Ok((StatusCode::CREATED, Json(SubmittedPartRequest { request_id })))
}

/// POST /api/v1/parts/requests/:id/dispatch
pub async fn dispatch_part_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<DispatchInput>,
) -> SyncResult<StatusCode> {
    state
        .session
        .parts()
        .dispatch(&PartRequestId::new(id), input.quantity_supplied)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/parts/requests/:id/acknowledge
pub async fn acknowledge_part_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SyncResult<StatusCode> {
    state
        .session
        .parts()
        .acknowledge(&PartRequestId::new(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// REPORTS / COMMENTS
// =============================================================================

/// GET /api/v1/reports/missing-parts
pub async fn missing_parts_report(State(state): State<Arc<AppState>>) -> Json<Vec<MissingPartRow>> {
    Json(views::missing_parts(&state.session.store().snapshot()))
}

/// GET /api/v1/comments
pub async fn list_comments(State(state): State<Arc<AppState>>) -> Json<Vec<Comment>> {
    Json(views::comments_feed(&state.session.store().snapshot()))
}

/// POST /api/v1/comments
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewCommentInput>,
) -> SyncResult<StatusCode> {
    state
        .session
        .store()
        .add_comment(&input.work_order_id, &input.user, &input.text)
        .await?;
    Ok(StatusCode::CREATED)
}
