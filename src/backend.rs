// =============================================================================
// BACKEND MODULE
// =============================================================================
// Typed wrappers for every REST endpoint the engine consumes.
//
// Each method goes through the retry wrapper and the injected Transport and
// decodes the JSON into the Backend* shapes from crate::models. Nothing here
// touches engine state; the store and the parts workflow decide what to do
// with the results.
// =============================================================================

use std::sync::Arc;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::models::{
    AcknowledgeBody, BackendComment, BackendDetail, BackendWorkOrder, CommentListResponse,
    CompleteWorkOrderBody, CreateWorkOrderBody, CreateWorkOrderResponse, DispatchBody,
    MessageResponse, NewCommentBody, PartRequestBody, WorkOrderId, WorkOrderListResponse,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::transport::Transport;

// -----------------------------------------------------------------------------
// ENDPOINTS
// -----------------------------------------------------------------------------
pub mod paths {
    pub const WORK_ORDERS: &str = "/workorders/";
    pub const CREATE_WORK_ORDER: &str = "/workorders/create_workorder";
    pub const COMPLETE_WORK_ORDER: &str = "/workorders/complete";
    pub const PART_REQUEST: &str = "/parts/part_request";
    pub const ACKNOWLEDGE_PART: &str = "/parts/acknowledge";
    pub const DISPATCH_PART: &str = "/warehouse/dispatch";
    pub const COMMENTS: &str = "/comments";

    /// `GET /workorders/{id}`
    pub fn work_order_detail(id: &super::WorkOrderId) -> String {
        format!("/workorders/{}", id)
    }
}

/// Exact `message` the completion endpoint returns on success.
/// Any other message means "not completable yet".
pub const COMPLETION_MESSAGE: &str = "Work order marked as complete";

// -----------------------------------------------------------------------------
// BACKEND CLIENT
// -----------------------------------------------------------------------------
/// Cheap to clone; shares the transport.
#[derive(Clone)]
pub struct Backend {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl Backend {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<Value> {
        with_retry(&self.retry, path, || {
            self.transport.call(method.clone(), path, body.clone())
        })
        .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let value = self.send(Method::GET, path, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> SyncResult<T> {
        let body = serde_json::to_value(body)?;
        let value = self.send(Method::POST, path, Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// POST whose only meaningful answer is `{}` or `{error}`.
    async fn post_ack<B: Serialize>(&self, path: &str, body: &B) -> SyncResult<()> {
        let reply: MessageResponse = self.post(path, body).await?;
        match reply.error {
            Some(error) => Err(SyncError::Rejected(error)),
            None => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // WORK ORDERS
    // -------------------------------------------------------------------------

    /// `GET /workorders/`
    pub async fn list_work_orders(&self) -> SyncResult<Vec<BackendWorkOrder>> {
        let response: WorkOrderListResponse = self.get(paths::WORK_ORDERS).await?;
        Ok(response.work_orders)
    }

    /// `GET /workorders/{id}`
    pub async fn work_order_detail(&self, id: &WorkOrderId) -> SyncResult<BackendDetail> {
        self.get(&paths::work_order_detail(id)).await
    }

    /// `POST /workorders/create_workorder`, returns the new id.
    pub async fn create_work_order(&self, body: &CreateWorkOrderBody) -> SyncResult<WorkOrderId> {
        let response: CreateWorkOrderResponse = self.post(paths::CREATE_WORK_ORDER, body).await?;
        Ok(response.work_order_id)
    }

    /// `POST /workorders/complete`.
    ///
    /// `Ok(false)` when the backend answered but did not complete the order.
    pub async fn complete_work_order(&self, id: &WorkOrderId) -> SyncResult<bool> {
        let body = CompleteWorkOrderBody { work_order_id: id.clone() };
        let reply: MessageResponse = self.post(paths::COMPLETE_WORK_ORDER, &body).await?;
        Ok(reply.message.as_deref() == Some(COMPLETION_MESSAGE))
    }

    // -------------------------------------------------------------------------
    // PART REQUESTS
    // -------------------------------------------------------------------------

    /// `POST /parts/part_request`
    pub async fn create_part_request(&self, body: &PartRequestBody) -> SyncResult<()> {
        self.post_ack(paths::PART_REQUEST, body).await
    }

    /// `POST /warehouse/dispatch`
    pub async fn dispatch_part(&self, body: &DispatchBody) -> SyncResult<()> {
        self.post_ack(paths::DISPATCH_PART, body).await
    }

    /// `POST /parts/acknowledge`
    pub async fn acknowledge_part(&self, body: &AcknowledgeBody) -> SyncResult<()> {
        self.post_ack(paths::ACKNOWLEDGE_PART, body).await
    }

    // -------------------------------------------------------------------------
    // COMMENTS
    // -------------------------------------------------------------------------

    /// `GET /comments`
    pub async fn list_comments(&self) -> SyncResult<Vec<BackendComment>> {
        let response: CommentListResponse = self.get(paths::COMMENTS).await?;
        Ok(response.comments)
    }

    /// `POST /comments`
    pub async fn post_comment(&self, body: &NewCommentBody) -> SyncResult<()> {
        self.post_ack(paths::COMMENTS, body).await
    }
}
