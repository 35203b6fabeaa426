// =============================================================================
// PARTS MODULE
// =============================================================================
// Part request lifecycle: submit (optimistic), dispatch, acknowledge.
//
// FLOW OF A SUBMISSION:
// 1. Validate against the loaded detail; nothing is touched on failure
// 2. Insert an optimistic entry (status Requested) into the store
// 3. POST /parts/part_request
// 4. Success: mark the entry accepted, refresh the list, refetch the detail.
//    The refresh reconciles the entry against the server listing.
// 5. Failure: remove the entry, return the error
//
// Dispatch and acknowledge each move a request one step forward and are
// never undone by a later refresh (see the store's merge).
// =============================================================================

use chrono::Utc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::{SyncError, SyncResult};
use crate::metrics;
use crate::models::{
    AcknowledgeBody, DispatchBody, PartRequest, PartRequestBody, PartRequestId, PartRequestInput,
    PartRequestStatus, RequestOrigin, WorkOrderId, WorkOrderStatus,
};
use crate::store::WorkOrderStore;

/// Drives part requests through the backend and keeps the store in step.
#[derive(Clone)]
pub struct PartsWorkflow {
    store: WorkOrderStore,
    backend: Backend,
    requested_by: String,
}

/// Input that passed validation, with the quantity already narrowed.
struct ValidSubmission {
    work_order_id: WorkOrderId,
    part_number: String,
    quantity: u32,
    unit_number: String,
    station_number: String,
    description: Option<String>,
}

impl PartsWorkflow {
    pub fn new(store: WorkOrderStore, backend: Backend, requested_by: impl Into<String>) -> Self {
        Self {
            store,
            backend,
            requested_by: requested_by.into(),
        }
    }

    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }

    // =========================================================================
    // SUBMIT
    // =========================================================================

    /// Submit a new part request.
    ///
    /// Returns the pending id the optimistic entry carried. Once a refresh
    /// lists the request, that entry is replaced by the server's.
    pub async fn submit(&self, input: PartRequestInput) -> SyncResult<PartRequestId> {
        let valid = match self.validate(input) {
            Ok(valid) => valid,
            Err(err) => {
                metrics::record_part_request_submission("invalid");
                return Err(err);
            }
        };

        let optimistic = PartRequest {
            id: PartRequestId::new(""),
            id_from_backend: false,
            work_order_id: valid.work_order_id.clone(),
            part_number: valid.part_number.clone(),
            quantity_requested: valid.quantity,
            unit_number: valid.unit_number.clone(),
            station_number: valid.station_number.clone(),
            description: valid.description.clone(),
            status: PartRequestStatus::Requested,
            requested_by: Some(self.requested_by.clone()),
            requested_at: Some(Utc::now()),
            origin: RequestOrigin::Optimistic,
        };
        let Some(pending_id) = self.store.insert_local_request(optimistic) else {
            return Err(SyncError::validation("work order engine has been shut down"));
        };

        let body = PartRequestBody {
            work_order_id: valid.work_order_id.clone(),
            part_number: valid.part_number,
            quantity_requested: valid.quantity,
            station_number: valid.station_number,
            unit_number: valid.unit_number,
            requested_by: self.requested_by.clone(),
            description: valid.description,
        };

        if let Err(err) = self.backend.create_part_request(&body).await {
            warn!(
                work_order_id = %body.work_order_id,
                part_number = %body.part_number,
                error = %err,
                "Part request rejected"
            );
            self.store.remove_local_request(&pending_id);
            metrics::record_part_request_submission("rejected");
            return Err(err);
        }

        info!(
            work_order_id = %body.work_order_id,
            part_number = %body.part_number,
            quantity = body.quantity_requested,
            station = %body.station_number,
            "Part request submitted"
        );
        metrics::record_part_request_submission("accepted");
        self.store.mark_local_accepted(&pending_id);
        self.resync(&body.work_order_id).await;

        Ok(pending_id)
    }

    fn validate(&self, input: PartRequestInput) -> SyncResult<ValidSubmission> {
        let part_number = input.part_number.trim().to_string();
        if part_number.is_empty() {
            return Err(SyncError::validation("part number is required"));
        }
        if input.quantity_requested <= 0 {
            return Err(SyncError::validation("quantity must be a positive integer"));
        }
        let quantity = u32::try_from(input.quantity_requested)
            .map_err(|_| SyncError::validation("quantity is too large"))?;

        let snapshot = self.store.snapshot();
        let completed = snapshot
            .work_order(&input.work_order_id)
            .is_some_and(|wo| wo.status == WorkOrderStatus::Completed);
        if completed {
            return Err(SyncError::validation(format!(
                "work order {} is already completed",
                input.work_order_id
            )));
        }

        // Unit and station must come from the loaded detail, not free text
        let detail = snapshot.detail(&input.work_order_id).ok_or_else(|| {
            SyncError::validation(format!(
                "detail for work order {} is not loaded",
                input.work_order_id
            ))
        })?;
        let unit = detail.unit(&input.unit_number).ok_or_else(|| {
            SyncError::validation(format!("unit {} does not exist", input.unit_number))
        })?;
        if unit.station(&input.station_number).is_none() {
            return Err(SyncError::validation(format!(
                "station {} does not exist in unit {}",
                input.station_number, input.unit_number
            )));
        }

        let description = input
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(ValidSubmission {
            work_order_id: input.work_order_id,
            part_number,
            quantity,
            unit_number: input.unit_number,
            station_number: input.station_number,
            description,
        })
    }

    // =========================================================================
    // DISPATCH / ACKNOWLEDGE
    // =========================================================================

    /// Warehouse side: send parts for a `Requested` request.
    pub async fn dispatch(&self, id: &PartRequestId, quantity_supplied: i64) -> SyncResult<()> {
        if quantity_supplied <= 0 {
            return Err(SyncError::validation("quantity supplied must be a positive integer"));
        }
        let quantity_supplied = u32::try_from(quantity_supplied)
            .map_err(|_| SyncError::validation("quantity supplied is too large"))?;

        let request = self.confirmed_request(id, PartRequestStatus::Requested)?;
        let body = DispatchBody {
            part_number: request.part_number,
            quantity_supplied,
            station_number: request.station_number,
            work_order_id: request.work_order_id.clone(),
        };
        self.backend.dispatch_part(&body).await?;

        info!(request_id = %id, quantity_supplied, "Part request dispatched");
        self.store.advance_request(id, PartRequestStatus::Dispatched);
        self.resync(&request.work_order_id).await;
        Ok(())
    }

    /// Production side: confirm receipt of a `Dispatched` request.
    pub async fn acknowledge(&self, id: &PartRequestId) -> SyncResult<()> {
        let request = self.confirmed_request(id, PartRequestStatus::Dispatched)?;
        let body = AcknowledgeBody {
            work_order_id: request.work_order_id.clone(),
            part_number: request.part_number,
            station_number: request.station_number,
            unit_number: request.unit_number,
        };
        self.backend.acknowledge_part(&body).await?;

        info!(request_id = %id, "Part request acknowledged");
        self.store.advance_request(id, PartRequestStatus::Acknowledged);
        self.resync(&request.work_order_id).await;
        Ok(())
    }

    /// Look up `id` and check it sits in `expected` and is listed by the backend.
    fn confirmed_request(&self, id: &PartRequestId, expected: PartRequestStatus) -> SyncResult<PartRequest> {
        let snapshot = self.store.snapshot();
        let request = snapshot
            .part_request(id)
            .ok_or_else(|| SyncError::validation(format!("unknown part request {}", id)))?;

        // Pending ids are not known to the backend's listing yet
        if request.origin != RequestOrigin::Server {
            return Err(SyncError::validation(format!(
                "part request {} has not been listed by the backend yet",
                id
            )));
        }
        if request.status != expected {
            return Err(SyncError::validation(format!(
                "part request {} is {:?}, expected {:?}",
                id, request.status, expected
            )));
        }
        Ok(request.clone())
    }

    /// Refresh the list and the owning detail after a successful mutation.
    /// Failures are logged; the mutation itself already succeeded.
    async fn resync(&self, work_order_id: &WorkOrderId) {
        self.store.mark_detail_stale(work_order_id);
        if let Err(err) = self.store.refresh_list().await {
            warn!(work_order_id = %work_order_id, error = %err, "Refresh after part request change failed");
        }
        if let Err(err) = self.store.refetch_detail(work_order_id).await {
            warn!(work_order_id = %work_order_id, error = %err, "Detail refetch after part request change failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::paths;
    use crate::testing::{
        backend, detail_json, list_json, with_part_requests, work_order_json, FakeTransport,
    };
    use reqwest::Method;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const WO: &str = "WO0000002";

    fn input(quantity: i64) -> PartRequestInput {
        PartRequestInput {
            work_order_id: WO.into(),
            part_number: "123".into(),
            quantity_requested: quantity,
            unit_number: "1".into(),
            station_number: "2".into(),
            description: None,
        }
    }

    /// Store with WO0000002 listed and its detail loaded.
    async fn loaded(fake: &Arc<FakeTransport>) -> PartsWorkflow {
        fake.reply(Method::GET, &paths::work_order_detail(&WO.into()), Ok(detail_json()));
        let backend = backend(fake);
        let store = WorkOrderStore::new(backend.clone());
        store.refresh_list().await.expect("initial refresh");
        store.select_work_order(&WO.into()).await.expect("detail");
        PartsWorkflow::new(store, backend, "operator")
    }

    #[tokio::test]
    async fn test_non_positive_quantity_never_reaches_network() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json(WO, 10, 0, false)])));
        let parts = loaded(&fake).await;
        let calls_before = fake.calls().len();

        for quantity in [0, -3] {
            let err = parts.submit(input(quantity)).await.expect_err("invalid");
            assert!(matches!(err, SyncError::Validation(_)));
        }

        assert_eq!(fake.calls().len(), calls_before);
        assert!(parts.store.snapshot().local_requests.is_empty());
    }

    #[tokio::test]
    async fn test_station_must_exist_in_loaded_unit() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json(WO, 10, 0, false)])));
        let parts = loaded(&fake).await;

        let mut free_text = input(5);
        free_text.station_number = "9".into();

        assert!(matches!(parts.submit(free_text).await, Err(SyncError::Validation(_))));
        assert_eq!(fake.count(&Method::POST, paths::PART_REQUEST), 0);
    }

    #[tokio::test]
    async fn test_failed_submission_leaves_no_optimistic_entry() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json(WO, 10, 0, false)])));
        fake.reply(
            Method::POST,
            paths::PART_REQUEST,
            Err(SyncError::Http { status: 400, message: "station locked".into() }),
        );
        let parts = loaded(&fake).await;

        let err = parts.submit(input(5)).await.expect_err("backend rejects");

        assert_eq!(err.message(), "station locked");
        let snapshot = parts.store.snapshot();
        assert!(snapshot.local_requests.is_empty());
        assert_eq!(snapshot.part_requests().count(), 0);
        assert_eq!(fake.count(&Method::GET, paths::WORK_ORDERS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_entry_is_replaced_by_server_entry() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json(WO, 10, 0, false)])));
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![with_part_requests(
                work_order_json(WO, 10, 0, false),
                json!([{ "part_number": "123", "quantity_requested": 5, "unit_number": "1",
                         "station_number": "2", "status": "Requested", "requested_by": "operator" }]),
            )])),
        );
        fake.reply(Method::POST, paths::PART_REQUEST, Ok(json!({})));
        let parts = loaded(&fake).await;
        fake.set_delay(Duration::from_millis(100));

        let submitting = parts.clone();
        let task = tokio::spawn(async move { submitting.submit(input(5)).await });

        // the create call is still in flight
        tokio::time::sleep(Duration::from_millis(50)).await;
        let during = parts.store.snapshot();
        let pending: Vec<_> = during.part_requests().collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, PartRequestStatus::Requested);
        assert_eq!(pending[0].origin, RequestOrigin::Optimistic);

        let pending_id = task.await.expect("task").expect("submitted");
        assert_eq!(pending_id, pending[0].id);

        let after = parts.store.snapshot();
        let listed: Vec<_> = after.part_requests().collect();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.as_str(), "WO0000002-123-1");
        assert_eq!(listed[0].status, PartRequestStatus::Requested);
        assert_eq!(listed[0].origin, RequestOrigin::Server);
        assert!(after.local_requests.is_empty());
        assert!(!after.detail(&WO.into()).expect("detail").stale);
    }

    #[tokio::test]
    async fn test_accepted_entry_survives_until_listed() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json(WO, 10, 0, false)])));
        fake.reply(Method::POST, paths::PART_REQUEST, Ok(json!({})));
        let parts = loaded(&fake).await;

        parts.submit(input(5)).await.expect("submitted");

        let snapshot = parts.store.snapshot();
        assert_eq!(snapshot.local_requests.len(), 1);
        assert_eq!(snapshot.local_requests[0].request.origin, RequestOrigin::Accepted);
    }

    #[tokio::test]
    async fn test_earlier_request_for_same_part_is_not_matched() {
        let fake = FakeTransport::new();
        let existing = json!({ "id": "PR-OLD", "part_number": "123", "quantity_requested": 2,
                               "unit_number": "1", "station_number": "2", "status": "Requested" });
        let fresh = json!({ "id": "PR-NEW", "part_number": "123", "quantity_requested": 5,
                            "unit_number": "1", "station_number": "2", "status": "Requested" });
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![with_part_requests(work_order_json(WO, 10, 0, false), json!([existing.clone()]))])),
        );
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![with_part_requests(work_order_json(WO, 10, 0, false), json!([existing, fresh]))])),
        );
        fake.reply(Method::POST, paths::PART_REQUEST, Ok(json!({})));
        let parts = loaded(&fake).await;

        parts.submit(input(5)).await.expect("submitted");

        let snapshot = parts.store.snapshot();
        let ids: Vec<_> = snapshot.part_requests().map(|r| r.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["PR-OLD", "PR-NEW"]);
    }

    #[tokio::test]
    async fn test_dispatch_then_acknowledge() {
        let fake = FakeTransport::new();
        let listed = json!([{ "id": "PR-1", "part_number": "123", "quantity_requested": 5,
                              "unit_number": "1", "station_number": "2", "status": "Requested" }]);
        // the backend keeps listing the request as Requested
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![with_part_requests(work_order_json(WO, 10, 0, false), listed)])),
        );
        fake.reply(Method::POST, paths::DISPATCH_PART, Ok(json!({})));
        fake.reply(Method::POST, paths::ACKNOWLEDGE_PART, Ok(json!({})));
        let parts = loaded(&fake).await;
        let id = PartRequestId::new("PR-1");

        assert!(matches!(parts.acknowledge(&id).await, Err(SyncError::Validation(_))));

        parts.dispatch(&id, 5).await.expect("dispatched");
        assert_eq!(
            parts.store.snapshot().part_request(&id).map(|r| r.status),
            Some(PartRequestStatus::Dispatched)
        );
        let dispatched = fake
            .calls()
            .into_iter()
            .find(|c| c.path == paths::DISPATCH_PART)
            .and_then(|c| c.body)
            .expect("dispatch body");
        assert_eq!(
            dispatched,
            json!({ "part_number": "123", "quantity_supplied": 5, "station_number": "2", "work_order_id": WO })
        );

        parts.acknowledge(&id).await.expect("acknowledged");
        assert_eq!(
            parts.store.snapshot().part_request(&id).map(|r| r.status),
            Some(PartRequestStatus::Acknowledged)
        );
        assert!(matches!(parts.dispatch(&id, 5).await, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn test_pending_request_cannot_be_dispatched() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json(WO, 10, 0, false)])));
        fake.reply(Method::POST, paths::PART_REQUEST, Ok(json!({})));
        fake.reply(Method::POST, paths::DISPATCH_PART, Ok(json!({})));
        let parts = loaded(&fake).await;

        // accepted but not listed yet
        let pending_id = parts.submit(input(5)).await.expect("submitted");

        assert!(matches!(
            parts.dispatch(&pending_id, 5).await,
            Err(SyncError::Validation(_))
        ));
        assert_eq!(fake.count(&Method::POST, paths::DISPATCH_PART), 0);
        let snapshot = parts.store.snapshot();
        let pending = snapshot.part_request(&pending_id).expect("still pending");
        assert_eq!(pending.status, PartRequestStatus::Requested);
        assert_eq!(pending.origin, RequestOrigin::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_request_cannot_be_dispatched() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json(WO, 10, 0, false)])));
        fake.reply(Method::POST, paths::PART_REQUEST, Ok(json!({})));
        let parts = loaded(&fake).await;
        fake.set_delay(Duration::from_millis(100));

        let submitting = parts.clone();
        let task = tokio::spawn(async move { submitting.submit(input(5)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let optimistic_id = parts
            .store
            .snapshot()
            .part_requests()
            .next()
            .map(|r| r.id.clone())
            .expect("optimistic entry");
        assert!(matches!(
            parts.dispatch(&optimistic_id, 5).await,
            Err(SyncError::Validation(_))
        ));

        task.await.expect("task").expect("submitted");
        assert_eq!(fake.count(&Method::POST, paths::DISPATCH_PART), 0);
    }
}
