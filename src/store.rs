// =============================================================================
// STORE MODULE
// =============================================================================
// The Work Order Store: sole owner of the canonical work orders, their
// cached detail documents, part requests and comments.
//
// HOW STATE IS SHARED:
// - The whole state is one immutable Snapshot behind an Arc, published
//   through a tokio watch channel
// - Readers call snapshot() or subscribe(); they never get a writable copy
// - Every mutation is a single send_modify() closure, so readers see either
//   the old snapshot or the new one, never a half-applied change
// - No lock is held across an .await
//
// REFRESH SEMANTICS:
// - refresh_list() replaces the list wholesale (no incremental merge)
// - concurrent refresh_list() callers share one in-flight backend call
// - after dispose() nothing that resolves later may change state
// =============================================================================

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{SyncError, SyncResult};
use crate::metrics;
use crate::models::{
    Comment, CreateWorkOrderBody, NewCommentBody, PartRequest, PartRequestId, PartRequestStatus,
    RequestOrigin, WorkOrder, WorkOrderDetail, WorkOrderId, WorkOrderStatus,
};
use crate::normalize::{
    normalize_comments, normalize_detail, normalize_direct_comments, normalize_part_requests,
    normalize_work_orders,
};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A part request inserted locally and not yet seen in a server listing.
#[derive(Debug, Clone)]
pub struct LocalPartRequest {
    pub request: PartRequest,

    /// Server ids for the same work order + part that already existed when
    /// this entry was inserted; reconciliation never matches those.
    baseline: HashSet<PartRequestId>,
}

/// Immutable view of everything the store knows.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Canonical list from the last successful refresh
    pub work_orders: Vec<WorkOrder>,

    /// Work order currently inspected by the operator
    pub selected: Option<WorkOrderId>,

    /// Fetched detail documents, keyed by work order
    pub details: BTreeMap<WorkOrderId, WorkOrderDetail>,

    /// Part requests as listed by the backend (status never regresses)
    pub server_requests: Vec<PartRequest>,

    /// Optimistic / accepted entries awaiting reconciliation
    pub local_requests: Vec<LocalPartRequest>,

    /// Comments from `GET /comments`
    pub direct_comments: Vec<Comment>,

    /// Comments embedded in the work order list
    pub attached_comments: Vec<Comment>,

    /// Set only when a list refresh succeeds
    pub last_updated: Option<DateTime<Utc>>,

    pub comments_updated: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn work_order(&self, id: &WorkOrderId) -> Option<&WorkOrder> {
        self.work_orders.iter().find(|wo| &wo.work_order_id == id)
    }

    pub fn detail(&self, id: &WorkOrderId) -> Option<&WorkOrderDetail> {
        self.details.get(id)
    }

    /// Detail of the selected work order, if it has been fetched.
    pub fn selected_detail(&self) -> Option<&WorkOrderDetail> {
        self.selected.as_ref().and_then(|id| self.details.get(id))
    }

    /// Server-listed requests followed by local ones.
    pub fn part_requests(&self) -> impl Iterator<Item = &PartRequest> {
        self.server_requests
            .iter()
            .chain(self.local_requests.iter().map(|local| &local.request))
    }

    pub fn part_request(&self, id: &PartRequestId) -> Option<&PartRequest> {
        self.part_requests().find(|r| &r.id == id)
    }

    pub fn part_requests_for<'a>(
        &'a self,
        work_order_id: &'a WorkOrderId,
    ) -> impl Iterator<Item = &'a PartRequest> + 'a {
        self.part_requests()
            .filter(move |r| &r.work_order_id == work_order_id)
    }

    /// Requests not yet acknowledged.
    pub fn open_part_requests(&self) -> usize {
        self.part_requests()
            .filter(|r| r.status != PartRequestStatus::Acknowledged)
            .count()
    }
}

// =============================================================================
// STORE
// =============================================================================

type SharedRefresh = Shared<BoxFuture<'static, SyncResult<()>>>;

struct StoreInner {
    backend: Backend,
    state: watch::Sender<Arc<Snapshot>>,
    refresh_in_flight: Mutex<Option<SharedRefresh>>,
    disposed: AtomicBool,
    local_seq: AtomicU64,
}

/// Handle to the store; clones share the same state.
#[derive(Clone)]
pub struct WorkOrderStore {
    inner: Arc<StoreInner>,
}

impl WorkOrderStore {
    pub fn new(backend: Backend) -> Self {
        let (state, _) = watch::channel(Arc::new(Snapshot::default()));
        Self {
            inner: Arc::new(StoreInner {
                backend,
                state,
                refresh_in_flight: Mutex::new(None),
                disposed: AtomicBool::new(false),
                local_seq: AtomicU64::new(0),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // READ ACCESS
    // -------------------------------------------------------------------------

    /// Current state.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.state.subscribe()
    }

    // -------------------------------------------------------------------------
    // LIFECYCLE
    // -------------------------------------------------------------------------

    /// Stop accepting state changes. Calls still in flight complete, but
    /// their results are dropped.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            info!("Work order store disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Apply one atomic state change; false if the store is disposed.
    fn apply(&self, what: &'static str, change: impl FnOnce(&mut Snapshot)) -> bool {
        if self.is_disposed() {
            debug!(change = what, "Store disposed, ignoring result");
            return false;
        }
        self.inner
            .state
            .send_modify(|snapshot| change(Arc::make_mut(snapshot)));

        let snapshot = self.snapshot();
        metrics::set_open_part_requests(snapshot.open_part_requests());
        true
    }

    // -------------------------------------------------------------------------
    // LIST REFRESH
    // -------------------------------------------------------------------------

    /// Fetch all work orders and replace the canonical list.
    ///
    /// Callers arriving while a refresh is in flight await that refresh
    /// instead of issuing another backend call.
    pub async fn refresh_list(&self) -> SyncResult<()> {
        let refresh = {
            let mut slot = self.inner.refresh_in_flight.lock().await;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight work order refresh");
                    in_flight.clone()
                }
                None => {
                    let store = self.clone();
                    let refresh = async move {
                        let result = store.fetch_and_replace_list().await;
                        store.inner.refresh_in_flight.lock().await.take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    async fn fetch_and_replace_list(&self) -> SyncResult<()> {
        let raw = self.inner.backend.list_work_orders().await?;

        let work_orders = normalize_work_orders(&raw);
        let mut server_requests = normalize_part_requests(&raw);
        let attached_comments: Vec<Comment> = raw
            .iter()
            .flat_map(|wo| normalize_direct_comments(&wo.comments, Some(&wo.work_order_id)))
            .collect();
        let refreshed_at = Utc::now();
        let count = work_orders.len();

        let applied = self.apply("refresh_list", move |snapshot| {
            for wo in &work_orders {
                let regressed = snapshot.work_order(&wo.work_order_id).is_some_and(|previous| {
                    previous.status == WorkOrderStatus::Completed
                        && wo.status != WorkOrderStatus::Completed
                });
                if regressed {
                    warn!(work_order_id = %wo.work_order_id, "Backend reports completed work order as open again");
                }
            }

            merge_listed_statuses(&snapshot.server_requests, &mut server_requests);

            let listed: HashSet<&WorkOrderId> =
                work_orders.iter().map(|wo| &wo.work_order_id).collect();
            snapshot.details.retain(|id, _| listed.contains(id));

            snapshot.work_orders = work_orders;
            snapshot.server_requests = server_requests;
            snapshot.attached_comments = attached_comments;
            reconcile_local_requests(snapshot);
            snapshot.last_updated = Some(refreshed_at);
        });

        if applied {
            metrics::set_work_orders_tracked(count);
            debug!(work_orders = count, "Work order list refreshed");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // SELECTION / DETAIL
    // -------------------------------------------------------------------------

    /// Make `id` the inspected work order and fetch its detail.
    ///
    /// The selection sticks even when the fetch fails; the error is returned
    /// for the caller to display. A result arriving after the operator has
    /// moved to another work order is ignored.
    pub async fn select_work_order(&self, id: &WorkOrderId) -> SyncResult<()> {
        let target = id.clone();
        self.apply("select", |snapshot| snapshot.selected = Some(target));

        match self.fetch_detail(id).await {
            Ok(detail) => {
                let still_selected = self.snapshot().selected.as_ref() == Some(id);
                if !still_selected {
                    debug!(work_order_id = %id, "Selection changed, dropping detail");
                    return Ok(());
                }
                self.store_detail(detail);
                Ok(())
            }
            Err(err) => {
                warn!(work_order_id = %id, error = %err, "Failed to load work order detail");
                Err(err)
            }
        }
    }

    /// Fetch the detail of `id` again and cache it, selected or not.
    pub async fn refetch_detail(&self, id: &WorkOrderId) -> SyncResult<()> {
        let detail = self.fetch_detail(id).await?;
        self.store_detail(detail);
        Ok(())
    }

    async fn fetch_detail(&self, id: &WorkOrderId) -> SyncResult<WorkOrderDetail> {
        let raw = self.inner.backend.work_order_detail(id).await?;
        Ok(WorkOrderDetail {
            work_order_id: id.clone(),
            units: normalize_detail(&raw),
            is_completed: raw.is_completed,
            comments: normalize_comments(&raw, id),
            fetched_at: Utc::now(),
            stale: false,
        })
    }

    fn store_detail(&self, detail: WorkOrderDetail) {
        self.apply("store_detail", |snapshot| {
            snapshot
                .details
                .insert(detail.work_order_id.clone(), detail);
        });
    }

    /// Flag the cached detail of `id` as out of date.
    pub fn mark_detail_stale(&self, id: &WorkOrderId) {
        self.apply("mark_detail_stale", |snapshot| {
            if let Some(detail) = snapshot.details.get_mut(id) {
                detail.stale = true;
            }
        });
    }

    // -------------------------------------------------------------------------
    // WORK ORDER MUTATIONS
    // -------------------------------------------------------------------------

    /// Create a work order, then refresh so it appears with backend fields.
    pub async fn create_work_order(
        &self,
        product_number: &str,
        quantity: i64,
    ) -> SyncResult<WorkOrderId> {
        let product_number = product_number.trim();
        if product_number.is_empty() {
            return Err(SyncError::validation("product number is required"));
        }
        if quantity <= 0 {
            return Err(SyncError::validation("quantity must be a positive integer"));
        }
        let quantity = u32::try_from(quantity)
            .map_err(|_| SyncError::validation("quantity is too large"))?;

        let body = CreateWorkOrderBody {
            product_number: product_number.to_string(),
            quantity,
        };
        let id = self.inner.backend.create_work_order(&body).await?;
        info!(work_order_id = %id, product_number, quantity, "Work order created");

        if let Err(err) = self.refresh_list().await {
            warn!(work_order_id = %id, error = %err, "Refresh after create failed");
        }
        Ok(id)
    }

    /// Ask the backend to complete `id`.
    ///
    /// `Ok(false)` means the backend declined (stations unfinished); the
    /// local state is left untouched in that case.
    pub async fn complete_work_order(&self, id: &WorkOrderId) -> SyncResult<bool> {
        let completed = self.inner.backend.complete_work_order(id).await?;
        if !completed {
            info!(work_order_id = %id, "Work order cannot be completed yet");
            return Ok(false);
        }

        info!(work_order_id = %id, "Work order completed");
        self.mark_detail_stale(id);
        if let Err(err) = self.refresh_list().await {
            warn!(work_order_id = %id, error = %err, "Refresh after completion failed");
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // COMMENTS
    // -------------------------------------------------------------------------

    /// Replace the direct comments with `GET /comments`.
    pub async fn refresh_comments(&self) -> SyncResult<()> {
        let raw = self.inner.backend.list_comments().await?;
        let comments = normalize_direct_comments(&raw, None);
        let refreshed_at = Utc::now();

        self.apply("refresh_comments", move |snapshot| {
            snapshot.direct_comments = comments;
            snapshot.comments_updated = Some(refreshed_at);
        });
        Ok(())
    }

    /// Post a direct comment on a work order, then refresh comments.
    pub async fn add_comment(&self, work_order_id: &WorkOrderId, user: &str, text: &str) -> SyncResult<()> {
        let (user, text) = (user.trim(), text.trim());
        if user.is_empty() {
            return Err(SyncError::validation("comment author is required"));
        }
        if text.is_empty() {
            return Err(SyncError::validation("comment text is required"));
        }

        let body = NewCommentBody {
            work_order_id: work_order_id.clone(),
            user: user.to_string(),
            text: text.to_string(),
        };
        self.inner.backend.post_comment(&body).await?;

        if let Err(err) = self.refresh_comments().await {
            warn!(work_order_id = %work_order_id, error = %err, "Refresh after comment failed");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // PART REQUEST BOOKKEEPING (driven by the parts workflow)
    // -------------------------------------------------------------------------

    /// Insert an optimistic part request; returns its pending id, or `None`
    /// if the store is disposed.
    pub(crate) fn insert_local_request(&self, mut request: PartRequest) -> Option<PartRequestId> {
        let seq = self.inner.local_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let id = PartRequestId::pending(&request.work_order_id, &request.part_number, seq);
        request.id = id.clone();
        request.origin = RequestOrigin::Optimistic;

        let inserted = self.apply("insert_local_request", |snapshot| {
            let baseline = snapshot
                .server_requests
                .iter()
                .filter(|r| {
                    r.work_order_id == request.work_order_id && r.part_number == request.part_number
                })
                .map(|r| r.id.clone())
                .collect();
            snapshot.local_requests.push(LocalPartRequest { request, baseline });
        });

        inserted.then_some(id)
    }

    /// The create call succeeded; keep the entry until a listing shows it.
    pub(crate) fn mark_local_accepted(&self, id: &PartRequestId) {
        self.apply("mark_local_accepted", |snapshot| {
            if let Some(local) = snapshot
                .local_requests
                .iter_mut()
                .find(|local| &local.request.id == id)
            {
                local.request.origin = RequestOrigin::Accepted;
            }
        });
    }

    /// Drop an optimistic entry (failed submission).
    pub(crate) fn remove_local_request(&self, id: &PartRequestId) {
        self.apply("remove_local_request", |snapshot| {
            snapshot.local_requests.retain(|local| &local.request.id != id);
        });
    }

    /// Move a listed request forward after a successful dispatch/acknowledge
    /// call. Never moves a status backward.
    pub(crate) fn advance_request(&self, id: &PartRequestId, status: PartRequestStatus) {
        self.apply("advance_request", |snapshot| {
            let request = snapshot.server_requests.iter_mut().find(|r| &r.id == id);
            if let Some(request) = request {
                request.status = request.status.max(status);
            }
        });
    }
}

// =============================================================================
// STATUS MERGE
// =============================================================================

/// Identifies a request whose id was synthesized from its listing position.
type ContentKey = (WorkOrderId, String, String, String, u32, Option<DateTime<Utc>>);

fn content_key(request: &PartRequest) -> ContentKey {
    (
        request.work_order_id.clone(),
        request.part_number.clone(),
        request.unit_number.clone(),
        request.station_number.clone(),
        request.quantity_requested,
        request.requested_at,
    )
}

/// A request already seen in a later state keeps that state.
///
/// Backend ids are matched by id. Synthesized ids move when a new request
/// for the same part is listed ahead of an older one, so those are matched
/// by content instead, pairing identical requests in listing order.
fn merge_listed_statuses(previous: &[PartRequest], listed: &mut [PartRequest]) {
    let mut by_id: HashMap<&PartRequestId, PartRequestStatus> = HashMap::new();
    let mut by_content: HashMap<ContentKey, VecDeque<PartRequestStatus>> = HashMap::new();
    for request in previous {
        if request.id_from_backend {
            by_id.insert(&request.id, request.status);
        } else {
            by_content
                .entry(content_key(request))
                .or_default()
                .push_back(request.status);
        }
    }

    for request in listed.iter_mut() {
        let known = if request.id_from_backend {
            by_id.get(&request.id).copied()
        } else {
            by_content
                .get_mut(&content_key(request))
                .and_then(VecDeque::pop_front)
        };
        if let Some(previous) = known {
            if previous > request.status {
                debug!(
                    request_id = %request.id,
                    ?previous,
                    listed = ?request.status,
                    "Ignoring stale part request status"
                );
                request.status = previous;
            }
        }
    }
}

// =============================================================================
// RECONCILIATION
// =============================================================================

fn timestamp_distance(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> u64 {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).num_milliseconds().unsigned_abs(),
        _ => u64::MAX,
    }
}

/// Drop local entries that now appear in the server listing.
///
/// A local entry matches a listed request with the same work order and part
/// number that is not acknowledged, was not listed before the entry was
/// inserted, and is not already claimed by another entry; among candidates
/// the closest `requested_at` wins.
fn reconcile_local_requests(snapshot: &mut Snapshot) {
    let mut claimed: HashSet<PartRequestId> = HashSet::new();
    let server_requests = &snapshot.server_requests;

    snapshot.local_requests.retain(|local| {
        let candidate = server_requests
            .iter()
            .filter(|server| {
                server.work_order_id == local.request.work_order_id
                    && server.part_number == local.request.part_number
                    && server.status != PartRequestStatus::Acknowledged
                    && !local.baseline.contains(&server.id)
                    && !claimed.contains(&server.id)
            })
            .min_by_key(|server| timestamp_distance(server.requested_at, local.request.requested_at));

        match candidate {
            Some(server) => {
                debug!(local_id = %local.request.id, server_id = %server.id, "Part request reconciled");
                claimed.insert(server.id.clone());
                false
            }
            None => true,
        }
    });
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
    use std::time::Duration;

    fn store_with(fake: &Arc<FakeTransport>) -> WorkOrderStore {
        WorkOrderStore::new(backend(fake))
    }

    #[tokio::test]
    async fn test_refresh_replaces_list_and_sets_last_updated() {
        let fake = FakeTransport::new();
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![
                work_order_json("WO0000001", 10, 4, false),
                work_order_json("WO0000002", 10, 0, false),
            ])),
        );
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![work_order_json("WO0000002", 10, 0, false)])),
        );
        let store = store_with(&fake);

        store.refresh_list().await.expect("first refresh");
        let first = store.snapshot();
        assert_eq!(first.work_orders.len(), 2);
        assert_eq!(
            first.work_order(&"WO0000001".into()).map(|wo| (wo.status, wo.progress)),
            Some((WorkOrderStatus::InProgress, 40))
        );
        assert!(first.last_updated.is_some());

        store.refresh_list().await.expect("second refresh");
        let second = store.snapshot();
        assert_eq!(second.work_orders.len(), 1);
        assert!(second.work_order(&"WO0000001".into()).is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_state() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Err(SyncError::Http { status: 401, message: "expired".into() }));
        let store = store_with(&fake);

        let err = store.refresh_list().await.expect_err("401 fails");

        assert_eq!(err, SyncError::Http { status: 401, message: "expired".into() });
        assert!(store.snapshot().last_updated.is_none());
        assert!(store.snapshot().work_orders.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_call() {
        let fake = FakeTransport::new();
        fake.set_delay(Duration::from_millis(200));
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![work_order_json("WO0000001", 1, 0, false)])),
        );
        let store = store_with(&fake);

        let (a, b) = tokio::join!(store.refresh_list(), store.refresh_list());

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(fake.count(&Method::GET, paths::WORK_ORDERS), 1);

        // once settled, the next refresh issues a fresh call
        store.refresh_list().await.expect("later refresh");
        assert_eq!(fake.count(&Method::GET, paths::WORK_ORDERS), 2);
    }

    #[tokio::test]
    async fn test_select_keeps_selection_when_detail_fails() {
        let fake = FakeTransport::new();
        let id = WorkOrderId::from("WO0000004");
        fake.reply(
            Method::GET,
            &paths::work_order_detail(&id),
            Err(SyncError::Http { status: 404, message: "Work order not found".into() }),
        );
        let store = store_with(&fake);

        let err = store.select_work_order(&id).await.expect_err("detail fails");

        assert_eq!(err.message(), "Work order not found");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.selected.as_ref(), Some(&id));
        assert!(snapshot.selected_detail().is_none());
    }

    #[tokio::test]
    async fn test_select_loads_detail_and_station_comments() {
        let fake = FakeTransport::new();
        let id = WorkOrderId::from("WO0000002");
        fake.reply(Method::GET, &paths::work_order_detail(&id), Ok(detail_json()));
        let store = store_with(&fake);

        store.select_work_order(&id).await.expect("detail loads");

        let snapshot = store.snapshot();
        let detail = snapshot.selected_detail().expect("detail cached");
        assert_eq!(detail.units[0].stations.len(), 3);
        assert!(!detail.stale);
        assert_eq!(detail.comments[0].id, "WO0000002-unit-1-station-2");
    }

    #[tokio::test]
    async fn test_create_validates_before_network() {
        let fake = FakeTransport::new();
        let store = store_with(&fake);

        assert!(matches!(store.create_work_order("P-1", 0).await, Err(SyncError::Validation(_))));
        assert!(matches!(store.create_work_order("  ", 3).await, Err(SyncError::Validation(_))));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_refresh() {
        let fake = FakeTransport::new();
        fake.reply(Method::POST, paths::CREATE_WORK_ORDER, Ok(json!({ "work_order_id": "WO0000010" })));
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![work_order_json("WO0000010", 0, 0, false)])),
        );
        let store = store_with(&fake);

        let id = store.create_work_order("P-77", 4).await.expect("created");

        assert_eq!(id.as_str(), "WO0000010");
        assert_eq!(
            fake.calls()[0].body,
            Some(json!({ "product_number": "P-77", "quantity": 4 }))
        );
        assert_eq!(
            store.snapshot().work_order(&id).map(|wo| wo.status),
            Some(WorkOrderStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_incomplete_stations_is_negative_result_not_error() {
        let fake = FakeTransport::new();
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![work_order_json("WO0000003", 10, 6, false)])),
        );
        fake.reply(Method::POST, paths::COMPLETE_WORK_ORDER, Ok(json!({ "message": "Stations incomplete" })));
        let store = store_with(&fake);
        store.refresh_list().await.expect("refresh");
        let id = WorkOrderId::from("WO0000003");

        assert_eq!(store.complete_work_order(&id).await, Ok(false));
        assert_eq!(
            store.snapshot().work_order(&id).map(|wo| wo.status),
            Some(WorkOrderStatus::InProgress)
        );
        assert_eq!(fake.count(&Method::GET, paths::WORK_ORDERS), 1);
    }

    #[tokio::test]
    async fn test_successful_completion_reflects_backend_after_refresh() {
        let fake = FakeTransport::new();
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json("WO0000003", 10, 10, false)])));
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![work_order_json("WO0000003", 10, 10, true)])));
        fake.reply(Method::POST, paths::COMPLETE_WORK_ORDER, Ok(json!({ "message": "Work order marked as complete" })));
        let store = store_with(&fake);
        store.refresh_list().await.expect("refresh");
        let id = WorkOrderId::from("WO0000003");

        assert_eq!(store.complete_work_order(&id).await, Ok(true));
        assert_eq!(
            store.snapshot().work_order(&id).map(|wo| (wo.status, wo.progress)),
            Some((WorkOrderStatus::Completed, 100))
        );
    }

    #[tokio::test]
    async fn test_refresh_never_regresses_part_request_status() {
        let fake = FakeTransport::new();
        let requests = |status: &str| {
            json!([{ "id": "PR-1", "part_number": "123", "quantity_requested": 5,
                     "unit_number": "1", "station_number": "2", "status": status }])
        };
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![with_part_requests(work_order_json("WO0000002", 10, 0, false), requests("Dispatched"))])),
        );
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![with_part_requests(work_order_json("WO0000002", 10, 0, false), requests("Requested"))])),
        );
        let store = store_with(&fake);

        store.refresh_list().await.expect("first");
        store.refresh_list().await.expect("stale second");

        let snapshot = store.snapshot();
        let request = snapshot.part_request(&PartRequestId::new("PR-1")).expect("listed");
        assert_eq!(request.status, PartRequestStatus::Dispatched);
    }

    #[tokio::test]
    async fn test_new_request_listed_ahead_does_not_inherit_older_status() {
        let fake = FakeTransport::new();
        let dispatched = json!({ "part_number": "123", "quantity_requested": 2,
                                 "unit_number": "1", "station_number": "2", "status": "Dispatched" });
        let fresh = json!({ "part_number": "123", "quantity_requested": 7,
                            "unit_number": "1", "station_number": "2", "status": "Requested" });
        let stale = json!({ "part_number": "123", "quantity_requested": 2,
                            "unit_number": "1", "station_number": "2", "status": "Requested" });
        let order = || work_order_json("WO0000002", 10, 0, false);
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![with_part_requests(order(), json!([dispatched]))])),
        );
        // the new request takes the first synthesized id
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![with_part_requests(order(), json!([fresh, stale]))])),
        );
        let store = store_with(&fake);

        store.refresh_list().await.expect("first");
        store.refresh_list().await.expect("second");

        let snapshot = store.snapshot();
        let listed: Vec<_> = snapshot
            .part_requests_for(&WorkOrderId::from("WO0000002"))
            .map(|r| (r.quantity_requested, r.status))
            .collect();
        assert_eq!(
            listed,
            vec![
                (7, PartRequestStatus::Requested),
                (2, PartRequestStatus::Dispatched),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_refresh_discards_result() {
        let fake = FakeTransport::new();
        fake.set_delay(Duration::from_millis(100));
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![work_order_json("WO0000001", 1, 1, false)])),
        );
        let store = store_with(&fake);
        let mut updates = store.subscribe();

        let refresh = tokio::spawn({
            let store = store.clone();
            async move { store.refresh_list().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.dispose();

        refresh
            .await
            .expect("task joined")
            .expect("call itself succeeds");

        assert_eq!(fake.count(&Method::GET, paths::WORK_ORDERS), 1);
        let snapshot = store.snapshot();
        assert!(snapshot.work_orders.is_empty());
        assert!(snapshot.last_updated.is_none());
        assert!(!updates.has_changed().expect("sender alive"));
    }

    #[tokio::test]
    async fn test_disposed_store_ignores_late_results() {
        let fake = FakeTransport::new();
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![work_order_json("WO0000001", 1, 1, false)])),
        );
        let store = store_with(&fake);
        let mut updates = store.subscribe();

        store.dispose();
        store.refresh_list().await.expect("call itself succeeds");

        assert!(store.snapshot().work_orders.is_empty());
        assert!(!updates.has_changed().expect("sender alive"));
    }

    #[tokio::test]
    async fn test_comments_refresh_and_add() {
        let fake = FakeTransport::new();
        fake.reply(
            Method::GET,
            paths::COMMENTS,
            Ok(json!({ "comments": [
                { "id": 1, "work_order_id": "WO0000001", "user": "ana", "text": "started", "timestamp": "2024-03-01T08:00:00Z" }
            ]})),
        );
        fake.reply(Method::POST, paths::COMMENTS, Ok(json!({})));
        let store = store_with(&fake);

        assert!(matches!(
            store.add_comment(&"WO0000001".into(), "ana", "   ").await,
            Err(SyncError::Validation(_))
        ));
        store.add_comment(&"WO0000001".into(), "ana", "started").await.expect("posted");

        let snapshot = store.snapshot();
        assert_eq!(snapshot.direct_comments.len(), 1);
        assert_eq!(snapshot.direct_comments[0].user, "ana");
        assert!(snapshot.comments_updated.is_some());
        assert_eq!(fake.count(&Method::POST, paths::COMMENTS), 1);
    }

    #[tokio::test]
    async fn test_details_of_vanished_work_orders_are_dropped() {
        let fake = FakeTransport::new();
        let id = WorkOrderId::from("WO0000005");
        fake.reply(Method::GET, &paths::work_order_detail(&id), Ok(detail_json()));
        fake.reply(Method::GET, paths::WORK_ORDERS, Ok(list_json(vec![])));
        let store = store_with(&fake);

        store.refetch_detail(&id).await.expect("detail");
        assert!(store.snapshot().detail(&id).is_some());

        store.refresh_list().await.expect("refresh");
        assert!(store.snapshot().detail(&id).is_none());
    }
}
