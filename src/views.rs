// =============================================================================
// VIEWS MODULE
// =============================================================================
// Read-only reports derived from a store snapshot.
//
// Nothing here is cached: every call recomputes from the snapshot it is
// given, so a report can never disagree with the store.
// =============================================================================

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Comment, PartRequestId, PartRequestStatus, RequestOrigin, WorkOrderId};
use crate::store::Snapshot;

/// One row of the missing-parts report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingPartRow {
    pub request_id: PartRequestId,
    pub work_order_id: WorkOrderId,
    pub product_number: Option<String>,
    pub unit_number: String,
    pub station_number: String,
    pub part_number: String,
    pub description: Option<String>,
    pub quantity_requested: u32,
    pub status: PartRequestStatus,
    pub requested_by: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,

    /// Not yet listed by the backend
    pub pending: bool,
}

/// Every part request, `Requested` first, then `Dispatched`, then
/// `Acknowledged`; ties ordered by work order id, then listing order.
pub fn missing_parts(snapshot: &Snapshot) -> Vec<MissingPartRow> {
    let mut rows: Vec<MissingPartRow> = snapshot
        .part_requests()
        .map(|request| MissingPartRow {
            request_id: request.id.clone(),
            work_order_id: request.work_order_id.clone(),
            product_number: snapshot
                .work_order(&request.work_order_id)
                .map(|wo| wo.product_number.clone()),
            unit_number: request.unit_number.clone(),
            station_number: request.station_number.clone(),
            part_number: request.part_number.clone(),
            description: request.description.clone(),
            quantity_requested: request.quantity_requested,
            status: request.status,
            requested_by: request.requested_by.clone(),
            requested_at: request.requested_at,
            pending: request.origin != RequestOrigin::Server,
        })
        .collect();

    // stable: equal keys keep listing order
    rows.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then_with(|| a.work_order_id.cmp(&b.work_order_id))
    });
    rows
}

/// All known comments, newest first; undated comments go last.
///
/// Sources are merged in order (direct, list-attached, cached details) and
/// a comment id seen twice is kept once.
pub fn comments_feed(snapshot: &Snapshot) -> Vec<Comment> {
    let mut seen = HashSet::new();
    let mut feed: Vec<Comment> = snapshot
        .direct_comments
        .iter()
        .chain(&snapshot.attached_comments)
        .chain(snapshot.details.values().flat_map(|detail| &detail.comments))
        .filter(|comment| seen.insert(comment.id.as_str()))
        .cloned()
        .collect();

    feed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    feed
}
