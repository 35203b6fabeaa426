// =============================================================================
// NORMALIZE MODULE
// =============================================================================
// Pure conversions from backend shapes to the canonical model.
//
// Rules:
// - No I/O and no clock reads: the same input always yields the same output,
//   so a re-render can diff two normalizations safely
// - A malformed record is logged and skipped/repaired; it never fails the
//   whole document
// =============================================================================

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::models::{
    BackendComment, BackendDetail, BackendWorkOrder, Comment, CommentSource, PartRequest,
    PartRequestId, PartRequestStatus, RequestOrigin, StationDetail, UnitDetail, WorkOrder,
    WorkOrderId, WorkOrderStatus,
};

/// Wire counters are signed; negative values are treated as zero.
fn clamp_count(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

// =============================================================================
// WORK ORDERS
// =============================================================================

/// Completed if the backend says so, InProgress once any part arrived.
pub fn derive_status(is_completed: bool, parts_supplied: u32) -> WorkOrderStatus {
    if is_completed {
        WorkOrderStatus::Completed
    } else if parts_supplied > 0 {
        WorkOrderStatus::InProgress
    } else {
        WorkOrderStatus::Pending
    }
}

/// Percentage of parts supplied, 100 when completed, 0 when nothing is needed.
///
/// The backend does not guarantee `supplied <= needed`, so the result is
/// clamped to 100.
pub fn derive_progress(is_completed: bool, parts_supplied: u32, total_parts_needed: u32) -> u8 {
    if is_completed {
        return 100;
    }
    if total_parts_needed == 0 {
        return 0;
    }
    let pct = (f64::from(parts_supplied) / f64::from(total_parts_needed) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Convert the list response into canonical work orders.
///
/// Duplicate ids keep the first occurrence.
pub fn normalize_work_orders(raw: &[BackendWorkOrder]) -> Vec<WorkOrder> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for entry in raw {
        if !seen.insert(entry.work_order_id.clone()) {
            warn!(work_order_id = %entry.work_order_id, "Duplicate work order in list, keeping first");
            continue;
        }
        if !entry.work_order_id.is_well_formed() {
            warn!(work_order_id = %entry.work_order_id, "Malformed work order id");
        }

        let parts_supplied = clamp_count(entry.parts_supplied);
        let total_parts_needed = clamp_count(entry.total_parts_needed);

        out.push(WorkOrder {
            work_order_id: entry.work_order_id.clone(),
            product_number: entry.product_number.clone(),
            quantity_to_produce: clamp_count(entry.quantity_to_produce),
            total_parts_needed,
            parts_supplied,
            parts_missing: clamp_count(entry.parts_missing),
            is_completed: entry.is_completed,
            status: derive_status(entry.is_completed, parts_supplied),
            progress: derive_progress(entry.is_completed, parts_supplied, total_parts_needed),
        });
    }

    out
}

// =============================================================================
// DETAIL
// =============================================================================

/// Canonical units/stations, in backend order.
///
/// A station number repeated inside one unit is logged and dropped (first wins).
pub fn normalize_detail(raw: &BackendDetail) -> Vec<UnitDetail> {
    let mut units = Vec::with_capacity(raw.units.len());

    for unit in &raw.units {
        let mut seen = HashSet::new();
        let mut stations = Vec::with_capacity(unit.stations.len());

        for station in &unit.stations {
            if !seen.insert(station.station_number.as_str()) {
                warn!(
                    unit_number = %unit.unit_number,
                    station_number = %station.station_number,
                    "Duplicate station number in unit, keeping first"
                );
                continue;
            }
            stations.push(StationDetail {
                station_number: station.station_number.clone(),
                station_status: station.station_status.clone().unwrap_or_default(),
                part_number: station.part_number.clone(),
                part_description: station.part_description.clone().unwrap_or_default(),
                quantity_required: clamp_count(station.quantity_required),
                quantity_supplied: clamp_count(station.quantity_supplied),
                station_comments: station.station_comments.clone().unwrap_or_default(),
                last_updated: station.last_updated,
            });
        }

        units.push(UnitDetail {
            unit_number: unit.unit_number.clone(),
            stations,
        });
    }

    units
}

// =============================================================================
// COMMENTS
// =============================================================================

/// Flatten a detail document into comments.
///
/// One comment per station with non-empty `station_comments`, id
/// `{work_order_id}-unit-{unit}-station-{station}`, followed by the comments
/// attached directly to the work order.
pub fn normalize_comments(detail: &BackendDetail, work_order_id: &WorkOrderId) -> Vec<Comment> {
    let mut out = Vec::new();

    for unit in &detail.units {
        let mut seen = HashSet::new();
        for station in &unit.stations {
            if !seen.insert(station.station_number.as_str()) {
                continue;
            }
            let Some(text) = station
                .station_comments
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
            else {
                continue;
            };
            out.push(Comment {
                id: format!(
                    "{}-unit-{}-station-{}",
                    work_order_id, unit.unit_number, station.station_number
                ),
                work_order_id: work_order_id.clone(),
                user: format!("Station {}", station.station_number),
                text: text.to_string(),
                timestamp: station.last_updated,
                source: CommentSource::Station,
            });
        }
    }

    out.extend(normalize_direct_comments(&detail.comments, Some(work_order_id)));
    out
}

/// Direct comments, from `GET /comments` or attached to a work order.
///
/// Comments without a work order (and no fallback) are dropped; comments
/// without an id get a positional one.
pub fn normalize_direct_comments(
    raw: &[BackendComment],
    fallback: Option<&WorkOrderId>,
) -> Vec<Comment> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, comment)| {
            let Some(work_order_id) = comment.work_order_id.as_ref().or(fallback) else {
                warn!(index, "Comment without work order id, skipping");
                return None;
            };
            let id = comment
                .id
                .clone()
                .unwrap_or_else(|| format!("{}-comment-{}", work_order_id, index));
            Some(Comment {
                id,
                work_order_id: work_order_id.clone(),
                user: comment.user.clone(),
                text: comment.text.clone(),
                timestamp: comment.timestamp,
                source: CommentSource::Direct,
            })
        })
        .collect()
}

// =============================================================================
// PART REQUESTS
// =============================================================================

/// Extract the part requests embedded in the work order list.
///
/// Requests without a backend id get `{work_order_id}-{part_number}-{n}`,
/// where `n` counts requests for the same part on the same work order.
pub fn normalize_part_requests(raw: &[BackendWorkOrder]) -> Vec<PartRequest> {
    let mut out = Vec::new();
    let mut seen_orders = HashSet::new();

    for order in raw {
        if !seen_orders.insert(&order.work_order_id) {
            continue;
        }
        let mut seq: HashMap<&str, usize> = HashMap::new();

        for request in &order.part_requests {
            let n = seq.entry(request.part_number.as_str()).or_insert(0);
            *n += 1;

            let status = match request.status.as_deref() {
                None => PartRequestStatus::Requested,
                Some(raw_status) => PartRequestStatus::parse_lenient(raw_status).unwrap_or_else(|| {
                    warn!(
                        work_order_id = %order.work_order_id,
                        part_number = %request.part_number,
                        status = raw_status,
                        "Unknown part request status, treating as Requested"
                    );
                    PartRequestStatus::Requested
                }),
            };

            let id = match &request.id {
                Some(id) => PartRequestId::new(id.clone()),
                None => PartRequestId::synthesized(&order.work_order_id, &request.part_number, *n),
            };

            out.push(PartRequest {
                id,
                id_from_backend: request.id.is_some(),
                work_order_id: order.work_order_id.clone(),
                part_number: request.part_number.clone(),
                quantity_requested: clamp_count(request.quantity_requested),
                unit_number: request.unit_number.clone(),
                station_number: request.station_number.clone(),
                description: request.description.clone(),
                status,
                requested_by: request.requested_by.clone(),
                requested_at: request.requested_at,
                origin: RequestOrigin::Server,
            });
        }
    }

    out
}
