// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures used throughout the engine.
//
// Three groups live here:
// - Backend* structs: the JSON the REST backend sends us (lenient)
// - Canonical structs: what the store holds after normalization
// - Request bodies: what we POST to the backend, plus dashboard API inputs
// =============================================================================

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

// =============================================================================
// IDENTIFIERS
// =============================================================================

// -----------------------------------------------------------------------------
// WORK ORDER ID
// -----------------------------------------------------------------------------
/// Work order identity, `WO` followed by 7 digits (e.g. `WO0000001`).
///
/// Ordering is lexicographic, which matches numeric order for well-formed ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkOrderId(String);

impl WorkOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the `WO` + 7 digits format.
    pub fn is_well_formed(&self) -> bool {
        let Some(digits) = self.0.strip_prefix("WO") else {
            return false;
        };
        digits.len() == 7 && digits.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for WorkOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkOrderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// -----------------------------------------------------------------------------
// PART REQUEST ID
// -----------------------------------------------------------------------------
/// Client-side identity of a part request.
///
/// The backend does not always return an id, so identities are synthesized
/// from `work_order_id`, `part_number` and a sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartRequestId(String);

impl PartRequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity for a server-listed request without its own id.
    pub fn synthesized(work_order_id: &WorkOrderId, part_number: &str, seq: usize) -> Self {
        Self(format!("{}-{}-{}", work_order_id, part_number, seq))
    }

    /// Identity for a request inserted locally before the backend confirmed it.
    pub fn pending(work_order_id: &WorkOrderId, part_number: &str, seq: u64) -> Self {
        Self(format!("{}-{}-pending-{}", work_order_id, part_number, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// LENIENT FIELD DECODING
// =============================================================================
// The backend is inconsistent about numbers vs strings for unit/station/part
// numbers. These helpers accept both and always produce a String.

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Int(i) => i.to_string(),
            StringOrNumber::Float(f) => f.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(StringOrNumber::deserialize(deserializer)?.into())
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

/// Timestamps arrive as RFC 3339, RFC 2822 (HTTP date), naive UTC
/// (`2024-03-01 08:00:00`) or epoch seconds. An unreadable value decodes to
/// `None` so it cannot fail the record around it.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<StringOrNumber>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let parsed = match &raw {
        StringOrNumber::Str(s) => parse_timestamp(s.trim()),
        StringOrNumber::Int(secs) => DateTime::from_timestamp(*secs, 0),
        StringOrNumber::Float(secs) => DateTime::from_timestamp(secs.trunc() as i64, 0),
    };
    if parsed.is_none() {
        warn!(value = %String::from(raw), "Unreadable timestamp, treating as absent");
    }
    Ok(parsed)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}

// =============================================================================
// BACKEND SHAPES
// =============================================================================
// Every field the engine can live without has a serde default, so one odd
// record does not fail a whole list fetch.

/// `GET /workorders/` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkOrderListResponse {
    #[serde(default)]
    pub work_orders: Vec<BackendWorkOrder>,
}

/// One entry of the work order list as the backend sends it.
///
/// Counters are signed on the wire; the normalizer clamps them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendWorkOrder {
    pub work_order_id: WorkOrderId,
    #[serde(default, deserialize_with = "string_or_number")]
    pub product_number: String,
    #[serde(default)]
    pub quantity_to_produce: i64,
    #[serde(default)]
    pub total_parts_needed: i64,
    #[serde(default)]
    pub parts_supplied: i64,
    #[serde(default)]
    pub parts_missing: i64,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub part_requests: Vec<BackendPartRequest>,
    #[serde(default)]
    pub comments: Vec<BackendComment>,
}

/// A part request embedded in a work order list entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendPartRequest {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub part_number: String,
    #[serde(default)]
    pub quantity_requested: i64,
    #[serde(default, deserialize_with = "string_or_number")]
    pub unit_number: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub station_number: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default, alias = "timestamp", deserialize_with = "lenient_timestamp")]
    pub requested_at: Option<DateTime<Utc>>,
}

/// `GET /workorders/{id}` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendDetail {
    #[serde(default)]
    pub units: Vec<BackendUnit>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub comments: Vec<BackendComment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendUnit {
    #[serde(deserialize_with = "string_or_number")]
    pub unit_number: String,
    #[serde(default)]
    pub stations: Vec<BackendStation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendStation {
    #[serde(deserialize_with = "string_or_number")]
    pub station_number: String,
    #[serde(default)]
    pub station_status: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub part_number: String,
    #[serde(default)]
    pub part_description: Option<String>,
    #[serde(default)]
    pub quantity_required: i64,
    #[serde(default)]
    pub quantity_supplied: i64,
    #[serde(default)]
    pub station_comments: Option<String>,
    #[serde(default, alias = "updated_at", deserialize_with = "lenient_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// `GET /comments` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentListResponse {
    #[serde(default)]
    pub comments: Vec<BackendComment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendComment {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub work_order_id: Option<WorkOrderId>,
    #[serde(default, alias = "username")]
    pub user: String,
    #[serde(default, alias = "comment")]
    pub text: String,
    #[serde(default, alias = "created_at", deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `POST /workorders/create_workorder` response
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkOrderResponse {
    pub work_order_id: WorkOrderId,
}

/// Generic `{message}` / `{error}` body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// CANONICAL MODEL
// =============================================================================

// -----------------------------------------------------------------------------
// WORK ORDER
// -----------------------------------------------------------------------------
/// Derived lifecycle state of a work order.
///
/// `Pending -> InProgress -> Completed`; only the backend moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkOrderStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkOrder {
    pub work_order_id: WorkOrderId,
    pub product_number: String,
    pub quantity_to_produce: u32,
    pub total_parts_needed: u32,
    pub parts_supplied: u32,
    pub parts_missing: u32,
    pub is_completed: bool,

    /// Derived from `is_completed` and `parts_supplied`
    pub status: WorkOrderStatus,

    /// 0..=100
    pub progress: u8,
}

// -----------------------------------------------------------------------------
// UNIT / STATION DETAIL
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitDetail {
    pub unit_number: String,
    /// Ordered as the backend sent them, station numbers unique
    pub stations: Vec<StationDetail>,
}

impl UnitDetail {
    pub fn station(&self, station_number: &str) -> Option<&StationDetail> {
        self.stations
            .iter()
            .find(|s| s.station_number == station_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationDetail {
    pub station_number: String,
    pub station_status: String,
    pub part_number: String,
    pub part_description: String,
    pub quantity_required: u32,
    pub quantity_supplied: u32,
    pub station_comments: String,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Detail document for one work order, as cached by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkOrderDetail {
    pub work_order_id: WorkOrderId,
    pub units: Vec<UnitDetail>,
    pub is_completed: bool,

    /// Station-derived plus directly attached comments
    pub comments: Vec<Comment>,

    pub fetched_at: DateTime<Utc>,

    /// Set when a mutation targeted this work order; cleared by the refetch
    pub stale: bool,
}

impl WorkOrderDetail {
    pub fn unit(&self, unit_number: &str) -> Option<&UnitDetail> {
        self.units.iter().find(|u| u.unit_number == unit_number)
    }
}

// -----------------------------------------------------------------------------
// PART REQUEST
// -----------------------------------------------------------------------------
/// Part request lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartRequestStatus {
    Requested,
    Dispatched,
    Acknowledged,
}

impl PartRequestStatus {
    /// Case-insensitive match of the status strings the backend uses.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "requested" | "pending" | "open" => Some(Self::Requested),
            "dispatched" | "supplied" | "in_transit" => Some(Self::Dispatched),
            "acknowledged" | "received" | "closed" => Some(Self::Acknowledged),
            _ => None,
        }
    }
}

/// Where a part request entry in the store came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    /// Listed by the backend
    Server,
    /// Inserted locally, create call still in flight
    Optimistic,
    /// Create call succeeded, backend has not listed it yet
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartRequest {
    pub id: PartRequestId,

    /// False when `id` was synthesized; such ids shift with listing order
    pub id_from_backend: bool,

    pub work_order_id: WorkOrderId,
    pub part_number: String,
    pub quantity_requested: u32,
    pub unit_number: String,
    pub station_number: String,
    pub description: Option<String>,
    pub status: PartRequestStatus,
    pub requested_by: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
    pub origin: RequestOrigin,
}

// -----------------------------------------------------------------------------
// COMMENT
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentSource {
    /// Posted on the work order itself
    Direct,
    /// Synthesized from a station's `station_comments` (read-only)
    Station,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: String,
    pub work_order_id: WorkOrderId,
    pub user: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: CommentSource,
}

// =============================================================================
// BACKEND REQUEST BODIES
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CreateWorkOrderBody {
    pub product_number: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteWorkOrderBody {
    pub work_order_id: WorkOrderId,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartRequestBody {
    pub work_order_id: WorkOrderId,
    pub part_number: String,
    pub quantity_requested: u32,
    pub station_number: String,
    pub unit_number: String,
    pub requested_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchBody {
    pub part_number: String,
    pub quantity_supplied: u32,
    pub station_number: String,
    pub work_order_id: WorkOrderId,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcknowledgeBody {
    pub work_order_id: WorkOrderId,
    pub part_number: String,
    pub station_number: String,
    pub unit_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCommentBody {
    pub work_order_id: WorkOrderId,
    pub user: String,
    pub text: String,
}

// =============================================================================
// DASHBOARD API INPUTS / OUTPUTS
// =============================================================================

/// Operator input for a new part request, validated before any network call.
///
/// Quantities are signed so non-positive input reaches validation instead of
/// failing JSON decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRequestInput {
    pub work_order_id: WorkOrderId,
    #[serde(deserialize_with = "string_or_number")]
    pub part_number: String,
    pub quantity_requested: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub unit_number: String,
    #[serde(deserialize_with = "string_or_number")]
    pub station_number: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkOrderInput {
    #[serde(deserialize_with = "string_or_number")]
    pub product_number: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchInput {
    pub quantity_supplied: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCommentInput {
    pub work_order_id: WorkOrderId,
    pub user: String,
    pub text: String,
}

/// `GET /api/v1/workorders` response
#[derive(Debug, Clone, Serialize)]
pub struct WorkOrderListView {
    pub work_orders: Vec<WorkOrder>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// `GET /api/v1/workorders/:id` response
#[derive(Debug, Clone, Serialize)]
pub struct WorkOrderView {
    /// Absent if the last list refresh did not include it
    pub work_order: Option<WorkOrder>,
    pub detail: Option<WorkOrderDetail>,
    pub part_requests: Vec<PartRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedWorkOrder {
    pub work_order_id: WorkOrderId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedPartRequest {
    /// Pending id; the entry is replaced once the backend lists the request
    pub request_id: PartRequestId,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub work_order_id: WorkOrderId,
    pub completed: bool,
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

/// Simple health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Readiness: the engine has synced with the backend at least once
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub work_orders: usize,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type/code
    pub error: String,

    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
