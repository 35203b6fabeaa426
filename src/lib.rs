// =============================================================================
// WORKORDER SYNC - Library Root
// =============================================================================
// Client-side synchronization engine for manufacturing work orders.
//
// WHAT THE ENGINE DOES:
// - Keeps a canonical copy of work orders, station detail, part requests
//   and comments in step with a REST backend
// - Submits part requests optimistically and reconciles them after refresh
// - Polls the backend in the background with an overlap guard
// - Derives reports (missing parts, comment feed) from store snapshots
//
// The `workorder-sync` binary wraps a Session in a small HTTP dashboard API.
// =============================================================================

pub mod backend;
pub mod error;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod parts;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;
pub mod views;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::Backend;
pub use error::{SyncError, SyncResult};
pub use parts::PartsWorkflow;
pub use retry::RetryPolicy;
pub use scheduler::{PollTarget, PollingScheduler};
pub use session::{EngineConfig, Session};
pub use store::{Snapshot, WorkOrderStore};
pub use transport::{HttpTransport, Transport};
