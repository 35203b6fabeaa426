//! Scripted in-memory transport and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::backend::Backend;
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Replies are queued per `METHOD path`; the last queued reply repeats.
#[derive(Default)]
pub(crate) struct FakeTransport {
    replies: Mutex<HashMap<String, VecDeque<SyncResult<Value>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Mutex<Option<Duration>>,
}

fn key(method: &Method, path: &str) -> String {
    format!("{} {}", method, path)
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, method: Method, path: &str, reply: SyncResult<Value>) {
        self.replies
            .lock()
            .expect("replies lock")
            .entry(key(&method, path))
            .or_default()
            .push_back(reply);
    }

    /// Drop queued replies for a route and queue `reply` instead.
    pub fn replace(&self, method: Method, path: &str, reply: SyncResult<Value>) {
        self.replies
            .lock()
            .expect("replies lock")
            .insert(key(&method, path), VecDeque::from([reply]));
    }

    /// Every call sleeps this long (tokio clock) before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| &c.method == method && c.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<Value> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
            body,
        });

        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut replies = self.replies.lock().expect("replies lock");
        match replies.get_mut(&key(&method, path)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("non-empty queue"),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(SyncError::Http {
                status: 404,
                message: format!("no scripted reply for {}", key(&method, path)),
            }),
        }
    }
}

/// Backend over the fake with a short flat backoff.
pub(crate) fn backend(fake: &Arc<FakeTransport>) -> Backend {
    let transport: Arc<dyn Transport> = fake.clone();
    Backend::new(transport, RetryPolicy::new(3, Duration::from_millis(10)))
}

// -----------------------------------------------------------------------------
// JSON FIXTURES
// -----------------------------------------------------------------------------

pub(crate) fn work_order_json(id: &str, total: i64, supplied: i64, completed: bool) -> Value {
    json!({
        "work_order_id": id,
        "product_number": "P-100",
        "quantity_to_produce": 2,
        "total_parts_needed": total,
        "parts_supplied": supplied,
        "parts_missing": total - supplied,
        "is_completed": completed,
    })
}

pub(crate) fn with_part_requests(mut order: Value, requests: Value) -> Value {
    order["part_requests"] = requests;
    order
}

pub(crate) fn list_json(orders: Vec<Value>) -> Value {
    json!({ "work_orders": orders })
}

/// One unit `1` with stations `1`, `2`, `3`.
pub(crate) fn detail_json() -> Value {
    json!({
        "is_completed": false,
        "units": [{
            "unit_number": 1,
            "stations": [
                { "station_number": "1", "station_status": "done", "part_number": "100", "quantity_required": 2, "quantity_supplied": 2 },
                { "station_number": "2", "station_status": "waiting", "part_number": "123", "quantity_required": 5, "quantity_supplied": 0, "station_comments": "need 5 more" },
                { "station_number": "3", "station_status": "waiting", "part_number": "300", "quantity_required": 1, "quantity_supplied": 0 }
            ]
        }]
    })
}
