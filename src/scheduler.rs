// =============================================================================
// SCHEDULER MODULE
// =============================================================================
// Background polling, one repeating task per refresh target.
//
// BEHAVIOR:
// - The first run happens immediately, then once per interval
// - A tick that fires while the previous run is still in flight is skipped
// - A failed run is logged and counted; the next tick tries again
// - shutdown() stops the timers; runs already in flight finish on their own
//   and whatever they resolve to is not reported
// =============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::metrics;

type RunFn = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;

/// A refresh operation polled at a fixed interval.
#[derive(Clone)]
pub struct PollTarget {
    name: &'static str,
    interval: Duration,
    run: RunFn,
}

impl PollTarget {
    pub fn new<F, Fut>(name: &'static str, interval: Duration, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        Self {
            name,
            // tokio::time::interval panics on a zero period
            interval: interval.max(Duration::from_millis(1)),
            run: Arc::new(move || run().boxed()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Running poll loops. Dropping the scheduler also ends the loops.
pub struct PollingScheduler {
    stop: watch::Sender<bool>,
    stopped: Arc<AtomicBool>,
    loops: Vec<JoinHandle<()>>,
}

impl PollingScheduler {
    /// Spawn one loop per target on the current runtime.
    pub fn start(targets: Vec<PollTarget>) -> Self {
        let (stop, _) = watch::channel(false);
        let stopped = Arc::new(AtomicBool::new(false));

        let loops = targets
            .into_iter()
            .map(|target| {
                info!(
                    poll = target.name,
                    interval_secs = target.interval.as_secs_f64(),
                    "Starting poll loop"
                );
                tokio::spawn(poll_loop(target, stop.subscribe(), stopped.clone()))
            })
            .collect();

        Self { stop, stopped, loops }
    }

    /// Stop every loop and wait for the loops (not their in-flight runs).
    pub async fn shutdown(self) {
        self.stopped.store(true, Ordering::Release);
        let _ = self.stop.send(true);

        for handle in self.loops {
            if let Err(err) = handle.await {
                warn!(error = %err, "Poll loop ended abnormally");
            }
        }
        info!("Polling stopped");
    }
}

async fn poll_loop(target: PollTarget, mut stop: watch::Receiver<bool>, stopped: Arc<AtomicBool>) {
    let mut ticker = interval(target.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let in_flight = Arc::new(AtomicBool::new(false));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if stopped.load(Ordering::Acquire) {
            break;
        }

        if in_flight.swap(true, Ordering::AcqRel) {
            debug!(poll = target.name, "Previous run still in flight, skipping tick");
            metrics::record_poll(target.name, "skipped");
            continue;
        }

        let run = (target.run)();
        let name = target.name;
        let in_flight = in_flight.clone();
        let stopped = stopped.clone();
        tokio::spawn(async move {
            let result = run.await;
            in_flight.store(false, Ordering::Release);

            if stopped.load(Ordering::Acquire) {
                debug!(poll = name, "Poll finished after shutdown, ignoring");
                return;
            }
            match result {
                Ok(()) => metrics::record_poll(name, "ok"),
                Err(err) => {
                    warn!(poll = name, error = %err, "Background poll failed");
                    metrics::record_poll(name, "error");
                }
            }
        });
    }

    debug!(poll = target.name, "Poll loop exited");
}
