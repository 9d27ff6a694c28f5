//! Off-loop joining of worker threads.
//!
//! The event loop never waits on a worker for longer than a short grace
//! period. A helper thread does the join and the cleanup that follows it, so a
//! worker stuck in a device read or an arm call only delays its own cleanup.

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::bounded;
use tracing::warn;

use crate::telemetry;

/// Longest the event loop waits for a stopped worker to finish.
pub const STOP_GRACE: Duration = Duration::from_millis(250);

/// Join `handle` on a helper thread and run `finish` with the result.
///
/// Returns `true` if `finish` completed within `grace`.
pub fn reap<T, F>(name: &str, handle: JoinHandle<T>, grace: Duration, finish: F) -> bool
where
    T: Send + 'static,
    F: FnOnce(thread::Result<T>) + Send + 'static,
{
    let (done_tx, done_rx) = bounded::<()>(1);
    let spawned = telemetry::spawn_thread(format!("{name}-reaper"), move || {
        finish(handle.join());
        let _ = done_tx.send(());
    });
    if let Err(err) = spawned {
        warn!("failed to spawn reaper for {name}: {err}; worker left detached");
        return false;
    }
    done_rx.recv_timeout(grace).is_ok()
}
