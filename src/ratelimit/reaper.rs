//! Periodic reclaiming of idle client state.
//!
//! Every period the reaper drops timestamps older than two windows and
//! forgets keys left with none. Memory therefore tracks the set of clients
//! seen in the last two windows.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::limiter::Shared;
use crate::error::{Result, TollgateError};

/// Handle to a running reclaim task.
pub(crate) struct Reaper {
    handle: JoinHandle<()>,
    /// Cleared on shutdown; held for the duration of every sweep.
    live: Arc<Mutex<bool>>,
}

impl Reaper {
    /// Spawn the reclaim loop on the current runtime.
    ///
    /// The first sweep runs one full period after spawning.
    pub(crate) fn spawn(shared: Arc<Shared>, period: Duration) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| TollgateError::NoRuntime)?;
        let live = Arc::new(Mutex::new(true));
        let task_live = live.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !sweep_if_live(&task_live, &shared) {
                    break;
                }
            }
        });

        Ok(Self { handle, live })
    }

    /// Stop the loop.
    ///
    /// Waits for an in-flight sweep to finish; no sweep starts afterwards.
    pub(crate) fn shutdown(self) {
        *self.live.lock() = false;
        self.handle.abort();
    }
}

fn sweep_if_live(live: &Mutex<bool>, shared: &Shared) -> bool {
    let live = live.lock();
    if !*live {
        return false;
    }
    sweep(shared);
    true
}

/// Drop timestamps older than two windows and remove emptied keys.
///
/// Returns the number of keys removed.
pub(crate) fn sweep(shared: &Shared) -> usize {
    let cutoff = shared.clock.now_ms() - 2 * shared.config.window_ms as i64;
    let before = shared.store.len();

    shared.store.retain(|_, log| log.slide(cutoff) > 0);

    let remaining = shared.store.len();
    let removed = before.saturating_sub(remaining);
    if removed > 0 {
        info!(removed, remaining, "Reclaimed idle rate limit keys");
    } else {
        debug!(remaining, "Reclaim sweep found nothing to remove");
    }
    removed
}
