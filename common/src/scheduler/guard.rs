// In-process tick flag
// At most one tick body runs at a time. A flag left set longer than the stuck
// timeout is force-cleared so a hung tick cannot block scheduling forever.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("A scheduler tick has been running since {since}")]
pub struct TickBusy {
    pub since: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct FlagState {
    held: bool,
    since: Option<DateTime<Utc>>,
    /// Bumped on every acquisition; a permit only clears its own generation
    generation: u64,
}

/// Snapshot of the flag for the ops status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagStatus {
    pub held: bool,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TickGuard {
    state: Arc<Mutex<FlagState>>,
    stuck_timeout: Duration,
}

impl TickGuard {
    pub fn new(stuck_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(FlagState::default())),
            stuck_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlagState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the flag for a tick starting at `now`
    pub fn try_enter(&self, now: DateTime<Utc>) -> Result<TickPermit, TickBusy> {
        let mut state = self.lock();

        if state.held {
            let since = state.since.unwrap_or(now);
            if now - since < self.stuck_timeout {
                return Err(TickBusy { since });
            }
            warn!(
                since = %since,
                stuck_timeout_seconds = self.stuck_timeout.num_seconds(),
                "Force-clearing tick flag held past the stuck timeout"
            );
        }

        state.held = true;
        state.since = Some(now);
        state.generation = state.generation.wrapping_add(1);
        debug!(generation = state.generation, "Tick flag acquired");

        Ok(TickPermit {
            guard: self.clone(),
            generation: state.generation,
        })
    }

    pub fn status(&self) -> FlagStatus {
        let state = self.lock();
        FlagStatus {
            held: state.held,
            since: state.since,
        }
    }

    fn release(&self, generation: u64) {
        let mut state = self.lock();
        if state.held && state.generation == generation {
            state.held = false;
            state.since = None;
            debug!(generation, "Tick flag released");
        } else {
            debug!(generation, current = state.generation, "Tick flag was taken over, leaving it");
        }
    }
}

/// Proof of holding the tick flag; releases it on drop
#[derive(Debug)]
pub struct TickPermit {
    guard: TickGuard,
    generation: u64,
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.guard.release(self.generation);
    }
}
