//! Pipeline counters and stage states
//!
//! Everything here is written by the stage threads and read by the control
//! thread without locking.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Log every `LOG_EVERY`-th occurrence of a repeating warning
const LOG_EVERY: u64 = 100;

/// True for the first occurrence and every hundredth after it
pub fn should_log(count: u64) -> bool {
    count == 1 || count % LOG_EVERY == 0
}

/// Increment `counter`, returning the new value
pub(crate) fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// Block counters for the three stages
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub captured: AtomicU64,
    pub capture_dropped: AtomicU64,
    pub processed: AtomicU64,
    pub process_dropped: AtomicU64,
    pub played: AtomicU64,
    pub playback_underruns: AtomicU64,
    pub capture_recoveries: AtomicU64,
    pub playback_recoveries: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            captured: load(&self.captured),
            capture_dropped: load(&self.capture_dropped),
            processed: load(&self.processed),
            process_dropped: load(&self.process_dropped),
            played: load(&self.played),
            playback_underruns: load(&self.playback_underruns),
            capture_recoveries: load(&self.capture_recoveries),
            playback_recoveries: load(&self.playback_recoveries),
        }
    }
}

/// Point-in-time copy of `PipelineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub capture_dropped: u64,
    pub processed: u64,
    pub process_dropped: u64,
    pub played: u64,
    pub playback_underruns: u64,
    pub capture_recoveries: u64,
    pub playback_recoveries: u64,
}

/// Lifecycle of one stage thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Stopped,
    Running,
    Stopping,
}

impl StageState {
    fn from_index(index: u8) -> Self {
        match index {
            1 => StageState::Running,
            2 => StageState::Stopping,
            _ => StageState::Stopped,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageState::Stopped => f.write_str("stopped"),
            StageState::Running => f.write_str("running"),
            StageState::Stopping => f.write_str("stopping"),
        }
    }
}

/// Atomic cell publishing a `StageState`
#[derive(Debug)]
pub struct SharedStageState(AtomicU8);

impl SharedStageState {
    pub fn new() -> Self {
        Self(AtomicU8::new(StageState::Stopped as u8))
    }

    pub fn load(&self) -> StageState {
        StageState::from_index(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: StageState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for SharedStageState {
    fn default() -> Self {
        Self::new()
    }
}
