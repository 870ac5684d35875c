//! Worker thread priority settings.

use serde::{Deserialize, Serialize};

/// Scheduling priority requested for a frame pull worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPriority {
    /// Leave the OS default untouched
    #[default]
    Normal,
    /// Elevated priority, not realtime
    High,
    /// Realtime scheduling (SCHED_FIFO on Linux), usually needs CAP_SYS_NICE
    Realtime,
}

/// Outcome of applying a [`ThreadPriority`] to worker threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPriorityStatus {
    /// Priority that was asked for
    pub requested: ThreadPriority,
    /// Whether at least one thread got the requested priority
    pub achieved: bool,
    /// First error encountered, if any
    pub error: Option<String>,
    /// Number of threads configured
    pub threads_configured: u32,
}
