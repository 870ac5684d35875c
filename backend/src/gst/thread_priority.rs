//! Scheduling priority for frame pull worker threads.
//!
//! The pull loop blocks on the decode pipeline and calls handlers inline, so
//! hosts with tight latency budgets can ask for an elevated or realtime
//! priority on the worker. Failures are recorded, never fatal.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vidlink_types::{ThreadPriority, ThreadPriorityStatus};

/// Shared record of how priority requests went across worker threads.
#[derive(Debug, Clone)]
pub struct ThreadPriorityState {
    requested: ThreadPriority,
    achieved: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
    threads_configured: Arc<AtomicU32>,
}

impl ThreadPriorityState {
    pub fn new(requested: ThreadPriority) -> Self {
        Self {
            requested,
            achieved: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(None)),
            threads_configured: Arc::new(AtomicU32::new(0)),
        }
    }

    fn record_success(&self) {
        self.achieved.store(true, Ordering::SeqCst);
        self.threads_configured.fetch_add(1, Ordering::SeqCst);
    }

    /// Keeps only the first error.
    fn record_failure(&self, error_msg: String) {
        let mut error = self.error.lock();
        if error.is_none() {
            *error = Some(error_msg);
        }
    }

    pub fn get_status(&self) -> ThreadPriorityStatus {
        ThreadPriorityStatus {
            requested: self.requested,
            achieved: self.achieved.load(Ordering::SeqCst),
            error: self.error.lock().clone(),
            threads_configured: self.threads_configured.load(Ordering::SeqCst),
        }
    }
}

/// Apply the requested priority to the calling thread and record the outcome.
pub fn apply_to_current_thread(state: &ThreadPriorityState, thread_label: &str) {
    match set_current_thread_priority(state.requested) {
        Ok(()) => {
            if state.requested != ThreadPriority::Normal {
                info!(
                    "Set {:?} priority for worker thread '{}'",
                    state.requested, thread_label
                );
            }
            state.record_success();
        }
        Err(e) => {
            warn!(
                "Failed to set {:?} priority for worker thread '{}': {}",
                state.requested, thread_label, e
            );
            state.record_failure(e);
        }
    }
}

/// Set the priority of the calling thread.
pub fn set_current_thread_priority(priority: ThreadPriority) -> Result<(), String> {
    match priority {
        ThreadPriority::Normal => Ok(()),
        ThreadPriority::High => set_high_priority(),
        ThreadPriority::Realtime => set_realtime_priority(),
    }
}

fn set_high_priority() -> Result<(), String> {
    use thread_priority::{set_current_thread_priority, ThreadPriority as TpThreadPriority};

    let value = 80u8
        .try_into()
        .map_err(|e| format!("Invalid priority value: {}", e))?;

    match set_current_thread_priority(TpThreadPriority::Crossplatform(value)) {
        Ok(()) => {
            debug!("Thread priority set to High (crossplatform 80)");
            Ok(())
        }
        #[cfg(target_os = "linux")]
        Err(e) => {
            warn!("Crossplatform priority refused ({}), falling back to nice", e);
            set_nice_value(-10)
        }
        #[cfg(not(target_os = "linux"))]
        Err(e) => Err(format!("Failed to set high priority: {}", e)),
    }
}

#[cfg(target_os = "linux")]
fn set_realtime_priority() -> Result<(), String> {
    use thread_priority::{
        set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
        ThreadPriority as TpThreadPriority, ThreadSchedulePolicy,
    };

    let value = 50u8
        .try_into()
        .map_err(|e| format!("Invalid priority value: {}", e))?;

    set_thread_priority_and_policy(
        thread_native_id(),
        TpThreadPriority::Crossplatform(value),
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    )
    .map_err(|e| {
        format!(
            "Failed to set SCHED_FIFO priority: {}. Requires root or CAP_SYS_NICE \
             (sudo setcap cap_sys_nice+ep <binary>)",
            e
        )
    })
}

#[cfg(not(target_os = "linux"))]
fn set_realtime_priority() -> Result<(), String> {
    use thread_priority::{set_current_thread_priority, ThreadPriority as TpThreadPriority};

    set_current_thread_priority(TpThreadPriority::Max)
        .map_err(|e| format!("Failed to set realtime priority: {}", e))
}

#[cfg(target_os = "linux")]
fn set_nice_value(nice: i32) -> Result<(), String> {
    // PRIO_PROCESS with who=0 targets the calling thread on Linux.
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if result == 0 {
        debug!("Set nice value to {}", nice);
        Ok(())
    } else {
        Err(format!(
            "Failed to set nice value to {}: {}",
            nice,
            std::io::Error::last_os_error()
        ))
    }
}
