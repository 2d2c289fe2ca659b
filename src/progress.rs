use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Work units a sink reports by default.
pub const DEFAULT_TOTAL_WORK: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Progress and cancellation channel of a long-running operation.
///
/// Cancellation is cooperative: the worker polls `is_cancelled` between units
/// of work and returns early when it is set.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);

    fn total_work(&self) -> u64 {
        DEFAULT_TOTAL_WORK
    }

    fn worked(&self, _units: u64) {}

    fn is_cancelled(&self) -> bool {
        false
    }

    fn finished(&self) {}
}

/// A [`ProgressSink`] that can be shared with a foreground thread that polls
/// progress and requests cancellation.
#[derive(Debug)]
pub struct ProgressKeeper {
    total_work: u64,
    worked: AtomicU64,
    cancelled: AtomicBool,
    finished: AtomicBool,
    last_message: Mutex<Option<String>>,
}

impl ProgressKeeper {
    pub fn new(total_work: u64) -> Self {
        Self {
            total_work,
            worked: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            last_message: Mutex::new(None),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn progress(&self) -> u64 {
        self.worked.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}

impl Default for ProgressKeeper {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_WORK)
    }
}

impl ProgressSink for ProgressKeeper {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut guard) = self.last_message.lock() {
            *guard = Some(event.message);
        }
    }

    fn total_work(&self) -> u64 {
        self.total_work
    }

    fn worked(&self, units: u64) {
        self.worked.fetch_add(units, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}
