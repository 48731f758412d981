use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stops the paired task either explicitly or when dropped.
pub(super) struct Stopper {
    stop_signal: Arc<AtomicBool>,
}

pub(super) struct StopCheck {
    stop_signal: Arc<AtomicBool>,
}

impl Stopper {
    pub(super) fn stop(&self) {
        self.stop_signal.store(true, Ordering::Release);
    }

    pub(super) fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::Acquire)
    }
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl StopCheck {
    pub(super) fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::Acquire)
    }
}

pub(super) fn new() -> (Stopper, StopCheck) {
    let stop_signal = Arc::new(AtomicBool::new(false));

    let stopper = Stopper {
        stop_signal: stop_signal.clone(),
    };
    let stop_check = StopCheck { stop_signal };

    (stopper, stop_check)
}
