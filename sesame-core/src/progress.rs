//! Progress reporting and cooperative cancellation for long operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Full scale of a progress report.
pub const PROGRESS_SCALE: u16 = 1000;

/// Receives progress updates from a long-running operation.
///
/// Values are in `0..=PROGRESS_SCALE` and never decrease within one operation.
pub trait ProgressObserver {
    fn report(&mut self, permille: u16);
}

impl<F: FnMut(u16)> ProgressObserver for F {
    fn report(&mut self, permille: u16) {
        self(permille);
    }
}

/// Observer that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn report(&mut self, _permille: u16) {}
}

/// Shared flag polled by long operations between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progress after `done` of `total` units, on the permille scale.
#[must_use]
pub fn permille(done: usize, total: usize) -> u16 {
    if total == 0 || done >= total {
        return PROGRESS_SCALE;
    }
    let scaled = (done as u128 * u128::from(PROGRESS_SCALE)) / total as u128;
    u16::try_from(scaled).unwrap_or(PROGRESS_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_closure_observer() {
        let mut seen = Vec::new();
        {
            let mut observer = |p: u16| seen.push(p);
            observer.report(10);
            observer.report(1000);
        }
        assert_eq!(seen, vec![10, 1000]);
    }

    #[test]
    fn test_permille() {
        assert_eq!(permille(0, 10), 0);
        assert_eq!(permille(5, 10), 500);
        assert_eq!(permille(10, 10), 1000);
        assert_eq!(permille(0, 0), 1000);
    }
}
