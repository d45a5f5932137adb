//! Aggregate upload progress
//!
//! Workers report cumulative source bytes per file; the tracker keeps the
//! per-file maximum (so retries never move progress backwards) and
//! derives one fraction over the whole batch.

use std::sync::{Arc, Mutex, MutexGuard};

type Listener = Box<dyn FnMut(f64) + Send>;

struct ProgressState {
    sizes: Vec<u64>,
    transferred: Vec<u64>,
    listener: Option<Listener>,
}

impl ProgressState {
    fn total(&self) -> u64 {
        self.sizes.iter().sum()
    }

    fn done(&self) -> u64 {
        self.transferred.iter().sum()
    }

    fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        self.done() as f64 / total as f64
    }
}

/// Shared, monotonic progress over a batch of files
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<Mutex<ProgressState>>,
}

impl ProgressTracker {
    /// Track files with the given sizes
    pub fn new(sizes: Vec<u64>) -> Self {
        let transferred = vec![0; sizes.len()];
        Self {
            state: Arc::new(Mutex::new(ProgressState {
                sizes,
                transferred,
                listener: None,
            })),
        }
    }

    /// Call `listener` with the aggregate fraction after every change
    pub fn with_listener<F>(self, listener: F) -> Self
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.lock().listener = Some(Box::new(listener));
        self
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record that file `index` has consumed `bytes` source bytes in total
    ///
    /// Values below the previous report or above the file size are clamped.
    pub fn update(&self, index: usize, bytes: u64) {
        let mut state = self.lock();
        let Some(size) = state.sizes.get(index).copied() else {
            return;
        };
        let clamped = bytes.min(size);
        if clamped <= state.transferred[index] {
            return;
        }
        state.transferred[index] = clamped;
        let fraction = state.fraction();
        if let Some(listener) = state.listener.as_mut() {
            listener(fraction);
        }
    }

    /// Mark file `index` as fully transferred
    pub fn complete(&self, index: usize) {
        let size = self.lock().sizes.get(index).copied();
        if let Some(size) = size {
            self.update(index, size);
        }
    }

    /// Bytes transferred across all files
    pub fn transferred(&self) -> u64 {
        self.lock().done()
    }

    /// Total bytes of all files
    pub fn total(&self) -> u64 {
        self.lock().total()
    }

    /// Aggregate fraction in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        self.lock().fraction()
    }

    /// Callback reporting into slot `index`, suitable for a transcoder
    pub fn reporter(&self, index: usize) -> impl FnMut(&str, u64) + Send + 'static {
        let tracker = self.clone();
        move |_name: &str, bytes: u64| tracker.update(index, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_per_file() {
        let tracker = ProgressTracker::new(vec![100, 300]);
        tracker.update(0, 50);
        tracker.update(0, 20);
        assert_eq!(tracker.transferred(), 50);

        tracker.update(1, 1000);
        assert_eq!(tracker.transferred(), 350);
        assert!((tracker.fraction() - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_listener_sees_increasing_fractions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker =
            ProgressTracker::new(vec![10, 10]).with_listener(move |f| sink.lock().unwrap().push(f));

        let mut a = tracker.reporter(0);
        let mut b = tracker.reporter(1);
        a("a.fa", 5);
        b("b.fa", 10);
        a("a.fa", 3);
        tracker.complete(0);

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![0.25, 0.75, 1.0]);
    }

    #[test]
    fn test_empty_batch_is_complete() {
        assert_eq!(ProgressTracker::new(Vec::new()).fraction(), 1.0);
    }
}
