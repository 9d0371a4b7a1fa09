use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Flashcard identifier source.
///
/// Ids are epoch milliseconds, bumped past the last issued id whenever the
/// clock has not moved, so every id handed out by one generator is strictly
/// greater than the previous one.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next identifier
    pub fn next_id(&self) -> i64 {
        self.next_after(Utc::now().timestamp_millis())
    }

    fn next_after(&self, now_millis: i64) -> i64 {
        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_millis.max(previous + 1);
            match self.last.compare_exchange_weak(
                previous,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => previous = actual,
            }
        }
    }
}
