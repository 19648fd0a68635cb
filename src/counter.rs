//! Rolling window counter (C1, §4.1).
//!
//! A fixed ring of time buckets. `Add` records into the current bucket,
//! rotating past buckets lazily when wall-clock has crossed their
//! boundary. `Reduce` walks the live buckets in time order under a short
//! shared lock so readers never observe a torn bucket.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct Bucket {
    pub count: i64,
    pub points: Vec<u8>,
}

impl Bucket {
    fn clear(&mut self) {
        self.count = 0;
        self.points.clear();
    }
}

struct Inner {
    buckets: Vec<Bucket>,
    /// Index of the bucket currently being written to.
    cursor: usize,
    /// Wall-clock instant the current cursor bucket started at.
    cursor_start: Instant,
}

pub struct RollingCounter {
    bucket_duration: Duration,
    inner: Mutex<Inner>,
}

impl RollingCounter {
    pub fn new(size: usize, window: Duration) -> Self {
        assert!(size > 0, "rolling counter size must be > 0");
        let bucket_duration = window / size as u32;
        RollingCounter {
            bucket_duration,
            inner: Mutex::new(Inner {
                buckets: vec![Bucket::default(); size],
                cursor: 0,
                cursor_start: Instant::now(),
            }),
        }
    }

    fn advance_locked(inner: &mut Inner, bucket_duration: Duration) {
        let elapsed = inner.cursor_start.elapsed();
        if elapsed < bucket_duration {
            return;
        }
        let size = inner.buckets.len();
        let crossed = (elapsed.as_nanos() / bucket_duration.as_nanos().max(1)) as usize;
        let crossed = crossed.min(size);
        for i in 1..=crossed {
            let idx = (inner.cursor + i) % size;
            inner.buckets[idx].clear();
        }
        inner.cursor = (inner.cursor + crossed) % size;
        inner.cursor_start += bucket_duration * crossed as u32;
    }

    /// Records a sample (1 = success marker, 0 = failure marker) into the
    /// current bucket, advancing the cursor first if boundaries were
    /// crossed since the last call.
    pub fn add(&self, v: u8) {
        let mut inner = self.inner.lock();
        Self::advance_locked(&mut inner, self.bucket_duration);
        let cursor = inner.cursor;
        let bucket = &mut inner.buckets[cursor];
        bucket.count += 1;
        bucket.points.push(v);
    }

    /// Runs `f` over each live bucket in time order (oldest first).
    pub fn reduce<F: FnMut(&Bucket)>(&self, mut f: F) {
        let mut inner = self.inner.lock();
        Self::advance_locked(&mut inner, self.bucket_duration);
        let size = inner.buckets.len();
        let start = (inner.cursor + 1) % size;
        for i in 0..size {
            let idx = (start + i) % size;
            f(&inner.buckets[idx]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_into_current_bucket() {
        let c = RollingCounter::new(10, Duration::from_secs(10));
        c.add(1);
        c.add(0);
        c.add(1);
        let mut total = 0i64;
        let mut success = 0i64;
        c.reduce(|b| {
            total += b.count;
            success += b.points.iter().filter(|&&p| p == 1).count() as i64;
        });
        assert_eq!(total, 3);
        assert_eq!(success, 2);
    }

    #[test]
    fn crossing_many_boundaries_clears_skipped_buckets() {
        let c = RollingCounter::new(4, Duration::from_millis(40));
        c.add(1);
        std::thread::sleep(Duration::from_millis(120));
        c.add(1);
        let mut total = 0i64;
        c.reduce(|b| total += b.count);
        // the first sample's bucket should have been cleared by the jump
        assert_eq!(total, 1);
    }
}
