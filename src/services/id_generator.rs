use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;

/// Largest integer a JSON consumer can represent exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Synthetic invoice ids: `(timestamp_ms * 1000 + jitter) mod MAX_SAFE_INTEGER`.
///
/// Ids are non-decreasing while the clock is, but two ids drawn in the same
/// millisecond can collide; callers relying on uniqueness must go through a
/// natural-key conflict target.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn next_id(&self) -> i64 {
        let jitter = rand::thread_rng().gen_range(0..1000);
        generate_with(Utc::now().timestamp_millis(), jitter)
    }

    /// `count` ids, distinct from each other.
    pub fn next_batch(&self, count: usize) -> Vec<i64> {
        let mut seen = HashSet::with_capacity(count);
        let mut ids = Vec::with_capacity(count);
        while ids.len() < count {
            let id = self.next_id();
            if seen.insert(id) {
                ids.push(id);
            }
        }
        ids
    }
}

pub fn generate_with(timestamp_ms: i64, jitter: u16) -> i64 {
    let raw = i128::from(timestamp_ms) * 1000 + i128::from(jitter);
    let id = raw.rem_euclid(i128::from(MAX_SAFE_INTEGER)) as i64;
    id.max(1)
}
