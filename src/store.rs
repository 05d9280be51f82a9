//! Fixed-window counter store with bounded memory.
//!
//! Buckets live in a [`LinkedHashMap`] so insertion order doubles as an
//! approximate recency order: every consumption within an open window
//! re-inserts the bucket at the back, expiry sweeps scan from the front, and
//! hard-cap eviction pops from the front. Both bounding mechanisms are
//! opportunistic and do a fixed maximum amount of work per call, so the hot
//! path never degrades with store size.
//!
//! This is a fixed-window counter, not a sliding window: a client can burst
//! up to twice the limit across a window boundary. That tradeoff buys O(1)
//! memory and CPU per check and is accepted.

use hashlink::LinkedHashMap;
use tracing::debug;

/// Hard cap on tracked buckets. Exceeding it evicts oldest-inserted entries
/// regardless of expiry.
pub const MAX_BUCKETS: usize = 10_000;

/// Store size at which consumption calls start sweeping expired entries.
pub const SWEEP_HIGH_WATER: usize = 5_000;

/// Maximum entries examined by a single expiry sweep.
pub const SWEEP_SCAN_LIMIT: usize = 1_000;

/// One fixed-window counter.
#[derive(Debug, Clone)]
struct Bucket {
    count: u32,
    reset_at_ms: u64,
}

/// The outcome of consuming one unit from a single bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed {
    /// Whether the request fit within the window's budget.
    pub ok: bool,
    /// The limit the bucket was checked against.
    pub limit: u32,
    /// Requests left in the current window, floored at zero.
    pub remaining: u32,
    /// Absolute time (epoch milliseconds) at which the window resets.
    pub reset_at_ms: u64,
    /// Seconds until the window resets, always at least 1.
    pub retry_after_secs: u64,
}

/// Process-wide mapping from bucket key to window state.
///
/// Keys are opaque composite strings (`{scope}:{path}:{identity}`); a key
/// collision would merge two callers' budgets, so uniqueness is required.
/// The store holds no locks itself; callers serialize access.
#[derive(Debug)]
pub struct BucketStore {
    buckets: LinkedHashMap<String, Bucket>,
    max_buckets: usize,
    sweep_high_water: usize,
    sweep_scan_limit: usize,
}

impl Default for BucketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketStore {
    /// Creates a store with the default bounding thresholds.
    pub fn new() -> Self {
        Self::with_limits(MAX_BUCKETS, SWEEP_HIGH_WATER, SWEEP_SCAN_LIMIT)
    }

    /// Creates a store with explicit bounding thresholds.
    ///
    /// The defaults suit production traffic; smaller values are useful for
    /// exercising eviction behavior in tests.
    pub fn with_limits(max_buckets: usize, sweep_high_water: usize, sweep_scan_limit: usize) -> Self {
        Self {
            buckets: LinkedHashMap::new(),
            max_buckets,
            sweep_high_water,
            sweep_scan_limit,
        }
    }

    /// Returns the number of buckets currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no buckets are tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Consumes one unit from the bucket at `key` against `limit`.
    ///
    /// A missing or expired bucket starts a fresh window with `count = 1`.
    /// Within an open window, the bucket is re-inserted at the most-recent
    /// end, then either rejected (count already at the limit; the count is
    /// not pushed past it) or incremented.
    pub fn consume(&mut self, key: String, limit: u32, window_ms: u64, now_ms: u64) -> Consumed {
        if self.buckets.len() >= self.sweep_high_water {
            self.sweep_expired(now_ms);
        }

        match self.buckets.remove(&key) {
            Some(bucket) if bucket.reset_at_ms > now_ms => {
                let reset_at_ms = bucket.reset_at_ms;
                let retry_after_secs = (reset_at_ms - now_ms).div_ceil(1000).max(1);

                if bucket.count >= limit {
                    // Re-insert unchanged: rejected requests are not counted
                    // against future windows.
                    self.buckets.insert(key, bucket);
                    Consumed {
                        ok: false,
                        limit,
                        remaining: 0,
                        reset_at_ms,
                        retry_after_secs,
                    }
                } else {
                    let count = bucket.count + 1;
                    self.buckets.insert(key, Bucket { count, reset_at_ms });
                    Consumed {
                        ok: true,
                        limit,
                        remaining: limit.saturating_sub(count),
                        reset_at_ms,
                        retry_after_secs,
                    }
                }
            }
            _ => {
                // Absent or expired: start a fresh window.
                let reset_at_ms = now_ms + window_ms;
                self.buckets.insert(key, Bucket { count: 1, reset_at_ms });
                self.enforce_cap();
                Consumed {
                    ok: true,
                    limit,
                    remaining: limit.saturating_sub(1),
                    reset_at_ms,
                    retry_after_secs: window_ms.div_ceil(1000).max(1),
                }
            }
        }
    }

    /// Scans up to the configured number of oldest-inserted entries and
    /// removes those whose window has expired. Returns the number removed.
    ///
    /// A single sweep may not drain every expired entry; subsequent calls
    /// continue from whatever remains at the front.
    pub fn sweep_expired(&mut self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .buckets
            .iter()
            .take(self.sweep_scan_limit)
            .filter(|(_, bucket)| bucket.reset_at_ms <= now_ms)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.buckets.remove(key);
        }
        expired.len()
    }

    /// Evicts oldest-inserted entries when the store exceeds its hard cap.
    ///
    /// Removes at least 10% of the cap (or the overflow amount, whichever is
    /// larger) so eviction does not run on every subsequent insert. Evicted
    /// entries may still be within an active window; a premature fresh window
    /// for a rare key is preferred over unbounded memory growth.
    fn enforce_cap(&mut self) {
        if self.buckets.len() <= self.max_buckets {
            return;
        }

        let overflow = self.buckets.len() - self.max_buckets;
        let to_drop = overflow.max(self.max_buckets / 10);
        let mut dropped = 0;
        for _ in 0..to_drop {
            if self.buckets.pop_front().is_none() {
                break;
            }
            dropped += 1;
        }

        debug!(
            dropped,
            tracked = self.buckets.len(),
            "bucket store exceeded hard cap, evicted oldest entries"
        );
    }
}
