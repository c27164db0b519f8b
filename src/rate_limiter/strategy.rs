//! Quota arithmetic for the four limiting strategies.
//!
//! Every function here is pure: it takes the stored entry (if any), the
//! current time in epoch milliseconds and the limiter shape, and returns the
//! entry to store together with the verdict.

use serde::{Deserialize, Serialize};

use super::store::RateLimitEntry;

/// Limiting algorithm used by a limiter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    #[default]
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

impl RateLimitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::SlidingWindow => "sliding_window",
            Self::TokenBucket => "token_bucket",
            Self::LeakyBucket => "leaky_bucket",
        }
    }
}

impl std::fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one quota check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch milliseconds at which the quota frees up
    pub reset_ms: i64,
    /// Usage observed by the check (count, weighted count, or bucket fill)
    pub usage: u32,
}

/// Apply `strategy` to the stored entry
pub fn apply(
    strategy: RateLimitStrategy,
    entry: Option<RateLimitEntry>,
    now_ms: i64,
    max_requests: u32,
    window_ms: i64,
) -> (RateLimitEntry, Verdict) {
    let window_ms = window_ms.max(1);
    match strategy {
        RateLimitStrategy::FixedWindow => fixed_window(entry, now_ms, max_requests, window_ms),
        RateLimitStrategy::SlidingWindow => sliding_window(entry, now_ms, max_requests, window_ms),
        RateLimitStrategy::TokenBucket => token_bucket(entry, now_ms, max_requests, window_ms),
        RateLimitStrategy::LeakyBucket => leaky_bucket(entry, now_ms, max_requests, window_ms),
    }
}

/// Start of the aligned window containing `now_ms`
pub fn window_start(now_ms: i64, window_ms: i64) -> i64 {
    now_ms.div_euclid(window_ms) * window_ms
}

/// Refill (or leak) rate in units per second
pub fn rate_per_sec(max_requests: u32, window_ms: i64) -> f64 {
    max_requests as f64 / (window_ms as f64 / 1000.0)
}

/// Previous window's count scaled by the share of it still inside the
/// sliding window, rounded up.
///
/// Never exceeds `count` and decays linearly to zero as `elapsed_ms` (time
/// into the current window) reaches `window_ms`.
pub fn weighted_count(count: u32, elapsed_ms: i64, window_ms: i64) -> u32 {
    if elapsed_ms >= window_ms {
        return 0;
    }
    let overlap = window_ms - elapsed_ms.max(0);
    let scaled = count as i64 * overlap;
    ((scaled + window_ms - 1) / window_ms) as u32
}

fn fixed_window(
    entry: Option<RateLimitEntry>,
    now_ms: i64,
    max_requests: u32,
    window_ms: i64,
) -> (RateLimitEntry, Verdict) {
    let start = window_start(now_ms, window_ms);
    let reset_ms = start + window_ms;

    match entry {
        Some(mut current) if current.window_start == start => {
            current.last_refill = now_ms;
            if current.count >= max_requests {
                let verdict = Verdict {
                    allowed: false,
                    remaining: 0,
                    reset_ms,
                    usage: current.count,
                };
                return (current, verdict);
            }
            current.count += 1;
            let verdict = Verdict {
                allowed: true,
                remaining: max_requests - current.count,
                reset_ms,
                usage: current.count,
            };
            (current, verdict)
        }
        _ => {
            let fresh = RateLimitEntry {
                count: 1,
                previous_count: 0,
                window_start: start,
                tokens: 0.0,
                last_refill: now_ms,
            };
            let verdict = Verdict {
                allowed: true,
                remaining: max_requests.saturating_sub(1),
                reset_ms,
                usage: 1,
            };
            (fresh, verdict)
        }
    }
}

fn sliding_window(
    entry: Option<RateLimitEntry>,
    now_ms: i64,
    max_requests: u32,
    window_ms: i64,
) -> (RateLimitEntry, Verdict) {
    let start = window_start(now_ms, window_ms);
    let mut current = match entry {
        Some(existing) if existing.window_start == start => existing,
        // Roll over: the finished window becomes the previous one
        Some(existing) if existing.window_start == start - window_ms => RateLimitEntry {
            count: 0,
            previous_count: existing.count,
            window_start: start,
            tokens: 0.0,
            last_refill: now_ms,
        },
        _ => RateLimitEntry {
            count: 0,
            previous_count: 0,
            window_start: start,
            tokens: 0.0,
            last_refill: now_ms,
        },
    };
    current.last_refill = now_ms;

    let elapsed_ms = now_ms - start;
    let usage = weighted_count(current.previous_count, elapsed_ms, window_ms)
        .saturating_add(current.count);

    if usage >= max_requests {
        let verdict = Verdict {
            allowed: false,
            remaining: 0,
            reset_ms: sliding_free_at(&current, max_requests, window_ms),
            usage,
        };
        return (current, verdict);
    }

    current.count += 1;
    let usage = usage + 1;
    let verdict = Verdict {
        allowed: true,
        remaining: max_requests.saturating_sub(usage),
        reset_ms: start + window_ms,
        usage,
    };
    (current, verdict)
}

/// Earliest time a denied sliding-window key admits one more request
fn sliding_free_at(entry: &RateLimitEntry, max_requests: u32, window_ms: i64) -> i64 {
    // Smallest elapsed time at which ceil(previous * (w - e) / w) <= room
    let free_after = |previous: u32, room: u32| -> i64 {
        if previous == 0 {
            return 0;
        }
        (window_ms - room as i64 * window_ms / previous as i64).max(0)
    };

    if entry.count < max_requests {
        let room = max_requests - 1 - entry.count;
        entry.window_start + free_after(entry.previous_count, room)
    } else {
        // Blocked for the rest of this window; the next one inherits `count`
        let next_start = entry.window_start + window_ms;
        next_start + free_after(entry.count, max_requests.saturating_sub(1))
    }
}

fn token_bucket(
    entry: Option<RateLimitEntry>,
    now_ms: i64,
    max_requests: u32,
    window_ms: i64,
) -> (RateLimitEntry, Verdict) {
    let capacity = max_requests as f64;
    let rate = rate_per_sec(max_requests, window_ms);

    let mut current = entry.unwrap_or(RateLimitEntry {
        count: 0,
        previous_count: 0,
        window_start: now_ms,
        tokens: capacity,
        last_refill: now_ms,
    });

    let elapsed_secs = (now_ms - current.last_refill).max(0) as f64 / 1000.0;
    current.tokens = (current.tokens + elapsed_secs * rate).clamp(0.0, capacity);
    current.last_refill = now_ms;

    if current.tokens < 1.0 {
        let wait_ms = secs_to_ms((1.0 - current.tokens) / rate);
        let verdict = Verdict {
            allowed: false,
            remaining: 0,
            reset_ms: now_ms + wait_ms,
            usage: (capacity - current.tokens).ceil() as u32,
        };
        return (current, verdict);
    }

    current.tokens -= 1.0;
    current.count = current.count.saturating_add(1);
    let verdict = Verdict {
        allowed: true,
        remaining: current.tokens.floor() as u32,
        reset_ms: now_ms + secs_to_ms((capacity - current.tokens) / rate),
        usage: (capacity - current.tokens).ceil() as u32,
    };
    (current, verdict)
}

fn leaky_bucket(
    entry: Option<RateLimitEntry>,
    now_ms: i64,
    max_requests: u32,
    window_ms: i64,
) -> (RateLimitEntry, Verdict) {
    let capacity = max_requests as f64;
    let rate = rate_per_sec(max_requests, window_ms);

    let mut current = entry.unwrap_or(RateLimitEntry {
        count: 0,
        previous_count: 0,
        window_start: now_ms,
        tokens: 0.0,
        last_refill: now_ms,
    });

    let elapsed_secs = (now_ms - current.last_refill).max(0) as f64 / 1000.0;
    current.tokens = (current.tokens - elapsed_secs * rate).clamp(0.0, capacity);
    current.last_refill = now_ms;

    if current.tokens + 1.0 > capacity {
        let wait_ms = secs_to_ms((current.tokens + 1.0 - capacity) / rate);
        let verdict = Verdict {
            allowed: false,
            remaining: 0,
            reset_ms: now_ms + wait_ms,
            usage: current.tokens.ceil() as u32,
        };
        return (current, verdict);
    }

    current.tokens += 1.0;
    current.count = current.count.saturating_add(1);
    let verdict = Verdict {
        allowed: true,
        remaining: (capacity - current.tokens).floor() as u32,
        reset_ms: now_ms + secs_to_ms(current.tokens / rate),
        usage: current.tokens.ceil() as u32,
    };
    (current, verdict)
}

fn secs_to_ms(secs: f64) -> i64 {
    (secs * 1000.0).ceil().max(0.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: i64 = 10_000;

    fn run(
        strategy: RateLimitStrategy,
        entry: &mut Option<RateLimitEntry>,
        now: i64,
        max: u32,
    ) -> Verdict {
        let (next, verdict) = apply(strategy, *entry, now, max, WINDOW);
        *entry = Some(next);
        verdict
    }

    #[test]
    fn test_fixed_window_denies_n_plus_one_and_resets() {
        let mut entry = None;
        let start = 50_000;
        for expected in (0..5).rev() {
            let verdict = run(RateLimitStrategy::FixedWindow, &mut entry, start + 10, 5);
            assert!(verdict.allowed);
            assert_eq!(verdict.remaining, expected);
            assert_eq!(verdict.reset_ms, start + WINDOW);
        }

        let denied = run(RateLimitStrategy::FixedWindow, &mut entry, start + 20, 5);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);

        let next = run(RateLimitStrategy::FixedWindow, &mut entry, denied.reset_ms, 5);
        assert!(next.allowed);
        assert_eq!(next.remaining, 4);
    }

    #[test]
    fn test_fixed_window_is_aligned() {
        assert_eq!(window_start(12_345, 10_000), 10_000);
        assert_eq!(window_start(10_000, 10_000), 10_000);
        assert_eq!(window_start(9_999, 10_000), 0);
    }

    #[test]
    fn test_token_bucket_refill_law() {
        // capacity 10 over 10s: one token per second
        let max = 10;
        for (elapsed_ms, expected_tokens) in [(500, 0u32), (1_000, 1), (3_500, 3), (60_000, 10)] {
            let mut entry = None;
            let t0 = 1_000_000;
            for _ in 0..max {
                assert!(run(RateLimitStrategy::TokenBucket, &mut entry, t0, max).allowed);
            }
            assert_eq!(entry.unwrap().tokens, 0.0);

            let verdict = run(RateLimitStrategy::TokenBucket, &mut entry, t0 + elapsed_ms, max);
            assert_eq!(verdict.allowed, expected_tokens >= 1, "after {}ms", elapsed_ms);
            if verdict.allowed {
                assert_eq!(verdict.remaining, expected_tokens - 1);
            } else {
                assert!(verdict.reset_ms > t0 + elapsed_ms);
            }
        }
    }

    #[test]
    fn test_token_bucket_tokens_stay_in_bounds() {
        let mut entry = None;
        for i in 0..50 {
            run(RateLimitStrategy::TokenBucket, &mut entry, i * 37, 10);
            let tokens = entry.unwrap().tokens;
            assert!((0.0..=10.0).contains(&tokens));
        }
    }

    #[test]
    fn test_token_bucket_retry_time_from_shortfall() {
        let mut entry = None;
        for _ in 0..10 {
            run(RateLimitStrategy::TokenBucket, &mut entry, 0, 10);
        }
        let denied = run(RateLimitStrategy::TokenBucket, &mut entry, 250, 10);
        assert!(!denied.allowed);
        // 0.25 tokens available, 0.75 short at 1 token/s
        assert_eq!(denied.reset_ms, 250 + 750);
    }

    #[test]
    fn test_leaky_bucket_mirror_law() {
        let max = 10;
        for (elapsed_ms, expected_room) in [(500, 0u32), (1_000, 1), (3_500, 3), (60_000, 10)] {
            let mut entry = None;
            let t0 = 2_000_000;
            for _ in 0..max {
                assert!(run(RateLimitStrategy::LeakyBucket, &mut entry, t0, max).allowed);
            }
            assert_eq!(entry.unwrap().tokens, 10.0);
            assert!(!run(RateLimitStrategy::LeakyBucket, &mut entry, t0, max).allowed);

            let verdict = run(RateLimitStrategy::LeakyBucket, &mut entry, t0 + elapsed_ms, max);
            assert_eq!(verdict.allowed, expected_room >= 1, "after {}ms", elapsed_ms);
            if verdict.allowed {
                assert_eq!(verdict.remaining, expected_room - 1);
            }
        }
    }

    #[test]
    fn test_sliding_window_previous_weight_decays() {
        let mut previous = u32::MAX;
        for elapsed in (0..=WINDOW).step_by(500) {
            let weighted = weighted_count(4, elapsed, WINDOW);
            assert!(weighted <= 4);
            assert!(weighted <= previous, "weighted count must not grow");
            previous = weighted;
        }
        assert_eq!(weighted_count(4, 0, WINDOW), 4);
        assert_eq!(weighted_count(4, WINDOW / 2, WINDOW), 2);
        assert_eq!(weighted_count(5, WINDOW / 2, WINDOW), 3);
        assert_eq!(weighted_count(4, WINDOW, WINDOW), 0);
    }

    #[test]
    fn test_sliding_window_counts_current_window_in_full() {
        let mut entry = None;
        let t0 = 500_000;
        for _ in 0..5 {
            assert!(run(RateLimitStrategy::SlidingWindow, &mut entry, t0, 5).allowed);
        }

        // A burst late in the same window stays denied
        let late = t0 + WINDOW * 99 / 100;
        let allowed = (0..995)
            .filter(|_| run(RateLimitStrategy::SlidingWindow, &mut entry, late, 5).allowed)
            .count();
        assert_eq!(allowed, 0);
        assert_eq!(entry.unwrap().count, 5);
    }

    #[test]
    fn test_sliding_window_carries_previous_window() {
        let mut entry = None;
        let t0 = 500_000;
        for _ in 0..5 {
            assert!(run(RateLimitStrategy::SlidingWindow, &mut entry, t0, 5).allowed);
        }

        // At the boundary the previous window still weighs in fully
        let denied = run(RateLimitStrategy::SlidingWindow, &mut entry, t0 + WINDOW, 5);
        assert!(!denied.allowed);
        assert_eq!(denied.usage, 5);
        // ceil(5 * (w - e) / w) <= 4 once e reaches w / 5
        assert_eq!(denied.reset_ms, t0 + WINDOW + WINDOW / 5);

        let freed = run(RateLimitStrategy::SlidingWindow, &mut entry, denied.reset_ms, 5);
        assert!(freed.allowed);
        assert_eq!(freed.remaining, 0);

        // Half way through: ceil(5 * 0.5) = 3 carried plus 1 current
        let mut entry = None;
        for _ in 0..5 {
            run(RateLimitStrategy::SlidingWindow, &mut entry, t0, 5);
        }
        let verdict = run(RateLimitStrategy::SlidingWindow, &mut entry, t0 + WINDOW + WINDOW / 2, 5);
        assert!(verdict.allowed);
        assert_eq!(verdict.usage, 4);
        assert_eq!(verdict.remaining, 1);

        // Two windows later nothing carries over
        let verdict = run(RateLimitStrategy::SlidingWindow, &mut entry, t0 + 3 * WINDOW, 5);
        assert_eq!(verdict.remaining, 4);
    }

    #[test]
    fn test_sliding_window_denied_within_window_waits_for_next() {
        let mut entry = None;
        let t0 = 700_000;
        for _ in 0..5 {
            run(RateLimitStrategy::SlidingWindow, &mut entry, t0 + 1_000, 5);
        }
        let denied = run(RateLimitStrategy::SlidingWindow, &mut entry, t0 + 2_000, 5);
        assert!(!denied.allowed);
        assert_eq!(denied.reset_ms, t0 + WINDOW + WINDOW / 5);
    }
}
