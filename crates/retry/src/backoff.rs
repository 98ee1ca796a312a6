//! Fibonacci-with-randomization backoff, keyed per failure class.

use std::collections::HashMap;

/// A fast, non-cryptographic, seedable pseudo-random generator. Deliberately hand-rolled rather
/// than pulled from a crate like `rand` so that delay sequences stay reproducible for a given
/// seed across test runs and platforms.
#[derive(Clone, Debug)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        XorShift32 {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// A uniform value in `[0, bound)`. Returns 0 when `bound` is 0.
    pub fn bounded(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        u64::from(self.next_u32()) % bound
    }
}

/// Any strategy that produces the next delay, in nanoseconds, for a single sequence. Separate
/// from `RetryRegister` (which is keyed per failure class) so a caller wanting a single
/// non-keyed sequence — or a custom strategy entirely — can still compose with
/// `RandomizedBackoff`.
pub trait BackoffDelay: Send {
    fn next_delay_nanos(&mut self) -> i64;
}

/// Plain Fibonacci growth with a fixed number of zero-delay attempts up front, capped at
/// `max_delay_nanos`. Not randomized; wrap in `RandomizedBackoff` for jitter.
pub struct FibonacciBackoff {
    immediate_left: u32,
    p1: u64,
    p2: u64,
    max_delay_nanos: u64,
}

impl FibonacciBackoff {
    pub fn new(nr_immediate_retries: u32, min_delay_nanos: i64, max_delay_nanos: i64) -> Self {
        FibonacciBackoff {
            immediate_left: nr_immediate_retries,
            p1: 0,
            p2: min_delay_nanos.max(0) as u64,
            max_delay_nanos: max_delay_nanos.max(0) as u64,
        }
    }

    /// Start with zero remaining immediate retries, so the very first delay is already drawn
    /// from the Fibonacci sequence. Used when a never-before-seen key's first decision already
    /// calls for a delayed retry rather than an immediate one.
    pub fn skip_immediate(min_delay_nanos: i64, max_delay_nanos: i64) -> Self {
        FibonacciBackoff {
            immediate_left: 0,
            p1: 0,
            p2: min_delay_nanos.max(0) as u64,
            max_delay_nanos: max_delay_nanos.max(0) as u64,
        }
    }

    pub fn immediate_left(&self) -> u32 {
        self.immediate_left
    }
}

impl BackoffDelay for FibonacciBackoff {
    fn next_delay_nanos(&mut self) -> i64 {
        if self.immediate_left > 0 {
            self.immediate_left -= 1;
            return 0;
        }
        let next = self.p2.min(self.max_delay_nanos);
        let (new_p1, new_p2) = (self.p2, self.p1.saturating_add(self.p2));
        self.p1 = new_p1;
        self.p2 = new_p2;
        next as i64
    }
}

/// Wraps any `BackoffDelay` and returns `uniform[0, inner.next_delay_nanos())` instead of the
/// raw value — useful for jitter-only strategies, and how the flagship Fibonacci backoff gets
/// its randomization.
pub struct RandomizedBackoff<B> {
    inner: B,
    rng: XorShift32,
}

impl<B: BackoffDelay> RandomizedBackoff<B> {
    pub fn new(inner: B, seed: u32) -> Self {
        RandomizedBackoff {
            inner,
            rng: XorShift32::new(seed),
        }
    }
}

impl<B: BackoffDelay> BackoffDelay for RandomizedBackoff<B> {
    fn next_delay_nanos(&mut self) -> i64 {
        let bound = self.inner.next_delay_nanos();
        if bound <= 0 {
            return 0;
        }
        self.rng.bounded(bound as u64) as i64
    }
}

/// The per-`execute_with_retry`-call register mapping a failure-class key to its own
/// `RandomizedBackoff<FibonacciBackoff>` sequence. Created lazily per key; scoped to one retry
/// loop invocation and therefore single-worker, needing no internal locking.
pub struct RetryRegister {
    entries: HashMap<String, RandomizedBackoff<FibonacciBackoff>>,
    nr_immediate_retries: u32,
    min_delay_nanos: i64,
    max_delay_nanos: i64,
    seed: u32,
}

impl RetryRegister {
    pub fn new(nr_immediate_retries: u32, min_delay_nanos: i64, max_delay_nanos: i64, seed: u32) -> Self {
        RetryRegister {
            entries: HashMap::new(),
            nr_immediate_retries,
            min_delay_nanos,
            max_delay_nanos,
            seed,
        }
    }

    /// The delay, in nanoseconds, for `key`'s next retry. `force_delayed` only has an effect the
    /// first time `key` is seen: it initializes the register with zero remaining immediate
    /// retries rather than `nr_immediate_retries`.
    pub fn next_delay_nanos(&mut self, key: &str, force_delayed: bool) -> i64 {
        let (nr_immediate, min_d, max_d, seed) = (
            self.nr_immediate_retries,
            self.min_delay_nanos,
            self.max_delay_nanos,
            self.seed,
        );
        let backoff = self.entries.entry(key.to_string()).or_insert_with(|| {
            let fib = if force_delayed {
                FibonacciBackoff::skip_immediate(min_d, max_d)
            } else {
                FibonacciBackoff::new(nr_immediate, min_d, max_d)
            };
            RandomizedBackoff::new(fib, seed)
        });
        backoff.next_delay_nanos()
    }

    pub fn immediate_left(&self, key: &str) -> Option<u32> {
        self.entries.get(key).map(|b| b.inner.immediate_left())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_k_delays_are_exactly_zero_for_nr_immediate_retries() {
        let mut backoff = FibonacciBackoff::new(3, 10, 1000);
        assert_eq!(backoff.next_delay_nanos(), 0);
        assert_eq!(backoff.next_delay_nanos(), 0);
        assert_eq!(backoff.next_delay_nanos(), 0);
        assert!(backoff.next_delay_nanos() > 0);
    }

    #[test]
    fn fibonacci_delay_never_exceeds_max_delay() {
        let mut backoff = FibonacciBackoff::new(0, 5, 20);
        for _ in 0..20 {
            let delay = backoff.next_delay_nanos();
            assert!(delay >= 0);
            assert!(delay <= 20);
        }
    }

    #[test]
    fn skip_immediate_goes_straight_to_delayed() {
        let mut backoff = FibonacciBackoff::skip_immediate(10, 1000);
        assert!(backoff.next_delay_nanos() > 0);
    }

    #[test]
    fn randomized_backoff_stays_within_bound_and_is_deterministic_for_a_seed() {
        let mut a = RandomizedBackoff::new(FibonacciBackoff::new(0, 100, 1000), 42);
        let mut b = RandomizedBackoff::new(FibonacciBackoff::new(0, 100, 1000), 42);
        for _ in 0..5 {
            let (da, db) = (a.next_delay_nanos(), b.next_delay_nanos());
            assert_eq!(da, db);
            assert!(da >= 0 && da <= 1000);
        }
    }

    #[test]
    fn register_tracks_immediate_left_per_key_independently() {
        let mut register = RetryRegister::new(2, 10, 1000, 7);
        assert_eq!(register.next_delay_nanos("a", false), 0);
        assert_eq!(register.immediate_left("a"), Some(1));
        assert_eq!(register.next_delay_nanos("b", false), 0);
        assert_eq!(register.immediate_left("b"), Some(1));
        assert_eq!(register.next_delay_nanos("a", false), 0);
        assert_eq!(register.immediate_left("a"), Some(0));
    }
}
