#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic nanoseconds since an arbitrary, fixed, process-wide epoch.
///
/// Unaffected by wall-clock adjustments (NTP, DST, leap seconds): this is `Instant`-backed, not
/// `SystemTime`-backed. Deadlines compared with this must never be derived from `SystemTime`, or
/// the monotonicity guarantee is lost.
pub fn now_nanos() -> i64 {
    let elapsed = epoch().elapsed();
    i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX)
}

/// The small set of units this substrate converts between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Nanos,
    Millis,
    Seconds,
}

impl TimeUnit {
    fn nanos_per_unit(self) -> i64 {
        match self {
            TimeUnit::Nanos => 1,
            TimeUnit::Millis => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
        }
    }

    /// Convert a signed amount expressed in `self` into nanoseconds, saturating rather than
    /// overflowing at the `i64` bounds.
    pub fn to_nanos(self, amount: i64) -> i64 {
        amount.saturating_mul(self.nanos_per_unit())
    }

    /// Convert a nanosecond amount into `self`, truncating toward zero.
    pub fn from_nanos(self, nanos: i64) -> i64 {
        nanos / self.nanos_per_unit()
    }
}

/// `start + amount` (`amount` in `unit`), saturating at `i64::MAX` instead of overflowing.
pub fn deadline_from(start_nanos: i64, amount: i64, unit: TimeUnit) -> i64 {
    start_nanos.saturating_add(unit.to_nanos(amount))
}

/// The tighter (earlier) of two deadlines. Named rather than a bare `.min()` call so that call
/// sites read as "the tighter deadline wins", which is the invariant callers actually care about.
pub fn tighter_deadline(a: i64, b: i64) -> i64 {
    a.min(b)
}

/// A concrete, inspectable representation of an elapsed span between two monotonic instants.
///
/// Unlike `std::time::Duration` this doesn't hide how the span is stored: the purpose of this
/// struct is to expose start and length for diagnostics, the way `concrete_time::TimeSpan` does
/// for workunits in the source corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeSpan {
    /// Monotonic nanos at which the span started.
    pub start_nanos: i64,
    /// Length of the span, in nanoseconds. Zero if `end` was not after `start`.
    pub duration_nanos: i64,
}

impl TimeSpan {
    /// Construct a span from a start and an end, both monotonic nanos. A non-monotonic pair
    /// (`end < start`) clamps to a zero-length span rather than going negative.
    pub fn from_start_and_end(start_nanos: i64, end_nanos: i64) -> TimeSpan {
        let duration_nanos = end_nanos.saturating_sub(start_nanos).max(0);
        TimeSpan {
            start_nanos,
            duration_nanos,
        }
    }

    /// Construct a span that started at `start_nanos` and ends now.
    pub fn since(start_nanos: i64) -> TimeSpan {
        Self::from_start_and_end(start_nanos, now_nanos())
    }
}

#[cfg(test)]
mod tests;
