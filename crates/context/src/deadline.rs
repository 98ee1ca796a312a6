//! Deadline arithmetic derived from the ambient current context.

use substrate_error::SubstrateError;
use substrate_time::{deadline_from, now_nanos, tighter_deadline, TimeUnit};

use crate::{config, current, ExecutionContext};

fn ambient_deadline_nanos() -> i64 {
    match current() {
        Some(ctx) => ctx.deadline_nanos(),
        None => deadline_from(now_nanos(), config().default_timeout.as_nanos() as i64, TimeUnit::Nanos),
    }
}

/// Signed remaining time until the ambient deadline, in `unit`; negative when already past.
pub fn time_relative_to_deadline(unit: TimeUnit) -> i64 {
    unit.from_nanos(ambient_deadline_nanos() - now_nanos())
}

/// Non-negative remaining time until the ambient deadline, in `unit`. Fails with
/// `DeadlineExceeded` when the current instant is at or past the deadline.
pub fn time_to_deadline(unit: TimeUnit) -> Result<i64, SubstrateError> {
    let remaining_nanos = ambient_deadline_nanos() - now_nanos();
    if remaining_nanos <= 0 {
        return Err(SubstrateError::DeadlineExceeded);
    }
    Ok(unit.from_nanos(remaining_nanos))
}

pub fn millis_to_deadline() -> Result<i64, SubstrateError> {
    time_to_deadline(TimeUnit::Millis)
}

pub fn seconds_to_deadline() -> Result<i64, SubstrateError> {
    time_to_deadline(TimeUnit::Seconds)
}

fn inherited_deadline_nanos(ctx: Option<&ExecutionContext>) -> Option<i64> {
    ctx.map(ExecutionContext::deadline_nanos)
        .or_else(|| current().map(|c| c.deadline_nanos()))
}

/// The absolute deadline `requested_timeout` (in `unit`) from now would produce, tightened
/// against `ctx`'s deadline (or the ambient current context's, if `ctx` is `None`).
pub fn compute_deadline(ctx: Option<&ExecutionContext>, unit: TimeUnit, requested_timeout: i64) -> i64 {
    let requested = deadline_from(now_nanos(), requested_timeout, unit);
    match inherited_deadline_nanos(ctx) {
        Some(inherited) => tighter_deadline(requested, inherited),
        None => requested,
    }
}

/// Both the effective timeout (minimum of requested and remaining) and the absolute deadline
/// (minimum of requested-derived and inherited). The single function for "I am about to start a
/// sub-operation; how much time do I have and by when must I stop?"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutDeadline {
    pub timeout: i64,
    pub deadline_nanos: i64,
}

pub fn compute_timeout_deadline(
    ctx: Option<&ExecutionContext>,
    unit: TimeUnit,
    requested_timeout: i64,
) -> Result<TimeoutDeadline, SubstrateError> {
    let now = now_nanos();
    let requested_deadline = deadline_from(now, requested_timeout, unit);
    let deadline_nanos = match inherited_deadline_nanos(ctx) {
        Some(inherited) => tighter_deadline(requested_deadline, inherited),
        None => requested_deadline,
    };
    let remaining_nanos = deadline_nanos - now;
    if remaining_nanos <= 0 {
        return Err(SubstrateError::DeadlineExceeded);
    }
    let timeout_nanos = remaining_nanos.min(unit.to_nanos(requested_timeout));
    Ok(TimeoutDeadline {
        timeout: unit.from_nanos(timeout_nanos),
        deadline_nanos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextBuilder;
    use std::time::Duration;

    #[test]
    fn time_to_deadline_fails_when_past() {
        let ctx = ContextBuilder::new("expired")
            .timeout(Duration::from_nanos(0))
            .create_detached();
        std::thread::sleep(Duration::from_millis(1));
        let handle = crate::registry::attach(ctx);
        assert!(matches!(
            time_to_deadline(TimeUnit::Nanos),
            Err(SubstrateError::DeadlineExceeded)
        ));
        crate::registry::detach(handle).unwrap();
    }

    #[test]
    fn compute_timeout_deadline_uses_now_plus_timeout_with_no_context() {
        let before = now_nanos();
        let result = compute_timeout_deadline(None, TimeUnit::Millis, 100).unwrap();
        let after = now_nanos();
        assert!(result.deadline_nanos >= before + TimeUnit::Millis.to_nanos(100));
        assert!(result.deadline_nanos <= after + TimeUnit::Millis.to_nanos(100));
    }

    #[test]
    fn compute_timeout_deadline_tightens_against_inherited_deadline() {
        let parent = ContextBuilder::new("parent")
            .timeout(Duration::from_millis(100))
            .create_detached();
        let handle = crate::registry::attach(parent.clone());

        let result = compute_timeout_deadline(None, TimeUnit::Seconds, 1).unwrap();
        assert_eq!(result.deadline_nanos, parent.deadline_nanos());

        crate::registry::detach(handle).unwrap();
    }
}
