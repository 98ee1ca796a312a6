//! Retry predicate shapes and the pre-built predicates, plus the concrete adapter functions that
//! bridge them into the deadline-aware, possibly-blocking closure shape `execute_with_retry`
//! consumes. Adapters are plain functions returning `impl FnMut`, not trait objects or a class
//! hierarchy.

use substrate_error::SubstrateError;

use crate::backoff::RetryRegister;
use crate::interrupt;

/// The coarse decision a deadline-free predicate may return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    Retry,
    Abort,
}

/// The finer-grained decision an `AdvancedRetryPredicate` may return: `RetryImmediate` demands
/// zero delay regardless of the register's remaining immediate-retry budget, `RetryDelayed`
/// demands the register skip straight to Fibonacci delays for a never-before-seen key, and
/// plain `Retry` lets the register's ordinary immediate-then-Fibonacci progression decide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvancedOutcome {
    Retry,
    RetryImmediate,
    RetryDelayed,
    Abort,
}

/// Deadline-free: `RETRY` or `ABORT`.
pub trait RetryPredicate<V> {
    fn decide(&mut self, value: &V) -> RetryOutcome;
}

impl<V, F: FnMut(&V) -> RetryOutcome> RetryPredicate<V> for F {
    fn decide(&mut self, value: &V) -> RetryOutcome {
        self(value)
    }
}

/// The four-way classification, still deadline-free.
pub trait AdvancedRetryPredicate<V> {
    fn decide(&mut self, value: &V) -> AdvancedOutcome;
}

impl<V, F: FnMut(&V) -> AdvancedOutcome> AdvancedRetryPredicate<V> for F {
    fn decide(&mut self, value: &V) -> AdvancedOutcome {
        self(value)
    }
}

/// Returns a signed millisecond count: negative aborts, zero retries immediately, positive
/// sleeps that many milliseconds before retrying.
pub trait TimeoutDelayPredicate<V> {
    fn decide(&mut self, value: &V) -> i64;
}

impl<V, F: FnMut(&V) -> i64> TimeoutDelayPredicate<V> for F {
    fn decide(&mut self, value: &V) -> i64 {
        self(value)
    }
}

/// Always aborts. The degenerate predicate for operations with no retry policy at all (S1, S4).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetryForResult;

impl<V> RetryPredicate<V> for NoRetryForResult {
    fn decide(&mut self, _value: &V) -> RetryOutcome {
        RetryOutcome::Abort
    }
}

/// Retries iff the result is `None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryForNullResult;

impl<T> RetryPredicate<Option<T>> for RetryForNullResult {
    fn decide(&mut self, value: &Option<T>) -> RetryOutcome {
        match value {
            None => RetryOutcome::Retry,
            Some(_) => RetryOutcome::Abort,
        }
    }
}

/// Inspects the `source()` chain of an error and retries if any cause is judged transient by
/// the supplied classifier; aborts otherwise, including for a cause chain with no transient
/// member at all.
pub struct DefaultExceptionRetry<F> {
    is_transient: F,
}

impl<F> DefaultExceptionRetry<F>
where
    F: Fn(&(dyn std::error::Error + 'static)) -> bool,
{
    pub fn new(is_transient: F) -> Self {
        DefaultExceptionRetry { is_transient }
    }
}

impl<E, F> RetryPredicate<E> for DefaultExceptionRetry<F>
where
    E: std::error::Error + 'static,
    F: Fn(&(dyn std::error::Error + 'static)) -> bool,
{
    fn decide(&mut self, err: &E) -> RetryOutcome {
        let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = cause {
            if (self.is_transient)(e) {
                return RetryOutcome::Retry;
            }
            cause = e.source();
        }
        RetryOutcome::Abort
    }
}

/// A reasonable default transient-cause classifier standing in for the source library's
/// "transient database / recoverable database / transport-layer socket failure / timeout"
/// class set: transport-level I/O errors whose kind typically indicates a retriable condition.
pub fn is_transient_transport_error(err: &(dyn std::error::Error + 'static)) -> bool {
    use std::io::ErrorKind;
    err.downcast_ref::<std::io::Error>()
        .map(|io_err| {
            matches!(
                io_err.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
            )
        })
        .unwrap_or(false)
}

/// Lift a deadline-free two-way `RetryPredicate` into the four-way `AdvancedRetryPredicate`
/// shape `with_backoff` expects, letting the register's ordinary immediate-then-Fibonacci
/// progression decide delays (`Retry` maps to `Retry`, never to `RetryImmediate`/`RetryDelayed`).
pub fn to_advanced<'a, V>(
    mut inner: impl RetryPredicate<V> + 'a,
) -> impl AdvancedRetryPredicate<V> + 'a {
    move |value: &V| match inner.decide(value) {
        RetryOutcome::Retry => AdvancedOutcome::Retry,
        RetryOutcome::Abort => AdvancedOutcome::Abort,
    }
}

fn sleep_interruptible_nanos(total_nanos: i64) -> Result<(), SubstrateError> {
    const CHUNK_NANOS: i64 = 1_000_000;
    let mut remaining = total_nanos;
    while remaining > 0 {
        if interrupt::is_interrupted() {
            return Err(SubstrateError::Interrupted);
        }
        let chunk = remaining.min(CHUNK_NANOS);
        std::thread::sleep(std::time::Duration::from_nanos(chunk as u64));
        remaining -= chunk;
    }
    if interrupt::is_interrupted() {
        return Err(SubstrateError::Interrupted);
    }
    Ok(())
}

/// Adapt a deadline-free `RetryPredicate` into the deadline-aware, possibly-blocking shape
/// `execute_with_retry` consumes, with no backoff at all: `Retry` proceeds immediately, `Abort`
/// aborts immediately. Suitable when the caller has no backoff policy (S1, S4).
pub fn no_delay<'a, V>(
    mut inner: impl RetryPredicate<V> + 'a,
) -> impl FnMut(&V) -> Result<RetryOutcome, SubstrateError> + 'a {
    move |value: &V| Ok(inner.decide(value))
}

/// Adapt an `AdvancedRetryPredicate` plus a keyed `RetryRegister` into the deadline-aware,
/// possibly-blocking shape, performing the actual sleep. `key_of` computes the failure-class
/// key for the register; `deadline_nanos` is the absolute deadline this predicate closes over —
/// the driver itself never computes or tracks deadlines, only the predicates it is handed do.
pub fn with_backoff<'a, V>(
    register: &'a mut RetryRegister,
    mut classify: impl AdvancedRetryPredicate<V> + 'a,
    mut key_of: impl FnMut(&V) -> String + 'a,
    deadline_nanos: i64,
) -> impl FnMut(&V) -> Result<RetryOutcome, SubstrateError> + 'a {
    move |value: &V| {
        let decision = classify.decide(value);
        if decision == AdvancedOutcome::Abort {
            return Ok(RetryOutcome::Abort);
        }

        let key = key_of(value);
        let force_delayed = decision == AdvancedOutcome::RetryDelayed;
        let mut delay_nanos = register.next_delay_nanos(&key, force_delayed);
        if decision == AdvancedOutcome::RetryImmediate {
            delay_nanos = 0;
        }

        let now = substrate_time::now_nanos();
        let remaining = deadline_nanos - now;
        if remaining <= 0 {
            return Err(SubstrateError::DeadlineExceeded);
        }

        let capped = delay_nanos.min(remaining);
        log::debug!("retry backoff for {key:?}: {capped}ns (deadline in {remaining}ns)");
        if capped > 0 {
            sleep_interruptible_nanos(capped)?;
        }
        Ok(RetryOutcome::Retry)
    }
}

/// Adapt a `TimeoutDelayPredicate` directly into the deadline-aware, possibly-blocking shape,
/// bypassing the keyed register entirely: the predicate's returned millisecond count *is* the
/// delay.
pub fn from_timeout_delay<'a, V>(
    mut inner: impl TimeoutDelayPredicate<V> + 'a,
    deadline_nanos: i64,
) -> impl FnMut(&V) -> Result<RetryOutcome, SubstrateError> + 'a {
    move |value: &V| {
        let ms = inner.decide(value);
        if ms < 0 {
            return Ok(RetryOutcome::Abort);
        }
        let now = substrate_time::now_nanos();
        let remaining = deadline_nanos - now;
        if remaining <= 0 {
            return Err(SubstrateError::DeadlineExceeded);
        }
        let requested_nanos = ms.saturating_mul(1_000_000);
        let capped = requested_nanos.min(remaining);
        if capped > 0 {
            sleep_interruptible_nanos(capped)?;
        }
        Ok(RetryOutcome::Retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Transient;
    impl fmt::Display for Transient {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "transient")
        }
    }
    impl std::error::Error for Transient {}

    #[derive(Debug)]
    struct IllegalArgument;
    impl fmt::Display for IllegalArgument {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "illegal argument")
        }
    }
    impl std::error::Error for IllegalArgument {}

    #[test]
    fn no_retry_for_result_always_aborts() {
        let mut p = NoRetryForResult;
        assert_eq!(RetryPredicate::<i32>::decide(&mut p, &42), RetryOutcome::Abort);
    }

    #[test]
    fn retry_for_null_result_retries_only_on_none() {
        let mut p = RetryForNullResult;
        assert_eq!(p.decide(&None::<u32>), RetryOutcome::Retry);
        assert_eq!(p.decide(&Some(1u32)), RetryOutcome::Abort);
    }

    #[test]
    fn default_exception_retry_retries_on_matching_cause_only() {
        let mut p = DefaultExceptionRetry::new(|e| e.downcast_ref::<Transient>().is_some());
        assert_eq!(p.decide(&Transient), RetryOutcome::Retry);
        assert_eq!(p.decide(&IllegalArgument), RetryOutcome::Abort);
    }
}
