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

//! The retry driver, retry predicates, backoff strategies, and error chaining. The driver itself
//! is synchronous and blocking: it sleeps the calling worker of execution between attempts and
//! does not consult the ambient execution context directly — deadlines enter only via predicates
//! that close over the deadline they enforce (built with `with_backoff`/`from_timeout_delay` over
//! a context's deadline, typically via `TimeoutCallable`).

mod backoff;
mod interrupt;
mod predicates;

pub use backoff::{BackoffDelay, FibonacciBackoff, RandomizedBackoff, RetryRegister, XorShift32};
pub use interrupt::{clear_interrupted, current_interrupt_flag, is_interrupted, InterruptFlag};
pub use predicates::{
    from_timeout_delay, is_transient_transport_error, no_delay, to_advanced, with_backoff,
    AdvancedOutcome, AdvancedRetryPredicate, DefaultExceptionRetry, NoRetryForResult,
    RetryForNullResult, RetryOutcome, RetryPredicate, TimeoutDelayPredicate,
};

use substrate_error::{SubstrateError, SuppressedChain};
use substrate_time::TimeUnit;

/// The central algorithm: invoke `op` until `retry_on_result`/`retry_on_exception` aborts, a
/// predicate reports a terminal condition (deadline exceeded), or interruption is observed.
/// Stateless beyond one invocation — every call starts fresh.
///
/// `retry_on_result` and `retry_on_exception` are the deadline-aware, possibly-blocking
/// predicate shape: plain closures of this exact signature satisfy it directly, and
/// `no_delay`/`with_backoff`/`from_timeout_delay` adapt the narrower predicate shapes
/// (`RetryPredicate`, `AdvancedRetryPredicate`, `TimeoutDelayPredicate`) into it.
///
/// `last_return` and `last_exception` are the caller's one chance at local recovery once the
/// loop has reached a terminal decision. `last_return` sees the value an abort decision would
/// otherwise return verbatim, and may replace it or turn it into an error. `last_exception` sees
/// every terminal error this function would otherwise propagate — an aborting exception
/// predicate, a predicate-reported terminal condition such as a deadline, or an observed
/// interruption — and may transform it or swallow it by returning `Ok`. Callers with no recovery
/// policy pass `|v| Ok(v)` and `|e| Err(e)`.
pub fn execute_with_retry<T, E>(
    mut op: impl FnMut() -> Result<T, E>,
    mut retry_on_result: impl FnMut(&T) -> Result<RetryOutcome, SubstrateError>,
    mut retry_on_exception: impl FnMut(&E) -> Result<RetryOutcome, SubstrateError>,
    mut last_return: impl FnMut(T) -> Result<T, SubstrateError>,
    mut last_exception: impl FnMut(SubstrateError) -> Result<T, SubstrateError>,
) -> Result<T, SubstrateError>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let mut suppressed = SuppressedChain::new();
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;

        if attempt > 1 && interrupt::is_interrupted() {
            log::debug!("retry loop observed interruption between attempts");
            return last_exception(SubstrateError::Interrupted);
        }

        match op() {
            Ok(value) => match retry_on_result(&value) {
                Ok(RetryOutcome::Abort) => return last_return(value),
                Ok(RetryOutcome::Retry) => {
                    log::trace!(
                        "retry register still has a live sequence after attempt {attempt}'s \
                         retriable result"
                    );
                    log::debug!("retrying after attempt {attempt} returned a retriable result");
                    continue;
                }
                Err(e) => return last_exception(e),
            },
            Err(err) => match retry_on_exception(&err) {
                Ok(RetryOutcome::Abort) => {
                    let terminal = SubstrateError::TerminalFailure {
                        source: Box::new(err),
                        suppressed: SuppressedChain::new(),
                    }
                    .chain_onto(suppressed);
                    return last_exception(terminal);
                }
                Ok(RetryOutcome::Retry) => {
                    let retriable = SubstrateError::RetriableFailure {
                        source: Box::new(err),
                        suppressed: SuppressedChain::new(),
                    }
                    .chain_onto(suppressed);
                    log::debug!("retrying after attempt {attempt}: {retriable}");
                    let SubstrateError::RetriableFailure {
                        source,
                        suppressed: mut chain,
                    } = retriable
                    else {
                        unreachable!("constructed as RetriableFailure above")
                    };
                    chain.push(source);
                    suppressed = chain;
                    continue;
                }
                Err(SubstrateError::Interrupted) => {
                    log::debug!("retry predicate observed interruption for attempt {attempt}");
                    return last_exception(SubstrateError::Interrupted);
                }
                Err(e) => {
                    // The predicate reported a terminal condition (typically a deadline it was
                    // closing over expiring) rather than an ordinary abort decision; `e` itself
                    // is just the signal, the payload is the attempt's own error.
                    log::debug!("retry predicate terminated attempt {attempt}: {e}");
                    let terminal = SubstrateError::TerminalFailure {
                        source: Box::new(err),
                        suppressed: SuppressedChain::new(),
                    }
                    .chain_onto(suppressed);
                    return last_exception(terminal);
                }
            },
        }
    }
}

/// An operation that pre-computes its deadline at construction, so predicates built around it
/// (via `with_backoff`/`from_timeout_delay`) share a single, consistent deadline rather than each
/// recomputing it from a possibly-drifted "now" on every attempt.
pub struct TimeoutCallable<T> {
    deadline_nanos: i64,
    op: Box<dyn FnMut() -> T + Send>,
}

impl<T> TimeoutCallable<T> {
    /// `ctx`, if given, tightens the computed deadline the same way any child context would;
    /// `None` falls back to the ambient current context, or the process default timeout if none
    /// is attached.
    pub fn new<F>(
        ctx: Option<&substrate_context::ExecutionContext>,
        unit: TimeUnit,
        timeout: i64,
        op: F,
    ) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        TimeoutCallable {
            deadline_nanos: substrate_context::compute_deadline(ctx, unit, timeout),
            op: Box::new(op),
        }
    }

    pub fn deadline_nanos(&self) -> i64 {
        self.deadline_nanos
    }

    pub fn call(&mut self) -> T {
        (self.op)()
    }
}
