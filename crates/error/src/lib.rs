#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! Shared error vocabulary for the execution-context and retry substrate.
//!
//! One enum, `SubstrateError`, carries every error kind the substrate produces. It lives in its
//! own crate because `substrate-config`, `substrate-context`, `substrate-task` and
//! `substrate-retry` all need to return it without creating a dependency cycle between them.

use std::fmt;

/// A type-erased user or library error, boxed so `SubstrateError` doesn't need a generic
/// parameter at every call site. The caller's domain error type only needs to satisfy
/// `impl std::error::Error` at the point it is first boxed, rather than being named in every
/// signature it passes through.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Prior failures from earlier attempts of the same retry loop, oldest first
/// ("append-latest-preserve-earliest").
#[derive(Debug, Default)]
pub struct SuppressedChain(Vec<BoxError>);

impl SuppressedChain {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: BoxError) {
        self.0.push(err);
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoxError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SuppressedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} suppressed prior failure(s)", self.0.len())
    }
}

/// The substrate's single error type. Every fallible public API in this workspace returns
/// `Result<T, SubstrateError>`.
#[derive(thiserror::Error, Debug)]
pub enum SubstrateError {
    /// A deadline query found the deadline already in the past.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The calling worker of execution's interruption flag was observed. Never retried; the
    /// flag must be restored on the worker before this propagates further.
    #[error("interrupted")]
    Interrupted,

    /// A transient cause the retry driver will schedule another attempt for. Carries every
    /// earlier attempt's failure as a suppressed sibling.
    #[error("retriable failure: {source}")]
    RetriableFailure {
        #[source]
        source: BoxError,
        suppressed: SuppressedChain,
    },

    /// A non-retriable cause, or the retry budget/deadline was exhausted. The original error
    /// survives as `source`; `suppressed` holds every attempt before the last.
    #[error("terminal failure: {source}")]
    TerminalFailure {
        #[source]
        source: BoxError,
        suppressed: SuppressedChain,
    },

    /// The factory class was missing or not constructible, or an attacher was misconfigured.
    /// Fatal at startup; the process must not continue.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Detach from the wrong worker of execution, detach when the stack top wasn't the expected
    /// context, or similarly programmer-error conditions.
    #[error("misuse error: {0}")]
    MisuseError(String),
}

impl SubstrateError {
    /// Suppressed prior failures, if this is a `RetriableFailure` or `TerminalFailure`; empty
    /// otherwise.
    pub fn suppressed(&self) -> &[BoxError] {
        match self {
            SubstrateError::RetriableFailure { suppressed, .. }
            | SubstrateError::TerminalFailure { suppressed, .. } => &suppressed.0,
            _ => &[],
        }
    }

    /// Chain `self` (assumed `RetriableFailure` or `TerminalFailure`) onto `prior`'s suppressed
    /// list, in temporal order, and return the combined error.
    pub fn chain_onto(mut self, mut prior: SuppressedChain) -> Self {
        match &mut self {
            SubstrateError::RetriableFailure { suppressed, .. }
            | SubstrateError::TerminalFailure { suppressed, .. } => {
                let mut combined = std::mem::take(&mut prior);
                combined.0.append(&mut suppressed.0);
                *suppressed = combined;
            }
            _ => {}
        }
        self
    }
}

#[cfg(test)]
mod tests;
