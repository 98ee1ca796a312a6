use crate::{BoxError, SubstrateError, SuppressedChain};
use std::fmt;

#[derive(Debug)]
struct Boom(&'static str);

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

impl std::error::Error for Boom {}

fn boxed(msg: &'static str) -> BoxError {
    Box::new(Boom(msg))
}

#[test]
fn chain_onto_preserves_temporal_order() {
    let mut prior = SuppressedChain::new();
    prior.push(boxed("first"));
    prior.push(boxed("second"));

    let latest = SubstrateError::RetriableFailure {
        source: boxed("third"),
        suppressed: SuppressedChain::new(),
    };

    let chained = latest.chain_onto(prior);
    let messages: Vec<String> = chained.suppressed().iter().map(|e| e.to_string()).collect();
    assert_eq!(messages, vec!["boom: first", "boom: second"]);
}

#[test]
fn non_chaining_variants_have_no_suppressed() {
    assert!(SubstrateError::DeadlineExceeded.suppressed().is_empty());
    assert!(SubstrateError::Interrupted.suppressed().is_empty());
}

#[test]
fn terminal_failure_after_n_attempts_has_n_minus_one_suppressed() {
    let mut chain = SuppressedChain::new();
    let attempts = 4;
    for i in 0..attempts - 1 {
        chain.push(boxed(Box::leak(format!("attempt-{i}").into_boxed_str())));
    }
    let terminal = SubstrateError::TerminalFailure {
        source: boxed("attempt-final"),
        suppressed: SuppressedChain::new(),
    }
    .chain_onto(chain);
    assert_eq!(terminal.suppressed().len(), attempts - 1);
}
