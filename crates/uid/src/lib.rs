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

//! Compact, lexicographically-sortable, process-unique identifier generation.
//!
//! Identifiers take the form `PREFIX + base36(epoch-delta) + SEP + base36(sequence)`, where
//! `epoch-delta` is nanoseconds since this process started and `sequence` is a scalable counter
//! whose increments are batched per thread to reduce contention on the shared atomic. The only
//! guarantee callers may rely on is uniqueness within one process lifetime and cheap
//! construction; lexicographic sort order is a bonus, not a contract.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

const PREFIX: &str = "ec-";
const SEP: char = '-';
const BATCH_SIZE: u64 = 64;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// `(next, end)`: the half-open range of sequence numbers reserved for this thread.
    static RESERVATION: Cell<(u64, u64)> = const { Cell::new((0, 0)) };
}

fn next_sequence() -> u64 {
    RESERVATION.with(|cell| {
        let (mut next, mut end) = cell.get();
        if next >= end {
            next = SEQUENCE.fetch_add(BATCH_SIZE, Ordering::Relaxed);
            end = next + BATCH_SIZE;
        }
        let id = next;
        cell.set((next + 1, end));
        id
    })
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 digits are always valid UTF-8")
}

/// Generate a unique, compact identifier.
///
/// Uniqueness holds within the lifetime of one process; callers must not persist these ids
/// across process restarts and expect global uniqueness.
pub fn generate() -> String {
    let epoch_delta = substrate_time::now_nanos().max(0) as u64;
    let sequence = next_sequence();
    format!(
        "{}{}{}{}",
        PREFIX,
        to_base36(epoch_delta),
        SEP,
        to_base36(sequence)
    )
}

#[cfg(test)]
mod tests;
