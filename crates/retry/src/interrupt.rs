//! A per-worker-of-execution interruption flag, the substrate's stand-in for a cooperative
//! cancellation signal: set a flag, and any sleeping worker checks it between chunks and unwinds.
//! Unlike the execution-context registry this is not a stack: a worker has exactly one flag,
//! level-triggered, that any other worker holding a clone of its handle may raise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
    static CURRENT: InterruptFlag = InterruptFlag::new();
}

/// A cheaply-cloneable handle onto one worker's interruption flag. Clones observe and set the
/// same underlying flag; only the worker that owns it (by way of having called
/// `current_interrupt_flag` on itself) is "current" for that worker, but any clone may call
/// `interrupt()` from anywhere.
#[derive(Clone)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    fn new() -> Self {
        InterruptFlag(Arc::new(AtomicBool::new(false)))
    }

    /// Raise the flag. Safe to call from any worker of execution, including ones other than the
    /// one the flag belongs to.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A clone of the calling worker's interruption flag, so another worker can be handed it (e.g.
/// over a channel) and later call `.interrupt()` on the original worker's behalf.
pub fn current_interrupt_flag() -> InterruptFlag {
    CURRENT.with(Clone::clone)
}

/// Whether the calling worker's interruption flag is currently set.
pub fn is_interrupted() -> bool {
    CURRENT.with(InterruptFlag::is_set)
}

/// Clear the calling worker's interruption flag.
pub fn clear_interrupted() {
    CURRENT.with(InterruptFlag::clear);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_clear() {
        assert!(!is_interrupted());
    }

    #[test]
    fn cloned_handle_from_another_thread_raises_this_threads_flag() {
        clear_interrupted();
        let handle = current_interrupt_flag();
        std::thread::spawn(move || handle.interrupt())
            .join()
            .unwrap();
        assert!(is_interrupted());
        clear_interrupted();
    }
}
