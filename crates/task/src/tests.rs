use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    wrap_callables, wrap_runnables, DeadlinedPropagatingCallable, Executor, PropagatingCallable,
    PropagatingRunnable,
};

#[test]
fn executor_block_on_resolves_future() {
    let executor = Executor::new_owned(1, 2, || {}).unwrap();
    let result = executor.block_on(async { 1 + 1 });
    assert_eq!(result, 2);
    executor.shutdown(Duration::from_secs(1));
    assert!(executor.is_shutdown());
}

#[test]
fn borrowed_executor_shutdown_is_a_no_op() {
    let owned = Executor::new_owned(1, 2, || {}).unwrap();
    let borrowed = owned.to_borrowed();
    borrowed.shutdown(Duration::from_secs(1));
    assert!(borrowed.is_shutdown());
    // The owned runtime backing it is unaffected.
    assert!(!owned.is_shutdown());
    owned.shutdown(Duration::from_secs(1));
}

#[test]
fn propagating_callable_opens_child_of_captured_ambient_context() {
    let executor = Executor::new_owned(1, 2, || {}).unwrap();
    executor.block_on(async {
        let outer = substrate_context::start("outer");
        let outer_ctx = outer.context().clone();

        let callable = PropagatingCallable::new("inner", move || {
            let current = substrate_context::current().unwrap();
            assert!(current.parent().unwrap().is_same_as(&outer_ctx));
            42
        });
        assert_eq!(callable.call(), 42);
    });
    executor.shutdown(Duration::from_secs(1));
}

#[test]
fn propagating_callable_with_no_ambient_context_has_no_parent() {
    let called = Arc::new(AtomicBool::new(false));
    let called_clone = called.clone();
    let callable = PropagatingCallable::new("standalone", move || {
        assert!(substrate_context::current().unwrap().parent().is_none());
        called_clone.store(true, Ordering::SeqCst);
    });
    callable.call();
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn deadlined_propagating_callable_overrides_timeout() {
    let callable =
        DeadlinedPropagatingCallable::new("deadlined", Duration::from_secs(30), || {
            substrate_context::current().unwrap().deadline_nanos()
        });
    let before = substrate_time::now_nanos();
    let deadline = callable.call();
    assert!(deadline > before + substrate_time::TimeUnit::Seconds.to_nanos(29));
}

#[test]
fn propagating_runnable_runs_wrapped_closure() {
    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();
    let runnable = PropagatingRunnable::new("side-effect", move || {
        ran_clone.store(true, Ordering::SeqCst);
    });
    runnable.run();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn wrap_callables_shares_one_captured_parent_across_all_wrappers() {
    let outer = substrate_context::start("batch-parent");
    let outer_ctx = outer.context().clone();

    let ops: Vec<Box<dyn FnOnce() -> usize + Send>> = (0..3)
        .map(|i| Box::new(move || i) as Box<dyn FnOnce() -> usize + Send>)
        .collect();
    let wrapped = wrap_callables("batch-item", ops);
    assert_eq!(wrapped.len(), 3);

    for (i, callable) in wrapped.into_iter().enumerate() {
        let outer_ctx = outer_ctx.clone();
        let result = std::thread::spawn(move || {
            let value = callable.call();
            let current = substrate_context::current();
            assert!(current.is_none());
            value
        })
        .join()
        .unwrap();
        assert_eq!(result, i);
    }
}

#[test]
fn wrap_runnables_preserves_order_and_count() {
    let seen = Arc::new(Mutex_::new(Vec::new()));
    let ops: Vec<Box<dyn FnOnce() + Send>> = (0..4)
        .map(|i| {
            let seen = seen.clone();
            Box::new(move || seen.lock().push(i)) as Box<dyn FnOnce() + Send>
        })
        .collect();
    let wrapped = wrap_runnables("batch-runnable", ops);
    assert_eq!(wrapped.len(), 4);
    for runnable in wrapped {
        runnable.run();
    }
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
}

// Alias so the test above doesn't need a second top-level import line.
use parking_lot::Mutex as Mutex_;
