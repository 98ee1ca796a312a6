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
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

//! Task wrappers that propagate a captured execution context across worker-of-execution
//! boundaries, and the worker pool (`Executor`) they are typically submitted to.

use std::collections::HashMap;
use std::env;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::FutureExt;
use itertools::Itertools;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};

use substrate_context::{current, ContextBuilder};

/// Propagate the calling worker's current execution context into a future that may run on a
/// different worker of execution, the same way a spawned task needs its stdio and ambient
/// handles copied in explicitly rather than inherited from whichever worker polls it.
///
/// NB: the capture of `current()` must happen synchronously, before the `async move` block, so
/// that it reads the *caller's* ambient context rather than whatever happens to be current on
/// the worker that eventually polls the returned future.
fn future_with_correct_context<F: Future>(future: F) -> impl Future<Output = F::Output> {
    let captured = current();
    substrate_context::scope_task(captured, future)
}

///
/// Executors come in two flavors:
/// * "borrowed"
///     * Created with `Self::new()`, or `self::to_borrowed()`.
///     * A borrowed Executor will not be shut down when all handles are dropped, and shutdown
///       methods will have no impact.
///     * Used when multiple runs of the embedding application will borrow a single Executor, and
///       in unit tests where the Runtime is created by macros.
/// * "owned"
///     * Created with `Self::new_owned()`.
///     * When all handles of an owned Executor are dropped, its Runtime will be shut down.
///       Additionally, the explicit shutdown methods can be used to shut down the Executor for all
///       clones.
///
#[derive(Debug, Clone)]
pub struct Executor {
    runtime: Arc<Mutex<Option<Runtime>>>,
    handle: Handle,
}

impl Executor {
    ///
    /// Creates an Executor for an existing tokio::Runtime (generally provided by tokio's macros).
    ///
    /// The returned Executor will have a lifecycle independent of the Runtime, meaning that dropping
    /// all clones of the Executor will not cause the Runtime to be shut down. Likewise, the owner of
    /// the Runtime must ensure that it is kept alive longer than all Executor instances, because
    /// existence of a Handle does not prevent a Runtime from shutting down. This is guaranteed by
    /// the scope of the tokio::{test, main} macros.
    ///
    pub fn new() -> Executor {
        Self {
            runtime: Arc::new(Mutex::new(None)),
            handle: Handle::current(),
        }
    }

    ///
    /// Gets a reference to a global static Executor with an owned tokio::Runtime, initializing it
    /// with the given thread configuration if this is the first usage.
    ///
    pub fn new_owned<F>(
        num_worker_threads: usize,
        max_threads: usize,
        on_thread_start: F,
    ) -> Result<Executor, String>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut runtime_builder = Builder::new_multi_thread();

        runtime_builder
            .worker_threads(num_worker_threads)
            .max_blocking_threads(max_threads - num_worker_threads)
            .enable_all();

        if env::var("SUBSTRATE_DEBUG").is_ok() {
            runtime_builder.on_thread_start(on_thread_start);
        };

        let runtime = runtime_builder
            .build()
            .map_err(|e| format!("Failed to start the runtime: {e}"))?;

        let handle = runtime.handle().clone();
        Ok(Executor {
            runtime: Arc::new(Mutex::new(Some(runtime))),
            handle,
        })
    }

    ///
    /// Creates a clone of this Executor which is disconnected from shutdown events. See the `Executor`
    /// rustdoc.
    ///
    pub fn to_borrowed(&self) -> Executor {
        Self {
            runtime: Arc::new(Mutex::new(None)),
            handle: self.handle.clone(),
        }
    }

    ///
    /// Enter the runtime context associated with this Executor. This should be used in situations
    /// where threads not started by the runtime need access to it via task-local variables.
    ///
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _context = self.handle.enter();
        f()
    }

    ///
    /// Run a Future on a tokio Runtime as a new Task, and return a Future handle to it.
    ///
    /// If the background Task exits abnormally, the given closure will be called to recover: usually
    /// it should convert the resulting Error to a relevant error type.
    ///
    pub fn spawn<O: Send + 'static, F: Future<Output = O> + Send + 'static>(
        &self,
        future: F,
        rescue_join_error: impl FnOnce(JoinError) -> O,
    ) -> impl Future<Output = O> {
        self.native_spawn(future).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    ///
    /// Run a Future on a tokio Runtime as a new Task, and return a JoinHandle.
    ///
    pub fn native_spawn<O: Send + 'static, F: Future<Output = O> + Send + 'static>(
        &self,
        future: F,
    ) -> JoinHandle<O> {
        self.handle.spawn(future_with_correct_context(future))
    }

    ///
    /// Run a Future and return its resolved Result.
    ///
    /// This should never be called from in a Future context, and should only ever be called in
    /// something that resembles a main method.
    ///
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future_with_correct_context(future))
    }

    ///
    /// Spawn a Future on a threadpool specifically reserved for I/O tasks which are allowed to be
    /// long-running.
    ///
    pub fn spawn_blocking<F: FnOnce() -> R + Send + 'static, R: Send + 'static>(
        &self,
        f: F,
        rescue_join_error: impl FnOnce(JoinError) -> R,
    ) -> impl Future<Output = R> {
        self.native_spawn_blocking(f).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    ///
    /// Spawn a closure on threads specifically reserved for I/O tasks which are allowed to be
    /// long-running, and return a JoinHandle. The caller's ambient context, if any, is attached
    /// on the blocking thread for the closure's duration and detached before it returns.
    ///
    pub fn native_spawn_blocking<F: FnOnce() -> R + Send + 'static, R: Send + 'static>(
        &self,
        f: F,
    ) -> JoinHandle<R> {
        let captured = current();
        self.handle.spawn_blocking(move || match captured {
            Some(ctx) => {
                let handle = substrate_context::attach(ctx);
                let result = f();
                let _ = substrate_context::detach(handle);
                result
            }
            None => f(),
        })
    }

    /// Return a reference to this executor's runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    ///
    /// A blocking call to shut down the Runtime associated with this "owned" Executor. If tasks do
    /// not shut down within the given timeout, they are leaked.
    ///
    /// This method has no effect for "borrowed" Executors: see the `Executor` rustdoc.
    ///
    pub fn shutdown(&self, timeout: Duration) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        let start = Instant::now();
        runtime.shutdown_timeout(timeout + Duration::from_millis(250));
        if start.elapsed() > timeout {
            log::warn!("Executor shutdown took unexpectedly long: tasks were likely leaked!");
        }
    }

    /// Returns true if `shutdown` has been called for this Executor. Always returns true for
    /// borrowed Executors.
    pub fn is_shutdown(&self) -> bool {
        self.runtime.lock().is_none()
    }
}

/// Store "tail" tasks: async tasks that can execute concurrently with the operation they were
/// spawned from. Tail tasks block completion of a session until all of them have completed
/// (subject to a timeout).
#[derive(Clone)]
pub struct TailTasks {
    inner: Arc<Mutex<Option<TailTasksInner>>>,
}

struct TailTasksInner {
    id_to_name: HashMap<Id, String>,
    task_set: JoinSet<()>,
}

impl TailTasks {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(TailTasksInner {
                id_to_name: HashMap::new(),
                task_set: JoinSet::new(),
            }))),
        }
    }

    /// Spawn a tail task with the given name.
    pub fn spawn_on<F>(&self, name: &str, handle: &Handle, task: F)
    where
        F: Future<Output = ()>,
        F: Send + 'static,
    {
        let task = future_with_correct_context(task);
        let mut guard = self.inner.lock();
        let inner = match &mut *guard {
            Some(inner) => inner,
            None => {
                log::warn!("Tail task `{name}` submitted after session completed.");
                return;
            }
        };

        let h = inner.task_set.spawn_on(task, handle);
        inner.id_to_name.insert(h.id(), name.to_string());
    }

    /// Wait for all tail tasks to complete subject to the given timeout. If tasks fail or do not
    /// complete, log that fact.
    pub async fn wait(self, timeout: Duration) {
        let mut inner = match self.inner.lock().take() {
            Some(inner) => inner,
            None => {
                log::debug!("Tail tasks awaited multiple times!");
                return;
            }
        };

        if inner.task_set.is_empty() {
            return;
        }

        log::debug!("waiting for {} tail task(s) to complete", inner.task_set.len());

        let mut timeout = tokio::time::sleep(timeout).boxed();

        loop {
            tokio::select! {
              // Use biased mode to prefer an expired timeout over joining on remaining tasks.
              biased;

              _ = &mut timeout => break,

              next_result = inner.task_set.join_next_with_id() => {
                match next_result {
                  Some(Ok((id, _))) => {
                    if let Some(name) = inner.id_to_name.get(&id) {
                      log::trace!("Tail task `{name}` completed successfully");
                    } else {
                      log::debug!("Tail task completed successfully but name not found.");
                    }
                    inner.id_to_name.remove(&id);
                  },
                  Some(Err(err)) => {
                    let name = inner.id_to_name.get(&err.id());
                    log::error!("Tail task `{name:?}` failed: {err:?}");
                  }
                  None => break,
                }
              }
            }
        }

        if inner.task_set.is_empty() {
            log::debug!("all tail tasks completed successfully");
        } else {
            log::debug!(
                "{} tail task(s) failed to complete within timeout: {}",
                inner.task_set.len(),
                inner.id_to_name.values().join(", "),
            );
            inner.task_set.abort_all();
        }
    }
}

/// Resolve the `(name, parent)` pair a wrapper should capture at construction time: the explicit
/// parent if one was supplied, otherwise whatever context is ambient on the constructing worker
/// of execution (which may be `None`).
fn capture_parent() -> Option<substrate_context::ExecutionContext> {
    current()
}

fn child_builder(
    name: &'static str,
    parent: &Option<substrate_context::ExecutionContext>,
) -> ContextBuilder {
    let builder = ContextBuilder::new(name).no_parent();
    match parent {
        Some(p) => builder.parent(p.clone()),
        None => builder,
    }
}

/// A callable that, when invoked, opens a child of the context that was ambient at construction
/// time, runs the wrapped closure within it, and closes it on every exit path (including panic
/// unwinding, via `ScopedContext`'s `Drop`).
///
/// If the captured parent context had already expired (or even already closed) by the time this
/// is invoked, a child is still opened — its deadline is `min(parent_deadline, now)`, i.e.
/// already expired — rather than skipping the call; it is the wrapped operation's own deadline
/// checks that are expected to abort quickly. This mirrors Java `Callable`/`Runnable` semantics,
/// which have no notion of "refuse to run".
pub struct PropagatingCallable<T> {
    name: &'static str,
    parent: Option<substrate_context::ExecutionContext>,
    op: Box<dyn FnOnce() -> T + Send>,
}

impl<T> PropagatingCallable<T> {
    pub fn new<F>(name: &'static str, op: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        PropagatingCallable {
            name,
            parent: capture_parent(),
            op: Box::new(op),
        }
    }

    /// Run the wrapped closure under a freshly opened, freshly attached child context.
    pub fn call(self) -> T {
        let _scope = child_builder(self.name, &self.parent).start();
        (self.op)()
    }
}

/// Like `PropagatingCallable`, but overrides the inherited deadline with an explicit timeout
/// (still clamped tighter by the captured parent's deadline, per the usual inheritance rule).
pub struct DeadlinedPropagatingCallable<T> {
    name: &'static str,
    parent: Option<substrate_context::ExecutionContext>,
    timeout: Duration,
    op: Box<dyn FnOnce() -> T + Send>,
}

impl<T> DeadlinedPropagatingCallable<T> {
    pub fn new<F>(name: &'static str, timeout: Duration, op: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        DeadlinedPropagatingCallable {
            name,
            parent: capture_parent(),
            timeout,
            op: Box::new(op),
        }
    }

    pub fn call(self) -> T {
        let _scope = child_builder(self.name, &self.parent)
            .timeout(self.timeout)
            .start();
        (self.op)()
    }
}

/// The no-return-value counterpart of `PropagatingCallable`.
pub struct PropagatingRunnable {
    name: &'static str,
    parent: Option<substrate_context::ExecutionContext>,
    op: Box<dyn FnOnce() + Send>,
}

impl PropagatingRunnable {
    pub fn new<F>(name: &'static str, op: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        PropagatingRunnable {
            name,
            parent: capture_parent(),
            op: Box::new(op),
        }
    }

    pub fn run(self) {
        let _scope = child_builder(self.name, &self.parent).start();
        (self.op)()
    }
}

/// Wrap a sequence of closures into `PropagatingCallable`s that all share the context that was
/// ambient at the time this is called, preserving order and count.
pub fn wrap_callables<T, F, I>(name: &'static str, ops: I) -> Vec<PropagatingCallable<T>>
where
    F: FnOnce() -> T + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let parent = capture_parent();
    ops.into_iter()
        .map(|op| PropagatingCallable {
            name,
            parent: parent.clone(),
            op: Box::new(op),
        })
        .collect()
}

/// Wrap a sequence of no-return-value closures into `PropagatingRunnable`s sharing one captured
/// context, preserving order and count.
pub fn wrap_runnables<F, I>(name: &'static str, ops: I) -> Vec<PropagatingRunnable>
where
    F: FnOnce() + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let parent = capture_parent();
    ops.into_iter()
        .map(|op| PropagatingRunnable {
            name,
            parent: parent.clone(),
            op: Box::new(op),
        })
        .collect()
}

#[cfg(test)]
mod tests;
