//! Per-worker-of-execution stack of attached contexts.
//!
//! Two storage tiers exist: a native thread gets a thread-local stack, while code running inside
//! a `tokio` task that has been explicitly scoped (via `substrate-task`'s propagating wrappers)
//! gets a task-local stack instead. Reads and writes prefer the task-local tier when one is in
//! scope, and fall back to the thread-local tier otherwise.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::ThreadId;

use once_cell::sync::OnceCell;
use substrate_error::SubstrateError;

use crate::ExecutionContext;

thread_local! {
    static THREAD_STACK: RefCell<Vec<ExecutionContext>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_STACK: RefCell<Vec<ExecutionContext>>;
}

/// Identity of the worker of execution an `AttachHandle` was produced on, so `detach` can
/// reject a handle presented from a different worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerId {
    Thread(ThreadId),
    Task(tokio::task::Id),
}

fn current_worker_id() -> WorkerId {
    match tokio::task::try_id() {
        Some(id) => WorkerId::Task(id),
        None => WorkerId::Thread(std::thread::current().id()),
    }
}

fn with_stack<R>(f: impl FnOnce(&RefCell<Vec<ExecutionContext>>) -> R) -> R {
    match TASK_STACK.try_with(|stack| f(stack)) {
        Ok(result) => result,
        Err(_) => THREAD_STACK.with(f),
    }
}

/// A token returned by `attach`; its only valid operation is `detach`.
pub struct AttachHandle {
    worker: WorkerId,
    ctx: ExecutionContext,
}

fn push_attach(ctx: ExecutionContext) -> AttachHandle {
    let worker = current_worker_id();
    with_stack(|stack| stack.borrow_mut().push(ctx.clone()));
    AttachHandle { worker, ctx }
}

fn pop_detach(handle: AttachHandle) -> Result<(), SubstrateError> {
    let worker_now = current_worker_id();
    if worker_now != handle.worker {
        log::warn!("execution context detached from a different worker of execution than it was attached on");
        return Err(SubstrateError::MisuseError(
            "detach called on a different worker of execution than attach".to_string(),
        ));
    }
    with_stack(|stack| {
        let mut s = stack.borrow_mut();
        match s.last() {
            Some(top) if top.is_same_as(&handle.ctx) => {
                s.pop();
                Ok(())
            }
            _ => {
                log::warn!(
                    "execution context detach found a different context at the top of the stack; a sibling was leaked"
                );
                Err(SubstrateError::MisuseError(
                    "detach called when the top of the stack was not the attached context"
                        .to_string(),
                ))
            }
        }
    })
}

/// Pluggable attachment scheme: alternate implementations may, for example, also write the
/// context id into a diagnostic slot consumed by a logging collaborator.
pub trait Attacher: Send + Sync {
    fn attach(&self, ctx: ExecutionContext) -> AttachHandle;
    fn detach(&self, handle: AttachHandle) -> Result<(), SubstrateError>;
}

/// The default attacher: the per-worker stack described above, and nothing else.
#[derive(Debug, Default)]
pub struct DefaultAttacher;

impl Attacher for DefaultAttacher {
    fn attach(&self, ctx: ExecutionContext) -> AttachHandle {
        push_attach(ctx)
    }

    fn detach(&self, handle: AttachHandle) -> Result<(), SubstrateError> {
        pop_detach(handle)
    }
}

static ATTACHER: OnceCell<Arc<dyn Attacher>> = OnceCell::new();

/// Install the process-wide attacher built from `config`. Must be called at most once; a second
/// call is a `ConfigError`.
pub fn init_attacher(config: &substrate_config::SubstrateConfig) -> Result<(), SubstrateError> {
    let attacher: Arc<dyn Attacher> = match config.attacher {
        substrate_config::AttacherChoice::Default => Arc::new(DefaultAttacher),
    };
    ATTACHER.set(attacher).map_err(|_| {
        SubstrateError::ConfigError("context attacher already initialized".to_string())
    })
}

fn attacher() -> Arc<dyn Attacher> {
    ATTACHER.get_or_init(|| Arc::new(DefaultAttacher)).clone()
}

/// Push `ctx` onto the current worker's context stack and return a handle that can later detach
/// it. Balanced with exactly one `detach` call. Routed through the configured `Attacher`.
pub fn attach(ctx: ExecutionContext) -> AttachHandle {
    attacher().attach(ctx)
}

/// Pop `handle`'s context from the stack it was pushed onto.
///
/// Fails loudly if the calling worker differs from the one `attach` was called on, or if the top
/// of the stack is not the expected context (a sibling was leaked without being detached first).
/// Routed through the configured `Attacher`.
pub fn detach(handle: AttachHandle) -> Result<(), SubstrateError> {
    attacher().detach(handle)
}

/// The context at the top of the current worker's stack, or `None` if the stack is empty. This
/// is never an error: an empty stack is a legitimate "no current context" state.
pub fn current() -> Option<ExecutionContext> {
    with_stack(|stack| stack.borrow().last().cloned())
}

/// Run `f` with `ctx` attached as the current context of a fresh task-local stack, suitable for
/// propagating a captured context into a newly spawned task (used by `substrate-task`).
pub async fn scope_task<F>(ctx: Option<ExecutionContext>, f: F) -> F::Output
where
    F: std::future::Future,
{
    let stack = RefCell::new(ctx.into_iter().collect::<Vec<_>>());
    TASK_STACK.scope(stack, f).await
}
