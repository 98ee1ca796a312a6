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

//! A per-operation execution context: a name, an id, a start time, a hard deadline, a
//! parent/child relation, and the ability to be attached to the currently-running worker of
//! execution as an implicit ambient value that callees may read without parameter threading.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use substrate_time::{deadline_from, now_nanos, tighter_deadline, TimeUnit};

mod deadline;
mod factory;
mod registry;

pub use deadline::{
    compute_deadline, compute_timeout_deadline, millis_to_deadline, seconds_to_deadline,
    time_relative_to_deadline, time_to_deadline, TimeoutDeadline,
};
pub use factory::{
    init_factory, DefaultExecutionContextFactory, ExecutionContextFactory, LoggingFactoryWrapper,
    ScopedContext, StartParams,
};
pub use registry::{
    attach, current, detach, init_attacher, scope_task, Attacher, AttachHandle, DefaultAttacher,
};

/// The only two parent/child relations this substrate distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// The child's lifetime and deadline are bound to the parent's.
    ChildOf,
    /// The child is related to the parent for tracing purposes only. Deadline inheritance still
    /// follows the same construction rules whenever a parent is present, regardless of relation;
    /// `Relation` only tags how the edge should be interpreted by diagnostics.
    FollowsFrom,
}

struct ExecutionContextInner {
    name: &'static str,
    id: OnceLock<String>,
    supplied_id: Option<String>,
    parent: Option<ExecutionContext>,
    relation: Relation,
    start_time_nanos: i64,
    deadline_nanos: i64,
    closed: AtomicBool,
    attachments: Mutex<HashSet<String>>,
    children: Mutex<Vec<Weak<ExecutionContextInner>>>,
}

/// An opaque, cheaply-cloneable handle to a context. Cloning shares the same underlying state
/// (it's an `Arc`); it does not create a new context.
#[derive(Clone)]
pub struct ExecutionContext(Arc<ExecutionContextInner>);

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.0.name)
            .field("id", &self.id())
            .field("relation", &self.0.relation)
            .field("deadline_nanos", &self.0.deadline_nanos)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ExecutionContext {
    fn new(params: StartParams) -> ExecutionContext {
        let inner = Arc::new(ExecutionContextInner {
            name: params.name,
            id: OnceLock::new(),
            supplied_id: params.id,
            parent: params.parent.clone(),
            relation: params.relation,
            start_time_nanos: params.start_nanos,
            deadline_nanos: params.deadline_nanos,
            closed: AtomicBool::new(false),
            attachments: Mutex::new(HashSet::new()),
            children: Mutex::new(Vec::new()),
        });
        if let Some(parent) = &params.parent {
            parent.0.children.lock().push(Arc::downgrade(&inner));
        }
        ExecutionContext(inner)
    }

    /// Two handles refer to the same underlying context.
    pub fn is_same_as(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// The context's id, lazily generated on first use if none was supplied at construction.
    pub fn id(&self) -> &str {
        match &self.0.supplied_id {
            Some(id) => id,
            None => self.0.id.get_or_init(substrate_uid::generate),
        }
    }

    pub fn parent(&self) -> Option<&ExecutionContext> {
        self.0.parent.as_ref()
    }

    pub fn relation(&self) -> Relation {
        self.0.relation
    }

    pub fn start_time_nanos(&self) -> i64 {
        self.0.start_time_nanos
    }

    pub fn deadline_nanos(&self) -> i64 {
        self.0.deadline_nanos
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    pub fn add_attachment(&self, tag: impl Into<String>) {
        self.0.attachments.lock().insert(tag.into());
    }

    pub fn has_attachment(&self, tag: &str) -> bool {
        self.0.attachments.lock().contains(tag)
    }

    /// Close this context, cascading to any still-open children first. Idempotent: a second
    /// close is a no-op.
    pub fn close(&self) {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = std::mem::take(&mut *self.0.children.lock());
        for weak_child in children {
            if let Some(child_inner) = weak_child.upgrade() {
                ExecutionContext(child_inner).close();
            }
        }
    }
}

/// Convenience builder over `StartParams`, standing in for the overloaded `start(...)`
/// constructors a language with overloading would expose directly.
pub struct ContextBuilder {
    name: &'static str,
    id: Option<String>,
    parent: Option<ExecutionContext>,
    relation: Relation,
    timeout: Option<Duration>,
}

impl ContextBuilder {
    pub fn new(name: &'static str) -> Self {
        ContextBuilder {
            name,
            id: None,
            parent: current(),
            relation: Relation::ChildOf,
            timeout: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn parent(mut self, parent: ExecutionContext) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Explicitly start with no parent, even if a context is currently attached.
    pub fn no_parent(mut self) -> Self {
        self.parent = None;
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relation = relation;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_params(self) -> StartParams {
        let start_nanos = now_nanos();
        let deadline_nanos = match (&self.timeout, &self.parent) {
            (Some(t), Some(p)) => tighter_deadline(
                deadline_from(start_nanos, t.as_nanos() as i64, TimeUnit::Nanos),
                p.deadline_nanos(),
            ),
            (Some(t), None) => deadline_from(start_nanos, t.as_nanos() as i64, TimeUnit::Nanos),
            (None, Some(p)) => p.deadline_nanos(),
            (None, None) => deadline_from(
                start_nanos,
                config().default_timeout.as_nanos() as i64,
                TimeUnit::Nanos,
            ),
        };
        StartParams {
            name: self.name,
            id: self.id,
            parent: self.parent,
            relation: self.relation,
            start_nanos,
            deadline_nanos,
        }
    }

    /// Construct the context and attach it as the current one of the calling worker of
    /// execution. The returned `ScopedContext` detaches and closes on drop.
    pub fn start(self) -> ScopedContext {
        factory::factory().start(self.into_params())
    }

    /// Construct the context without attaching it anywhere.
    pub fn create_detached(self) -> ExecutionContext {
        factory::factory().create_detached(self.into_params())
    }
}

/// Start a context named `name`, inheriting the ambient current context as parent (if any) and
/// the process default timeout, attached to the calling worker of execution.
pub fn start(name: &'static str) -> ScopedContext {
    ContextBuilder::new(name).start()
}

/// Generate a fresh, process-unique context id without constructing a context.
pub fn gen_id() -> String {
    substrate_uid::generate()
}

static CONFIG: OnceLock<substrate_config::SubstrateConfig> = OnceLock::new();

/// Install process-wide configuration and the factory it selects. Must be called at most once,
/// before any context is created; a second call is a `ConfigError`.
pub fn init(
    config: substrate_config::SubstrateConfig,
) -> Result<(), substrate_error::SubstrateError> {
    init_factory(&config)?;
    init_attacher(&config)?;
    CONFIG.set(config).map_err(|_| {
        substrate_error::SubstrateError::ConfigError(
            "execution context substrate already initialized".to_string(),
        )
    })
}

pub(crate) fn config() -> substrate_config::SubstrateConfig {
    CONFIG
        .get_or_init(substrate_config::SubstrateConfig::default)
        .clone()
}

#[cfg(test)]
mod tests;
