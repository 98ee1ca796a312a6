//! Pluggable construction of `ExecutionContext`s.

use std::ops::Deref;
use std::sync::Arc;

use substrate_error::SubstrateError;

use crate::registry::{self, AttachHandle};
use crate::ExecutionContext;

/// Parameters accepted by `ExecutionContextFactory::start`, gathered into one struct because
/// Rust has no overloading: the "full surface" convenience constructors a language with
/// overloading would expose directly are expressed as a builder (`ContextBuilder`) over this
/// struct instead.
pub struct StartParams {
    pub name: &'static str,
    pub id: Option<String>,
    pub parent: Option<ExecutionContext>,
    pub relation: crate::Relation,
    pub start_nanos: i64,
    pub deadline_nanos: i64,
}

/// Single entry point for constructing contexts. Chosen once at process start from
/// configuration and immutable thereafter; an optional wrapper may decorate it with orthogonal
/// concerns (tracing export, diagnostics) without call sites changing.
pub trait ExecutionContextFactory: Send + Sync {
    /// Construct and attach a context as the current one of the calling worker of execution.
    fn start(&self, params: StartParams) -> ScopedContext;

    /// Construct a context without attaching it anywhere.
    fn create_detached(&self, params: StartParams) -> ExecutionContext;
}

impl<T: ExecutionContextFactory + ?Sized> ExecutionContextFactory for Arc<T> {
    fn start(&self, params: StartParams) -> ScopedContext {
        (**self).start(params)
    }

    fn create_detached(&self, params: StartParams) -> ExecutionContext {
        (**self).create_detached(params)
    }
}

/// The default factory: plain construction via `ExecutionContext::new`, no decoration.
#[derive(Debug, Default)]
pub struct DefaultExecutionContextFactory;

impl ExecutionContextFactory for DefaultExecutionContextFactory {
    fn start(&self, params: StartParams) -> ScopedContext {
        let ctx = ExecutionContext::new(params);
        let handle = registry::attach(ctx.clone());
        ScopedContext {
            ctx,
            handle: Some(handle),
        }
    }

    fn create_detached(&self, params: StartParams) -> ExecutionContext {
        ExecutionContext::new(params)
    }
}

/// A decorator that logs every context start before delegating to an inner factory. One
/// concrete instance of the factory wrapper extension point; other wrappers (tracing export,
/// counters) compose the same way.
pub struct LoggingFactoryWrapper<F> {
    inner: F,
}

impl<F> LoggingFactoryWrapper<F> {
    pub fn new(inner: F) -> Self {
        LoggingFactoryWrapper { inner }
    }
}

impl<F: ExecutionContextFactory> ExecutionContextFactory for LoggingFactoryWrapper<F> {
    fn start(&self, params: StartParams) -> ScopedContext {
        log::debug!("starting execution context {:?}", params.name);
        self.inner.start(params)
    }

    fn create_detached(&self, params: StartParams) -> ExecutionContext {
        log::debug!("creating detached execution context {:?}", params.name);
        self.inner.create_detached(params)
    }
}

/// RAII handle for a context that is both open and attached. Dropping it detaches the context
/// from the worker-of-execution stack (logging, not panicking, if that fails) and then closes
/// it, so the caller runs work under the context and it is torn down on every exit path,
/// including an early return or a panic unwinding through it.
pub struct ScopedContext {
    ctx: ExecutionContext,
    handle: Option<AttachHandle>,
}

impl ScopedContext {
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }
}

impl Deref for ScopedContext {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        &self.ctx
    }
}

impl Drop for ScopedContext {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = registry::detach(handle) {
                log::warn!("failed to detach execution context on scope exit: {e}");
            }
        }
        self.ctx.close();
    }
}

static FACTORY: once_cell::sync::OnceCell<Arc<dyn ExecutionContextFactory>> =
    once_cell::sync::OnceCell::new();

/// Install the process-wide factory built from `config`. Must be called at most once; a second
/// call is a `ConfigError`. The factory instance is a process-wide singleton, initialized once
/// at start and immutable thereafter.
pub fn init_factory(config: &substrate_config::SubstrateConfig) -> Result<(), SubstrateError> {
    let base: Arc<dyn ExecutionContextFactory> = match config.factory {
        substrate_config::FactoryChoice::Default => Arc::new(DefaultExecutionContextFactory),
    };
    let wrapped: Arc<dyn ExecutionContextFactory> = match config.factory_wrapper {
        substrate_config::FactoryWrapperChoice::None => base,
        substrate_config::FactoryWrapperChoice::Logging => {
            Arc::new(LoggingFactoryWrapper::new(base))
        }
    };
    FACTORY.set(wrapped).map_err(|_| {
        SubstrateError::ConfigError("execution context factory already initialized".to_string())
    })
}

pub(crate) fn factory() -> Arc<dyn ExecutionContextFactory> {
    FACTORY
        .get_or_init(|| Arc::new(DefaultExecutionContextFactory))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(name: &'static str) -> StartParams {
        StartParams {
            name,
            id: None,
            parent: None,
            relation: crate::Relation::ChildOf,
            start_nanos: 0,
            deadline_nanos: i64::MAX,
        }
    }

    #[test]
    fn logging_wrapper_delegates_create_detached_to_the_inner_factory() {
        let wrapper = LoggingFactoryWrapper::new(DefaultExecutionContextFactory);
        let ctx = wrapper.create_detached(params("wrapped"));
        assert_eq!(ctx.name(), "wrapped");
        assert!(!ctx.is_closed());
    }

    #[test]
    fn logging_wrapper_delegates_start_to_the_inner_factory() {
        let wrapper = LoggingFactoryWrapper::new(DefaultExecutionContextFactory);
        let scoped = wrapper.start(params("wrapped-start"));
        assert_eq!(scoped.context().name(), "wrapped-start");
        assert!(registry::current().unwrap().is_same_as(scoped.context()));
    }
}
