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

//! Process-start configuration for the execution-context substrate.
//!
//! Read once, via environment-equivalent key-value lookups. Unknown keys are ignored; a
//! malformed value is a startup-time `ConfigError`. Factory and attacher selection is a closed
//! enum resolved by a pre-linked registry rather than a dynamically loaded class name, so every
//! reachable implementation is known and linked at compile time.

use std::time::Duration;

use substrate_error::SubstrateError;

const DEFAULT_TIMEOUT_ENV: &str = "EXEC_CONTEXT_DEFAULT_TIMEOUT_NANOS";
const FACTORY_ENV: &str = "EXEC_CONTEXT_FACTORY_CLASS";
const FACTORY_WRAPPER_ENV: &str = "EXEC_CONTEXT_FACTORY_WRAPPER_CLASS";
const ATTACHER_ENV: &str = "EXEC_CONTEXT_TL_ATTACHER_CLASS";

/// Default deadline when a context is created with no explicit timeout and no parent: eight
/// hours.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);

/// Which `ExecutionContextFactory` implementation to construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FactoryChoice {
    #[default]
    Default,
}

/// An optional decorator wrapping the chosen factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FactoryWrapperChoice {
    #[default]
    None,
    /// Logs every context start/create-detached call before delegating to the chosen factory.
    Logging,
}

/// Which context-registry attacher implementation to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AttacherChoice {
    #[default]
    Default,
}

/// Process-wide configuration, read once at start and immutable thereafter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubstrateConfig {
    pub default_timeout: Duration,
    pub factory: FactoryChoice,
    pub factory_wrapper: FactoryWrapperChoice,
    pub attacher: AttacherChoice,
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        SubstrateConfig {
            default_timeout: DEFAULT_TIMEOUT,
            factory: FactoryChoice::default(),
            factory_wrapper: FactoryWrapperChoice::default(),
            attacher: AttacherChoice::default(),
        }
    }
}

impl SubstrateConfig {
    /// Read configuration from environment-equivalent key-value lookups. Unknown keys are
    /// ignored; a present-but-malformed value is a fatal `ConfigError`.
    pub fn from_env() -> Result<SubstrateConfig, SubstrateError> {
        let mut config = SubstrateConfig::default();

        if let Ok(raw) = std::env::var(DEFAULT_TIMEOUT_ENV) {
            let nanos: u64 = raw.parse().map_err(|_| {
                SubstrateError::ConfigError(format!(
                    "{DEFAULT_TIMEOUT_ENV} must be a non-negative integer nanosecond count, got {raw:?}"
                ))
            })?;
            config.default_timeout = Duration::from_nanos(nanos);
        }

        if let Ok(raw) = std::env::var(FACTORY_ENV) {
            config.factory = match raw.as_str() {
                "default" => FactoryChoice::Default,
                other => {
                    return Err(SubstrateError::ConfigError(format!(
                        "unknown {FACTORY_ENV} value: {other:?}"
                    )))
                }
            };
        }

        if let Ok(raw) = std::env::var(FACTORY_WRAPPER_ENV) {
            config.factory_wrapper = match raw.as_str() {
                "none" => FactoryWrapperChoice::None,
                "logging" => FactoryWrapperChoice::Logging,
                other => {
                    return Err(SubstrateError::ConfigError(format!(
                        "unknown {FACTORY_WRAPPER_ENV} value: {other:?}"
                    )))
                }
            };
        }

        if let Ok(raw) = std::env::var(ATTACHER_ENV) {
            config.attacher = match raw.as_str() {
                "default" => AttacherChoice::Default,
                other => {
                    return Err(SubstrateError::ConfigError(format!(
                        "unknown {ATTACHER_ENV} value: {other:?}"
                    )))
                }
            };
        }

        log::debug!("loaded execution-context substrate config: {config:?}");
        Ok(config)
    }
}

#[cfg(test)]
mod tests;
