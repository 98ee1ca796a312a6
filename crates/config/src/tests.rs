use crate::{FactoryChoice, FactoryWrapperChoice, SubstrateConfig, DEFAULT_TIMEOUT};
use std::sync::Mutex;

// `std::env::var` is process-global state; serialize the tests that touch it so they don't
// observe each other's writes.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    let _guard = ENV_LOCK.lock().unwrap();
    for (k, v) in vars {
        std::env::set_var(k, v);
    }
    f();
    for (k, _) in vars {
        std::env::remove_var(k);
    }
}

#[test]
fn default_config_uses_eight_hour_timeout() {
    let _guard = ENV_LOCK.lock().unwrap();
    assert_eq!(SubstrateConfig::default().default_timeout, DEFAULT_TIMEOUT);
}

#[test]
fn unknown_keys_are_ignored() {
    with_env(&[("EXEC_CONTEXT_NOT_A_REAL_KEY", "whatever")], || {
        let config = SubstrateConfig::from_env().unwrap();
        assert_eq!(config, SubstrateConfig::default());
    });
}

#[test]
fn malformed_timeout_is_a_config_error() {
    with_env(
        &[("EXEC_CONTEXT_DEFAULT_TIMEOUT_NANOS", "not-a-number")],
        || {
            assert!(SubstrateConfig::from_env().is_err());
        },
    );
}

#[test]
fn valid_values_are_applied() {
    with_env(
        &[
            ("EXEC_CONTEXT_DEFAULT_TIMEOUT_NANOS", "1000"),
            ("EXEC_CONTEXT_FACTORY_CLASS", "default"),
        ],
        || {
            let config = SubstrateConfig::from_env().unwrap();
            assert_eq!(config.default_timeout.as_nanos(), 1000);
            assert_eq!(config.factory, FactoryChoice::Default);
        },
    );
}

#[test]
fn unknown_factory_class_is_a_config_error() {
    with_env(&[("EXEC_CONTEXT_FACTORY_CLASS", "not-a-factory")], || {
        assert!(SubstrateConfig::from_env().is_err());
    });
}

#[test]
fn logging_factory_wrapper_is_parsed() {
    with_env(&[("EXEC_CONTEXT_FACTORY_WRAPPER_CLASS", "logging")], || {
        let config = SubstrateConfig::from_env().unwrap();
        assert_eq!(config.factory_wrapper, FactoryWrapperChoice::Logging);
    });
}
