use std::env;

use aflgo_pass::{config::HardeningMode, EnvConfig};
use serial_test::serial;

const VARS: [&str; 5] = [
    "AFL_INST_RATIO",
    "AFLGO_INST_RATIO",
    "AFLGO_SELECTIVE",
    "AFL_QUIET",
    "AFL_USE_ASAN",
];

fn clear() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_env_config_from_process_env() {
    clear();
    env::set_var("AFL_INST_RATIO", "50");
    env::set_var("AFLGO_SELECTIVE", "1");
    env::set_var("AFL_QUIET", "1");
    env::set_var("AFL_USE_ASAN", "1");
    let config = EnvConfig::from_env().unwrap();
    assert_eq!(config.inst_ratio, 50);
    assert_eq!(config.dinst_ratio, 100);
    assert!(config.selective);
    assert!(config.quiet);
    assert_eq!(config.hardening, HardeningMode::Sanitized);

    env::set_var("AFLGO_INST_RATIO", "250");
    assert!(EnvConfig::from_env().is_err());
    clear();
}
