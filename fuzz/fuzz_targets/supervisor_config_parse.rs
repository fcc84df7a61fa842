#![no_main]

use argus_supervisor::{apply_env_overrides, SupervisorConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    if let Ok(config) = serde_json::from_str::<SupervisorConfig>(&raw) {
        if config.validate().is_ok() {
            assert!(config.max_processes > 0);
            assert!(config.worker_count > 0);
        }
    }

    // Treat the input as a value for every override key.
    let mut config = SupervisorConfig::default();
    let value = raw.to_string();
    if apply_env_overrides(&mut config, |_| Some(value.clone())).is_ok() {
        let _ = config.validate();
    }
});
