#![no_main]
//! Fuzz target for harness config TOML parsing
//!
//! Feeds random bytes as TOML to the config parser to find panics,
//! hangs, or unexpected behavior in deserialization and validation.

use libfuzzer_sys::fuzz_target;

use wmprobe::config::Config;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = toml::from_str::<Config>(s) {
            // Derived settings must be computable for anything that validates
            if config.validate().is_ok() {
                let _ = config.manager_options();
                let _ = config.reparent_policy().backoff().take(8).count();
            }
        }
    }
});
