#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Whatever parses must either validate or be rejected, never panic
    if let Ok(config) = serde_yaml::from_str::<fuseguard::config::Config>(text) {
        let _ = config.validate();
        let _ = fuseguard::breaker::BreakerThermalModel::from_config(
            &config.balancer.breaker_curve,
        );
    }
});
