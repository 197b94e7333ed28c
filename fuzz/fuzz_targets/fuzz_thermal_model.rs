#![no_main]
use fuseguard::breaker::{BreakerCharacteristic, BreakerThermalModel};
use libfuzzer_sys::fuzz_target;
use std::time::Duration;

fuzz_target!(|data: &[u8]| {
    // Ratios and tick lengths from little-endian f64 pairs
    for chunk in data.chunks_exact(16) {
        let mut ratio = [0u8; 8];
        let mut tick = [0u8; 8];
        ratio.copy_from_slice(&chunk[..8]);
        tick.copy_from_slice(&chunk[8..]);
        let ratio = f64::from_le_bytes(ratio);
        let tick_secs = f64::from_le_bytes(tick).abs();
        let Ok(tick) = Duration::try_from_secs_f64(tick_secs) else {
            continue;
        };

        for characteristic in [BreakerCharacteristic::B, BreakerCharacteristic::C] {
            let model = BreakerThermalModel::for_characteristic(characteristic);
            let _ = model.dwell_allowed(ratio);
            let increment = model.risk_increment(ratio, tick);
            assert!(increment >= 0.0);
        }
    }
});
