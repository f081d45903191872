#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ipa_pm::sim::SimHardware;
use ipa_pm::{IpaPower, PowerConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Default configuration with a short release debounce so tests do not sit in timers.
pub fn fast_config() -> PowerConfig {
    PowerConfig {
        release_debounce: Duration::from_millis(10),
        ..PowerConfig::default()
    }
}

pub fn powered(cfg: PowerConfig) -> (Arc<SimHardware>, IpaPower) {
    init_tracing();
    let sim = SimHardware::new();
    let power = IpaPower::new(cfg, sim.platform()).expect("gate init");
    (sim, power)
}

/// A gate whose proxy vote has already been dropped, with an empty hardware trace.
pub fn gated(cfg: PowerConfig) -> (Arc<SimHardware>, IpaPower) {
    let (sim, power) = powered(cfg);
    power.release_proxy_vote();
    sim.take_events();
    (sim, power)
}
