#![allow(dead_code)]

use std::sync::Arc;

use mt7927::sim::SimDevice;
use mt7927::{Config, DeviceContext, HostDma, PollBound};

pub type SimContext = DeviceContext<Arc<SimDevice>, Arc<HostDma>>;

/// Default configuration with every delay removed.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.ownership = PollBound::new(10, 0);
    config.reset.hold_ms = 5;
    config.reset.init_done = PollBound::new(10, 0);
    config.mcu_idle = PollBound::new(10, 0);
    config.loader.settle_us = 0;
    config
}

/// A context on a simulated chip whose MCU consumes descriptors.
pub fn sim_context(config: Config) -> (Arc<SimDevice>, Arc<HostDma>, SimContext) {
    let dma = Arc::new(HostDma::new());
    let sim = Arc::new(SimDevice::with_dma(dma.clone()));
    let ctx = DeviceContext::new(sim.clone(), dma.clone(), config).expect("valid config");
    (sim, dma, ctx)
}

/// Deterministic filler that differs per position.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
