//! Clock tree and bus vote sequencing for the IPA block.
//!
//! [`ClockVoting`] is owned by the active-clients gate and only ever driven while the gate's
//! transition lock is held, so at most one enable/disable/rate change is in flight.

use crate::config::PowerConfig;
use crate::error::HwError;
use crate::hw::Platform;
use crate::perf;

#[derive(Debug)]
pub struct ClockVoting {
    cfg: PowerConfig,
    platform: Platform,
    curr_rate_hz: u32,
    enabled: bool,
}

impl ClockVoting {
    /// The initial profile is turbo until a client asks for something lower.
    pub fn new(cfg: PowerConfig, platform: Platform) -> Self {
        let curr_rate_hz = cfg.clock_rates.turbo_hz;
        Self {
            cfg,
            platform,
            curr_rate_hz,
            enabled: false,
        }
    }

    pub fn config(&self) -> &PowerConfig {
        &self.cfg
    }

    pub fn current_rate_hz(&self) -> u32 {
        self.curr_rate_hz
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Power the block up: clocks first, pipes resumed last, then the bus vote.
    ///
    /// Only a core clock enable failure is returned; everything after it is best effort and the
    /// sequence continues so the block ends up as powered as the hardware allows.
    pub fn enable(&mut self) -> Result<(), HwError> {
        tracing::debug!(rate_hz = self.curr_rate_hz, "enabling IPA clocks and bus voting");

        let core = self.platform.core_clock.enable();
        if let Err(err) = &core {
            tracing::error!("failed to enable core clock: {err}");
        }
        if let Err(err) = self.platform.core_clock.set_rate(self.curr_rate_hz) {
            tracing::error!(rate_hz = self.curr_rate_hz, "failed to set core clock rate: {err}");
        }
        if let Some(aux) = &self.platform.aux_clock {
            if let Err(err) = aux.enable() {
                tracing::error!("failed to enable aux clock: {err}");
            }
        }
        self.platform.coprocessor.notify_clock_state(true);
        self.platform.pipes.resume_all();
        self.enabled = true;

        self.vote_bus();
        core
    }

    /// Gate the block: pipes suspended before any clock goes away, bus vote withdrawn last.
    pub fn disable(&mut self) {
        tracing::debug!("disabling IPA clocks and bus voting");

        self.platform.pipes.suspend_all();
        self.platform.coprocessor.notify_clock_state(false);
        self.platform.core_clock.disable();
        if let Some(aux) = &self.platform.aux_clock {
            aux.disable();
        }
        self.enabled = false;

        if self.cfg.hw_mode.uses_bus_scaling() {
            if let Err(err) = self.platform.bus.vote(0) {
                tracing::warn!("failed to withdraw bus vote: {err}");
            }
        }
    }

    /// Record a new target rate. When `apply` is set the clocks are running and the rate and bus
    /// vote are updated immediately; otherwise the next [`ClockVoting::enable`] picks it up.
    ///
    /// Returns whether the rate changed.
    pub fn set_rate(&mut self, rate_hz: u32, apply: bool) -> bool {
        if rate_hz == self.curr_rate_hz {
            tracing::debug!(rate_hz, "same voltage, nothing to do");
            return false;
        }
        tracing::debug!(from = self.curr_rate_hz, to = rate_hz, "setting clock rate");
        self.curr_rate_hz = rate_hz;

        if apply {
            if let Err(err) = self.platform.core_clock.set_rate(rate_hz) {
                tracing::error!(rate_hz, "failed to set core clock rate: {err}");
            }
            self.vote_bus();
        } else {
            tracing::debug!("clocks are gated, not setting rate");
        }
        true
    }

    fn vote_bus(&self) {
        if !self.cfg.hw_mode.uses_bus_scaling() {
            return;
        }
        let usecase = perf::bus_vote_for_rate(&self.cfg, self.curr_rate_hz);
        if let Err(err) = self.platform.bus.vote(usecase) {
            tracing::warn!(usecase, "bus vote failed, clocks stay enabled: {err}");
        }
    }
}
