//! Performance profile: voltage tiers, clock rates and bus use-case selection.

use crate::config::PowerConfig;
use crate::error::PmError;

/// Voltage corner the core clock runs at. Ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoltageLevel {
    Unspecified = 0,
    Svs = 1,
    Nominal = 2,
    Turbo = 3,
}

impl TryFrom<u32> for VoltageLevel {
    type Error = PmError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(VoltageLevel::Unspecified),
            1 => Ok(VoltageLevel::Svs),
            2 => Ok(VoltageLevel::Nominal),
            3 => Ok(VoltageLevel::Turbo),
            other => Err(PmError::InvalidVoltage(other)),
        }
    }
}

/// Tier required to sustain `bandwidth_mbps`, before applying any caller floor.
pub fn tier_for_bandwidth(cfg: &PowerConfig, bandwidth_mbps: u32) -> VoltageLevel {
    if !cfg.enable_clock_scaling {
        return VoltageLevel::Nominal;
    }
    if bandwidth_mbps >= cfg.bw_threshold_turbo_mbps {
        VoltageLevel::Turbo
    } else if bandwidth_mbps >= cfg.bw_threshold_nominal_mbps {
        VoltageLevel::Nominal
    } else {
        VoltageLevel::Svs
    }
}

/// Clock rate for a resolved tier. `Unspecified` never survives `max(tier, floor)`, but maps to
/// SVS for completeness.
pub fn clock_rate_for(cfg: &PowerConfig, level: VoltageLevel) -> u32 {
    match level {
        VoltageLevel::Unspecified | VoltageLevel::Svs => cfg.clock_rates.svs_hz,
        VoltageLevel::Nominal => cfg.clock_rates.nominal_hz,
        VoltageLevel::Turbo => cfg.clock_rates.turbo_hz,
    }
}

/// Resolve a profile request to a clock rate.
pub fn resolve_rate(cfg: &PowerConfig, floor: VoltageLevel, bandwidth_mbps: u32) -> u32 {
    let needed = tier_for_bandwidth(cfg, bandwidth_mbps).max(floor);
    clock_rate_for(cfg, needed)
}

/// Bus scaling use-case index to vote while the core clock runs at `rate_hz`.
pub fn bus_vote_for_rate(cfg: &PowerConfig, rate_hz: u32) -> u32 {
    let rates = &cfg.clock_rates;
    if rate_hz == rates.svs_hz {
        1
    } else if rate_hz == rates.nominal_hz {
        if cfg.bus_usecases <= 2 {
            1
        } else {
            2
        }
    } else if rate_hz == rates.turbo_hz {
        cfg.bus_usecases.saturating_sub(1).max(1)
    } else {
        tracing::warn!(rate_hz, "clock rate does not match any bus use-case");
        1
    }
}
