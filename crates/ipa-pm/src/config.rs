use std::time::Duration;

/// IPA v3.0 core clock rates.
pub const DEFAULT_CLK_RATE_SVS_HZ: u32 = 75_000_000;
pub const DEFAULT_CLK_RATE_NOMINAL_HZ: u32 = 150_000_000;
pub const DEFAULT_CLK_RATE_TURBO_HZ: u32 = 200_000_000;

pub const DEFAULT_BW_THRESHOLD_NOMINAL_MBPS: u32 = 600;
pub const DEFAULT_BW_THRESHOLD_TURBO_MBPS: u32 = 1000;

/// Number of use-cases in the bus scaling table (index 0 is the "off" vote).
pub const DEFAULT_BUS_USECASES: u32 = 4;

pub const DEFAULT_LOG_LINES: usize = 500;
pub const DEFAULT_LOG_LINE_LEN: usize = 100;
pub const DEFAULT_LOG_NAME_LEN: usize = 40;

/// Debounce applied to transport resource releases.
pub const DEFAULT_RELEASE_DEBOUNCE: Duration = Duration::from_millis(100);

pub const DEFAULT_NUM_PIPES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HwMode {
    #[default]
    Normal,
    /// Virtual platform: there is no bus to vote on.
    Virtual,
    Emulation,
}

impl HwMode {
    pub fn uses_bus_scaling(self) -> bool {
        self != HwMode::Virtual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRates {
    pub svs_hz: u32,
    pub nominal_hz: u32,
    pub turbo_hz: u32,
}

impl Default for ClockRates {
    fn default() -> Self {
        Self {
            svs_hz: DEFAULT_CLK_RATE_SVS_HZ,
            nominal_hz: DEFAULT_CLK_RATE_NOMINAL_HZ,
            turbo_hz: DEFAULT_CLK_RATE_TURBO_HZ,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PowerConfig {
    pub hw_mode: HwMode,
    pub clock_rates: ClockRates,
    /// Bandwidth at or above which the nominal tier is required.
    pub bw_threshold_nominal_mbps: u32,
    /// Bandwidth at or above which the turbo tier is required.
    pub bw_threshold_turbo_mbps: u32,
    /// When false every profile request resolves to the nominal tier (before the floor).
    pub enable_clock_scaling: bool,
    /// Number of entries in the bus scaling table.
    pub bus_usecases: u32,
    /// Lines kept in the circular active-clients text log.
    pub log_lines: usize,
    /// Maximum length of one text log line.
    pub log_line_len: usize,
    /// Maximum length of a registry key.
    pub log_name_len: usize,
    pub release_debounce: Duration,
    pub num_pipes: u32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            hw_mode: HwMode::Normal,
            clock_rates: ClockRates::default(),
            bw_threshold_nominal_mbps: DEFAULT_BW_THRESHOLD_NOMINAL_MBPS,
            bw_threshold_turbo_mbps: DEFAULT_BW_THRESHOLD_TURBO_MBPS,
            enable_clock_scaling: true,
            bus_usecases: DEFAULT_BUS_USECASES,
            log_lines: DEFAULT_LOG_LINES,
            log_line_len: DEFAULT_LOG_LINE_LEN,
            log_name_len: DEFAULT_LOG_NAME_LEN,
            release_debounce: DEFAULT_RELEASE_DEBOUNCE,
            num_pipes: DEFAULT_NUM_PIPES,
        }
    }
}
