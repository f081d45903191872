//! Simulated IPA hardware that records every call made by the power gate.
//!
//! Used by the test suites and by `ipa-pmctl` to show the exact clock/bus/pipe sequence a series
//! of gate operations produces.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::endpoints::EndpointId;
use crate::error::HwError;
use crate::hw::{
    AggregationFlush, BusScaler, ClockControl, CoprocessorNotifier, PipeControl, Platform,
    ResourceManager, RmResponse, TransportNotifier, WakeSource,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwEvent {
    ClockEnabled,
    ClockDisabled,
    ClockRateSet(u32),
    AuxClockEnabled,
    AuxClockDisabled,
    BusVote(u32),
    CoprocessorClockState(bool),
    PipesSuspended,
    PipesResumed,
    HolbConfigured { ep: EndpointId, enable: bool },
    ResourceRequested(String),
    /// Aggregation force-close, with whether the core clock was running at the time.
    AggregationFlushed { clock_on: bool },
    ClockGrantCompleted,
    StayAwake,
    Relax,
}

#[derive(Debug)]
struct SimState {
    events: Vec<HwEvent>,
    clock_on: bool,
    aux_on: bool,
    rate_hz: u32,
    bus_vote: u32,
    pipes_suspended: bool,
    awake: bool,
    rm_response: RmResponse,
}

#[derive(Debug)]
pub struct SimHardware {
    state: Mutex<SimState>,
    fail_clock_enable: AtomicBool,
    fail_bus_vote: AtomicBool,
    fail_flush: AtomicBool,
    fail_holb: AtomicBool,
}

impl SimHardware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState {
                events: Vec::new(),
                clock_on: false,
                aux_on: false,
                rate_hz: 0,
                bus_vote: 0,
                pipes_suspended: true,
                awake: false,
                rm_response: RmResponse::Granted,
            }),
            fail_clock_enable: AtomicBool::new(false),
            fail_bus_vote: AtomicBool::new(false),
            fail_flush: AtomicBool::new(false),
            fail_holb: AtomicBool::new(false),
        })
    }

    /// A platform where every collaborator is this simulator, without an aux clock.
    pub fn platform(self: &Arc<Self>) -> Platform {
        Platform {
            core_clock: self.clone(),
            aux_clock: None,
            bus: self.clone(),
            coprocessor: self.clone(),
            pipes: self.clone(),
            resource_manager: self.clone(),
            aggregation: self.clone(),
            transport: self.clone(),
            wake_source: self.clone(),
        }
    }

    /// Like [`SimHardware::platform`], with a simulated SMMU clock as the aux clock.
    pub fn platform_with_aux_clock(self: &Arc<Self>) -> Platform {
        Platform {
            aux_clock: Some(Arc::new(SimAuxClock(self.clone()))),
            ..self.platform()
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, event: HwEvent) {
        self.lock().events.push(event);
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<HwEvent> {
        std::mem::take(&mut self.lock().events)
    }

    pub fn count(&self, event: &HwEvent) -> usize {
        self.lock().events.iter().filter(|e| *e == event).count()
    }

    pub fn clock_on(&self) -> bool {
        self.lock().clock_on
    }

    pub fn aux_clock_on(&self) -> bool {
        self.lock().aux_on
    }

    pub fn rate_hz(&self) -> u32 {
        self.lock().rate_hz
    }

    pub fn bus_vote(&self) -> u32 {
        self.lock().bus_vote
    }

    pub fn pipes_suspended(&self) -> bool {
        self.lock().pipes_suspended
    }

    pub fn awake(&self) -> bool {
        self.lock().awake
    }

    pub fn set_rm_response(&self, response: RmResponse) {
        self.lock().rm_response = response;
    }

    pub fn fail_clock_enable(&self, fail: bool) {
        self.fail_clock_enable.store(fail, Ordering::SeqCst);
    }

    pub fn fail_bus_vote(&self, fail: bool) {
        self.fail_bus_vote.store(fail, Ordering::SeqCst);
    }

    pub fn fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    pub fn fail_holb(&self, fail: bool) {
        self.fail_holb.store(fail, Ordering::SeqCst);
    }
}

impl ClockControl for SimHardware {
    fn enable(&self) -> Result<(), HwError> {
        if self.fail_clock_enable.load(Ordering::SeqCst) {
            return Err(HwError::Status {
                op: "clk_enable",
                status: -5,
            });
        }
        let mut state = self.lock();
        state.clock_on = true;
        state.events.push(HwEvent::ClockEnabled);
        Ok(())
    }

    fn disable(&self) {
        let mut state = self.lock();
        state.clock_on = false;
        state.events.push(HwEvent::ClockDisabled);
    }

    fn set_rate(&self, hz: u32) -> Result<(), HwError> {
        let mut state = self.lock();
        state.rate_hz = hz;
        state.events.push(HwEvent::ClockRateSet(hz));
        Ok(())
    }
}

#[derive(Debug)]
struct SimAuxClock(Arc<SimHardware>);

impl ClockControl for SimAuxClock {
    fn enable(&self) -> Result<(), HwError> {
        let mut state = self.0.lock();
        state.aux_on = true;
        state.events.push(HwEvent::AuxClockEnabled);
        Ok(())
    }

    fn disable(&self) {
        let mut state = self.0.lock();
        state.aux_on = false;
        state.events.push(HwEvent::AuxClockDisabled);
    }

    fn set_rate(&self, _hz: u32) -> Result<(), HwError> {
        Ok(())
    }
}

impl BusScaler for SimHardware {
    fn vote(&self, usecase: u32) -> Result<(), HwError> {
        if self.fail_bus_vote.load(Ordering::SeqCst) {
            return Err(HwError::Status {
                op: "msm_bus_scale_client_update_request",
                status: -22,
            });
        }
        let mut state = self.lock();
        state.bus_vote = usecase;
        state.events.push(HwEvent::BusVote(usecase));
        Ok(())
    }
}

impl CoprocessorNotifier for SimHardware {
    fn notify_clock_state(&self, enabled: bool) {
        self.push(HwEvent::CoprocessorClockState(enabled));
    }
}

impl PipeControl for SimHardware {
    fn suspend_all(&self) {
        let mut state = self.lock();
        state.pipes_suspended = true;
        state.events.push(HwEvent::PipesSuspended);
    }

    fn resume_all(&self) {
        let mut state = self.lock();
        state.pipes_suspended = false;
        state.events.push(HwEvent::PipesResumed);
    }

    fn configure_holb(&self, ep: EndpointId, enable: bool) -> Result<(), HwError> {
        if self.fail_holb.load(Ordering::SeqCst) {
            return Err(HwError::Status {
                op: "cfg_ep_holb",
                status: -1,
            });
        }
        self.push(HwEvent::HolbConfigured { ep, enable });
        Ok(())
    }
}

impl ResourceManager for SimHardware {
    fn request_named_resource(&self, name: &str) -> RmResponse {
        let mut state = self.lock();
        state
            .events
            .push(HwEvent::ResourceRequested(name.to_string()));
        state.rm_response
    }
}

impl AggregationFlush for SimHardware {
    fn force_close_aggregation(&self) -> Result<(), HwError> {
        let mut state = self.lock();
        let clock_on = state.clock_on;
        state.events.push(HwEvent::AggregationFlushed { clock_on });
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(HwError::Status {
                op: "tag_aggr_force_close",
                status: -110,
            });
        }
        Ok(())
    }
}

impl TransportNotifier for SimHardware {
    fn complete_clk_grant(&self) -> Result<(), HwError> {
        self.push(HwEvent::ClockGrantCompleted);
        Ok(())
    }
}

impl WakeSource for SimHardware {
    fn stay_awake(&self) {
        let mut state = self.lock();
        state.awake = true;
        state.events.push(HwEvent::StayAwake);
    }

    fn relax(&self) {
        let mut state = self.lock();
        state.awake = false;
        state.events.push(HwEvent::Relax);
    }
}
