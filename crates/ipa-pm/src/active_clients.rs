//! The active-clients gate.
//!
//! Every context that touches the IPA block holds the gate for the duration of the access. The
//! 0→1 transition powers the block up and the 1→0 transition gates it again (or, when armed,
//! defers the gating behind a tag process, see [`crate::tag_gate`]).
//!
//! Two locks are involved:
//! - `hw`, held across the clock/bus calls of a transition. Blocking callers always take it, so
//!   at most one transition is ever in flight.
//! - `state`, which guards the count and the registry with short critical sections. Non-blocking
//!   callers only ever `try_lock` it, and a blocking transition marks `hw_busy` in it so a
//!   non-blocking caller cannot piggyback on a half-enabled block.

use std::time::Instant;

use crate::client_log::{ClientId, ClientLogRegistry};
use crate::clocks::ClockVoting;
use crate::config::PowerConfig;
use crate::error::{HwError, PmError, Result};
use crate::hw::Platform;
use crate::perf::{self, VoltageLevel};
use crate::sync::{self, Mutex};
use crate::tag_gate::TAG_PROCESS;

/// What a decrement did to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other holders remain; the block stays powered.
    Held,
    /// The last hold was dropped and the block is gated.
    Gated,
    /// The last hold was replaced by a `TAG_PROCESS` hold. The caller must schedule the tag work.
    TagScheduled,
}

/// The gate operations the transport and suspend paths drive.
///
/// Implemented by the driver context so that every release goes through tag scheduling.
pub trait ClientGate: Send + Sync {
    fn hold_blocking(&self, id: &ClientId);
    fn try_hold(&self, id: &ClientId) -> Result<()>;
    fn release(&self, id: &ClientId);
}

#[derive(Debug)]
struct ClientsState {
    count: u32,
    hw_busy: bool,
    tag_process_before_gating: bool,
    log: ClientLogRegistry,
}

#[derive(Debug)]
pub struct ActiveClients {
    hw: Mutex<ClockVoting>,
    state: Mutex<ClientsState>,
}

/// Clears `hw_busy` when the transition finishes, including by unwinding.
struct BusyGuard<'a> {
    state: &'a Mutex<ClientsState>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        sync::lock(self.state).hw_busy = false;
    }
}

impl ActiveClients {
    /// A gate with no holders and the clocks off.
    pub fn new(cfg: PowerConfig, platform: Platform, epoch: Instant) -> Self {
        let log = ClientLogRegistry::new(&cfg, epoch);
        Self {
            hw: Mutex::new(ClockVoting::new(cfg, platform)),
            state: Mutex::new(ClientsState {
                count: 0,
                hw_busy: false,
                tag_process_before_gating: false,
                log,
            }),
        }
    }

    /// Take a hold, powering the block up if this is the first one. May sleep.
    ///
    /// A clock enable failure is logged and the hold is still taken.
    pub(crate) fn inc_blocking(&self, id: &ClientId) {
        if let Err(err) = self.inc_blocking_checked(id) {
            tracing::error!(client = %id, "IPA clocks enabled with errors: {err}");
        }
    }

    /// Like [`ActiveClients::inc_blocking`], reporting a failed core clock enable.
    pub(crate) fn inc_blocking_checked(&self, id: &ClientId) -> std::result::Result<(), HwError> {
        let mut hw = sync::lock(&self.hw);
        let power_up = {
            let mut state = sync::lock(&self.state);
            state.log.log_inc(id);
            state.count += 1;
            tracing::debug!(client = %id, count = state.count, "active clients inc");
            if state.count == 1 {
                state.hw_busy = true;
            }
            state.count == 1
        };
        if !power_up {
            return Ok(());
        }

        let _busy = BusyGuard { state: &self.state };
        hw.enable()
    }

    /// Take a hold only if the block is already powered. Never sleeps.
    ///
    /// Fails with [`PmError::Busy`] if the state lock is contended or a transition is in flight,
    /// and with [`PmError::NotPowered`] if nobody holds the gate.
    pub(crate) fn inc_nonblocking(&self, id: &ClientId) -> Result<()> {
        let Some(mut state) = sync::try_lock(&self.state) else {
            return Err(PmError::Busy);
        };
        if state.hw_busy {
            return Err(PmError::Busy);
        }
        if state.count == 0 {
            return Err(PmError::NotPowered);
        }
        state.log.log_inc(id);
        state.count += 1;
        tracing::debug!(client = %id, count = state.count, "active clients inc (atomic)");
        Ok(())
    }

    /// Drop a hold.
    ///
    /// # Panics
    ///
    /// Dropping a hold that was never taken (count already 0) is a fatal consistency violation.
    pub(crate) fn dec(&self, id: &ClientId) -> Release {
        if let Some(mut state) = sync::try_lock(&self.state) {
            if !state.hw_busy && state.count > 1 {
                state.log.log_dec(id);
                state.count -= 1;
                tracing::debug!(client = %id, count = state.count, "active clients dec");
                return Release::Held;
            }
        }

        let mut hw = sync::lock(&self.hw);
        let outcome = {
            let mut state = sync::lock(&self.state);
            if state.count == 0 {
                drop(state);
                drop(hw);
                tracing::error!(client = %id, "active clients count underflow");
                panic!("IPA active clients released by {id} with count already 0");
            }
            state.log.log_dec(id);
            state.count -= 1;
            tracing::debug!(client = %id, count = state.count, "active clients dec");

            if state.count > 0 {
                Release::Held
            } else if state.tag_process_before_gating {
                state.tag_process_before_gating = false;
                state.log.log_inc(&ClientId::special(TAG_PROCESS));
                state.count = 1;
                Release::TagScheduled
            } else {
                state.hw_busy = true;
                Release::Gated
            }
        };

        if outcome == Release::Gated {
            let _busy = BusyGuard { state: &self.state };
            hw.disable();
        }
        outcome
    }

    /// Arm (or disarm) the tag process for the next 1→0 transition.
    pub fn set_tag_process_before_gating(&self, armed: bool) {
        sync::lock(&self.state).tag_process_before_gating = armed;
    }

    pub fn tag_process_before_gating(&self) -> bool {
        sync::lock(&self.state).tag_process_before_gating
    }

    /// Pick the clock rate for a voltage floor and bandwidth demand.
    ///
    /// The rate is applied immediately if the block is powered, otherwise on the next power-up.
    /// An out-of-range floor is rejected before anything changes.
    pub fn set_performance_profile(&self, floor_voltage: u32, bandwidth_mbps: u32) -> Result<()> {
        let floor = VoltageLevel::try_from(floor_voltage)?;

        let mut hw = sync::lock(&self.hw);
        let rate_hz = perf::resolve_rate(hw.config(), floor, bandwidth_mbps);
        let powered = sync::lock(&self.state).count > 0;
        tracing::debug!(?floor, bandwidth_mbps, rate_hz, powered, "set performance profile");
        hw.set_rate(rate_hz, powered);
        Ok(())
    }

    pub fn count(&self) -> u32 {
        sync::lock(&self.state).count
    }

    pub fn clocks_enabled(&self) -> bool {
        sync::lock(&self.hw).is_enabled()
    }

    pub fn current_rate_hz(&self) -> u32 {
        sync::lock(&self.hw).current_rate_hz()
    }

    /// Run `f` against the registry under the state lock.
    pub fn with_log<R>(&self, f: impl FnOnce(&ClientLogRegistry) -> R) -> R {
        f(&sync::lock(&self.state).log)
    }

    pub fn dump_log_buffer(&self) -> String {
        self.with_log(ClientLogRegistry::print_buffer)
    }

    pub fn dump_table(&self) -> String {
        let state = sync::lock(&self.state);
        state.log.print_table(state.count)
    }

    /// Holder table for crash reports. Gives up rather than waiting on a contended lock.
    pub fn try_dump_table(&self) -> Option<String> {
        sync::try_lock(&self.state).map(|state| state.log.print_table(state.count))
    }

    pub fn clear_log(&self) {
        sync::lock(&self.state).log.clear();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::config::{HwMode, DEFAULT_CLK_RATE_NOMINAL_HZ, DEFAULT_CLK_RATE_TURBO_HZ};
    use crate::sim::{HwEvent, SimHardware};
    use std::sync::{mpsc, Arc, Barrier};
    use std::thread;

    fn gate(sim: &Arc<SimHardware>) -> ActiveClients {
        ActiveClients::new(PowerConfig::default(), sim.platform(), Instant::now())
    }

    fn position(events: &[HwEvent], wanted: &HwEvent) -> usize {
        events
            .iter()
            .position(|e| e == wanted)
            .unwrap_or_else(|| panic!("{wanted:?} not in {events:?}"))
    }

    #[test]
    fn first_hold_powers_up_in_order() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        clients.inc_blocking(&ClientId::special("A"));

        let events = sim.events();
        assert_eq!(events[0], HwEvent::ClockEnabled);
        assert!(position(&events, &HwEvent::ClockEnabled) < position(&events, &HwEvent::PipesResumed));
        assert_eq!(events.last(), Some(&HwEvent::BusVote(3)));
        assert_eq!(clients.count(), 1);
        assert!(clients.clocks_enabled());
    }

    #[test]
    fn last_hold_gates_in_order() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        let id = ClientId::special("A");
        clients.inc_blocking(&id);
        sim.take_events();

        assert_eq!(clients.dec(&id), Release::Gated);
        let events = sim.events();
        assert_eq!(events[0], HwEvent::PipesSuspended);
        assert!(position(&events, &HwEvent::PipesSuspended) < position(&events, &HwEvent::ClockDisabled));
        assert_eq!(events.last(), Some(&HwEvent::BusVote(0)));
        assert!(!sim.clock_on());
        assert!(!clients.clocks_enabled());
    }

    #[test]
    fn second_hold_does_not_touch_hardware() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        clients.inc_blocking(&ClientId::special("A"));
        sim.take_events();

        clients.inc_blocking(&ClientId::special("B"));
        clients.inc_nonblocking(&ClientId::special("C")).unwrap();
        assert_eq!(clients.dec(&ClientId::special("C")), Release::Held);
        assert_eq!(clients.count(), 2);
        assert!(sim.events().is_empty());
    }

    #[test]
    fn nonblocking_refuses_when_unpowered() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        assert_eq!(
            clients.inc_nonblocking(&ClientId::special("A")),
            Err(PmError::NotPowered)
        );
        assert_eq!(clients.count(), 0);
        assert!(sim.events().is_empty());
        assert!(clients.with_log(|log| log.entry("A").is_none()));
    }

    #[test]
    #[should_panic(expected = "count already 0")]
    fn double_release_is_fatal() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        let id = ClientId::special("A");
        clients.inc_blocking(&id);
        clients.dec(&id);
        clients.dec(&id);
    }

    #[test]
    fn armed_tag_process_defers_gating() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        let id = ClientId::special("A");
        clients.inc_blocking(&id);
        clients.set_tag_process_before_gating(true);

        assert_eq!(clients.dec(&id), Release::TagScheduled);
        assert_eq!(clients.count(), 1);
        assert!(sim.clock_on());
        assert!(!clients.tag_process_before_gating());
        assert_eq!(
            clients.with_log(|log| log.entry(TAG_PROCESS).map(|e| e.count)),
            Some(1)
        );

        assert_eq!(clients.dec(&ClientId::special(TAG_PROCESS)), Release::Gated);
        assert!(!sim.clock_on());
    }

    #[test]
    fn concurrent_first_holds_enable_once() {
        let sim = SimHardware::new();
        let clients = Arc::new(gate(&sim));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["A", "B"]
            .into_iter()
            .map(|name| {
                let clients = clients.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    clients.inc_blocking(&ClientId::special(name));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(clients.count(), 2);
        assert_eq!(sim.count(&HwEvent::ClockEnabled), 1);
    }

    struct StalledClock {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl crate::hw::ClockControl for StalledClock {
        fn enable(&self) -> std::result::Result<(), HwError> {
            sync::lock(&self.entered).send(()).unwrap();
            sync::lock(&self.release).recv().unwrap();
            Ok(())
        }

        fn disable(&self) {}

        fn set_rate(&self, _hz: u32) -> std::result::Result<(), HwError> {
            Ok(())
        }
    }

    #[test]
    fn nonblocking_is_busy_during_power_up() {
        let sim = SimHardware::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let platform = Platform {
            core_clock: Arc::new(StalledClock {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
            ..sim.platform()
        };
        let clients = Arc::new(ActiveClients::new(
            PowerConfig::default(),
            platform,
            Instant::now(),
        ));

        let powering = {
            let clients = clients.clone();
            thread::spawn(move || clients.inc_blocking(&ClientId::special("A")))
        };
        entered_rx.recv().unwrap();
        assert_eq!(
            clients.inc_nonblocking(&ClientId::special("B")),
            Err(PmError::Busy)
        );
        release_tx.send(()).unwrap();
        powering.join().unwrap();

        clients.inc_nonblocking(&ClientId::special("B")).unwrap();
        assert_eq!(clients.count(), 2);
    }

    #[test]
    fn failed_enable_still_takes_the_hold() {
        let sim = SimHardware::new();
        sim.fail_clock_enable(true);
        let clients = gate(&sim);
        let id = ClientId::special("A");
        assert!(clients.inc_blocking_checked(&id).is_err());
        assert_eq!(clients.count(), 1);
        assert!(clients.inc_nonblocking(&ClientId::special("B")).is_ok());
    }

    #[test]
    fn profile_applies_now_when_powered() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        clients.inc_blocking(&ClientId::special("A"));
        sim.take_events();

        clients.set_performance_profile(2, 0).unwrap();
        assert_eq!(clients.current_rate_hz(), DEFAULT_CLK_RATE_NOMINAL_HZ);
        assert_eq!(
            sim.events(),
            vec![
                HwEvent::ClockRateSet(DEFAULT_CLK_RATE_NOMINAL_HZ),
                HwEvent::BusVote(2)
            ]
        );
    }

    #[test]
    fn profile_is_deferred_when_gated() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        clients.set_performance_profile(2, 0).unwrap();
        assert!(sim.events().is_empty());

        clients.inc_blocking(&ClientId::special("A"));
        assert!(sim
            .events()
            .contains(&HwEvent::ClockRateSet(DEFAULT_CLK_RATE_NOMINAL_HZ)));
    }

    #[test]
    fn invalid_floor_changes_nothing() {
        let sim = SimHardware::new();
        let clients = gate(&sim);
        clients.inc_blocking(&ClientId::special("A"));
        sim.take_events();

        assert_eq!(
            clients.set_performance_profile(7, 0),
            Err(PmError::InvalidVoltage(7))
        );
        assert_eq!(clients.current_rate_hz(), DEFAULT_CLK_RATE_TURBO_HZ);
        assert!(sim.events().is_empty());
    }

    #[test]
    fn virtual_mode_skips_bus_votes() {
        let sim = SimHardware::new();
        let cfg = PowerConfig {
            hw_mode: HwMode::Virtual,
            ..PowerConfig::default()
        };
        let clients = ActiveClients::new(cfg, sim.platform(), Instant::now());
        let id = ClientId::special("A");
        clients.inc_blocking(&id);
        clients.dec(&id);
        assert!(!sim
            .events()
            .iter()
            .any(|e| matches!(e, HwEvent::BusVote(_))));
    }
}

#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use crate::hw::ClockControl;
    use loom::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingClock {
        enables: AtomicUsize,
        disables: AtomicUsize,
    }

    impl ClockControl for CountingClock {
        fn enable(&self) -> std::result::Result<(), HwError> {
            self.enables.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn disable(&self) {
            self.disables.fetch_add(1, Ordering::SeqCst);
        }

        fn set_rate(&self, _hz: u32) -> std::result::Result<(), HwError> {
            Ok(())
        }
    }

    fn gate(clock: &std::sync::Arc<CountingClock>) -> ActiveClients {
        let platform = Platform {
            core_clock: clock.clone(),
            ..Platform::default()
        };
        ActiveClients::new(PowerConfig::default(), platform, Instant::now())
    }

    #[test]
    fn concurrent_first_holds_enable_once() {
        loom::model(|| {
            let clock = std::sync::Arc::new(CountingClock::default());
            let clients = Arc::new(gate(&clock));

            let other = {
                let clients = clients.clone();
                loom::thread::spawn(move || clients.inc_blocking(&ClientId::special("A")))
            };
            clients.inc_blocking(&ClientId::special("B"));
            other.join().unwrap();

            assert_eq!(clients.count(), 2);
            assert_eq!(clock.enables.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn nonblocking_never_sees_a_half_powered_block() {
        loom::model(|| {
            let clock = std::sync::Arc::new(CountingClock::default());
            let clients = Arc::new(gate(&clock));

            let powering = {
                let clients = clients.clone();
                loom::thread::spawn(move || clients.inc_blocking(&ClientId::special("A")))
            };
            let piggyback = clients.inc_nonblocking(&ClientId::special("B"));
            powering.join().unwrap();

            match piggyback {
                Ok(()) => assert_eq!(clients.count(), 2),
                Err(PmError::Busy | PmError::NotPowered) => assert_eq!(clients.count(), 1),
                Err(other) => panic!("unexpected error {other:?}"),
            }
            assert_eq!(clock.enables.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn release_races_with_hold() {
        loom::model(|| {
            let clock = std::sync::Arc::new(CountingClock::default());
            let clients = Arc::new(gate(&clock));
            clients.inc_blocking(&ClientId::special("A"));

            let releasing = {
                let clients = clients.clone();
                loom::thread::spawn(move || {
                    clients.dec(&ClientId::special("A"));
                })
            };
            clients.inc_blocking(&ClientId::special("B"));
            releasing.join().unwrap();

            assert_eq!(clients.count(), 1);
            let enables = clock.enables.load(Ordering::SeqCst);
            let disables = clock.disables.load(Ordering::SeqCst);
            assert_eq!(enables, disables + 1);
        });
    }
}
