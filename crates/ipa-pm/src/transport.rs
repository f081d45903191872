//! GSI transport resource arbiter.
//!
//! The GSI transport asks for the IPA clocks before touching its channels and gives them back when
//! idle. Requests are answered synchronously when the gate can be taken without sleeping and
//! completed asynchronously otherwise; releases are debounced so a burst of request/release
//! pairs does not bounce the clocks.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::active_clients::ClientGate;
use crate::client_log::ClientId;
use crate::hw::TransportNotifier;
use crate::workqueue::{Work, WorkQueue};

pub const GSI_RESOURCE: &str = "GSI_RESOURCE";

/// Answer to a transport clock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportGrant {
    /// The clocks are on and held for the transport.
    Granted,
    /// The grant will be completed later through [`TransportNotifier::complete_clk_grant`].
    Pending,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportPmState {
    pub res_granted: bool,
    pub res_rel_in_prog: bool,
}

/// Events reported by the GSI transport driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    GlobalError { err_desc: u32 },
    GlobalGp1,
    GlobalGp2,
    GlobalGp3,
    GeneralBreakPoint,
    GeneralBusError,
    CmdFifoOverflow,
    McsStackOverflow,
    Unknown(u32),
}

/// Log a transport event.
///
/// # Panics
///
/// Every event other than a global error or a break point leaves the transport unusable and is
/// fatal.
pub fn handle_event(event: TransportEvent) {
    match event {
        TransportEvent::GlobalError { err_desc } => {
            tracing::error!(err_desc = format_args!("{err_desc:#x}"), "GSI global error");
        }
        TransportEvent::GeneralBreakPoint => {
            tracing::error!("GSI general break point");
        }
        fatal => {
            tracing::error!(event = ?fatal, "fatal GSI event");
            panic!("fatal GSI event {fatal:?}");
        }
    }
}

#[derive(Debug)]
pub struct TransportArbiter {
    state: Mutex<TransportPmState>,
    request_work: Work,
    release_work: Work,
    debounce: Duration,
}

impl TransportArbiter {
    /// `request_work` must call [`TransportArbiter::run_request_work`] and `release_work` must
    /// call [`TransportArbiter::run_release_work`].
    pub fn new(request_work: Work, release_work: Work, debounce: Duration) -> Self {
        Self {
            state: Mutex::new(TransportPmState::default()),
            request_work,
            release_work,
            debounce,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransportPmState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> TransportPmState {
        *self.lock()
    }

    /// Never sleeps. A pending debounced release is cancelled.
    pub fn request(&self, gate: &dyn ClientGate, wq: &WorkQueue) -> TransportGrant {
        let mut state = self.lock();
        wq.cancel(&self.release_work);
        state.res_rel_in_prog = false;

        if state.res_granted {
            return TransportGrant::Granted;
        }
        match gate.try_hold(&ClientId::resource(GSI_RESOURCE)) {
            Ok(()) => {
                state.res_granted = true;
                TransportGrant::Granted
            }
            Err(err) => {
                tracing::debug!("transport clock request deferred: {err}");
                wq.queue(&self.request_work);
                TransportGrant::Pending
            }
        }
    }

    /// Schedule the debounced release. Releasing again before it fires keeps the first deadline.
    pub fn release(&self, wq: &WorkQueue) {
        let mut state = self.lock();
        state.res_rel_in_prog = true;
        wq.queue_delayed(&self.release_work, self.debounce);
    }

    /// Worker side of a deferred request: take the gate the slow way and complete the grant.
    pub fn run_request_work(&self, gate: &dyn ClientGate, notifier: &dyn TransportNotifier) {
        if self.lock().res_granted {
            return;
        }

        let id = ClientId::resource(GSI_RESOURCE);
        gate.hold_blocking(&id);

        let mut state = self.lock();
        if state.res_granted {
            drop(state);
            tracing::debug!("transport resource granted concurrently, dropping extra hold");
            gate.release(&id);
            return;
        }
        state.res_granted = true;
        drop(state);

        if let Err(err) = notifier.complete_clk_grant() {
            tracing::error!("failed to complete transport clock grant: {err}");
        }
    }

    /// Worker side of the debounced release.
    pub fn run_release_work(&self, gate: &dyn ClientGate) {
        let mut state = self.lock();
        if !state.res_rel_in_prog {
            return;
        }
        state.res_rel_in_prog = false;
        state.res_granted = false;
        drop(state);

        gate.release(&ClientId::resource(GSI_RESOURCE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PmError, Result};
    use crate::sim::{HwEvent, SimHardware};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeGate {
        holds: Mutex<i32>,
        refuse: AtomicBool,
    }

    impl FakeGate {
        fn holds(&self) -> i32 {
            *self.holds.lock().unwrap()
        }
    }

    impl ClientGate for FakeGate {
        fn hold_blocking(&self, _id: &ClientId) {
            *self.holds.lock().unwrap() += 1;
        }

        fn try_hold(&self, _id: &ClientId) -> Result<()> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(PmError::NotPowered);
            }
            *self.holds.lock().unwrap() += 1;
            Ok(())
        }

        fn release(&self, _id: &ClientId) {
            *self.holds.lock().unwrap() -= 1;
        }
    }

    struct Fixture {
        wq: WorkQueue,
        arbiter: TransportArbiter,
        request_runs: Arc<AtomicUsize>,
    }

    fn fixture(debounce: Duration) -> Fixture {
        let request_runs = Arc::new(AtomicUsize::new(0));
        let runs = request_runs.clone();
        Fixture {
            wq: WorkQueue::new("test_transport_wq").unwrap(),
            arbiter: TransportArbiter::new(
                Work::new("request", move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                }),
                Work::new("release", || {}),
                debounce,
            ),
            request_runs,
        }
    }

    #[test]
    fn request_is_granted_once() {
        let f = fixture(Duration::from_millis(100));
        let gate = FakeGate::default();
        assert_eq!(f.arbiter.request(&gate, &f.wq), TransportGrant::Granted);
        assert_eq!(f.arbiter.request(&gate, &f.wq), TransportGrant::Granted);
        assert_eq!(gate.holds(), 1);
        assert!(f.arbiter.state().res_granted);
    }

    #[test]
    fn refused_request_is_retried_from_the_worker() {
        let f = fixture(Duration::from_millis(100));
        let gate = FakeGate::default();
        gate.refuse.store(true, Ordering::SeqCst);
        assert_eq!(f.arbiter.request(&gate, &f.wq), TransportGrant::Pending);
        f.wq.drain();
        assert_eq!(f.request_runs.load(Ordering::SeqCst), 1);
        assert!(!f.arbiter.state().res_granted);
        assert_eq!(gate.holds(), 0);
    }

    #[test]
    fn request_work_grants_and_notifies() {
        let f = fixture(Duration::from_millis(100));
        let gate = FakeGate::default();
        let sim = SimHardware::new();
        f.arbiter.run_request_work(&gate, &*sim);
        assert_eq!(gate.holds(), 1);
        assert!(f.arbiter.state().res_granted);
        assert_eq!(sim.events(), vec![HwEvent::ClockGrantCompleted]);

        f.arbiter.run_request_work(&gate, &*sim);
        assert_eq!(gate.holds(), 1);
        assert_eq!(sim.count(&HwEvent::ClockGrantCompleted), 1);
    }

    #[test]
    fn request_during_debounce_cancels_the_release() {
        let f = fixture(Duration::from_secs(60));
        let gate = FakeGate::default();
        f.arbiter.request(&gate, &f.wq);
        f.arbiter.release(&f.wq);
        assert!(f.arbiter.state().res_rel_in_prog);

        assert_eq!(f.arbiter.request(&gate, &f.wq), TransportGrant::Granted);
        assert_eq!(
            f.arbiter.state(),
            TransportPmState {
                res_granted: true,
                res_rel_in_prog: false
            }
        );
        f.wq.drain();
        assert_eq!(gate.holds(), 1);
    }

    #[test]
    fn release_work_drops_the_hold_once() {
        let f = fixture(Duration::from_millis(10));
        let gate = FakeGate::default();
        f.arbiter.request(&gate, &f.wq);
        f.arbiter.release(&f.wq);

        f.arbiter.run_release_work(&gate);
        f.arbiter.run_release_work(&gate);
        assert_eq!(gate.holds(), 0);
        assert_eq!(f.arbiter.state(), TransportPmState::default());
    }

    #[test]
    fn recoverable_events_are_only_logged() {
        handle_event(TransportEvent::GlobalError { err_desc: 0x1234 });
        handle_event(TransportEvent::GeneralBreakPoint);
    }

    #[test]
    #[should_panic(expected = "fatal GSI event")]
    fn bus_error_is_fatal() {
        handle_event(TransportEvent::GeneralBusError);
    }
}
