//! The driver context.
//!
//! [`IpaPower`] owns the gate, both arbiters and the two work queues. Work items only hold a
//! weak reference back to it, so dropping the last handle tears everything down, discarding any
//! work that has not run yet.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::active_clients::{ActiveClients, ClientGate, Release};
use crate::client_log::ClientId;
use crate::config::PowerConfig;
use crate::endpoints::EndpointTable;
use crate::error::{PmError, Result};
use crate::hw::Platform;
use crate::suspend::SuspendPath;
use crate::tag_gate;
use crate::transport::{self, TransportArbiter, TransportEvent, TransportGrant, TransportPmState};
use crate::wakelock::WakeLock;
use crate::workqueue::{Work, WorkQueue};

pub const PROXY_CLK_VOTE: &str = "PROXY_CLK_VOTE";

const POWER_WQ: &str = "ipa_power_mgmt";
const TRANSPORT_WQ: &str = "ipa_transport_power_mgmt";

struct Inner {
    platform: Platform,
    clients: ActiveClients,
    endpoints: EndpointTable,
    transport: TransportArbiter,
    suspend: SuspendPath,
    wakelock: WakeLock,
    tag_work: Work,
    proxy_released: AtomicBool,
    panic_dump_installed: AtomicBool,
    power_wq: WorkQueue,
    transport_wq: WorkQueue,
}

impl ClientGate for Inner {
    fn hold_blocking(&self, id: &ClientId) {
        self.clients.inc_blocking(id);
    }

    fn try_hold(&self, id: &ClientId) -> Result<()> {
        self.clients.inc_nonblocking(id)
    }

    fn release(&self, id: &ClientId) {
        if self.clients.dec(id) == Release::TagScheduled {
            self.power_wq.queue(&self.tag_work);
        }
    }
}

impl Inner {
    fn run_tag_process(&self) {
        let outcome = tag_gate::run_tag_process(&self.clients, &*self.platform.aggregation);
        if outcome == Release::TagScheduled {
            self.power_wq.queue(&self.tag_work);
        }
    }

    fn run_transport_request(&self) {
        self.transport
            .run_request_work(self, &*self.platform.transport);
    }

    fn run_transport_release(&self) {
        self.transport.run_release_work(self);
    }

    fn run_sps_resume(&self) {
        self.suspend.run_resume_work(self);
    }

    fn run_sps_release(&self) {
        self.suspend.run_release_work(self, &self.transport_wq);
    }
}

/// Handle to the IPA power gate. Cheap to clone; all clones share one gate.
#[derive(Clone)]
pub struct IpaPower {
    inner: Arc<Inner>,
}

impl IpaPower {
    /// Bring up the gate with the clocks on, held by `PROXY_CLK_VOTE` until
    /// [`IpaPower::release_proxy_vote`].
    pub fn new(cfg: PowerConfig, platform: Platform) -> Result<Self> {
        let power_wq = spawn_queue(POWER_WQ)?;
        let transport_wq = spawn_queue(TRANSPORT_WQ)?;
        let epoch = Instant::now();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let work = |name: &'static str, run: fn(&Inner)| {
                let weak = weak.clone();
                Work::new(name, move || {
                    if let Some(inner) = weak.upgrade() {
                        run(&inner);
                    }
                })
            };
            Inner {
                clients: ActiveClients::new(cfg.clone(), platform.clone(), epoch),
                endpoints: EndpointTable::new(cfg.num_pipes),
                transport: TransportArbiter::new(
                    work("ipa_transport_request", Inner::run_transport_request),
                    work("ipa_transport_release", Inner::run_transport_release),
                    cfg.release_debounce,
                ),
                suspend: SuspendPath::new(
                    work("ipa_sps_resume", Inner::run_sps_resume),
                    work("ipa_sps_release", Inner::run_sps_release),
                    cfg.release_debounce,
                ),
                wakelock: WakeLock::new(platform.wake_source.clone()),
                tag_work: work("ipa_tag_process", Inner::run_tag_process),
                proxy_released: AtomicBool::new(false),
                panic_dump_installed: AtomicBool::new(false),
                platform,
                power_wq,
                transport_wq,
            }
        });

        if let Err(err) = inner
            .clients
            .inc_blocking_checked(&ClientId::special(PROXY_CLK_VOTE))
        {
            tracing::error!("failed to enable IPA clocks: {err}");
            return Err(PmError::ClockInit(err));
        }
        tracing::info!(
            rate_hz = inner.clients.current_rate_hz(),
            "IPA power gate initialized"
        );
        Ok(Self { inner })
    }

    /// Take a hold on the gate. With `blocking == false` the call never sleeps and fails instead
    /// of powering the block up.
    pub fn inc_client(&self, id: &ClientId, blocking: bool) -> Result<()> {
        if blocking {
            self.inner.hold_blocking(id);
            Ok(())
        } else {
            self.inner.try_hold(id)
        }
    }

    pub fn dec_client(&self, id: &ClientId) {
        self.inner.release(id);
    }

    pub fn set_performance_profile(&self, floor_voltage: u32, bandwidth_mbps: u32) -> Result<()> {
        self.inner
            .clients
            .set_performance_profile(floor_voltage, bandwidth_mbps)
    }

    pub fn set_tag_process_before_gating(&self, armed: bool) {
        self.inner.clients.set_tag_process_before_gating(armed);
    }

    /// Drop the hold taken at initialization. Only the first call has an effect.
    pub fn release_proxy_vote(&self) {
        if self.inner.proxy_released.swap(true, Ordering::SeqCst) {
            tracing::warn!("proxy clock vote already released");
            return;
        }
        self.inner.release(&ClientId::special(PROXY_CLK_VOTE));
    }

    pub fn request_transport_resource(&self) -> TransportGrant {
        self.inner
            .transport
            .request(&*self.inner, &self.inner.transport_wq)
    }

    pub fn release_transport_resource(&self) {
        self.inner.transport.release(&self.inner.transport_wq);
    }

    pub fn handle_transport_event(&self, event: TransportEvent) {
        transport::handle_event(event);
    }

    pub fn transport_state(&self) -> TransportPmState {
        self.inner.transport.state()
    }

    pub fn suspend_handler(&self, endpoint_mask: u32) {
        let inner = &*self.inner;
        inner.suspend.handle_interrupt(
            endpoint_mask,
            &inner.endpoints,
            inner,
            &inner.platform,
            &inner.transport_wq,
        );
    }

    pub fn note_transfer_activity(&self) {
        self.inner.suspend.note_transfer_activity();
    }

    pub fn ap_suspend(&self) -> Result<()> {
        let inner = &*self.inner;
        inner
            .suspend
            .ap_suspend(&inner.endpoints, inner, &inner.transport_wq)
    }

    pub fn acquire_wakelock(&self) {
        self.inner.wakelock.acquire();
    }

    pub fn release_wakelock(&self) {
        self.inner.wakelock.release();
    }

    pub fn wakelock_count(&self) -> u32 {
        self.inner.wakelock.count()
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.inner.endpoints
    }

    pub fn active_clients(&self) -> &ActiveClients {
        &self.inner.clients
    }

    pub fn current_clock_rate_hz(&self) -> u32 {
        self.inner.clients.current_rate_hz()
    }

    pub fn dump_log_buffer(&self) -> String {
        self.inner.clients.dump_log_buffer()
    }

    pub fn dump_table(&self) -> String {
        self.inner.clients.dump_table()
    }

    pub fn clear_log(&self) {
        self.inner.clients.clear_log();
    }

    /// Wait until both work queues are idle, including debounced releases and any work they
    /// queue on each other. Must not be called from a work item.
    pub fn flush_deferred_work(&self) {
        let inner = &*self.inner;
        loop {
            inner.power_wq.drain();
            inner.transport_wq.drain();
            if inner.power_wq.is_idle() && inner.transport_wq.is_idle() {
                break;
            }
        }
    }

    /// Log the holder table when any thread panics. The previous hook still runs afterwards.
    ///
    /// Returns `false` without touching the hook if this gate already installed one.
    pub fn install_panic_dump(&self) -> bool {
        if self.inner.panic_dump_installed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let weak = Arc::downgrade(&self.inner);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(table) = weak
                .upgrade()
                .and_then(|inner| inner.clients.try_dump_table())
            {
                tracing::error!("{table}");
            }
            previous(info);
        }));
        true
    }
}

impl fmt::Debug for IpaPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpaPower")
            .field("active_clients", &self.inner.clients.count())
            .field("transport", &self.inner.transport.state())
            .field("wakelock", &self.inner.wakelock.count())
            .finish_non_exhaustive()
    }
}

fn spawn_queue(name: &'static str) -> Result<WorkQueue> {
    WorkQueue::new(name).map_err(|err| PmError::WorkQueueSpawn {
        name,
        reason: err.to_string(),
    })
}
