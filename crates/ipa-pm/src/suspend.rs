//! Legacy (BAM/SPS) suspend interrupt path.
//!
//! The IPA raises a suspend interrupt when traffic arrives for an endpoint whose consumer is
//! gated. For AP consumers the gate is re-taken under `SPS_RESOURCE` and dropped again by a
//! debounced release that keeps re-arming while end-of-transfer activity is seen. Every other
//! endpoint is woken through the resource manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::active_clients::ClientGate;
use crate::client_log::ClientId;
use crate::endpoints::EndpointTable;
use crate::error::{PmError, Result};
use crate::hw::{Platform, RmResponse};
use crate::workqueue::{Work, WorkQueue};

pub const SPS_RESOURCE: &str = "SPS_RESOURCE";

#[derive(Debug)]
pub struct SuspendPath {
    /// A `SPS_RESOURCE` hold is outstanding and the release work owns it.
    dec_clients: AtomicBool,
    /// End-of-transfer activity since the release work last ran.
    eot_activity: AtomicBool,
    /// The `SPS_RESOURCE` hold was handed to the resume work, which has not taken it yet.
    resume_pending: AtomicBool,
    resume_work: Work,
    release_work: Work,
    debounce: Duration,
}

impl SuspendPath {
    /// `resume_work` must call [`SuspendPath::run_resume_work`] and `release_work` must call
    /// [`SuspendPath::run_release_work`]. Both are queued on the same queue, so a deferred
    /// resume always runs before the release that undoes it.
    pub fn new(resume_work: Work, release_work: Work, debounce: Duration) -> Self {
        Self {
            dec_clients: AtomicBool::new(false),
            eot_activity: AtomicBool::new(false),
            resume_pending: AtomicBool::new(false),
            resume_work,
            release_work,
            debounce,
        }
    }

    pub fn release_outstanding(&self) -> bool {
        self.dec_clients.load(Ordering::SeqCst)
    }

    pub fn note_transfer_activity(&self) {
        self.eot_activity.store(true, Ordering::SeqCst);
    }

    /// Handle a suspend interrupt for the endpoints set in `mask`.
    ///
    /// # Panics
    ///
    /// If HOLB cannot be enabled on a consumer whose resource was denied; the pipe would stall
    /// the whole block.
    pub fn handle_interrupt(
        &self,
        mask: u32,
        endpoints: &EndpointTable,
        gate: &dyn ClientGate,
        platform: &Platform,
        wq: &WorkQueue,
    ) {
        for (ep, client) in endpoints.suspended_in(mask) {
            tracing::debug!(%ep, client = client.name(), "suspend interrupt");

            if client.is_apps_cons() {
                if !self.dec_clients.load(Ordering::SeqCst) {
                    if let Err(err) = gate.try_hold(&ClientId::resource(SPS_RESOURCE)) {
                        tracing::warn!(%ep, "deferring resume to worker: {err}");
                        self.resume_pending.store(true, Ordering::SeqCst);
                        wq.queue(&self.resume_work);
                    }
                    self.dec_clients.store(true, Ordering::SeqCst);
                    wq.queue_delayed(&self.release_work, self.debounce);
                }
                continue;
            }

            let resource = client.rm_resource();
            match platform.resource_manager.request_named_resource(resource) {
                RmResponse::Denied if client.is_cons() => {
                    tracing::warn!(%ep, resource, "resource denied, enabling HOLB");
                    if let Err(err) = platform.pipes.configure_holb(ep, true) {
                        tracing::error!(%ep, "failed to enable HOLB: {err}");
                        panic!("failed to enable HOLB on {ep}: {err}");
                    }
                }
                response => tracing::debug!(%ep, resource, ?response, "resource requested"),
            }
        }
    }

    /// Worker side of a resume the interrupt could not complete without sleeping.
    pub fn run_resume_work(&self, gate: &dyn ClientGate) {
        gate.hold_blocking(&ClientId::resource(SPS_RESOURCE));
        self.resume_pending.store(false, Ordering::SeqCst);
    }

    /// Drop the `SPS_RESOURCE` hold, unless transfers happened since the release was queued.
    pub fn run_release_work(&self, gate: &dyn ClientGate, wq: &WorkQueue) {
        let eot = self.eot_activity.swap(false, Ordering::SeqCst);
        if !self.dec_clients.load(Ordering::SeqCst) {
            return;
        }
        if eot {
            tracing::debug!("EOT activity seen, postponing SPS release");
            wq.queue_delayed(&self.release_work, self.debounce);
            return;
        }
        self.dec_clients.store(false, Ordering::SeqCst);
        gate.release(&ClientId::resource(SPS_RESOURCE));
    }

    /// Prepare the AP for system suspend.
    ///
    /// Refused while any endpoint is polling. Otherwise the outstanding `SPS_RESOURCE` hold, if
    /// any, is dropped now instead of after the debounce. A resume that has not run yet is run
    /// first; one already running on the worker is followed by an immediate release there.
    pub fn ap_suspend(
        &self,
        endpoints: &EndpointTable,
        gate: &dyn ClientGate,
        wq: &WorkQueue,
    ) -> Result<()> {
        if let Some(ep) = endpoints.first_polling() {
            tracing::debug!(%ep, "endpoint is polling, refusing suspend");
            return Err(PmError::EndpointPolling(ep));
        }
        wq.cancel(&self.release_work);
        self.eot_activity.store(false, Ordering::SeqCst);
        if wq.cancel(&self.resume_work) {
            self.run_resume_work(gate);
        } else if self.resume_pending.load(Ordering::SeqCst) {
            tracing::debug!("SPS resume in flight, releasing behind it");
            wq.queue(&self.release_work);
            return Ok(());
        }
        self.run_release_work(gate, wq);
        Ok(())
    }
}
