//! Deferred "tag" flush before the block is gated.
//!
//! When armed, the decrement that would drop the last hold instead re-takes a `TAG_PROCESS` hold
//! and schedules `run_tag_process`. That work force-closes in-flight aggregation frames with
//! the clocks still running and then drops the `TAG_PROCESS` hold, which gates for real.

use crate::active_clients::{ActiveClients, Release};
use crate::client_log::ClientId;
use crate::hw::AggregationFlush;

pub const TAG_PROCESS: &str = "TAG_PROCESS";

/// Body of the tag work item. Returns the outcome of the final decrement so the caller can
/// reschedule if the gate was re-armed in the meantime.
pub(crate) fn run_tag_process(clients: &ActiveClients, flush: &dyn AggregationFlush) -> Release {
    tracing::debug!("starting TAG process");
    if let Err(err) = flush.force_close_aggregation() {
        tracing::error!("aggregation force close failed: {err}");
    }
    let outcome = clients.dec(&ClientId::special(TAG_PROCESS));
    tracing::debug!(?outcome, "TAG process done");
    outcome
}
