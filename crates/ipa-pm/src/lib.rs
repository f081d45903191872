//! Power gating for the IPA (IP Accelerator) packet-processing block.
//!
//! The hardware block is shared by several producer/consumer contexts and may only be touched
//! while its clocks are running and a bus bandwidth vote is outstanding. This crate implements the
//! control plane that arbitrates that:
//!
//! - [`active_clients`]: the reference-counted gate (`inc_client` / `dec_client`) with a blocking
//!   path that may power the block up and a non-blocking path that only piggybacks on an already
//!   powered block.
//! - [`clocks`] / [`perf`]: clock tree and bus vote sequencing plus performance-profile scaling.
//! - [`tag_gate`]: the deferred aggregation flush that runs before the last hold is dropped.
//! - [`transport`]: the GSI transport resource arbiter with a debounced release.
//! - [`suspend`]: the legacy (BAM/SPS) suspend interrupt path.
//! - [`client_log`]: the diagnostic registry of who holds the gate.
//!
//! Everything hangs off one explicitly constructed [`IpaPower`] context.

#![forbid(unsafe_code)]

pub mod active_clients;
pub mod client_log;
pub mod clocks;
pub mod config;
pub mod context;
pub mod endpoints;
mod error;
pub mod hw;
pub mod perf;
pub mod sim;
pub mod suspend;
mod sync;
pub mod tag_gate;
pub mod transport;
pub mod wakelock;
pub mod workqueue;

pub use client_log::{ClientId, ClientKind};
pub use config::{ClockRates, HwMode, PowerConfig};
pub use context::IpaPower;
pub use endpoints::{ClientType, EndpointId};
pub use error::{HwError, PmError, Result};
pub use hw::{Platform, RmResponse};
pub use perf::VoltageLevel;
pub use transport::{TransportEvent, TransportGrant};
