//! Hardware collaborators of the power gate.
//!
//! The gate never touches registers itself; it sequences calls into these traits. Each trait has
//! a no-op implementation so a [`Platform`] can be assembled from only the pieces a given board
//! (or test) provides.

use std::sync::Arc;

use crate::endpoints::EndpointId;
use crate::error::HwError;

/// A gateable clock.
pub trait ClockControl: Send + Sync {
    fn enable(&self) -> Result<(), HwError>;
    fn disable(&self);
    fn set_rate(&self, hz: u32) -> Result<(), HwError>;
}

/// Bus bandwidth voting client. `usecase == 0` withdraws the vote.
pub trait BusScaler: Send + Sync {
    fn vote(&self, usecase: u32) -> Result<(), HwError>;
}

/// Co-processor (uC) that must know whether the IPA clocks are running.
pub trait CoprocessorNotifier: Send + Sync {
    fn notify_clock_state(&self, enabled: bool);
}

pub trait PipeControl: Send + Sync {
    fn suspend_all(&self);
    fn resume_all(&self);
    fn configure_holb(&self, ep: EndpointId, enable: bool) -> Result<(), HwError>;
}

/// Answer of the resource-dependency manager to a named resource request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmResponse {
    Granted,
    Pending,
    /// The resource cannot be granted in the current dependency graph.
    Denied,
}

pub trait ResourceManager: Send + Sync {
    fn request_named_resource(&self, name: &str) -> RmResponse;
}

/// Issues the "tag" command that force-closes in-flight aggregation frames.
pub trait AggregationFlush: Send + Sync {
    fn force_close_aggregation(&self) -> Result<(), HwError>;
}

/// Transport (GSI) driver side of the clock-grant handshake.
pub trait TransportNotifier: Send + Sync {
    fn complete_clk_grant(&self) -> Result<(), HwError>;
}

/// System wakeup source held while the IPA has pending work for the AP.
pub trait WakeSource: Send + Sync {
    fn stay_awake(&self);
    fn relax(&self);
}

/// Does nothing and always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHw;

impl ClockControl for NullHw {
    fn enable(&self) -> Result<(), HwError> {
        Ok(())
    }

    fn disable(&self) {}

    fn set_rate(&self, _hz: u32) -> Result<(), HwError> {
        Ok(())
    }
}

impl BusScaler for NullHw {
    fn vote(&self, _usecase: u32) -> Result<(), HwError> {
        Ok(())
    }
}

impl CoprocessorNotifier for NullHw {
    fn notify_clock_state(&self, _enabled: bool) {}
}

impl PipeControl for NullHw {
    fn suspend_all(&self) {}

    fn resume_all(&self) {}

    fn configure_holb(&self, _ep: EndpointId, _enable: bool) -> Result<(), HwError> {
        Ok(())
    }
}

impl ResourceManager for NullHw {
    fn request_named_resource(&self, _name: &str) -> RmResponse {
        RmResponse::Granted
    }
}

impl AggregationFlush for NullHw {
    fn force_close_aggregation(&self) -> Result<(), HwError> {
        Ok(())
    }
}

impl TransportNotifier for NullHw {
    fn complete_clk_grant(&self) -> Result<(), HwError> {
        Ok(())
    }
}

impl WakeSource for NullHw {
    fn stay_awake(&self) {}

    fn relax(&self) {}
}

/// Every collaborator the power gate drives.
#[derive(Clone)]
pub struct Platform {
    pub core_clock: Arc<dyn ClockControl>,
    /// Optional auxiliary clock (e.g. the SMMU clock) gated together with the core clock.
    pub aux_clock: Option<Arc<dyn ClockControl>>,
    pub bus: Arc<dyn BusScaler>,
    pub coprocessor: Arc<dyn CoprocessorNotifier>,
    pub pipes: Arc<dyn PipeControl>,
    pub resource_manager: Arc<dyn ResourceManager>,
    pub aggregation: Arc<dyn AggregationFlush>,
    pub transport: Arc<dyn TransportNotifier>,
    pub wake_source: Arc<dyn WakeSource>,
}

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for Platform {
    fn default() -> Self {
        let null = Arc::new(NullHw);
        Self {
            core_clock: null.clone(),
            aux_clock: None,
            bus: null.clone(),
            coprocessor: null.clone(),
            pipes: null.clone(),
            resource_manager: null.clone(),
            aggregation: null.clone(),
            transport: null.clone(),
            wake_source: null,
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("aux_clock", &self.aux_clock.is_some())
            .finish_non_exhaustive()
    }
}
