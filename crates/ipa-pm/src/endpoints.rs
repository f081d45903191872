//! Hardware endpoint (pipe) bookkeeping needed by the suspend path.
//!
//! Only what the power gate needs is tracked here: which client owns each pipe and whether the
//! pipe's consumer is currently in polling mode.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::error::{PmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// Logical owner of a hardware pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    WlanProd,
    UsbProd,
    ApLanWanProd,
    ApCmdProd,
    OduProd,
    MhiProd,
    Q6LanProd,
    Q6WanProd,
    Q6CmdProd,
    WlanCons,
    UsbCons,
    UsbDplCons,
    ApLanCons,
    ApWanCons,
    OduEmbCons,
    MhiCons,
    Q6LanCons,
    Q6WanCons,
}

impl ClientType {
    pub const ALL: [ClientType; 18] = [
        ClientType::WlanProd,
        ClientType::UsbProd,
        ClientType::ApLanWanProd,
        ClientType::ApCmdProd,
        ClientType::OduProd,
        ClientType::MhiProd,
        ClientType::Q6LanProd,
        ClientType::Q6WanProd,
        ClientType::Q6CmdProd,
        ClientType::WlanCons,
        ClientType::UsbCons,
        ClientType::UsbDplCons,
        ClientType::ApLanCons,
        ClientType::ApWanCons,
        ClientType::OduEmbCons,
        ClientType::MhiCons,
        ClientType::Q6LanCons,
        ClientType::Q6WanCons,
    ];

    /// Look a client up by its `IPA_CLIENT_*` name, ignoring case. The prefix is optional.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|client| {
            let full = client.name();
            full.eq_ignore_ascii_case(name)
                || full
                    .strip_prefix("IPA_CLIENT_")
                    .is_some_and(|short| short.eq_ignore_ascii_case(name))
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ClientType::WlanProd => "IPA_CLIENT_WLAN1_PROD",
            ClientType::UsbProd => "IPA_CLIENT_USB_PROD",
            ClientType::ApLanWanProd => "IPA_CLIENT_APPS_LAN_WAN_PROD",
            ClientType::ApCmdProd => "IPA_CLIENT_APPS_CMD_PROD",
            ClientType::OduProd => "IPA_CLIENT_ODU_PROD",
            ClientType::MhiProd => "IPA_CLIENT_MHI_PROD",
            ClientType::Q6LanProd => "IPA_CLIENT_Q6_LAN_PROD",
            ClientType::Q6WanProd => "IPA_CLIENT_Q6_WAN_PROD",
            ClientType::Q6CmdProd => "IPA_CLIENT_Q6_CMD_PROD",
            ClientType::WlanCons => "IPA_CLIENT_WLAN1_CONS",
            ClientType::UsbCons => "IPA_CLIENT_USB_CONS",
            ClientType::UsbDplCons => "IPA_CLIENT_USB_DPL_CONS",
            ClientType::ApLanCons => "IPA_CLIENT_APPS_LAN_CONS",
            ClientType::ApWanCons => "IPA_CLIENT_APPS_WAN_CONS",
            ClientType::OduEmbCons => "IPA_CLIENT_ODU_EMB_CONS",
            ClientType::MhiCons => "IPA_CLIENT_MHI_CONS",
            ClientType::Q6LanCons => "IPA_CLIENT_Q6_LAN_CONS",
            ClientType::Q6WanCons => "IPA_CLIENT_Q6_WAN_CONS",
        }
    }

    pub fn is_cons(self) -> bool {
        matches!(
            self,
            ClientType::WlanCons
                | ClientType::UsbCons
                | ClientType::UsbDplCons
                | ClientType::ApLanCons
                | ClientType::ApWanCons
                | ClientType::OduEmbCons
                | ClientType::MhiCons
                | ClientType::Q6LanCons
                | ClientType::Q6WanCons
        )
    }

    /// Consumer pipes that deliver traffic to the application processor.
    pub fn is_apps_cons(self) -> bool {
        matches!(self, ClientType::ApLanCons | ClientType::ApWanCons)
    }

    /// Name of the resource-manager resource that gates this client's peer.
    pub fn rm_resource(self) -> &'static str {
        match self {
            ClientType::WlanProd => "IPA_RM_RESOURCE_WLAN_PROD",
            ClientType::UsbProd => "IPA_RM_RESOURCE_USB_PROD",
            ClientType::OduProd => "IPA_RM_RESOURCE_ODU_ADAPT_PROD",
            ClientType::MhiProd => "IPA_RM_RESOURCE_MHI_PROD",
            ClientType::ApLanWanProd | ClientType::ApCmdProd => "IPA_RM_RESOURCE_APPS_PROD",
            ClientType::Q6LanProd | ClientType::Q6WanProd | ClientType::Q6CmdProd => {
                "IPA_RM_RESOURCE_Q6_PROD"
            }
            ClientType::WlanCons => "IPA_RM_RESOURCE_WLAN_CONS",
            ClientType::UsbCons => "IPA_RM_RESOURCE_USB_CONS",
            ClientType::UsbDplCons => "IPA_RM_RESOURCE_USB_DPL_CONS",
            ClientType::ApLanCons | ClientType::ApWanCons => "IPA_RM_RESOURCE_APPS_CONS",
            ClientType::OduEmbCons => "IPA_RM_RESOURCE_ODU_ADAPT_CONS",
            ClientType::MhiCons => "IPA_RM_RESOURCE_MHI_CONS",
            ClientType::Q6LanCons | ClientType::Q6WanCons => "IPA_RM_RESOURCE_Q6_CONS",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Default)]
struct EndpointSlot {
    client: Option<ClientType>,
    polling: AtomicBool,
}

/// Fixed-size table of hardware pipes.
#[derive(Debug)]
pub struct EndpointTable {
    slots: RwLock<Vec<EndpointSlot>>,
}

impl EndpointTable {
    pub fn new(num_pipes: u32) -> Self {
        let slots = (0..num_pipes).map(|_| EndpointSlot::default()).collect();
        Self {
            slots: RwLock::new(slots),
        }
    }

    pub fn num_pipes(&self) -> u32 {
        self.read().len() as u32
    }

    /// Mark `ep` as valid and owned by `client`.
    pub fn connect(&self, ep: EndpointId, client: ClientType) -> Result<()> {
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = slots
            .get_mut(ep.0 as usize)
            .ok_or(PmError::InvalidEndpoint(ep))?;
        slot.client = Some(client);
        slot.polling.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn disconnect(&self, ep: EndpointId) -> Result<()> {
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = slots
            .get_mut(ep.0 as usize)
            .ok_or(PmError::InvalidEndpoint(ep))?;
        slot.client = None;
        slot.polling.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn client(&self, ep: EndpointId) -> Option<ClientType> {
        self.read().get(ep.0 as usize).and_then(|slot| slot.client)
    }

    pub fn set_polling(&self, ep: EndpointId, polling: bool) -> Result<()> {
        let slots = self.read();
        let slot = slots
            .get(ep.0 as usize)
            .ok_or(PmError::InvalidEndpoint(ep))?;
        slot.polling.store(polling, Ordering::SeqCst);
        Ok(())
    }

    /// First valid endpoint currently in polling mode, if any.
    pub fn first_polling(&self) -> Option<EndpointId> {
        self.read()
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.client.is_some() && slot.polling.load(Ordering::SeqCst))
            .map(|(idx, _)| EndpointId(idx as u32))
    }

    /// Valid endpoints whose bit is set in a suspend interrupt `mask`.
    pub fn suspended_in(&self, mask: u32) -> Vec<(EndpointId, ClientType)> {
        self.read()
            .iter()
            .enumerate()
            .take(32)
            .filter(|(idx, _)| mask & (1u32 << idx) != 0)
            .filter_map(|(idx, slot)| slot.client.map(|c| (EndpointId(idx as u32), c)))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<EndpointSlot>> {
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
