//! Management request engine: scans, announces, MLR and the CCM commands.
//!
//! PAN ID conflicts and energy reports arrive asynchronously as
//! notifications; the engine keeps one aggregation map per kind, reset at
//! each new query.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

use tracing::info;

use meshcop_datasets::codec::channel_mask_tlv;
use meshcop_datasets::ChannelMask;
use meshcop_session::SessionController;
use meshcop_wire::{uri, Error, Result, Tlv, TlvList, TlvType};

/// An aggregated MGMT_ED_REPORT answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergyReport {
    pub channel_mask: ChannelMask,
    pub energy_list: Vec<u8>,
}

struct EngineInner {
    controller: SessionController,
    pan_id_conflicts: Mutex<HashMap<u16, ChannelMask>>,
    energy_reports: Mutex<HashMap<String, EnergyReport>>,
}

/// Handle to the management engine; cheap to clone.
#[derive(Clone)]
pub struct Management {
    inner: Arc<EngineInner>,
}

impl Management {
    pub fn new(controller: SessionController) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                controller,
                pan_id_conflicts: Mutex::new(HashMap::new()),
                energy_reports: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn destination_tlv(destination: &str) -> Result<Tlv> {
        let addr: Ipv6Addr = destination
            .parse()
            .map_err(|_| Error::invalid_args(format!("bad destination address {destination}")))?;
        Tlv::new(TlvType::Ipv6Address, addr.octets().to_vec())
    }

    fn session_id_tlv(&self) -> Result<Tlv> {
        Ok(Tlv::u16(
            TlvType::CommissionerSessionId,
            self.inner.controller.session_id()?,
        ))
    }

    /// MGMT_PANID_QUERY.qry. Conflict answers are folded in through
    /// [`record_pan_id_conflict`](Self::record_pan_id_conflict).
    pub async fn pan_id_query(
        &self,
        channel_mask: u32,
        pan_id: u16,
        destination: &str,
    ) -> Result<()> {
        self.inner
            .pan_id_conflicts
            .lock()
            .expect("conflict map lock")
            .clear();
        let mut tlvs = TlvList::new();
        tlvs.push(self.session_id_tlv()?);
        tlvs.push(channel_mask_tlv(&ChannelMask::from_bits(0, channel_mask))?);
        tlvs.push(Tlv::u16(TlvType::PanId, pan_id));
        tlvs.push(Self::destination_tlv(destination)?);
        self.inner.controller.mgmt_notify(uri::PANID_QUERY, tlvs).await
    }

    /// Fold in a MGMT_PANID_CONFLICT.ans notification.
    pub fn record_pan_id_conflict(&self, pan_id: u16, channel_mask: ChannelMask) {
        info!("PAN ID conflict reported for {pan_id:#06x}");
        self.inner
            .pan_id_conflicts
            .lock()
            .expect("conflict map lock")
            .insert(pan_id, channel_mask);
    }

    /// Whether a conflict has been reported for the PAN ID since the last
    /// query.
    pub fn has_pan_id_conflict(&self, pan_id: u16) -> bool {
        self.inner
            .pan_id_conflicts
            .lock()
            .expect("conflict map lock")
            .contains_key(&pan_id)
    }

    /// The reported channel mask for a conflicting PAN ID.
    pub fn pan_id_conflict(&self, pan_id: u16) -> Option<ChannelMask> {
        self.inner
            .pan_id_conflicts
            .lock()
            .expect("conflict map lock")
            .get(&pan_id)
            .cloned()
    }

    /// MGMT_ED_SCAN.qry. Reports are folded in through
    /// [`record_energy_report`](Self::record_energy_report).
    pub async fn energy_scan(
        &self,
        channel_mask: u32,
        count: u8,
        period: u16,
        scan_duration: u16,
        destination: &str,
    ) -> Result<()> {
        self.inner
            .energy_reports
            .lock()
            .expect("energy map lock")
            .clear();
        let mut tlvs = TlvList::new();
        tlvs.push(self.session_id_tlv()?);
        tlvs.push(channel_mask_tlv(&ChannelMask::from_bits(0, channel_mask))?);
        tlvs.push(Tlv::u8(TlvType::Count, count));
        tlvs.push(Tlv::u16(TlvType::Period, period));
        tlvs.push(Tlv::u16(TlvType::ScanDuration, scan_duration));
        tlvs.push(Self::destination_tlv(destination)?);
        self.inner.controller.mgmt_notify(uri::ENERGY_SCAN, tlvs).await
    }

    /// Fold in a MGMT_ED_REPORT.ans notification.
    pub fn record_energy_report(
        &self,
        peer: String,
        channel_mask: ChannelMask,
        energy_list: Vec<u8>,
    ) {
        info!("energy report from {peer}");
        self.inner
            .energy_reports
            .lock()
            .expect("energy map lock")
            .insert(
                peer,
                EnergyReport {
                    channel_mask,
                    energy_list,
                },
            );
    }

    /// The report received from a responder, if any.
    pub fn energy_report(&self, peer: &str) -> Option<EnergyReport> {
        self.inner
            .energy_reports
            .lock()
            .expect("energy map lock")
            .get(peer)
            .cloned()
    }

    /// All reports received since the last scan.
    pub fn energy_reports(&self) -> HashMap<String, EnergyReport> {
        self.inner
            .energy_reports
            .lock()
            .expect("energy map lock")
            .clone()
    }

    /// MGMT_ANNOUNCE_BEGIN.ntf: fire-and-forget, no reply expected.
    pub async fn announce_begin(
        &self,
        channel_mask: u32,
        count: u8,
        period_millis: u16,
        destination: &str,
    ) -> Result<()> {
        let mut tlvs = TlvList::new();
        tlvs.push(self.session_id_tlv()?);
        tlvs.push(channel_mask_tlv(&ChannelMask::from_bits(0, channel_mask))?);
        tlvs.push(Tlv::u8(TlvType::Count, count));
        tlvs.push(Tlv::u16(TlvType::Period, period_millis));
        tlvs.push(Self::destination_tlv(destination)?);
        self.inner
            .controller
            .mgmt_notify(uri::ANNOUNCE_BEGIN, tlvs)
            .await
    }

    /// MLR.req to the primary BBR. Succeeds iff the reply status byte is 0.
    pub async fn register_multicast_listeners(
        &self,
        addresses: &[Ipv6Addr],
        timeout_secs: u32,
    ) -> Result<()> {
        if addresses.is_empty() {
            return Err(Error::invalid_args("no multicast addresses given"));
        }
        let mut tlvs = TlvList::new();
        tlvs.push(self.session_id_tlv()?);
        tlvs.push(Tlv::u32(TlvType::DelayTimer, timeout_secs));
        for addr in addresses {
            tlvs.push(Tlv::new(TlvType::Ipv6Address, addr.octets().to_vec())?);
        }
        let reply = self.inner.controller.mgmt_request(uri::MLR, tlvs).await?;
        let status = reply.require(TlvType::State)?.as_u8()?;
        if status != 0 {
            return Err(Error::rejected(format!(
                "MLR.req rejected with status {status}"
            )));
        }
        Ok(())
    }

    fn ensure_ccm(&self) -> Result<()> {
        if self.inner.controller.is_ccm_mode() {
            Ok(())
        } else {
            Err(Error::invalid_state("the commissioner is not in CCM mode"))
        }
    }

    /// MGMT_REENROLL.req (CCM).
    pub async fn reenroll(&self, destination: &str) -> Result<()> {
        self.ensure_ccm()?;
        let mut tlvs = TlvList::new();
        tlvs.push(Self::destination_tlv(destination)?);
        self.inner
            .controller
            .mgmt_request(uri::REENROLL, tlvs)
            .await?;
        Ok(())
    }

    /// MGMT_DOMAIN_RESET.req (CCM).
    pub async fn domain_reset(&self, destination: &str) -> Result<()> {
        self.ensure_ccm()?;
        let mut tlvs = TlvList::new();
        tlvs.push(Self::destination_tlv(destination)?);
        self.inner
            .controller
            .mgmt_request(uri::DOMAIN_RESET, tlvs)
            .await?;
        Ok(())
    }

    /// MGMT_NET_MIGRATE.req (CCM): move the device to the designated network.
    pub async fn migrate(&self, destination: &str, designated_network: &str) -> Result<()> {
        self.ensure_ccm()?;
        let mut tlvs = TlvList::new();
        tlvs.push(Self::destination_tlv(destination)?);
        tlvs.push(Tlv::string(TlvType::NetworkName, designated_network)?);
        self.inner
            .controller
            .mgmt_request(uri::NET_MIGRATE, tlvs)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_tlv_rejects_garbage() {
        let err = Management::destination_tlv("not-an-address").unwrap_err();
        assert_eq!(err.kind(), meshcop_wire::ErrorKind::InvalidArgs);
        assert!(Management::destination_tlv("ff03::1").is_ok());
    }
}
