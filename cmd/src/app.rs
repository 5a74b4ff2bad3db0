//! The commissioner application facade.
//!
//! Owns the session controller, dataset store, joiner admission and
//! management engine for one Border Agent connection, and exposes the
//! operation surface the console drives.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

use meshcop_commission::{HandlerSet, JoinerAdmission, JoinerSessionManager};
use meshcop_datasets::{
    ActiveDataset, ActiveFields, BbrDataset, Channel, ChannelMask, CommissionerDataset,
    JoinerType, PendingDataset, SecurityPolicy, SteeringData, Timestamp,
};
use meshcop_mgmt::{DatasetStore, EnergyReport, Management};
use meshcop_session::{CoapEndpoint, Connection, SessionController, SessionEvent};
#[cfg(not(feature = "dtls"))]
use meshcop_session::UdpConnection;
use meshcop_wire::{Error, Result};

use crate::config::{read_pem, AppConfig};

/// ALOC16 of the primary Backbone Border Router.
const PRIMARY_BBR_ALOC16: u16 = 0xFC38;

/// Cancellation handle published to the signal handler: aborting is safe
/// from any task and never blocks.
#[derive(Clone, Default)]
pub struct AbortHandle {
    inner: Arc<Mutex<Option<SessionController>>>,
}

impl AbortHandle {
    /// Cancel all outstanding requests of the running session, if any.
    pub fn abort(&self) {
        if let Some(controller) = &*self.inner.lock().expect("abort handle lock") {
            controller.abort_requests();
        }
    }

    fn set(&self, controller: SessionController) {
        *self.inner.lock().expect("abort handle lock") = Some(controller);
    }

    fn clear(&self) {
        *self.inner.lock().expect("abort handle lock") = None;
    }
}

struct Instance {
    controller: SessionController,
    store: DatasetStore,
    admission: JoinerAdmission,
    #[allow(dead_code)]
    joiner_sessions: JoinerSessionManager,
    management: Management,
    event_task: tokio::task::JoinHandle<()>,
}

/// The commissioner application.
pub struct CommissionerApp {
    config: AppConfig,
    handlers: HandlerSet,
    abort: AbortHandle,
    signed_token: Option<Vec<u8>>,
    last_existing_commissioner_id: Option<String>,
    instance: Option<Instance>,
}

impl CommissionerApp {
    /// Build an application from a validated config; no connection yet.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            handlers: HandlerSet::default(),
            abort: AbortHandle::default(),
            signed_token: None,
            last_existing_commissioner_id: None,
            instance: None,
        }
    }

    /// Replace the default handler set.
    pub fn with_handlers(mut self, handlers: HandlerSet) -> Self {
        self.handlers = handlers;
        self
    }

    /// The cancellation handle for the signal handler.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    async fn connect(config: &AppConfig, addr: SocketAddr) -> Result<Arc<dyn Connection>> {
        #[cfg(feature = "dtls")]
        {
            let conn =
                meshcop_session::DtlsConnection::connect(addr, &config.dtls_config()?).await?;
            Ok(Arc::new(conn))
        }
        #[cfg(not(feature = "dtls"))]
        {
            // Key material is still validated so misconfiguration surfaces
            // the same way in both builds.
            config.dtls_config()?;
            Ok(Arc::new(UdpConnection::connect(addr).await?))
        }
    }

    /// Petition through the Border Agent and mirror the network data.
    pub async fn start(&mut self, border_agent_addr: &str, border_agent_port: u16) -> Result<()> {
        if self.instance.is_some() {
            return Err(Error::invalid_state("the commissioner is already started"));
        }
        let ip: IpAddr = border_agent_addr
            .parse()
            .map_err(|_| Error::invalid_args(format!("bad address {border_agent_addr}")))?;
        let addr = SocketAddr::new(ip, border_agent_port);

        let conn = Self::connect(&self.config, addr).await?;
        let (endpoint, requests_rx) = CoapEndpoint::new(conn);
        let mut session_config = self.config.session_config();
        session_config.signed_token = self.signed_token.clone();
        let (controller, events_rx) = SessionController::new(endpoint, requests_rx, session_config);

        let store = DatasetStore::new(controller.clone());
        let management = Management::new(controller.clone());
        let admission = JoinerAdmission::new(store.clone());
        let joiner_sessions = JoinerSessionManager::new(
            admission.clone(),
            self.handlers.clone(),
            self.config.max_connection_num,
        );
        let event_task = tokio::spawn(route_events(
            events_rx,
            store.clone(),
            management.clone(),
            joiner_sessions.clone(),
        ));

        if let Err(err) = controller.petition().await {
            self.last_existing_commissioner_id = controller.existing_commissioner_id();
            event_task.abort();
            controller.coap().close().await;
            return Err(err);
        }
        if let Err(err) = store.pull_all().await {
            let _ = controller.resign().await;
            event_task.abort();
            return Err(err);
        }

        self.abort.set(controller.clone());
        self.instance = Some(Instance {
            controller,
            store,
            admission,
            joiner_sessions,
            management,
            event_task,
        });
        info!("commissioner started against {addr}");
        Ok(())
    }

    /// Resign and drop the session.
    pub async fn stop(&mut self) {
        self.abort.clear();
        if let Some(instance) = self.instance.take() {
            if instance.controller.is_active() {
                if let Err(err) = instance.controller.resign().await {
                    warn!("resign failed: {err}");
                }
            } else {
                instance.controller.coap().close().await;
            }
            instance.event_task.abort();
        }
    }

    /// Cancel all outstanding requests; the session stays up.
    pub fn abort_requests(&self) {
        self.abort.abort();
    }

    fn inst(&self) -> Result<&Instance> {
        self.instance
            .as_ref()
            .ok_or_else(|| Error::invalid_state("the commissioner is not started"))
    }

    fn active_inst(&self) -> Result<&Instance> {
        let instance = self.inst()?;
        instance.controller.ensure_active()?;
        Ok(instance)
    }

    fn ensure_ccm(&self) -> Result<()> {
        if self.config.enable_ccm {
            Ok(())
        } else {
            Err(Error::invalid_state("the commissioner is not in CCM Mode"))
        }
    }

    pub fn is_active(&self) -> bool {
        self.instance
            .as_ref()
            .map(|instance| instance.controller.is_active())
            .unwrap_or(false)
    }

    pub fn is_ccm_mode(&self) -> bool {
        self.config.enable_ccm
    }

    /// The commissioner that won the network when our petition lost.
    pub fn existing_commissioner_id(&self) -> Option<String> {
        self.last_existing_commissioner_id.clone()
    }

    pub fn session_id(&self) -> Result<u16> {
        self.active_inst()?.controller.session_id()
    }

    pub fn border_agent_locator(&self) -> Result<u16> {
        self.active_inst()?.controller.border_agent_locator()
    }

    pub fn domain_name(&self) -> Option<String> {
        self.config.domain_name.clone()
    }

    // ---- Commissioner dataset ----------------------------------------

    pub fn get_steering_data(&self, joiner_type: JoinerType) -> Result<SteeringData> {
        let dataset = self.active_inst()?.store.commissioner();
        let (field, what) = match joiner_type {
            JoinerType::MeshCoP => (dataset.steering_data, "Steering Data"),
            JoinerType::Ae => (dataset.ae_steering_data, "AE Steering Data"),
            JoinerType::Nmkp => (dataset.nmkp_steering_data, "NMKP Steering Data"),
        };
        field.ok_or_else(|| Error::not_found(format!("cannot find {what}")))
    }

    pub fn get_joiner_udp_port(&self, joiner_type: JoinerType) -> Result<u16> {
        let dataset = self.active_inst()?.store.commissioner();
        let (field, what) = match joiner_type {
            JoinerType::MeshCoP => (dataset.joiner_udp_port, "Joiner UDP Port"),
            JoinerType::Ae => (dataset.ae_udp_port, "AE UDP Port"),
            JoinerType::Nmkp => (dataset.nmkp_udp_port, "NMKP UDP Port"),
        };
        field.ok_or_else(|| Error::not_found(format!("cannot find {what}")))
    }

    pub async fn set_joiner_udp_port(&self, joiner_type: JoinerType, port: u16) -> Result<()> {
        let instance = self.active_inst()?;
        let mut dataset = instance.store.commissioner();
        match joiner_type {
            JoinerType::MeshCoP => dataset.joiner_udp_port = Some(port),
            JoinerType::Ae => dataset.ae_udp_port = Some(port),
            JoinerType::Nmkp => dataset.nmkp_udp_port = Some(port),
        }
        instance.store.set_commissioner(dataset).await
    }

    pub fn get_commissioner_dataset(&self) -> Result<CommissionerDataset> {
        Ok(self.active_inst()?.store.commissioner())
    }

    pub async fn set_commissioner_dataset(&self, dataset: CommissionerDataset) -> Result<()> {
        self.active_inst()?.store.set_commissioner(dataset).await
    }

    // ---- Active / Pending datasets -----------------------------------

    pub fn get_active_timestamp(&self) -> Result<Timestamp> {
        self.active_inst()?
            .store
            .active(ActiveFields::all())
            .active_timestamp
            .ok_or_else(|| Error::not_found("cannot find Active Timestamp"))
    }

    /// Channel reads re-pull first: a pending dataset may have rotated it.
    pub async fn get_channel(&self) -> Result<Channel> {
        self.active_inst()?
            .store
            .pull_active()
            .await?
            .channel
            .ok_or_else(|| Error::not_found("cannot find Channel"))
    }

    pub async fn set_channel(&self, channel: Channel, delay_millis: u32) -> Result<()> {
        let dataset = PendingDataset {
            active: ActiveDataset {
                channel: Some(channel),
                ..Default::default()
            },
            delay_timer: Some(delay_millis),
            ..Default::default()
        };
        self.active_inst()?.store.set_pending(dataset).await
    }

    pub fn get_channel_mask(&self) -> Result<ChannelMask> {
        self.active_inst()?
            .store
            .active(ActiveFields::all())
            .channel_mask
            .ok_or_else(|| Error::not_found("cannot find valid Channel Masks"))
    }

    pub async fn set_channel_mask(&self, channel_mask: ChannelMask) -> Result<()> {
        let dataset = ActiveDataset {
            channel_mask: Some(channel_mask),
            ..Default::default()
        };
        self.active_inst()?.store.set_active(dataset).await
    }

    pub fn get_extended_pan_id(&self) -> Result<[u8; 8]> {
        self.active_inst()?
            .store
            .active(ActiveFields::all())
            .extended_pan_id
            .ok_or_else(|| Error::not_found("cannot find valid Extended PAN ID"))
    }

    pub async fn set_extended_pan_id(&self, extended_pan_id: [u8; 8]) -> Result<()> {
        let dataset = ActiveDataset {
            extended_pan_id: Some(extended_pan_id),
            ..Default::default()
        };
        self.active_inst()?.store.set_active(dataset).await
    }

    pub async fn get_mesh_local_prefix(&self) -> Result<String> {
        let prefix = self
            .active_inst()?
            .store
            .pull_active()
            .await?
            .mesh_local_prefix
            .ok_or_else(|| Error::not_found("cannot find valid Mesh-local Prefix"))?;
        let mut octets = [0u8; 16];
        octets[..8].copy_from_slice(&prefix);
        Ok(format!("{}/64", Ipv6Addr::from(octets)))
    }

    pub async fn set_mesh_local_prefix(&self, prefix: &str, delay_millis: u32) -> Result<()> {
        let dataset = PendingDataset {
            active: ActiveDataset {
                mesh_local_prefix: Some(parse_prefix(prefix)?),
                ..Default::default()
            },
            delay_timer: Some(delay_millis),
            ..Default::default()
        };
        self.active_inst()?.store.set_pending(dataset).await
    }

    pub async fn get_network_master_key(&self) -> Result<[u8; 16]> {
        self.active_inst()?
            .store
            .pull_active()
            .await?
            .network_master_key
            .ok_or_else(|| Error::not_found("cannot find valid Network Master Key"))
    }

    pub async fn set_network_master_key(&self, key: [u8; 16], delay_millis: u32) -> Result<()> {
        let dataset = PendingDataset {
            active: ActiveDataset {
                network_master_key: Some(key),
                ..Default::default()
            },
            delay_timer: Some(delay_millis),
            ..Default::default()
        };
        self.active_inst()?.store.set_pending(dataset).await
    }

    pub fn get_network_name(&self) -> Result<String> {
        self.active_inst()?
            .store
            .active(ActiveFields::all())
            .network_name
            .ok_or_else(|| Error::not_found("cannot find valid Network Name"))
    }

    pub async fn set_network_name(&self, name: &str) -> Result<()> {
        let dataset = ActiveDataset {
            network_name: Some(name.to_string()),
            ..Default::default()
        };
        self.active_inst()?.store.set_active(dataset).await
    }

    pub async fn get_pan_id(&self) -> Result<u16> {
        self.active_inst()?
            .store
            .pull_active()
            .await?
            .pan_id
            .ok_or_else(|| Error::not_found("cannot find valid PAN ID"))
    }

    pub async fn set_pan_id(&self, pan_id: u16, delay_millis: u32) -> Result<()> {
        let dataset = PendingDataset {
            active: ActiveDataset {
                pan_id: Some(pan_id),
                ..Default::default()
            },
            delay_timer: Some(delay_millis),
            ..Default::default()
        };
        self.active_inst()?.store.set_pending(dataset).await
    }

    pub fn get_pskc(&self) -> Result<[u8; 16]> {
        self.active_inst()?
            .store
            .active(ActiveFields::all())
            .pskc
            .ok_or_else(|| Error::not_found("cannot find valid PSKc"))
    }

    pub async fn set_pskc(&self, pskc: [u8; 16]) -> Result<()> {
        let dataset = ActiveDataset {
            pskc: Some(pskc),
            ..Default::default()
        };
        self.active_inst()?.store.set_active(dataset).await
    }

    pub fn get_security_policy(&self) -> Result<SecurityPolicy> {
        self.active_inst()?
            .store
            .active(ActiveFields::all())
            .security_policy
            .ok_or_else(|| Error::not_found("cannot find valid Security Policy"))
    }

    pub async fn set_security_policy(&self, policy: SecurityPolicy) -> Result<()> {
        let dataset = ActiveDataset {
            security_policy: Some(policy),
            ..Default::default()
        };
        self.active_inst()?.store.set_active(dataset).await
    }

    pub fn get_active_dataset(&self) -> Result<ActiveDataset> {
        Ok(self.active_inst()?.store.active(ActiveFields::all()))
    }

    pub async fn set_active_dataset(&self, dataset: ActiveDataset) -> Result<()> {
        self.active_inst()?.store.set_active(dataset).await
    }

    pub fn get_pending_dataset(&self) -> Result<PendingDataset> {
        Ok(self.active_inst()?.store.pending())
    }

    pub async fn set_pending_dataset(&self, dataset: PendingDataset) -> Result<()> {
        self.active_inst()?.store.set_pending(dataset).await
    }

    // ---- BBR dataset (CCM) -------------------------------------------

    pub fn get_bbr_dataset(&self) -> Result<BbrDataset> {
        self.ensure_ccm()?;
        Ok(self.active_inst()?.store.bbr())
    }

    pub async fn set_bbr_dataset(&self, dataset: BbrDataset) -> Result<()> {
        self.ensure_ccm()?;
        self.active_inst()?.store.set_bbr(dataset).await
    }

    pub fn get_tri_hostname(&self) -> Result<String> {
        self.get_bbr_dataset()?
            .tri_hostname
            .ok_or_else(|| Error::not_found("cannot find valid TRI Hostname"))
    }

    pub async fn set_tri_hostname(&self, hostname: &str) -> Result<()> {
        self.set_bbr_dataset(BbrDataset {
            tri_hostname: Some(hostname.to_string()),
            ..Default::default()
        })
        .await
    }

    pub fn get_registrar_hostname(&self) -> Result<String> {
        self.get_bbr_dataset()?
            .registrar_hostname
            .ok_or_else(|| Error::not_found("cannot find valid Registrar Hostname"))
    }

    pub async fn set_registrar_hostname(&self, hostname: &str) -> Result<()> {
        self.set_bbr_dataset(BbrDataset {
            registrar_hostname: Some(hostname.to_string()),
            ..Default::default()
        })
        .await
    }

    pub fn get_registrar_ipv6_addr(&self) -> Result<String> {
        self.get_bbr_dataset()?
            .registrar_ipv6_addr
            .ok_or_else(|| Error::not_found("cannot find valid Registrar IPv6 Address"))
    }

    // ---- Joiners ------------------------------------------------------

    pub async fn enable_joiner(
        &self,
        joiner_type: JoinerType,
        eui64: u64,
        pskd: &str,
        provisioning_url: &str,
    ) -> Result<()> {
        self.inst()?
            .admission
            .enable_joiner(joiner_type, eui64, pskd, provisioning_url)
            .await
    }

    pub async fn disable_joiner(&self, joiner_type: JoinerType, eui64: u64) -> Result<()> {
        self.inst()?.admission.disable_joiner(joiner_type, eui64).await
    }

    pub async fn enable_all_joiners(
        &self,
        joiner_type: JoinerType,
        pskd: &str,
        provisioning_url: &str,
    ) -> Result<()> {
        self.inst()?
            .admission
            .enable_all_joiners(joiner_type, pskd, provisioning_url)
            .await
    }

    pub async fn disable_all_joiners(&self, joiner_type: JoinerType) -> Result<()> {
        self.inst()?.admission.disable_all_joiners(joiner_type).await
    }

    pub fn is_joiner_commissioned(&self, joiner_type: JoinerType, eui64: u64) -> bool {
        self.inst()
            .map(|instance| instance.admission.is_joiner_commissioned(joiner_type, eui64))
            .unwrap_or(false)
    }

    pub fn joiners(&self) -> Vec<meshcop_datasets::JoinerInfo> {
        self.inst()
            .map(|instance| instance.admission.joiners())
            .unwrap_or_default()
    }

    // ---- Management ---------------------------------------------------

    pub async fn pan_id_query(
        &self,
        channel_mask: u32,
        pan_id: u16,
        destination: &str,
    ) -> Result<()> {
        self.active_inst()?
            .management
            .pan_id_query(channel_mask, pan_id, destination)
            .await
    }

    pub fn has_pan_id_conflict(&self, pan_id: u16) -> bool {
        self.inst()
            .map(|instance| instance.management.has_pan_id_conflict(pan_id))
            .unwrap_or(false)
    }

    pub fn pan_id_conflict(&self, pan_id: u16) -> Option<ChannelMask> {
        self.inst().ok()?.management.pan_id_conflict(pan_id)
    }

    pub async fn energy_scan(
        &self,
        channel_mask: u32,
        count: u8,
        period: u16,
        scan_duration: u16,
        destination: &str,
    ) -> Result<()> {
        self.active_inst()?
            .management
            .energy_scan(channel_mask, count, period, scan_duration, destination)
            .await
    }

    pub fn energy_report(&self, peer: &str) -> Option<EnergyReport> {
        self.inst().ok()?.management.energy_report(peer)
    }

    pub fn energy_reports(&self) -> std::collections::HashMap<String, EnergyReport> {
        self.inst()
            .map(|instance| instance.management.energy_reports())
            .unwrap_or_default()
    }

    pub async fn announce_begin(
        &self,
        channel_mask: u32,
        count: u8,
        period_millis: u16,
        destination: &str,
    ) -> Result<()> {
        self.active_inst()?
            .management
            .announce_begin(channel_mask, count, period_millis, destination)
            .await
    }

    /// Register multicast listeners with the primary BBR.
    pub async fn register_multicast_listeners(
        &self,
        addresses: &[String],
        timeout_secs: u32,
    ) -> Result<()> {
        let instance = self.active_inst()?;
        let parsed: Result<Vec<Ipv6Addr>> = addresses
            .iter()
            .map(|text| {
                text.parse::<Ipv6Addr>()
                    .map_err(|_| Error::invalid_args(format!("bad multicast address {text}")))
            })
            .collect();
        let parsed = parsed?;
        let pbbr = self.primary_bbr_addr().await?;
        info!("registering {} listeners with primary BBR {pbbr}", parsed.len());
        instance
            .management
            .register_multicast_listeners(&parsed, timeout_secs)
            .await
    }

    /// The mesh-local anycast address of the primary BBR.
    pub async fn primary_bbr_addr(&self) -> Result<Ipv6Addr> {
        let prefix = self
            .active_inst()?
            .store
            .pull_active()
            .await?
            .mesh_local_prefix
            .ok_or_else(|| Error::not_found("cannot find valid Mesh-local Prefix"))?;
        let mut octets = [0u8; 16];
        octets[..8].copy_from_slice(&prefix);
        octets[8..14].copy_from_slice(&[0x00, 0x00, 0x00, 0xFF, 0xFE, 0x00]);
        octets[14..].copy_from_slice(&PRIMARY_BBR_ALOC16.to_be_bytes());
        Ok(Ipv6Addr::from(octets))
    }

    pub async fn reenroll(&self, destination: &str) -> Result<()> {
        self.ensure_ccm()?;
        self.active_inst()?.management.reenroll(destination).await
    }

    pub async fn domain_reset(&self, destination: &str) -> Result<()> {
        self.ensure_ccm()?;
        self.active_inst()?.management.domain_reset(destination).await
    }

    pub async fn migrate(&self, destination: &str, designated_network: &str) -> Result<()> {
        self.ensure_ccm()?;
        self.active_inst()?
            .management
            .migrate(destination, designated_network)
            .await
    }

    // ---- CCM token ----------------------------------------------------

    pub fn get_token(&self) -> Option<Vec<u8>> {
        self.signed_token.clone()
    }

    /// COM_TOK.req against the registrar.
    pub async fn request_token(&mut self, registrar_addr: &str, port: u16) -> Result<Vec<u8>> {
        self.ensure_ccm()?;
        let domain = self
            .config
            .domain_name
            .clone()
            .ok_or_else(|| Error::invalid_args("DomainName is required for the token flow"))?;
        let ip: IpAddr = registrar_addr
            .parse()
            .map_err(|_| Error::invalid_args(format!("bad address {registrar_addr}")))?;
        let conn = Self::connect(&self.config, SocketAddr::new(ip, port)).await?;
        let token = meshcop_session::request_token(
            conn,
            &self.config.id,
            &domain,
            meshcop_session::DEFAULT_TIMEOUT,
        )
        .await?;
        self.install_token(token.clone());
        Ok(token)
    }

    /// Validate and install an externally obtained signed token.
    pub fn set_token(&mut self, token: Vec<u8>, signer_cert_pem: &[u8]) -> Result<()> {
        self.ensure_ccm()?;
        let anchor = read_pem(self.config.trust_anchor_file.as_deref())?;
        meshcop_session::verify_token(&token, signer_cert_pem, &anchor)?;
        self.install_token(token);
        Ok(())
    }

    fn install_token(&mut self, token: Vec<u8>) {
        // Consulted at the next start(); petition seeds the session with it.
        self.signed_token = Some(token);
    }

    // ---- Persistence --------------------------------------------------

    pub async fn pull_network_data(&self) -> Result<()> {
        self.active_inst()?.store.pull_all().await
    }

    pub fn save_network_data(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inst()?.store.network_data().save(path)
    }
}

async fn route_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    store: DatasetStore,
    management: Management,
    joiner_sessions: JoinerSessionManager,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StateChanged(state) => info!("session state: {state:?}"),
            SessionEvent::DatasetChanged => {
                // Enqueue a pull instead of touching the mirrors here.
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(err) = store.pull_active().await {
                        warn!("active re-pull after dataset change failed: {err}");
                    }
                    if let Err(err) = store.pull_pending().await {
                        warn!("pending re-pull after dataset change failed: {err}");
                    }
                });
            }
            SessionEvent::PanIdConflict {
                peer: _,
                pan_id,
                channel_mask,
            } => management.record_pan_id_conflict(pan_id, channel_mask),
            SessionEvent::EnergyReport {
                peer,
                channel_mask,
                energy_list,
            } => management.record_energy_report(peer, channel_mask, energy_list),
            SessionEvent::RelayRx(payload) => {
                let joiner_sessions = joiner_sessions.clone();
                tokio::spawn(async move {
                    if let Err(err) = joiner_sessions.handle_relay_rx(&payload).await {
                        warn!("bad relay frame: {err}");
                    }
                });
            }
        }
    }
}

fn parse_prefix(text: &str) -> Result<[u8; 8]> {
    let addr_text = text.strip_suffix("/64").unwrap_or(text);
    let addr: Ipv6Addr = addr_text
        .parse()
        .map_err(|_| Error::invalid_args(format!("bad mesh-local prefix {text}")))?;
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&addr.octets()[..8]);
    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefix() {
        let prefix = parse_prefix("fdde:ad00:beef::/64").unwrap();
        assert_eq!(&prefix[..4], &[0xFD, 0xDE, 0xAD, 0x00]);
        assert!(parse_prefix("not-a-prefix").is_err());
    }

    #[test]
    fn test_abort_handle_without_session_is_noop() {
        AbortHandle::default().abort();
    }
}
