//! JSON configuration for the commissioner.
//!
//! The file uses the historical key spelling (`Id`, `EnableCcm`, `PSKc`, ...)
//! so existing deployments keep working.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use meshcop_session::{DtlsConfig, SessionConfig};
use meshcop_wire::{Error, Result};

fn default_keep_alive() -> u64 {
    30
}

fn default_max_connections() -> usize {
    64
}

/// Log verbosity names accepted in the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Critical,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

/// The commissioner configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Commissioner identifier used in the petition (at most 64 bytes).
    #[serde(rename = "Id")]
    pub id: String,

    /// Selects Commercial Commissioning Mode.
    #[serde(rename = "EnableCcm", default)]
    pub enable_ccm: bool,

    /// Thread domain name (CCM only).
    #[serde(rename = "DomainName", default)]
    pub domain_name: Option<String>,

    /// PSKc as a 32-character hex string (non-CCM).
    #[serde(rename = "PSKc", default)]
    pub pskc: Option<String>,

    /// PEM private key path (CCM only).
    #[serde(rename = "PrivateKeyFile", default)]
    pub private_key_file: Option<PathBuf>,

    /// PEM certificate path (CCM only).
    #[serde(rename = "CertificateFile", default)]
    pub certificate_file: Option<PathBuf>,

    /// PEM trust anchor path (CCM only).
    #[serde(rename = "TrustAnchorFile", default)]
    pub trust_anchor_file: Option<PathBuf>,

    /// Seconds between keep-alives.
    #[serde(rename = "KeepAliveInterval", default = "default_keep_alive")]
    pub keep_alive_interval: u64,

    /// Maximum concurrent joiner sessions.
    #[serde(rename = "MaxConnectionNum", default = "default_max_connections")]
    pub max_connection_num: usize,

    /// Log file path.
    #[serde(rename = "LogFile", default)]
    pub log_file: Option<PathBuf>,

    /// Log verbosity.
    #[serde(rename = "LogLevel", default)]
    pub log_level: LogLevel,
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            Error::new(
                meshcop_wire::ErrorKind::IoError,
                format!("cannot read {}: {err}", path.as_ref().display()),
            )
        })?;
        let config: AppConfig = serde_json::from_str(&text)
            .map_err(|err| Error::invalid_args(format!("bad config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.len() > 64 {
            return Err(Error::invalid_args(
                "Id must be between 1 and 64 bytes long",
            ));
        }
        if self.enable_ccm {
            if self.private_key_file.is_none()
                || self.certificate_file.is_none()
                || self.trust_anchor_file.is_none()
            {
                return Err(Error::invalid_args(
                    "CCM mode requires PrivateKeyFile, CertificateFile and TrustAnchorFile",
                ));
            }
        } else {
            self.pskc_bytes()?;
        }
        Ok(())
    }

    /// The decoded PSKc (non-CCM).
    pub fn pskc_bytes(&self) -> Result<[u8; 16]> {
        let text = self
            .pskc
            .as_deref()
            .ok_or_else(|| Error::invalid_args("PSKc is required outside CCM mode"))?;
        let bytes =
            hex::decode(text).map_err(|_| Error::invalid_args("PSKc is not valid hex"))?;
        bytes
            .try_into()
            .map_err(|_| Error::invalid_args("PSKc must be exactly 16 bytes"))
    }

    /// Session controller parameters derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            commissioner_id: self.id.clone(),
            ccm: self.enable_ccm,
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval),
            ..Default::default()
        }
    }

    /// Transport credentials derived from this config.
    pub fn dtls_config(&self) -> Result<DtlsConfig> {
        let mut config = DtlsConfig::default();
        if self.enable_ccm {
            config.private_key = Some(read_pem(self.private_key_file.as_deref())?);
            config.certificate = Some(read_pem(self.certificate_file.as_deref())?);
            config.trust_anchor = Some(read_pem(self.trust_anchor_file.as_deref())?);
        } else {
            config.psk = Some(self.pskc_bytes()?.to_vec());
            config.psk_identity = Some(self.id.clone().into_bytes());
        }
        Ok(config)
    }
}

/// Read a PEM file into memory.
pub fn read_pem(path: Option<&Path>) -> Result<Vec<u8>> {
    let path = path.ok_or_else(|| Error::invalid_args("missing PEM path"))?;
    std::fs::read(path)
        .map_err(|_| Error::not_found(format!("cannot read PEM file {}", path.display())))
}
