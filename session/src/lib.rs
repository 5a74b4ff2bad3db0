//! Commissioner session layer: secure transports, the CoAP exchange engine
//! and the petition/keep-alive session controller.
//!
//! ## Features
//!
//! - **Transports**: plain UDP, in-process pairs, DTLS 1.2 behind the
//!   `dtls` feature
//! - **CoAP engine**: confirmable retransmission, token correlation,
//!   block-wise transfer, cancellation
//! - **Session controller**: petition, keep-alive, resign, inbound
//!   notification dispatch
//! - **Token flow**: COM_TOK.req and signed-token validation (CCM)
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshcop_session::{CoapEndpoint, SessionConfig, SessionController, UdpConnection};
//!
//! # async fn example() -> meshcop_wire::Result<()> {
//! let conn = UdpConnection::connect("[fdde:ad00:beef::1]:49191".parse().unwrap()).await?;
//! let (endpoint, requests_rx) = CoapEndpoint::new(Arc::new(conn));
//! let (controller, mut events) =
//!     SessionController::new(endpoint, requests_rx, SessionConfig::default());
//!
//! let (session_id, locator) = controller.petition().await?;
//! println!("commissioning session {session_id}, border agent at {locator:#06x}");
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod coap;
pub mod controller;
pub mod token;
pub mod transport;

pub use coap::{CoapEndpoint, ACK_TIMEOUT, BLOCK_SIZE, DEFAULT_TIMEOUT, MAX_RETRANSMIT};
pub use controller::{SessionConfig, SessionController, SessionEvent, State};
pub use token::{request_token, verify_token};
pub use transport::{
    derive_key_material, Connection, DtlsConfig, PairConnection, UdpConnection, MAX_DATAGRAM_SIZE,
};

#[cfg(feature = "dtls")]
pub use transport::dtls::DtlsConnection;
