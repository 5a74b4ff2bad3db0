//! Joiner admission pipeline for the commissioner.
//!
//! [`JoinerAdmission`] owns the joiner registry and steering-data
//! maintenance; [`JoinerSessionManager`] terminates relayed joiner sessions
//! and drives the commissioning handshake to KEK entrustment.

#![warn(clippy::all)]

pub mod admission;
pub mod handler;
pub mod relay;
pub mod session;

pub use admission::JoinerAdmission;
pub use handler::{CommissioningHandler, FinalizeInfo, HandlerSet, JoinerInfoRequester};
pub use relay::{iid_from_joiner_id, joiner_id_from_iid, RelayFrame};
pub use session::{JoinerSessionManager, KEK_LABEL, KEK_LENGTH};
