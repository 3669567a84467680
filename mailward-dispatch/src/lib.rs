//! The dispatcher: a long-lived supervisor that accepts send and bounce
//! requests, keeps the durable queue moving on a poll timer, and spawns a
//! short-lived worker task per outbound delivery.
//!
//! The supervisor processes requests serially, which keeps send/bounce
//! ordering strict per caller and protects the configuration snapshot;
//! deliveries themselves run on independent tokio tasks and never block
//! the supervisor.

pub mod bounce;
pub mod error;
pub mod server;
pub mod spamd;
mod worker;

pub use error::DispatchError;
pub use server::{DispatchConfig, DispatchServer, Mailer};
pub use spamd::SPAMD_TIMEOUT;
