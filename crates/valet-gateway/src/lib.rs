//! Outbound gateway interface for the valet bot framework.
//!
//! The core talks to the WhatsApp HTTP gateway through the narrow
//! [`Gateway`] trait: send a message, send a reply quoting a message,
//! and fetch group participants. [`HttpGateway`] is the production
//! implementation; tests substitute their own recording double.

pub mod gateway;
pub mod http;

pub use gateway::{Gateway, GatewayError, Participant};
pub use http::{HttpGateway, HttpGatewayConfig};
