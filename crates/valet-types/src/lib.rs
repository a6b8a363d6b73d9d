//! Core types shared across all valet crates.
//!
//! Defines the error enum, typed chat/user identifiers, runtime
//! configuration, and the inbound gateway event shapes consumed by the
//! message router.

pub mod config;
pub mod error;
pub mod event;
pub mod ids;

pub use config::ValetConfig;
pub use error::ValetError;
pub use event::{InboundEvent, MessagePayload, ParticipantChange, ParticipantsPayload};
pub use ids::{ChatId, UserId, GROUP_SUFFIX, USER_SUFFIX};
