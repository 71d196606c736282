//! Shared data model for the Universal Client TSS fleet.
//!
//! Everything that crosses a crate boundary lives here: the durable
//! [`Event`] row, the validator set snapshot, CAIP transaction references,
//! and the peer-to-peer wire [`Envelope`].

mod caip;
mod envelope;
mod error;
mod event;
mod validator;

pub use caip::TxRef;
pub use envelope::{Envelope, MessageKind};
pub use error::Error;
pub use event::{Event, EventStatus, ProtocolType, SignData};
pub use validator::{NetworkInfo, UniversalValidator, ValidatorStatus};

/// Bech32-style operator address of a universal validator.
pub type ValidatorAddress = String;

/// Opaque identifier of a TSS event row.
pub type EventId = String;
