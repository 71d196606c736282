//! The TSS protocol engine of the Universal Client.
//!
//! Three cooperating pieces, each on its own task:
//!
//! - the [`Coordinator`] polls for fresh events, elects a leader
//!   deterministically per epoch, and — when leading — drives the
//!   setup → ack → begin handshake;
//! - the [`SessionManager`] owns one live protocol session per event,
//!   reconciles out-of-order messages, and lands terminal outcomes in the
//!   vault, the chain driver and the event store;
//! - the [`MaintenanceHandler`] sweeps expired events into their terminal
//!   states and garbage-collects old terminal rows.
//!
//! Everything speaks to the rest of the node through narrow seams: the
//! [`Outbox`] for envelope delivery and the `universal-chain` traits for
//! the core chain.

mod config;
mod coordinator;
mod election;
mod error;
mod maintenance;
mod outbox;
mod sessions;

pub use config::TssConfig;
pub use coordinator::Coordinator;
pub use election::{
    eligible_participants, elect_leader, epoch, select_sign_participants, session_threshold,
};
pub use error::Error;
pub use maintenance::MaintenanceHandler;
pub use outbox::Outbox;
pub use sessions::SessionManager;

/// Convenience alias for `Result<T, universal_tss::Error>`
pub type Result<T> = std::result::Result<T, Error>;
