use crate::Result;
use async_trait::async_trait;
use universal_types::Envelope;

/// Envelope delivery seam between the TSS engine and the node.
///
/// The supervisor implements this over the transport: it resolves the
/// validator's peer identity on demand, and short-circuits self-addressed
/// envelopes through the local dispatch path without touching the wire.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_to(&self, validator: &str, envelope: &Envelope) -> Result<()>;
}
