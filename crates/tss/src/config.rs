use std::time::Duration;
use universal_types::ValidatorAddress;

/// Tuning knobs for the coordinator, session manager and maintenance
/// sweeps. The defaults are the production values; tests shrink the
/// timeouts.
#[derive(Debug, Clone)]
pub struct TssConfig {
    /// This node's validator-operator address
    pub validator_address: ValidatorAddress,
    /// Width of the leader-rotation window in blocks
    pub coordinator_range: u64,
    /// Blocks to wait past event creation before acting on it
    pub finality_lag: u64,
    /// Coordinator poll cadence
    pub poll_interval: Duration,
    /// How long the leader gathers acks before giving up on a setup
    pub setup_timeout: Duration,
    /// Inactivity window after which a live session is abandoned
    pub session_expiry: Duration,
    /// Blocks a rescheduled event waits before its next attempt
    pub session_expiry_block_delay: u64,
    /// Percentage of the eligible set sampled into a SIGN session
    pub threshold_percent: u64,
    /// Expiry sweep cadence
    pub maintenance_interval: Duration,
    /// Terminal-row garbage collection cadence
    pub cleanup_interval: Duration,
    /// How long terminal rows are kept before collection
    pub retention: Duration,
}

impl TssConfig {
    pub fn new(validator_address: impl Into<ValidatorAddress>) -> Self {
        Self {
            validator_address: validator_address.into(),
            coordinator_range: 100,
            finality_lag: universal_store::DEFAULT_FINALITY_LAG,
            poll_interval: Duration::from_secs(10),
            setup_timeout: Duration::from_secs(30),
            session_expiry: Duration::from_secs(120),
            session_expiry_block_delay: 10,
            threshold_percent: 66,
            maintenance_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}
