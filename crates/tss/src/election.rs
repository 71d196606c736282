use rand::seq::SliceRandom;
use universal_types::{ProtocolType, UniversalValidator, ValidatorAddress};

/// Leader-rotation window an event falls into
pub fn epoch(block_number: u64, coordinator_range: u64) -> u64 {
    block_number / coordinator_range.max(1)
}

/// Validators eligible to participate in a session of the given protocol,
/// in canonical (address-lexicographic) order.
///
/// Keygen-family protocols take everyone who will hold a share of the next
/// key; SIGN takes everyone who still holds a share of the current one.
pub fn eligible_participants(
    protocol: ProtocolType,
    validators: &[UniversalValidator],
) -> Vec<UniversalValidator> {
    let mut eligible: Vec<UniversalValidator> = validators
        .iter()
        .filter(|v| match protocol {
            ProtocolType::Sign => v.eligible_for_sign(),
            _ => v.eligible_for_keygen(),
        })
        .cloned()
        .collect();
    eligible.sort_by(|a, b| a.validator_address.cmp(&b.validator_address));
    eligible
}

/// Deterministic leader election: `epoch mod |eligible|` over the canonical
/// ordering. Every node with the same validator snapshot computes the same
/// leader, so exactly one node leads per event per epoch.
pub fn elect_leader(
    eligible: &[UniversalValidator],
    block_number: u64,
    coordinator_range: u64,
) -> Option<&UniversalValidator> {
    if eligible.is_empty() {
        return None;
    }
    let index = (epoch(block_number, coordinator_range) % eligible.len() as u64) as usize;
    Some(&eligible[index])
}

/// Sample the SIGN participant subset: `ceil(threshold_percent * n / 100)`
/// members drawn with a cryptographic RNG.
///
/// The draw is deliberately not deterministic across nodes; the leader's
/// choice travels in the setup envelope and non-leaders never recompute it.
pub fn select_sign_participants(
    eligible: &[UniversalValidator],
    threshold_percent: u64,
) -> Vec<ValidatorAddress> {
    let n = eligible.len() as u64;
    if n == 0 {
        return Vec::new();
    }
    let take = (threshold_percent * n).div_ceil(100).clamp(1, n) as usize;

    let mut chosen: Vec<ValidatorAddress> = eligible
        .choose_multiple(&mut rand::rngs::OsRng, take)
        .map(|v| v.validator_address.clone())
        .collect();
    chosen.sort();
    chosen
}

/// Contribution threshold recorded in a session over `m` selected parties
pub fn session_threshold(m: usize) -> usize {
    2 * m / 3 + 1
}
