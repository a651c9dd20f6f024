//! Message hash: the content address binding one logical transfer.

use ethers_core::types::H256;
use sha2::{Digest, Sha256};

/// Shortest decimal string that round-trips `amount` (`100`, `1.5`, `0.25`).
pub fn canonical_amount(amount: f64) -> String {
    format!("{}", amount)
}

/// SHA-256 over `sender:recipient:amount:chain:reference`.
///
/// Sender and recipient are lower-cased. `reference` is the stable external
/// reference of the source event (its transaction hash) or, for requests that
/// carry none, a fresh nonce chosen by the caller.
pub fn message_hash(
    sender: &str,
    recipient: &str,
    amount_usd: f64,
    destination_chain: &str,
    reference: &str,
) -> H256 {
    let preimage = [
        sender.to_lowercase(),
        recipient.to_lowercase(),
        canonical_amount(amount_usd),
        destination_chain.to_string(),
        reference.to_string(),
    ]
    .join(":");

    let digest = Sha256::digest(preimage.as_bytes());
    H256::from_slice(&digest)
}
