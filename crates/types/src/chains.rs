//! Confirmation depths for well-known networks.
//!
//! These are conservative defaults for how many blocks past inclusion a
//! receipt is treated as final. Callers can always override the depth on the
//! listener; unlisted chains fall back to a depth of 1.

/// Ethereum mainnet chain id.
pub const MAINNET: u64 = 1;
/// Sepolia testnet chain id.
pub const SEPOLIA: u64 = 11_155_111;
/// Optimism mainnet chain id.
pub const OPTIMISM: u64 = 10;
/// BNB smart chain id.
pub const BSC: u64 = 56;
/// Polygon PoS chain id.
pub const POLYGON: u64 = 137;
/// Polygon Amoy testnet chain id.
pub const POLYGON_AMOY: u64 = 80_002;
/// Base mainnet chain id.
pub const BASE: u64 = 8453;
/// Arbitrum One chain id.
pub const ARBITRUM: u64 = 42_161;
/// Avalanche C-chain id.
pub const AVALANCHE: u64 = 43_114;

/// (chain id, confirmation depth) pairs for the networks above.
const FINALITY_DEPTHS: &[(u64, u64)] = &[
    (MAINNET, 12),
    (SEPOLIA, 12),
    (OPTIMISM, 50),
    (BSC, 15),
    (POLYGON, 30),
    (POLYGON_AMOY, 30),
    (BASE, 50),
    (ARBITRUM, 50),
    (AVALANCHE, 1),
];

/// Confirmation depth at which a receipt on `chain_id` is treated as final.
///
/// Returns `None` for chains the registry does not know.
pub fn num_blocks_to_finality(chain_id: u64) -> Option<u64> {
    FINALITY_DEPTHS.iter().find(|(id, _)| *id == chain_id).map(|(_, depth)| *depth)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_chains() {
        assert_eq!(num_blocks_to_finality(MAINNET), Some(12));
        assert_eq!(num_blocks_to_finality(POLYGON), Some(30));
        assert_eq!(num_blocks_to_finality(AVALANCHE), Some(1));
    }

    #[test]
    fn unknown_chain() {
        assert_eq!(num_blocks_to_finality(31_337), None);
    }
}
