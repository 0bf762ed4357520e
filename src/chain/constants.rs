// Well-known mint addresses and per-mint sizing helpers.
//
// Mints are compile-time `Pubkey` constants via `solana_program::pubkey!`, so a typo
// fails the build instead of the first quote.

use solana_program::pubkey::Pubkey;

/// USDC token mint address (6 decimals)
pub const USDC_MINT: Pubkey = solana_program::pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");

/// USDT token mint address (6 decimals)
pub const USDT_MINT: Pubkey = solana_program::pubkey!("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB");

/// Wrapped SOL token mint address (9 decimals)
pub const WSOL_MINT: Pubkey = solana_program::pubkey!("So11111111111111111111111111111111111111112");

/// Native SOL placeholder some venues report instead of the wrapped mint.
pub const NATIVE_MINT_PLACEHOLDER: Pubkey =
    solana_program::pubkey!("11111111111111111111111111111111");

/// Solana packet ceiling for a serialized transaction.
pub const PACKET_DATA_SIZE: usize = 1232;

/// Addresses per `ExtendLookupTable` transaction.
pub const LOOKUP_TABLE_EXTEND_CHUNK: usize = 20;

/// Hard cap on addresses stored in one lookup table.
pub const LOOKUP_TABLE_MAX_ADDRESSES: usize = 256;

const DEFAULT_DECIMALS: u8 = 9;

/// Map the native SOL placeholder onto the wrapped SOL mint.
pub fn canonical_mint(mint: Pubkey) -> Pubkey {
    if mint == NATIVE_MINT_PLACEHOLDER {
        WSOL_MINT
    } else {
        mint
    }
}

/// Decimals for mints this bot knows about; unknown mints assume 9.
pub fn decimals_for_mint(mint: &Pubkey) -> u8 {
    match canonical_mint(*mint) {
        m if m == USDC_MINT || m == USDT_MINT => 6,
        m if m == WSOL_MINT => 9,
        _ => DEFAULT_DECIMALS,
    }
}

/// Discovery seed: 1% of one whole token of `mint`.
pub fn seed_for_mint(mint: &Pubkey) -> u64 {
    let one_unit = 10u64.pow(decimals_for_mint(mint) as u32);
    (one_unit / 100).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_addresses() {
        assert_eq!(USDC_MINT.to_string(), "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
        assert_eq!(USDT_MINT.to_string(), "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB");
        assert_eq!(WSOL_MINT.to_string(), "So11111111111111111111111111111111111111112");
    }

    #[test]
    fn test_native_placeholder_maps_to_wsol() {
        assert_eq!(canonical_mint(NATIVE_MINT_PLACEHOLDER), WSOL_MINT);
        assert_eq!(canonical_mint(USDC_MINT), USDC_MINT);
    }

    #[test]
    fn test_seed_is_one_percent_of_unit() {
        assert_eq!(seed_for_mint(&USDC_MINT), 10_000);
        assert_eq!(seed_for_mint(&WSOL_MINT), 10_000_000);
        assert_eq!(seed_for_mint(&Pubkey::new_unique()), 10_000_000);
    }
}
