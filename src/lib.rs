// Solana Triangular Arbitrage Library
//
// Components for a three-hop arbitrage engine on Solana:
// - Edge capability trait with a Jupiter-backed implementation
// - Cycle discovery and ladder-based trade sizing
// - Priority-fee feedback controller and consecutive-failure governor
// - Transaction packer with lookup-table fallback and an allocation guard
// - Execution loop, metrics and session reporting

pub mod chain;
pub mod config;
pub mod dex;
pub mod error;
pub mod metrics;
pub mod reporting;
pub mod utils;

pub use error::ArbError;
