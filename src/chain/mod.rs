pub mod constants;
pub mod fees;
pub mod ledger;
pub mod orchestrator;
pub mod packer;

pub use constants::{USDC_MINT, USDT_MINT, WSOL_MINT};
pub use fees::{FeeController, FeeState, RiskGovernor};
pub use ledger::{Confirmation, Ledger, RpcLedger, SimulationOutcome};
pub use orchestrator::{Executed, Orchestrator, TickSummary};
pub use packer::{PackedTransaction, TableState, TransactionPacker};
