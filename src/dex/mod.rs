pub mod edge;
pub mod jupiter;
pub mod sizing;
pub mod triangular_arb;

pub use edge::{Edge, EdgeRef, SwapBundle};
pub use jupiter::JupiterEdge;
pub use sizing::{best_size, SizingPolicy, SizingResult};
pub use triangular_arb::{Cycle, CycleFinder};
