//! Per-job control flow: sweep the grid, record progress, chain the next job.

pub mod chain;
pub mod state;
pub mod sweep;

pub use chain::ChainSubmitter;
pub use state::{CellStatus, StateEntry, StateManager};
pub use sweep::{SweepController, SweepReport};
