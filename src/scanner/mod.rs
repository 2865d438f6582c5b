pub mod controller;
mod loop_worker;
pub mod state;

pub use controller::{DecodedCallback, ScanController, ScanError};
pub use state::{ScanOutcome, ScanSnapshot, ScanState};
