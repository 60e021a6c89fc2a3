pub mod indicators;
pub mod setups;

pub use indicators::{compute_indicator_set, compute_indicator_sets};
pub use setups::{detect_setup, SetupInputs};
