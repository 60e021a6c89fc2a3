pub mod error;
pub mod params;
pub mod records;
pub mod regime;
pub mod stats;
pub mod types;

pub use error::*;
pub use params::*;
pub use records::*;
pub use regime::*;
pub use types::*;
