pub mod bars;
pub mod db;
pub mod documents;
pub mod stages;
pub mod stocks;

pub use db::Store;
pub use stages::Stage;
