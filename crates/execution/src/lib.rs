pub mod gap;
pub mod summary;
pub mod tracker;

pub use gap::decide_at_open;
pub use summary::{friday_summary, health_score, FridaySummary, HealthInputs, RecommendedAction};
pub use tracker::{rolling_stats, TrackedPosition};
