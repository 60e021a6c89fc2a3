pub mod activity;
pub mod monitor;
pub mod pipeline;
pub mod stages;

pub use activity::{run_activity, RetryPolicy, TimeoutClass};
pub use monitor::{friday_review, monday_gap_check};
pub use pipeline::{run_weekly, StageContext};
