//! Live progress: sample decoding, the per-task cache, and the relay that
//! fans samples out to UI contexts

mod cache;
mod relay;
mod types;

pub use cache::{ProgressCache, DOWNLOADED_PREFIX, SPEED_PREFIX, TOTAL_PREFIX};
pub use relay::ProgressRelay;
pub use types::{ProgressSample, ThrottlePolicy};
