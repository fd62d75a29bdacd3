//! Throttle engine: ordered work queue, dual-limit admission, rolling QPS
//! window and drain signalling.

mod admission;
mod all;
mod submission;
mod throttle;

pub use admission::{QPS_WINDOW, ThrottleState};
pub use all::submit_all;
pub use submission::{BoxFuture, Drain, Submission};
pub use throttle::Throttle;
