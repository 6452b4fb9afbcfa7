//! Rate limiting algorithms, the limiter registry and the admission entry point.

mod backend;
mod fixed_window;
mod limiter;
mod registry;
mod rules;
mod token_bucket;
mod types;

pub use backend::Limiter;
pub use fixed_window::FixedWindow;
pub use limiter::{RateLimiter, Snapshot};
pub use registry::LimiterRegistry;
pub use rules::{
    Algorithm, FixedWindowConfig, LimiterConfig, LimiterParams, LimiterSpec, TokenBucketConfig,
};
pub use token_bucket::TokenBucket;
pub use types::{BucketState, Decision, LimiterState, StateKey, StateStore, WindowState};
