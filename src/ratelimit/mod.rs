//! Rate limiting logic and state management.

mod counter;
mod key;
mod leaky;
mod limiter;
mod outcome;
mod registry;
mod scheduler;
mod token;
mod weighted;

pub use counter::{TokenBuckets, TokenState};
pub use key::BucketKey;
pub use leaky::LeakyBucket;
pub use limiter::{RateLimiter, DEFAULT_WEIGHT};
pub use outcome::{Admission, Release};
pub use registry::Registry;
pub use scheduler::TaskGroup;
pub use token::TokenBucket;
pub use weighted::WeightedTokenBucket;
