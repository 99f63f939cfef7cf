//! Admission - per-client request admission control
//!
//! This crate decides, per application id, whether an incoming unit of work
//! may proceed. Three interchangeable algorithms are provided: a token
//! bucket, a weighted token bucket and a leaky bucket. All state is local
//! and in memory; background tasks replenish or drain it on fixed intervals.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

pub use error::{LimiterError, Result};
pub use ratelimit::{Admission, BucketKey, RateLimiter};
