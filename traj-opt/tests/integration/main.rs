//! Integration suite for the shooting-method problem builders, driven
//! against the linkage fixture worlds.

mod support;

mod multi_shot;
mod optimize;
#[cfg(feature = "parallel")]
mod parallel;
mod rollout_io;
mod single_step;
