//! # Synchronization Primitives
//!
//! ## The Problem
//!
//! ```text
//! Simulation thread:  WRITES tick N+1
//! Observer threads:   READ tick N (UI, AI planners, network encoders)
//!
//! Without synchronization: torn reads of a half-written tick
//! With a Mutex:            observers stall the tick loop
//! ```
//!
//! ## The Solution: Double Buffering
//!
//! ```text
//! Tick N:
//!   Simulation writes Buffer A
//!   Observers read Buffer B (state as of tick N-1)
//!
//! Swap:
//!   roles flip, dirty records copied A -> B
//! ```

mod double_buffer;

pub use double_buffer::{BufferReadGuard, DoubleBuffer};
