//! # Deterministic Math
//!
//! Integer-only numeric types. Anything that feeds simulation state or a
//! checksum goes through here, never through `f32`/`f64`.

mod fixed_point;

pub use fixed_point::{FixedPoint64, FRACTIONAL_BITS};
