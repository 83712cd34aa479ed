//! Analysis of executable outputs
//!
//! This module provides:
//! - Decoding of raw output-pipe bytes into numeric tables
//! - Centered finite differences built from two full runs

pub mod decode;
pub mod derivative;

pub use decode::{decode, DecodeError};
pub use derivative::{centered_difference, perturb, DerivativeResult};
