//! Pure evaluation of observed entities
//!
//! - [`idle`]: idle duration and threshold classification

pub mod idle;
