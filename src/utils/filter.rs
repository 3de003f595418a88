//! Filters used by the texture engines.

pub mod svf;
