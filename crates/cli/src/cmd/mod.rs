//! Command implementations

pub mod browse;
pub mod roundtrip;
