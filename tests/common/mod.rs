#![allow(dead_code)]

// Test utilities and common setup
pub mod fake_cluster;
pub mod fixtures;

pub use fake_cluster::*;
pub use fixtures::*;
