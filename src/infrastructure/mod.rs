pub mod kubernetes;
pub mod runners;
