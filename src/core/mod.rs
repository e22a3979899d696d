pub mod cancellation;
pub mod logging;
