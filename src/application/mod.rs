pub mod results;

pub use results::{JUnitResultProcessor, ResultProcessor};
