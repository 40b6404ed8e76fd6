pub mod analytics;
pub mod config;
pub mod dedup;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod raw;
pub mod store;

pub use error::{PipelineError, Result};
