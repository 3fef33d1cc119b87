pub mod config;
pub mod core;
pub mod correlate;
pub mod model;
pub mod pipeline;
pub mod report;

pub use config::Config;
pub use pipeline::{Mode, PipelineEngine};
