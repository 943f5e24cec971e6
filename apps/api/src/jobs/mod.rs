// Background extraction jobs: job model, priority processor, HTTP handlers.
pub mod handlers;
pub mod models;
pub mod processor;

pub use models::ProcessingJob;
pub use processor::{BackgroundProcessor, JobEvent, ProcessorConfig};
