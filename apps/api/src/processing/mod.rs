// Post-extraction text processing: cleaning, section detection, AI-ready projection.
pub mod models;
pub mod text_processor;

pub use text_processor::TextProcessor;
