use std::sync::Arc;

use crate::cache::ExtractionCache;
use crate::config::Config;
use crate::extraction::TextExtractionService;
use crate::jobs::BackgroundProcessor;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub processor: BackgroundProcessor,
    pub extraction: TextExtractionService,
    /// Same instance the processor consults before extracting.
    pub cache: Arc<ExtractionCache>,
}
