use std::sync::Arc;

use crate::services::orchestrator::FaceMatchService;
use crate::services::recognition::RecognitionBackend;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub face: Arc<FaceMatchService>,
    pub recognition: Arc<dyn RecognitionBackend>,
}

impl AppState {
    pub fn new(face: FaceMatchService) -> Self {
        let recognition = Arc::clone(face.backend());
        Self {
            face: Arc::new(face),
            recognition,
        }
    }
}
