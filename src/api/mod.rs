//! HTTP API for the try-on app.

mod handlers;
mod server;

pub use handlers::{ErrorBody, FaceSwapResponse, GovernorStatusResponse};
pub use server::HttpServer;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::face_swap::FaceSwapService;
use crate::upstream::ImageKitClient;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub face_swap: Arc<FaceSwapService>,
    /// `None` when no ImageKit key is configured
    pub imagekit: Option<Arc<ImageKitClient>>,
}

impl AppState {
    pub fn new(face_swap: FaceSwapService, imagekit: Option<ImageKitClient>) -> Self {
        Self {
            face_swap: Arc::new(face_swap),
            imagekit: imagekit.map(Arc::new),
        }
    }
}

/// Create the router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/face-swap", post(handlers::face_swap))
        .route("/api/face-swap/status", get(handlers::face_swap_status))
        .route("/api/imagekit/references", get(handlers::list_references))
        .route(
            "/api/imagekit/references/count",
            get(handlers::count_references),
        )
        .with_state(state)
}
