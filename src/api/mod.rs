pub mod handlers;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::CacheService;
use crate::sources::MusicCatalog;
use crate::storage::FeaturedStorage;

/// Estado compartido entre handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
    pub catalog: Arc<dyn MusicCatalog>,
    pub featured: Arc<FeaturedStorage>,
    pub search_limit: usize,
    pub featured_limit: usize,
}

/// Construye el router HTTP. El frontend puede llamar desde cualquier origen.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::home))
        .route("/search", get(handlers::search))
        .route("/featured", get(handlers::featured))
        .route("/play/{id}", get(handlers::play))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
