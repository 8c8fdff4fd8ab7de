use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
}

/// Mensaje de bienvenida
pub async fn home() -> Json<serde_json::Value> {
    Json(json!({ "message": "Open Tunes API running" }))
}

/// Busca canciones en el catálogo y devuelve resultados reproducibles
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    match state.catalog.search(&params.query, state.search_limit).await {
        Ok(tracks) => Json(json!({ "results": tracks })).into_response(),
        Err(e) => {
            error!("❌ Búsqueda fallida para '{}': {}", params.query, e);
            (
                StatusCode::BAD_GATEWAY,
                format!("búsqueda fallida: {}", e),
            )
                .into_response()
        }
    }
}

/// Listas destacadas. Como efecto lateral dispara el precalentamiento del
/// caché de audio para los tracks devueltos; sus fallas no tocan la respuesta.
pub async fn featured(State(state): State<AppState>) -> Response {
    let mut playlists = Vec::new();
    let mut warm_keys = Vec::new();

    for list in state.featured.playlists() {
        let searches = join_all(
            list.queries
                .iter()
                .map(|query| state.catalog.search(query, state.featured_limit)),
        )
        .await;

        let mut songs = Vec::new();
        for (query, result) in list.queries.iter().zip(searches) {
            match result {
                Ok(tracks) => songs.extend(tracks),
                Err(e) => warn!("Consulta destacada '{}' falló: {}", query, e),
            }
        }

        warm_keys.extend(songs.iter().map(|track| track.id.to_string()));
        playlists.push(json!({ "name": list.name, "songs": songs }));
    }

    state.cache.prewarm(warm_keys);

    Json(json!({ "playlists": playlists })).into_response()
}

/// Sirve el audio cacheado de un track, convirtiéndolo en el primer acceso
pub async fn play(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let path = match state.cache.resolve(&id).await {
        Ok(path) => path,
        Err(e) => {
            error!("❌ /play/{} falló: {}", id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("conversión fallida: {}", e),
            )
                .into_response();
        }
    };

    match tokio::fs::read(&path).await {
        Ok(data) => {
            info!("▶️ Sirviendo {} ({} bytes)", id, data.len());
            (
                [(header::CONTENT_TYPE, "audio/mpeg")],
                Bytes::from(data),
            )
                .into_response()
        }
        Err(e) => {
            error!("❌ No se pudo leer {}: {}", path.display(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "artefacto ilegible".to_string(),
            )
                .into_response()
        }
    }
}
