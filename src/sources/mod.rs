pub mod itunes;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

pub use itunes::ItunesClient;

/// Catálogo de música: búsqueda de metadatos y localización de streams
#[async_trait]
pub trait MusicCatalog: Send + Sync {
    /// Busca canciones y devuelve resultados con URL de preview reproducible
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>>;

    /// Resuelve un identificador de track a la URL de su stream de origen
    async fn locate(&self, id: &str) -> Result<String>;

    /// Nombre de la fuente
    fn source_name(&self) -> &'static str;
}

/// Track tal como lo expone la API
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub audio_url: Option<String>,
    pub image: Option<String>,
    pub id: u64,
}
