use thiserror::Error;

/// Errors of the conversion cache core.
///
/// Variants carry their cause as an already-rendered `String` so a single
/// terminal outcome can be cloned to every caller waiting on the same key.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// El catálogo no pudo resolver el identificador
    #[error("no se pudo resolver '{id}' en el catálogo: {cause}")]
    NotFoundUpstream { id: String, cause: String },

    /// La conversión falló o expiró
    #[error("conversión fallida: {0}")]
    Transcode(String),

    /// Fallo de E/S del almacenamiento
    #[error("error de almacenamiento: {0}")]
    Storage(String),

    /// No hay artefacto publicado para la clave
    #[error("no hay artefacto para '{0}'")]
    NotFound(String),

    /// El servicio de caché no está en ejecución
    #[error("el servicio de caché no está en ejecución")]
    Unavailable,
}

impl CacheError {
    pub(crate) fn storage(err: std::io::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
