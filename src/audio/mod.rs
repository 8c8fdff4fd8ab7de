pub mod transcoder;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub use transcoder::FfmpegTranscoder;

/// Opciones de conversión de audio
#[derive(Debug, Clone, Copy)]
pub struct TranscodeOptions {
    /// Bitrate objetivo en bits por segundo
    pub bitrate: u32,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self { bitrate: 128_000 } // 128kbps
    }
}

/// Conversor de streams de origen a archivos de audio locales
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convierte `source_url` y escribe el resultado en `dest`
    async fn transcode(
        &self,
        source_url: &str,
        dest: &Path,
        options: &TranscodeOptions,
    ) -> Result<()>;
}
