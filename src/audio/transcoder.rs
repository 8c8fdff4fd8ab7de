use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};
use url::Url;

use super::{TranscodeOptions, Transcoder};

/// Transcodificador basado en ffmpeg vía subproceso
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self
    }

    /// Verifica que ffmpeg esté disponible y funcional
    pub async fn verify_dependencies() -> Result<()> {
        let ffmpeg_check = tokio::process::Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await;

        match ffmpeg_check {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!(
                    "✅ ffmpeg disponible: {}",
                    version.lines().next().unwrap_or("").trim()
                );
                Ok(())
            }
            _ => {
                error!("❌ ffmpeg no encontrado. Instala con: sudo apt install ffmpeg");
                anyhow::bail!("ffmpeg no disponible")
            }
        }
    }

    /// Solo se aceptan orígenes http(s): ffmpeg trata casi cualquier cadena
    /// como entrada válida, incluidas rutas locales arbitrarias
    fn validate_source_url(source_url: &str) -> Result<()> {
        let parsed = Url::parse(source_url)
            .map_err(|_| anyhow::anyhow!("URL de origen mal formada: {}", source_url))?;

        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => anyhow::bail!("esquema de origen no soportado: {}", other),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source_url: &str,
        dest: &Path,
        options: &TranscodeOptions,
    ) -> Result<()> {
        Self::validate_source_url(source_url)?;
        debug!("🎛️ ffmpeg: {} -> {}", source_url, dest.display());

        let bitrate = format!("{}k", options.bitrate / 1000);
        let output = tokio::process::Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-y",
                "-i",
                source_url,
                "-vn",
                "-codec:a",
                "libmp3lame",
                "-b:a",
                &bitrate,
                "-f",
                "mp3",
            ])
            .arg(dest)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ffmpeg terminó con {}: {}", output.status, stderr.trim());
        }

        Ok(())
    }
}
