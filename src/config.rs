use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Red
    pub host: String,
    pub port: u16,

    // Paths
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,

    // Retención del caché
    pub retention_window: u64, // En segundos
    pub sweep_interval: u64,   // En segundos

    // Audio
    pub audio_bitrate: u32,     // Bits por segundo
    pub transcode_timeout: u64, // En segundos

    // Catálogo
    pub search_limit: usize,
    pub featured_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Red
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),
            cache_dir: std::env::var("CACHE_DIR")
                .unwrap_or_else(|_| "./cache".to_string())
                .into(),

            // Retención (valores conservadores)
            retention_window: std::env::var("RETENTION_WINDOW")
                .unwrap_or_else(|_| "3600".to_string()) // 1 hora
                .parse()?,
            sweep_interval: std::env::var("SWEEP_INTERVAL")
                .unwrap_or_else(|_| "600".to_string()) // 10 minutos
                .parse()?,

            // Audio
            audio_bitrate: std::env::var("AUDIO_BITRATE")
                .unwrap_or_else(|_| "128000".to_string()) // 128kbps
                .parse()?,
            transcode_timeout: std::env::var("TRANSCODE_TIMEOUT")
                .unwrap_or_else(|_| "120".to_string())
                .parse()?,

            // Catálogo
            search_limit: std::env::var("SEARCH_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            featured_limit: std::env::var("FEATURED_LIMIT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.cache_dir)?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Performs sanity checks on configuration values to catch
    /// common mistakes before the service starts taking traffic.
    pub fn validate(&self) -> Result<()> {
        if self.retention_window == 0 {
            anyhow::bail!("Retention window must be greater than 0");
        }

        if self.sweep_interval == 0 {
            anyhow::bail!("Sweep interval must be greater than 0");
        }

        if self.transcode_timeout == 0 {
            anyhow::bail!("Transcode timeout must be greater than 0");
        }

        if self.audio_bitrate < 8000 {
            anyhow::bail!(
                "Audio bitrate too low, minimum 8kbps, got: {}",
                self.audio_bitrate
            );
        }

        if self.audio_bitrate > 320_000 {
            anyhow::bail!(
                "Audio bitrate cannot exceed 320kbps, got: {}",
                self.audio_bitrate
            );
        }

        if self.search_limit == 0 || self.search_limit > 50 {
            anyhow::bail!(
                "Search limit must be between 1 and 50, got: {}",
                self.search_limit
            );
        }

        if self.featured_limit == 0 || self.featured_limit > 10 {
            anyhow::bail!(
                "Featured limit must be between 1 and 10, got: {}",
                self.featured_limit
            );
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_window)
    }

    pub fn sweep(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout)
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            HTTP: {}:{}\n  \
            Cache: {} (retención {}s, barrido cada {}s)\n  \
            Audio: {}kbps, timeout {}s\n  \
            Catálogo: {} resultados de búsqueda, {} por consulta destacada",
            self.host,
            self.port,
            self.cache_dir.display(),
            self.retention_window,
            self.sweep_interval,
            self.audio_bitrate / 1000,
            self.transcode_timeout,
            self.search_limit,
            self.featured_limit,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            data_dir: "./data".into(),
            cache_dir: "./cache".into(),
            retention_window: 3600, // 1 hora
            sweep_interval: 600,    // 10 minutos
            audio_bitrate: 128_000, // 128kbps
            transcode_timeout: 120,
            search_limit: 10,
            featured_limit: 3,
        }
    }
}
