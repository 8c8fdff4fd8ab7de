use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{MusicCatalog, Track};

const ITUNES_BASE: &str = "https://itunes.apple.com";

/// Cliente para la iTunes Search API
pub struct ItunesClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ItunesResponse {
    #[serde(rename = "resultCount")]
    result_count: usize,
    results: Vec<ItunesTrack>,
}

#[derive(Debug, Deserialize)]
struct ItunesTrack {
    #[serde(rename = "trackId")]
    track_id: Option<u64>,
    #[serde(rename = "trackName")]
    track_name: Option<String>,
    #[serde(rename = "artistName")]
    artist_name: Option<String>,
    #[serde(rename = "collectionName")]
    collection_name: Option<String>,
    #[serde(rename = "previewUrl")]
    preview_url: Option<String>,
    #[serde(rename = "artworkUrl100")]
    artwork_url_100: Option<String>,
}

impl ItunesClient {
    pub fn new() -> Self {
        Self::with_base_url(ITUNES_BASE.to_string())
    }

    /// Base alternativa, útil contra instancias de prueba
    #[allow(dead_code)]
    pub fn with_base_url(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("open-tunes/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    async fn fetch(&self, url: &str) -> Result<ItunesResponse> {
        debug!("🌐 GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("fallo de red contra iTunes")?;

        if !response.status().is_success() {
            anyhow::bail!("iTunes respondió {}", response.status());
        }

        response
            .json::<ItunesResponse>()
            .await
            .context("respuesta de iTunes ilegible")
    }

    fn into_track(item: ItunesTrack) -> Option<Track> {
        Some(Track {
            id: item.track_id?,
            title: item.track_name.unwrap_or_else(|| "Unknown".to_string()),
            artist: item.artist_name,
            album: item.collection_name,
            audio_url: item.preview_url,
            image: item.artwork_url_100.map(|url| upscale_artwork(&url)),
        })
    }
}

/// iTunes entrega carátulas de 100x100; el frontend quiere 500x500
fn upscale_artwork(url: &str) -> String {
    url.replace("100x100", "500x500")
}

#[async_trait]
impl MusicCatalog for ItunesClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>> {
        info!("🔍 Buscando en iTunes: {}", query);

        let url = format!(
            "{}/search?term={}&entity=song&limit={}",
            self.base_url,
            urlencoding::encode(query),
            limit
        );
        let response = self.fetch(&url).await?;

        let tracks: Vec<Track> = response
            .results
            .into_iter()
            .filter_map(Self::into_track)
            .collect();

        info!("✅ {} resultados para: {}", tracks.len(), query);
        Ok(tracks)
    }

    async fn locate(&self, id: &str) -> Result<String> {
        debug!("🔗 Localizando track {} en iTunes", id);

        let url = format!("{}/lookup?id={}", self.base_url, urlencoding::encode(id));
        let response = self.fetch(&url).await?;

        if response.result_count == 0 {
            anyhow::bail!("iTunes no conoce el track {}", id);
        }

        response
            .results
            .into_iter()
            .find_map(|item| item.preview_url)
            .with_context(|| format!("el track {} no tiene preview reproducible", id))
    }

    fn source_name(&self) -> &'static str {
        "itunes"
    }
}
