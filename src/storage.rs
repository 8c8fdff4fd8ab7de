use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// Definición de una lista destacada almacenada en JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeaturedList {
    pub name: String,
    pub queries: Vec<String>,
}

/// Listas destacadas cargadas desde `featured.json`.
///
/// Si el archivo no existe se crea con las listas por defecto, de modo que
/// el operador tiene algo editable desde el primer arranque.
pub struct FeaturedStorage {
    playlists: Vec<FeaturedList>,
}

impl FeaturedStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;
        let file_path = data_dir.join("featured.json");

        let playlists = match fs::read_to_string(&file_path).await {
            Ok(content) => {
                let lists: Vec<FeaturedList> = serde_json::from_str(&content)?;
                info!("📂 Cargadas {} listas destacadas", lists.len());
                lists
            }
            Err(_) => {
                let defaults = Self::default_playlists();
                let content = serde_json::to_string_pretty(&defaults)?;
                if let Err(e) = fs::write(&file_path, content).await {
                    warn!("No se pudo escribir {}: {}", file_path.display(), e);
                }
                info!("📝 featured.json no existía; creado con las listas por defecto");
                defaults
            }
        };

        Ok(Self { playlists })
    }

    fn default_playlists() -> Vec<FeaturedList> {
        vec![FeaturedList {
            name: "Featured".to_string(),
            queries: ["Ed Sheeran", "The Weeknd", "Taylor Swift", "Drake"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }]
    }

    pub fn playlists(&self) -> &[FeaturedList] {
        &self.playlists
    }
}
