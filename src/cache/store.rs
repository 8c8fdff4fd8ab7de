use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};

/// Extensión fija de los artefactos publicados
pub const AUDIO_EXT: &str = "mp3";

/// Sufijo de los archivos en construcción, invisibles para lectores
const PART_SUFFIX: &str = "part";

/// Desenlace terminal de una conversión, compartido entre todos los waiters
pub type ConversionOutcome = Result<PathBuf, CacheError>;

enum EntryState {
    /// Clave reclamada, conversión en vuelo
    Pending {
        created_at: Instant,
        rx: watch::Receiver<Option<ConversionOutcome>>,
    },
    /// Artefacto publicado y legible
    Ready { created_at: Instant, path: PathBuf },
}

/// Metadatos de una entrada, tal como los ve el sweeper
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub key: String,
    pub created_at: Instant,
    pub ready: bool,
}

/// Resultado de reclamar una clave
pub enum Claim {
    /// Artefacto ya publicado; no hay nada que convertir
    Ready(PathBuf),
    /// Otra tarea ganó la clave; esperar su desenlace por el canal
    InFlight(watch::Receiver<Option<ConversionOutcome>>),
    /// Esta tarea ganó el derecho exclusivo de convertir
    Claimed(PendingArtifact),
}

/// Almacén de artefactos: índice en memoria + archivos en disco.
///
/// El índice vive solo en memoria; el directorio se purga al arrancar y el
/// contenido no sobrevive al proceso.
pub struct ArtifactStore {
    root: PathBuf,
    entries: Arc<DashMap<String, EntryState>>,
}

impl ArtifactStore {
    pub async fn new(root: PathBuf) -> CacheResult<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(CacheError::storage)?;
        let store = Self {
            root,
            entries: Arc::new(DashMap::new()),
        };
        store.purge_leftovers().await;
        Ok(store)
    }

    /// Elimina restos de ejecuciones anteriores
    async fn purge_leftovers(&self) {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("No se pudo listar {}: {}", self.root.display(), e);
                return;
            }
        };

        let mut removed = 0usize;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.is_file() {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("No se pudo purgar {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("🧹 Purgados {} archivos huérfanos del caché", removed);
        }
    }

    fn final_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", sanitize_key(key), AUDIO_EXT))
    }

    fn part_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}.{}", sanitize_key(key), AUDIO_EXT, PART_SUFFIX))
    }

    /// Consulta y reclamo en una sola operación sobre la entrada del mapa.
    /// No hay ventana check-then-act: de N llamadas concurrentes para una
    /// clave ausente, exactamente una recibe `Claimed`.
    pub fn claim(&self, key: &str) -> Claim {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => match occupied.get() {
                EntryState::Ready { path, .. } => Claim::Ready(path.clone()),
                EntryState::Pending { rx, .. } => Claim::InFlight(rx.clone()),
            },
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                let created_at = Instant::now();
                vacant.insert(EntryState::Pending { created_at, rx });
                Claim::Claimed(PendingArtifact {
                    key: key.to_string(),
                    part_path: self.part_path(key),
                    final_path: self.final_path(key),
                    created_at,
                    tx: Some(tx),
                    entries: Arc::clone(&self.entries),
                })
            }
        }
    }

    /// Publica el artefacto: renombra el `.part` al nombre final y difunde
    /// el camino a todos los waiters. La edad de la entrada se conserva desde
    /// el inicio de la conversión.
    pub async fn commit(&self, mut handle: PendingArtifact) -> CacheResult<PathBuf> {
        if let Err(e) = tokio::fs::rename(&handle.part_path, &handle.final_path).await {
            let err = CacheError::storage(e);
            self.discard(&mut handle, err.clone()).await;
            return Err(err);
        }

        let path = handle.final_path.clone();
        self.entries.insert(
            handle.key.clone(),
            EntryState::Ready {
                created_at: handle.created_at,
                path: path.clone(),
            },
        );
        handle.finish(Ok(path.clone()));
        debug!("💾 Artefacto publicado: {}", path.display());
        Ok(path)
    }

    /// Descarta un intento fallido: borra el parcial, libera la clave y
    /// difunde la misma falla a todos los waiters
    pub async fn abort(&self, mut handle: PendingArtifact, cause: CacheError) {
        self.discard(&mut handle, cause).await;
    }

    async fn discard(&self, handle: &mut PendingArtifact, cause: CacheError) {
        if let Err(e) = tokio::fs::remove_file(&handle.part_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "No se pudo eliminar el parcial {}: {}",
                    handle.part_path.display(),
                    e
                );
            }
        }
        self.entries.remove(&handle.key);
        handle.finish(Err(cause));
    }

    /// Indica si hay alguna entrada (publicada o en vuelo) para la clave
    #[allow(dead_code)]
    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Camino del artefacto publicado para la clave
    #[allow(dead_code)]
    pub fn read(&self, key: &str) -> CacheResult<PathBuf> {
        match self.entries.get(key).as_deref() {
            Some(EntryState::Ready { path, .. }) => Ok(path.clone()),
            _ => Err(CacheError::NotFound(key.to_string())),
        }
    }

    /// Borra un artefacto publicado. Idempotente: `false` si la clave no
    /// existe o sigue en vuelo; las entradas `Pending` no se tocan.
    ///
    /// El unlink ocurre bajo el lock de la entrada, de modo que nadie puede
    /// reclamar la clave y publicar un artefacto nuevo a mitad del borrado.
    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let target = match occupied.get() {
                    EntryState::Ready { path, .. } => Some(path.clone()),
                    EntryState::Pending { .. } => None,
                };
                match target {
                    Some(path) => match std::fs::remove_file(&path) {
                        Ok(()) => {
                            occupied.remove();
                            Ok(true)
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            occupied.remove();
                            Ok(true)
                        }
                        // La entrada se conserva; el siguiente barrido reintenta
                        Err(e) => Err(CacheError::storage(e)),
                    },
                    None => Ok(false),
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    /// Instantánea best-effort del índice. Puede perder entradas creadas o
    /// borradas en paralelo; los artefactos son inmutables tras publicarse,
    /// así que la foto nunca miente sobre el contenido de una entrada.
    pub fn list_all(&self) -> Vec<EntryMeta> {
        self.entries
            .iter()
            .map(|entry| {
                let (created_at, ready) = match entry.value() {
                    EntryState::Ready { created_at, .. } => (*created_at, true),
                    EntryState::Pending { created_at, .. } => (*created_at, false),
                };
                EntryMeta {
                    key: entry.key().clone(),
                    created_at,
                    ready,
                }
            })
            .collect()
    }

    #[allow(dead_code)]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Reclamo exclusivo de una clave durante su conversión.
///
/// El transcodificador escribe en `part_path()`; `commit`/`abort` consumen el
/// handle. Si el dueño desaparece sin hacer ninguna de las dos cosas, el drop
/// libera la clave y los waiters reintentan desde cero.
pub struct PendingArtifact {
    key: String,
    part_path: PathBuf,
    final_path: PathBuf,
    created_at: Instant,
    tx: Option<watch::Sender<Option<ConversionOutcome>>>,
    entries: Arc<DashMap<String, EntryState>>,
}

impl PendingArtifact {
    /// Destino de escritura del transcodificador; invisible para lectores
    /// hasta el commit
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    fn finish(&mut self, outcome: ConversionOutcome) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(outcome));
        }
    }
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.entries.remove(&self.key);
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}

/// Normaliza una clave opaca a un nombre de archivo seguro
fn sanitize_key(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.truncate(100);
    if name.is_empty() {
        name.push('_');
    }
    name
}
