//! # Cache Module
//!
//! Conversion cache for Open Tunes.
//!
//! This module turns remote preview streams into locally playable audio
//! files, exactly once per track identifier. The first request for an
//! identifier claims the key and runs the conversion pipeline; every
//! concurrent and subsequent request for the same identifier reuses the
//! resulting artifact without touching the transcoder again. A background
//! sweeper bounds disk usage by deleting artifacts older than the
//! configured retention window.
//!
//! ## Features
//!
//! - **Single-flight conversion**: N concurrent requests for one key cause
//!   exactly one transcoder invocation; all callers receive the same path
//!   (or the same failure)
//! - **Torn-file safety**: conversions write to an invisible `.part` file
//!   that is renamed into place on commit
//! - **TTL eviction**: artifacts age from conversion start and are swept
//!   once they outlive the retention window; in-flight conversions are
//!   never swept
//! - **Clean failure semantics**: a failed conversion leaves no trace, so
//!   the next request for the key retries from scratch
//!
//! ## Configuration
//!
//! Cache behavior is controlled via environment variables:
//!
//! ```env
//! CACHE_DIR=./cache           # Artifact directory
//! RETENTION_WINDOW=3600       # Artifact lifetime in seconds (1 hour)
//! SWEEP_INTERVAL=600          # Sweep period in seconds (10 minutes)
//! TRANSCODE_TIMEOUT=120       # Per-conversion timeout in seconds
//! ```
//!
//! ## Lifecycle
//!
//! [`CacheService`] owns the coordinator and the sweeper as one unit:
//! `start()` launches the sweep loop, `stop()` drains it along with any
//! pending warm-up tasks. `resolve()` outside the running window returns
//! [`CacheError::Unavailable`].

pub mod coordinator;
pub mod store;
pub mod sweeper;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::audio::{TranscodeOptions, Transcoder};
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::sources::MusicCatalog;
use coordinator::Coordinator;
use store::ArtifactStore;
use sweeper::Sweeper;

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Fachada del caché: coordinador + sweeper bajo un ciclo de vida explícito
pub struct CacheService {
    store: Arc<ArtifactStore>,
    coordinator: Coordinator,
    retention: Duration,
    sweep_interval: Duration,
    token: CancellationToken,
    tracker: TaskTracker,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
    state: AtomicU8,
    started_at: DateTime<Utc>,
}

impl CacheService {
    pub async fn new(
        config: &Config,
        catalog: Arc<dyn MusicCatalog>,
        transcoder: Arc<dyn Transcoder>,
    ) -> CacheResult<Self> {
        let store = Arc::new(ArtifactStore::new(config.cache_dir.clone()).await?);
        let coordinator = Coordinator::new(
            Arc::clone(&store),
            catalog,
            transcoder,
            TranscodeOptions {
                bitrate: config.audio_bitrate,
            },
            config.timeout(),
        );

        Ok(Self {
            store,
            coordinator,
            retention: config.retention(),
            sweep_interval: config.sweep(),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            sweeper_handle: Mutex::new(None),
            state: AtomicU8::new(STATE_CREATED),
            started_at: Utc::now(),
        })
    }

    /// Arranca el bucle de barrido en segundo plano
    pub fn start(&self) {
        if self
            .state
            .compare_exchange(STATE_CREATED, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("start() ignorado: el servicio ya fue arrancado");
            return;
        }

        let sweeper = Sweeper::new(
            Arc::clone(&self.store),
            self.retention,
            self.sweep_interval,
            self.token.child_token(),
        );
        *self.sweeper_handle.lock() = Some(tokio::spawn(sweeper.run()));

        info!(
            "🚀 Servicio de caché arrancado (retención {}s, barrido cada {}s)",
            self.retention.as_secs(),
            self.sweep_interval.as_secs()
        );
    }

    /// Detiene el barrido y drena las tareas de precalentamiento. No cancela
    /// conversiones ya iniciadas ni la iteración de barrido en curso: ambas
    /// terminan solas.
    pub async fn stop(&self) {
        if self.state.swap(STATE_STOPPED, Ordering::SeqCst) != STATE_RUNNING {
            return;
        }

        self.token.cancel();
        let handle = self.sweeper_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("El sweeper terminó con error: {}", e);
            }
        }

        self.tracker.close();
        self.tracker.wait().await;

        info!("{}", self.stats());
        info!("👋 Servicio de caché detenido");
    }

    /// Resuelve una clave a su artefacto local (pass-through al coordinador)
    pub async fn resolve(&self, key: &str) -> CacheResult<PathBuf> {
        if self.state.load(Ordering::SeqCst) != STATE_RUNNING {
            return Err(CacheError::Unavailable);
        }
        self.coordinator.resolve(key).await
    }

    /// Precalienta claves en segundo plano. Las fallas se registran y se
    /// tragan: el precalentamiento nunca le cuesta nada a quien lo dispara.
    pub fn prewarm(&self, keys: Vec<String>) {
        if self.state.load(Ordering::SeqCst) != STATE_RUNNING {
            return;
        }

        for key in keys {
            let coordinator = self.coordinator.clone();
            let _ = self.tracker.spawn(async move {
                match coordinator.resolve(&key).await {
                    Ok(path) => debug!("🔥 Precalentado {}: {}", key, path.display()),
                    Err(e) => debug!("Precalentamiento de {} falló: {}", key, e),
                }
            });
        }
    }

    /// Instantánea del estado del caché
    pub fn stats(&self) -> CacheStats {
        let mut ready = 0usize;
        let mut pending = 0usize;
        for entry in self.store.list_all() {
            if entry.ready {
                ready += 1;
            } else {
                pending += 1;
            }
        }

        CacheStats {
            ready,
            pending,
            started_at: self.started_at,
        }
    }
}

/// Estadísticas del caché de conversión
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub ready: usize,
    pub pending: usize,
    pub started_at: DateTime<Utc>,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "📊 Cache Stats:\n\
             🎧 Artefactos publicados: {}\n\
             ⏳ Conversiones en vuelo: {}\n\
             🕒 En servicio desde: {}",
            self.ready,
            self.pending,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Track;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    struct StubCatalog;

    #[async_trait]
    impl MusicCatalog for StubCatalog {
        async fn search(&self, _query: &str, _limit: usize) -> AnyResult<Vec<Track>> {
            Ok(Vec::new())
        }

        async fn locate(&self, id: &str) -> AnyResult<String> {
            Ok(format!("https://previews.example.com/{}.m4a", id))
        }

        fn source_name(&self) -> &'static str {
            "stub"
        }
    }

    struct CountingTranscoder {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl Transcoder for CountingTranscoder {
        async fn transcode(
            &self,
            _source_url: &str,
            dest: &Path,
            _options: &TranscodeOptions,
        ) -> AnyResult<()> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(dest, b"AUDIO").await?;
            Ok(())
        }
    }

    async fn service(
        dir: &tempfile::TempDir,
    ) -> (Arc<CacheService>, Arc<CountingTranscoder>) {
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let transcoder = Arc::new(CountingTranscoder {
            invocations: AtomicUsize::new(0),
        });
        let cache = CacheService::new(
            &config,
            Arc::new(StubCatalog),
            Arc::clone(&transcoder) as Arc<dyn Transcoder>,
        )
        .await
        .unwrap();
        (Arc::new(cache), transcoder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_requires_running_service() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = service(&dir).await;

        assert!(matches!(
            cache.resolve("abc123").await.unwrap_err(),
            CacheError::Unavailable
        ));

        cache.start();
        assert!(cache.resolve("abc123").await.is_ok());

        cache.stop().await;
        assert!(matches!(
            cache.resolve("abc123").await.unwrap_err(),
            CacheError::Unavailable
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prewarm_primes_later_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, transcoder) = service(&dir).await;
        cache.start();

        let keys = ["t1", "t2", "t3", "t4"];
        cache.prewarm(keys.iter().map(|k| k.to_string()).collect());

        // Dejar correr las tareas de precalentamiento
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transcoder.invocations.load(Ordering::SeqCst), 4);

        // Los resolve posteriores son hits puros
        for key in keys {
            cache.resolve(key).await.unwrap();
        }
        assert_eq!(transcoder.invocations.load(Ordering::SeqCst), 4);

        cache.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_artifact_is_reconverted_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, transcoder) = service(&dir).await;
        cache.start();

        let first = cache.resolve("abc123").await.unwrap();
        assert_eq!(transcoder.invocations.load(Ordering::SeqCst), 1);

        // Pasada la ventana de retención, el sweeper de fondo elimina el
        // artefacto y el siguiente resolve vuelve a convertir
        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;

        let second = cache.resolve("abc123").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transcoder.invocations.load(Ordering::SeqCst), 2);

        cache.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_reflect_store_contents() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = service(&dir).await;
        cache.start();

        assert_eq!(cache.stats().ready, 0);
        cache.resolve("abc123").await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.pending, 0);

        cache.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = service(&dir).await;

        cache.start();
        cache.stop().await;
        cache.stop().await;
    }
}
