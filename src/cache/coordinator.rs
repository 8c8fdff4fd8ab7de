use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::{TranscodeOptions, Transcoder};
use crate::cache::store::{ArtifactStore, Claim, PendingArtifact};
use crate::error::{CacheError, CacheResult};
use crate::sources::MusicCatalog;

/// Coordinador de conversiones.
///
/// Garantiza una sola conversión física por clave: de N peticiones
/// concurrentes para la misma clave, una ejecuta el pipeline
/// localizar → transcodificar → publicar y el resto espera el mismo
/// desenlace por el canal de la entrada en vuelo.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<ArtifactStore>,
    catalog: Arc<dyn MusicCatalog>,
    transcoder: Arc<dyn Transcoder>,
    options: TranscodeOptions,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(
        store: Arc<ArtifactStore>,
        catalog: Arc<dyn MusicCatalog>,
        transcoder: Arc<dyn Transcoder>,
        options: TranscodeOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            transcoder,
            options,
            timeout,
        }
    }

    /// Devuelve el camino del artefacto local para `key`, convirtiéndolo si
    /// hace falta. Tras una falla la clave queda limpia: el siguiente intento
    /// arranca de cero.
    pub async fn resolve(&self, key: &str) -> CacheResult<PathBuf> {
        loop {
            match self.store.claim(key) {
                Claim::Ready(path) => {
                    debug!("🎯 Hit de caché para {}", key);
                    return Ok(path);
                }
                Claim::InFlight(mut rx) => {
                    debug!("⏳ Conversión en vuelo para {}, esperando desenlace", key);
                    loop {
                        if let Some(outcome) = rx.borrow_and_update().clone() {
                            return outcome;
                        }
                        if rx.changed().await.is_err() {
                            // El ganador desapareció sin publicar desenlace;
                            // volver a reclamar la clave
                            warn!("Conversión de {} abandonada, reintentando reclamo", key);
                            break;
                        }
                    }
                }
                Claim::Claimed(handle) => return self.convert(key, handle).await,
            }
        }
    }

    /// Camino del ganador: localizar, transcodificar, publicar. Cualquier
    /// falla descarta el parcial y difunde la misma causa a los waiters.
    async fn convert(&self, key: &str, handle: PendingArtifact) -> CacheResult<PathBuf> {
        info!("🎵 Iniciando conversión para {}", key);

        match tokio::time::timeout(self.timeout, self.fetch_and_transcode(key, &handle)).await {
            Ok(Ok(())) => {
                let path = self.store.commit(handle).await?;
                info!("✅ Conversión completada para {}: {}", key, path.display());
                Ok(path)
            }
            Ok(Err(err)) => {
                warn!("❌ Conversión fallida para {}: {}", key, err);
                self.store.abort(handle, err.clone()).await;
                Err(err)
            }
            Err(_) => {
                let err = CacheError::Transcode(format!(
                    "tiempo agotado tras {}s",
                    self.timeout.as_secs()
                ));
                warn!("⏰ Conversión de {} expirada: {}", key, err);
                self.store.abort(handle, err.clone()).await;
                Err(err)
            }
        }
    }

    async fn fetch_and_transcode(&self, key: &str, handle: &PendingArtifact) -> CacheResult<()> {
        let stream_url =
            self.catalog
                .locate(key)
                .await
                .map_err(|e| CacheError::NotFoundUpstream {
                    id: key.to_string(),
                    cause: e.to_string(),
                })?;

        self.transcoder
            .transcode(&stream_url, handle.part_path(), &self.options)
            .await
            .map_err(|e| CacheError::Transcode(e.to_string()))?;

        // Un artefacto vacío no es reproducible
        let meta = tokio::fs::metadata(handle.part_path())
            .await
            .map_err(CacheError::storage)?;
        if meta.len() == 0 {
            return Err(CacheError::Transcode(
                "la conversión produjo un archivo vacío".to_string(),
            ));
        }

        Ok(())
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeCatalog {
        locates: AtomicUsize,
        fail: bool,
    }

    impl FakeCatalog {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                locates: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                locates: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl MusicCatalog for FakeCatalog {
        async fn search(&self, _query: &str, _limit: usize) -> AnyResult<Vec<Track>> {
            Ok(Vec::new())
        }

        async fn locate(&self, id: &str) -> AnyResult<String> {
            self.locates.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("track desconocido: {}", id);
            }
            Ok(format!("https://previews.example.com/{}.m4a", id))
        }

        fn source_name(&self) -> &'static str {
            "fake"
        }
    }

    enum Behavior {
        Write(&'static [u8]),
        Fail,
    }

    struct FakeTranscoder {
        invocations: AtomicUsize,
        delay: Duration,
        behavior: Behavior,
    }

    impl FakeTranscoder {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                behavior: Behavior::Write(b"AUDIO"),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                behavior: Behavior::Fail,
            })
        }

        fn empty() -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                behavior: Behavior::Write(b""),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicUsize::new(0),
                delay,
                behavior: Behavior::Write(b"AUDIO"),
            })
        }

        fn count(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn transcode(
            &self,
            _source_url: &str,
            dest: &Path,
            _options: &TranscodeOptions,
        ) -> AnyResult<()> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.behavior {
                Behavior::Write(bytes) => {
                    tokio::fs::write(dest, bytes).await?;
                    Ok(())
                }
                Behavior::Fail => anyhow::bail!("códec roto"),
            }
        }
    }

    async fn build(
        catalog: Arc<FakeCatalog>,
        transcoder: Arc<FakeTranscoder>,
    ) -> (tempfile::TempDir, Arc<ArtifactStore>, Coordinator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().to_path_buf()).await.unwrap());
        let coordinator = Coordinator::new(
            Arc::clone(&store),
            catalog,
            transcoder,
            TranscodeOptions::default(),
            Duration::from_secs(120),
        );
        (dir, store, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_converts_once_then_hits() {
        let transcoder = FakeTranscoder::ok();
        let (_dir, _store, coordinator) = build(FakeCatalog::ok(), Arc::clone(&transcoder)).await;

        let first = coordinator.resolve("abc123").await.unwrap();
        assert!(first.ends_with("abc123.mp3"));
        assert!(std::fs::metadata(&first).unwrap().len() > 0);
        assert_eq!(transcoder.count(), 1);

        // El segundo resolve es un hit puro
        let second = coordinator.resolve("abc123").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transcoder.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolves_share_one_conversion() {
        let transcoder = FakeTranscoder::ok();
        let (_dir, _store, coordinator) = build(FakeCatalog::ok(), Arc::clone(&transcoder)).await;

        let (a, b, c, d, e) = tokio::join!(
            coordinator.resolve("abc123"),
            coordinator.resolve("abc123"),
            coordinator.resolve("abc123"),
            coordinator.resolve("abc123"),
            coordinator.resolve("abc123"),
        );

        let path = a.unwrap();
        assert_eq!(path, b.unwrap());
        assert_eq!(path, c.unwrap());
        assert_eq!(path, d.unwrap());
        assert_eq!(path, e.unwrap());
        assert_eq!(transcoder.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cleans_up_and_allows_retry() {
        let transcoder = FakeTranscoder::failing();
        let (_dir, store, coordinator) = build(FakeCatalog::ok(), Arc::clone(&transcoder)).await;

        let err = coordinator.resolve("abc123").await.unwrap_err();
        assert!(matches!(err, CacheError::Transcode(_)));
        assert!(!store.exists("abc123"));

        // La clave queda inmediatamente reintentable
        let err = coordinator.resolve("abc123").await.unwrap_err();
        assert!(matches!(err, CacheError::Transcode(_)));
        assert_eq!(transcoder.count(), 2);
        assert!(!store.exists("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_observe_same_failure() {
        let transcoder = FakeTranscoder::failing();
        let (_dir, store, coordinator) = build(FakeCatalog::ok(), Arc::clone(&transcoder)).await;

        let (a, b, c) = tokio::join!(
            coordinator.resolve("abc123"),
            coordinator.resolve("abc123"),
            coordinator.resolve("abc123"),
        );

        assert!(matches!(a.unwrap_err(), CacheError::Transcode(_)));
        assert!(matches!(b.unwrap_err(), CacheError::Transcode(_)));
        assert!(matches!(c.unwrap_err(), CacheError::Transcode(_)));
        assert_eq!(transcoder.count(), 1);
        assert!(!store.exists("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_locator_failure_maps_to_not_found_upstream() {
        let transcoder = FakeTranscoder::ok();
        let (_dir, store, coordinator) =
            build(FakeCatalog::failing(), Arc::clone(&transcoder)).await;

        let err = coordinator.resolve("bad-id").await.unwrap_err();
        match err {
            CacheError::NotFoundUpstream { id, .. } => assert_eq!(id, "bad-id"),
            other => panic!("se esperaba NotFoundUpstream, llegó {:?}", other),
        }

        assert!(!store.exists("bad-id"));
        assert_eq!(transcoder.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_output_is_a_transcode_failure() {
        let transcoder = FakeTranscoder::empty();
        let (_dir, store, coordinator) = build(FakeCatalog::ok(), Arc::clone(&transcoder)).await;

        let err = coordinator.resolve("abc123").await.unwrap_err();
        assert!(matches!(err, CacheError::Transcode(_)));
        assert!(!store.exists("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_conversion_times_out() {
        let transcoder = FakeTranscoder::slow(Duration::from_secs(600));
        let _dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ArtifactStore::new(_dir.path().to_path_buf())
                .await
                .unwrap(),
        );
        let coordinator = Coordinator::new(
            Arc::clone(&store),
            FakeCatalog::ok(),
            transcoder.clone(),
            TranscodeOptions::default(),
            Duration::from_secs(2),
        );

        let err = coordinator.resolve("abc123").await.unwrap_err();
        assert!(matches!(err, CacheError::Transcode(_)));
        assert!(!store.exists("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_convert_independently() {
        let transcoder = FakeTranscoder::ok();
        let (_dir, _store, coordinator) = build(FakeCatalog::ok(), Arc::clone(&transcoder)).await;

        let (a, b) = tokio::join!(coordinator.resolve("uno"), coordinator.resolve("dos"));
        assert_ne!(a.unwrap(), b.unwrap());
        assert_eq!(transcoder.count(), 2);
    }
}
