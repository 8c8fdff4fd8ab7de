use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

mod api;
mod audio;
mod cache;
mod config;
mod error;
mod sources;
mod storage;

use crate::api::AppState;
use crate::audio::{FfmpegTranscoder, Transcoder};
use crate::cache::CacheService;
use crate::config::Config;
use crate::sources::{ItunesClient, MusicCatalog};
use crate::storage::FeaturedStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_tunes=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Tunes API v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    info!("{}", config.summary());

    // Verificar dependencias críticas antes de aceptar tráfico
    FfmpegTranscoder::verify_dependencies().await?;

    // Colaboradores externos del caché
    let catalog: Arc<dyn MusicCatalog> = Arc::new(ItunesClient::new());
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new());
    info!("🎶 Catálogo activo: {}", catalog.source_name());

    // Listas destacadas
    let featured = Arc::new(FeaturedStorage::new(config.data_dir.clone()).await?);

    // Servicio de caché con su ciclo de vida propio
    let cache = Arc::new(CacheService::new(&config, Arc::clone(&catalog), transcoder).await?);
    cache.start();

    let state = AppState {
        cache: Arc::clone(&cache),
        catalog,
        featured,
        search_limit: config.search_limit,
        featured_limit: config.featured_limit,
    };

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("🚀 API escuchando en http://{}", addr);

    if let Err(e) = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Error al ejecutar el servidor: {}", e);
    }

    // Apagado ordenado: el barrido en curso y las conversiones iniciadas drenan
    cache.stop().await;
    info!("👋 Apagado completo");

    Ok(())
}

/// Espera Ctrl+C para iniciar el apagado ordenado
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Error al registrar Ctrl+C: {}", e);
        return;
    }
    info!("⚠️ Señal de shutdown recibida, cerrando...");
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    FfmpegTranscoder::verify_dependencies().await?;
    println!("OK");
    Ok(())
}
