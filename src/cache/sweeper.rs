use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::store::ArtifactStore;

/// Barredor de retención: borra artefactos publicados más viejos que la
/// ventana configurada. Las entradas en vuelo nunca se tocan, sin importar
/// su edad: una conversión lenta no puede perder el suelo bajo sus waiters.
pub struct Sweeper {
    store: Arc<ArtifactStore>,
    retention: Duration,
    interval: Duration,
    token: CancellationToken,
}

impl Sweeper {
    pub fn new(
        store: Arc<ArtifactStore>,
        retention: Duration,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            retention,
            interval,
            token,
        }
    }

    /// Bucle de barrido; termina cuando el token se cancela. La iteración en
    /// curso siempre se completa antes de salir.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // El primer tick resuelve de inmediato; consumirlo evita barrer un
        // caché recién purgado
        ticker.tick().await;

        info!(
            "🧹 Sweeper activo: retención {}s, barrido cada {}s",
            self.retention.as_secs(),
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_once();
                }
            }
        }

        info!("🛑 Sweeper detenido");
    }

    /// Una pasada de barrido sobre la instantánea del índice. Los fallos por
    /// entrada se registran y se saltan; una entrada problemática no aborta
    /// el barrido del resto.
    pub(crate) fn sweep_once(&self) -> usize {
        let mut removed = 0usize;

        for entry in self.store.list_all() {
            if !entry.ready {
                continue;
            }
            if entry.created_at.elapsed() < self.retention {
                continue;
            }

            match self.store.delete(&entry.key) {
                Ok(true) => {
                    debug!("🗑️ Artefacto expirado eliminado: {}", entry.key);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("No se pudo eliminar {}: {}", entry.key, e),
            }
        }

        if removed > 0 {
            info!("🧹 Barrido de caché: {} artefactos expirados eliminados", removed);
        }

        removed
    }
}
