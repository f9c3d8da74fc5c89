//! Facade handle: backend selection, dependency-injected assembly of the
//! service graph, and the background drain loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use fieldbook_core::app_state::AppStateStore;
use fieldbook_core::evidence::EvidenceRepository;
use fieldbook_core::inspections::InspectionRepository;
use fieldbook_core::properties::PropertyRepository;
use fieldbook_core::storage::{BackendKind, SharedBackend, UnavailableBackend};
use fieldbook_core::sync::{
    reconcile, DrainReport, SharedRemote, SyncEngine, SyncQueueRepository, SyncStatsReader,
    SyncTrigger, SYNC_INTERVAL_JITTER_SECS, SYNC_PERIODIC_INTERVAL_SECS, SYNC_STARTUP_DELAY_SECS,
};
use fieldbook_remote::FieldApiClient;
use fieldbook_storage_kv::KvBackend;
use fieldbook_storage_sqlite::SqliteBackend;

use crate::config::{BackendPreference, EngineConfig};
use crate::errors::FieldbookError;

/// One live field store: storage engine, repositories, and sync machinery.
///
/// Built once at startup and shared as an `Arc` by the embedding app; there
/// is no global instance. Repositories, the queue, and the stats reader are
/// handed out as `Arc`s so UI layers can hold them directly.
pub struct Fieldbook {
    backend: SharedBackend,
    properties: Arc<PropertyRepository>,
    inspections: Arc<InspectionRepository>,
    evidence: Arc<EvidenceRepository>,
    queue: Arc<SyncQueueRepository>,
    app_state: Arc<AppStateStore>,
    stats: Arc<SyncStatsReader>,
    engine: Arc<SyncEngine>,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Fieldbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fieldbook")
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

impl Fieldbook {
    /// Open the configured storage engine, heal sync-state invariants, and
    /// assemble the full service graph.
    pub async fn init(config: EngineConfig) -> Result<Self, FieldbookError> {
        let remote: SharedRemote = Arc::new(FieldApiClient::with_token(
            &config.api_base_url,
            config.api_token.clone(),
        ));
        Self::init_with_remote(config, remote).await
    }

    /// Same as `init`, with a caller-supplied remote port. This is the seam
    /// tests and alternative transports plug into.
    pub async fn init_with_remote(
        config: EngineConfig,
        remote: SharedRemote,
    ) -> Result<Self, FieldbookError> {
        let backend = open_backend(&config)?;

        let properties = Arc::new(PropertyRepository::new(Arc::clone(&backend)));
        let inspections = Arc::new(InspectionRepository::new(Arc::clone(&backend)));
        let evidence = Arc::new(EvidenceRepository::new(Arc::clone(&backend)));
        let queue = Arc::new(SyncQueueRepository::new(Arc::clone(&backend)));
        let app_state = Arc::new(AppStateStore::new(Arc::clone(&backend)));

        if backend.kind() != BackendKind::Unavailable {
            let report = reconcile(&backend, &queue).await?;
            if report.healed_anything() {
                info!(
                    "Startup reconciliation demoted {} stale item(s) and synthesized {} queue item(s)",
                    report.demoted_processing, report.synthesized_items
                );
            }
        }

        let stats = Arc::new(SyncStatsReader::new(
            Arc::clone(&backend),
            Arc::clone(&queue),
            Arc::clone(&evidence),
            Arc::clone(&app_state),
        ));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&properties),
            Arc::clone(&inspections),
            Arc::clone(&evidence),
            Arc::clone(&app_state),
            remote,
        ));

        info!("Field store initialized ({} backend)", backend.kind());
        Ok(Self {
            backend,
            properties,
            inspections,
            evidence,
            queue,
            app_state,
            stats,
            engine,
            background_task: Mutex::new(None),
        })
    }

    /// Reachability signal from the embedding app. Gaining connectivity
    /// kicks a `reconnected` drain in the background.
    pub fn set_online(&self, online: bool) {
        let was_online = self.engine.is_online();
        self.engine.set_online(online);
        if online && !was_online {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                if let Err(err) = engine.drain(SyncTrigger::Reconnected).await {
                    warn!("Reconnect drain failed: {}", err);
                }
            });
        }
    }

    pub fn is_online(&self) -> bool {
        self.engine.is_online()
    }

    /// Drain the queue once, now. Backs the UI "sync now" action.
    pub async fn sync_now(&self) -> Result<DrainReport, FieldbookError> {
        Ok(self.engine.drain(SyncTrigger::Manual).await?)
    }

    /// Put failed queue items and failed media uploads back in rotation,
    /// then drain once.
    pub async fn retry_failed(&self) -> Result<DrainReport, FieldbookError> {
        let items = self.queue.retry_failed().await?;
        let uploads = self.evidence.retry_failed_uploads().await?;
        if items > 0 || uploads > 0 {
            info!(
                "Retrying {} failed item(s) and {} failed upload(s)",
                items, uploads
            );
        }
        Ok(self.engine.drain(SyncTrigger::Manual).await?)
    }

    /// Start the periodic drain loop if it is not already running. The loop
    /// waits out a short startup delay, drains once, then drains on a
    /// jittered interval so a fleet of devices does not hit the API in
    /// lockstep.
    pub async fn ensure_background_sync_started(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let engine = Arc::clone(&self.engine);
        let handle = tokio::spawn(async move {
            sleep(Duration::from_secs(SYNC_STARTUP_DELAY_SECS)).await;
            if let Err(err) = engine.drain(SyncTrigger::Startup).await {
                warn!("Startup drain failed: {}", err);
            }
            loop {
                let jitter = rand::thread_rng().gen_range(0..=SYNC_INTERVAL_JITTER_SECS);
                sleep(Duration::from_secs(SYNC_PERIODIC_INTERVAL_SECS + jitter)).await;
                if let Err(err) = engine.drain(SyncTrigger::Periodic).await {
                    warn!("Periodic drain failed: {}", err);
                }
            }
        });
        *guard = Some(handle);
        debug!("Background sync loop started");
    }

    /// Stop the periodic drain loop. Aborting mid-drain is safe: unfinished
    /// items stay `pending` or `processing` and the next startup
    /// reconciliation returns them to rotation.
    pub async fn ensure_background_sync_stopped(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            debug!("Background sync loop stopped");
        }
    }

    /// Stop background work and flush the storage engine.
    pub async fn close(&self) -> Result<(), FieldbookError> {
        self.ensure_background_sync_stopped().await;
        self.backend.close().await?;
        info!("Field store closed");
        Ok(())
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// True when no offline-capable engine could be opened; repository calls
    /// fail fast and the caller should use its online path directly.
    pub fn is_degraded(&self) -> bool {
        self.backend.kind() == BackendKind::Unavailable
    }

    pub fn properties(&self) -> Arc<PropertyRepository> {
        Arc::clone(&self.properties)
    }

    pub fn inspections(&self) -> Arc<InspectionRepository> {
        Arc::clone(&self.inspections)
    }

    pub fn evidence(&self) -> Arc<EvidenceRepository> {
        Arc::clone(&self.evidence)
    }

    pub fn queue(&self) -> Arc<SyncQueueRepository> {
        Arc::clone(&self.queue)
    }

    pub fn app_state(&self) -> Arc<AppStateStore> {
        Arc::clone(&self.app_state)
    }

    pub fn sync_stats(&self) -> Arc<SyncStatsReader> {
        Arc::clone(&self.stats)
    }

    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }
}

/// Select and open the storage engine per the configured preference.
///
/// The relational engine failing when explicitly requested is fatal; the KV
/// fallback failing degrades to the unavailable backend so the app keeps
/// running in online-only mode.
fn open_backend(config: &EngineConfig) -> Result<SharedBackend, FieldbookError> {
    match config.backend {
        BackendPreference::Sqlite => match SqliteBackend::open(&config.app_data_dir) {
            Ok(backend) => {
                info!("Opened sqlite backend under {}", config.app_data_dir);
                Ok(Arc::new(backend))
            }
            Err(err) => {
                error!("Relational store failed to open: {}", err);
                Err(FieldbookError::init(format!(
                    "relational store failed to open: {}",
                    err
                )))
            }
        },
        BackendPreference::Kv => Ok(open_kv_or_degrade(&config.app_data_dir)),
        BackendPreference::Auto => match SqliteBackend::open(&config.app_data_dir) {
            Ok(backend) => {
                info!("Opened sqlite backend under {}", config.app_data_dir);
                Ok(Arc::new(backend))
            }
            Err(err) => {
                warn!(
                    "Relational store failed to open, trying the KV engine: {}",
                    err
                );
                Ok(open_kv_or_degrade(&config.app_data_dir))
            }
        },
    }
}

fn open_kv_or_degrade(app_data_dir: &str) -> SharedBackend {
    match KvBackend::open(app_data_dir) {
        Ok(backend) => {
            info!("Opened kv backend under {}", app_data_dir);
            Arc::new(backend)
        }
        Err(err) => {
            warn!(
                "No offline storage available, degrading to online-only mode: {}",
                err
            );
            Arc::new(UnavailableBackend::new())
        }
    }
}
