pub mod action;
pub mod audit;
pub mod backoff;
mod claim;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod health;
pub mod models;
pub mod reasoner;
pub mod scheduler;
pub mod storage;
pub mod supervisor;

pub use models::*;
pub use vaultpilot_storage::paths;

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use vaultpilot_storage::{JsonlAuditLog, RedbStore, VaultStore};
use vaultpilot_traits::{AuditSink, Reasoner, RecordStore};

use action::BuiltinActionDispatcher;
use audit::{AuditRecorder, SUPERVISOR_COMPONENT};
use backoff::BackoffPolicy;
use config::{StoreBackend, VaultpilotConfig};
use engine::{IterationEngine, PauseFileHook};
use health::HealthTracker;
use reasoner::CliReasoner;
use scheduler::Scheduler;
use storage::TypedStore;
use supervisor::Supervisor;

/// Every component wired over one record store and audit sink.
pub struct AppCore {
    pub config: VaultpilotConfig,
    pub home: PathBuf,
    pub vault_path: PathBuf,
    pub store: TypedStore,
    pub audit: Arc<dyn AuditSink>,
    pub health: HealthTracker,
    pub engine: IterationEngine,
    pub scheduler: Scheduler,
    pub supervisor: Arc<Supervisor>,
    pub pause_hook: Arc<PauseFileHook>,
}

impl AppCore {
    /// Open the configured store under `home` with the CLI reasoner.
    pub fn open(home: &Path, config: VaultpilotConfig) -> anyhow::Result<Self> {
        let reasoner = Arc::new(CliReasoner::new(config.reasoner.clone()));
        Self::open_with_reasoner(home, config, reasoner)
    }

    pub fn open_with_reasoner(
        home: &Path,
        config: VaultpilotConfig,
        reasoner: Arc<dyn Reasoner>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        paths::ensure_dir(home.to_path_buf())?;
        let vault_path = paths::ensure_dir(config.vault_path(home))?;

        let (records, audit): (Arc<dyn RecordStore>, Arc<dyn AuditSink>) =
            match config.store.backend {
                StoreBackend::Vault => (
                    Arc::new(VaultStore::open(&vault_path)?),
                    Arc::new(JsonlAuditLog::open_in_vault(&vault_path)?),
                ),
                StoreBackend::Redb => {
                    let db_path = config.db_path(home);
                    if let Some(parent) = db_path.parent() {
                        paths::ensure_dir(parent.to_path_buf())?;
                    }
                    let db = RedbStore::open(&db_path)
                        .with_context(|| format!("Failed to open store {}", db_path.display()))?;
                    let audit = db.audit_log()?;
                    (Arc::new(db), Arc::new(audit))
                }
            };
        let store = TypedStore::new(records);
        let backoff = BackoffPolicy::new(config.backoff.clone());

        let health = HealthTracker::new(
            store.clone(),
            AuditRecorder::new(audit.clone(), SUPERVISOR_COMPONENT),
            config.health.clone(),
        );

        let pause_hook = Arc::new(PauseFileHook::new(config.pause_file(home)));
        let engine = IterationEngine::new(store.clone(), audit.clone(), reasoner, config.engine.clone())
            .with_stop_hook(pause_hook.clone())
            .with_health(health.clone())
            .with_backoff(backoff.clone())
            .with_step_lock_dir(config.step_lock_dir(home));

        let dispatcher = BuiltinActionDispatcher::new(engine.clone())
            .with_working_dir(&vault_path)
            .with_exec_timeout(config.scheduler.action_timeout());
        let scheduler = Scheduler::new(
            store.clone(),
            audit.clone(),
            Arc::new(dispatcher),
            config.scheduler.clone(),
        )
        .with_health(health.clone())
        .with_backoff(backoff.clone());

        let supervisor = Arc::new(Supervisor::new(
            health.clone(),
            backoff,
            config.supervisor.clone(),
        ));

        info!(
            home = %home.display(),
            vault = %vault_path.display(),
            backend = ?config.store.backend,
            "Initializing vaultpilot"
        );

        Ok(Self {
            config,
            home: home.to_path_buf(),
            vault_path,
            store,
            audit,
            health,
            engine,
            scheduler,
            supervisor,
            pause_hook,
        })
    }

    pub fn status(&self) -> vaultpilot_traits::Result<StatusReport> {
        StatusReport::collect(&self.store)
    }
}
