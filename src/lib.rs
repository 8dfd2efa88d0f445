pub mod artifacts;
pub mod auth;
pub mod config;
pub mod error;
pub mod sandbox;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;

use std::sync::Arc;
use tracing::info;

use artifacts::ArtifactAccess;
use auth::ApiKeyConfig;
use config::Settings;
use sandbox::PathSandbox;
use schedule::{ArtifactRelocator, DirectoryRelocator, ExecutionAdapter, JobDispatcher, TaskRegistry};
use storage::task::SqliteTaskStorage;

pub struct AppContext {
    pub registry: Arc<TaskRegistry>,
    pub dispatcher: Arc<JobDispatcher>,
    pub artifacts: Arc<ArtifactAccess>,
    pub auth: Arc<ApiKeyConfig>,
}

impl AppContext {
    /// Opens the store, loads tasks, starts the workers and settles tasks
    /// left over from a previous run. Must be called inside a tokio runtime.
    pub async fn bootstrap(settings: &Settings, adapter: Arc<dyn ExecutionAdapter>) -> anyhow::Result<Self> {
        info!(root = %settings.output_root.display(), "Initializing sandbox...");
        let sandbox = Arc::new(PathSandbox::new(&settings.output_root)?);

        info!("Initializing Storage...");
        let storage = Arc::new(SqliteTaskStorage::new(&settings.database_url).await?);

        let relocator: Option<Arc<dyn ArtifactRelocator>> = match (&settings.relocation_dir, &settings.relocation_base_url) {
            (Some(dir), Some(base_url)) => {
                info!(dir = %dir.display(), base_url = %base_url, "Artifact relocation enabled");
                Some(Arc::new(DirectoryRelocator::new(dir.clone(), base_url.clone())))
            }
            _ => None,
        };

        info!("Initializing Task Registry...");
        let registry = Arc::new(TaskRegistry::load(storage, sandbox, relocator.clone()).await?);

        info!("Initializing Dispatcher...");
        let dispatcher = Arc::new(JobDispatcher::start(
            registry.clone(),
            adapter,
            settings.dispatcher_config(),
        ));
        dispatcher.recover().await;

        let artifacts = Arc::new(ArtifactAccess::new(
            relocator,
            settings.access_url_ttl,
            settings.domain.clone(),
        ));

        Ok(Self {
            registry,
            dispatcher,
            artifacts,
            auth: Arc::new(ApiKeyConfig::from_settings(settings)),
        })
    }
}
