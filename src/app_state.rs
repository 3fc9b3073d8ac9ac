use std::sync::{Arc, Mutex, RwLock};
use neo4rs::Graph;
use tokio::sync::oneshot;
use crate::{config::AppConfig, executor::StoreExecutor, schema::SchemaCatalog};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub graph: Arc<Graph>,
    pub executor: Arc<dyn StoreExecutor>,
    pub catalog: Arc<RwLock<Arc<SchemaCatalog>>>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    /// Instantánea del catálogo vigente; las peticiones no bloquean una recarga.
    pub fn catalog(&self) -> Arc<SchemaCatalog> {
        match self.catalog.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace_catalog(&self, catalog: SchemaCatalog) {
        let mut guard = match self.catalog.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(catalog);
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub message: String,
    pub catalog_loaded_at: Option<String>,
    pub queries_served: u64,
    pub queries_failed: u64,
}
