// Módulos de la aplicación
mod aggregates;
mod api;
mod app_state;
mod compiler;
mod config;
mod error;
mod executor;
mod models;
mod neo4j_client;
mod path_model;
mod schema;
mod shaper;

use crate::app_state::{AppState, Status};
use axum::Router;
use chrono::Utc;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Conectar a Neo4j y cargar el catálogo del esquema
    let graph = Arc::new(
        neo4j_client::connect_from_config(&cfg)
            .await
            .expect("Error conectando a Neo4j"),
    );
    let catalog = neo4j_client::load_schema_catalog(&graph)
        .await
        .expect("Error cargando el catálogo del esquema");
    let catalog_summary = catalog.summary();

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        graph: graph.clone(),
        executor: Arc::new(neo4j_client::Neo4jExecutor::new(graph)),
        catalog: Arc::new(RwLock::new(Arc::new(catalog))),
        status: Arc::new(Mutex::new(Status {
            message: format!("Servidor listo. {catalog_summary}"),
            catalog_loaded_at: Some(Utc::now().to_rfc3339()),
            ..Status::default()
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 5. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir la dirección del servidor");
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error en el servidor HTTP");

    info!("✅ Servidor cerrado correctamente.");
}
