//! Carga y gestión de configuración de la aplicación (Neo4j + servidor).

use std::env;
use anyhow::{anyhow, Context, Result};

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,
    pub frontend_dir: String,

    /// Tope opcional de puntos devueltos por consulta.
    pub max_points: Option<i64>,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let frontend_dir =
            env::var("FRONTEND_DIR").unwrap_or_else(|_| "frontend".to_string());

        let max_points = match env::var("MAX_POINTS") {
            Ok(raw) => Some(parse_max_points(&raw)?),
            Err(_) => None,
        };

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            frontend_dir,
            max_points,
        })
    }
}

fn parse_max_points(raw: &str) -> Result<i64> {
    let value: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("MAX_POINTS no es un entero: {raw}"))?;
    if value <= 0 {
        return Err(anyhow!("MAX_POINTS debe ser positivo: {value}"));
    }
    Ok(value)
}
