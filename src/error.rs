//! Errores tipados del núcleo de consultas.
//!
//! Las ediciones inválidas de la ruta nunca llegan aquí: los reductores de
//! `path_model` devuelven la ruta sin cambios.

use thiserror::Error;

use crate::models::AggregateFunction;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("Entidad desconocida: {0}")]
    UnknownEntity(String),

    #[error("Atributo desconocido '{attribute}' en la entidad '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("La función '{function}' no es aplicable al atributo '{attribute}' de tipo {attribute_type}")]
    UnsupportedAggregateFunction {
        function: AggregateFunction,
        attribute: String,
        attribute_type: String,
    },

    #[error("No se puede resolver la ruta {path:?} desde '{from}' hasta '{to}'")]
    UnresolvablePath {
        from: String,
        to: String,
        path: Vec<String>,
    },

    #[error("Etiqueta de salida repetida: {0}")]
    DuplicateTag(String),

    #[error("Petición mal formada: {0}")]
    InvalidRequest(String),

    #[error("Error del almacén: {0}")]
    StoreExecution(String),
}

impl QueryError {
    /// Los errores de compilación se detectan antes de tocar el almacén.
    pub fn is_compilation_error(&self) -> bool {
        !matches!(self, QueryError::StoreExecution(_))
    }
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;
