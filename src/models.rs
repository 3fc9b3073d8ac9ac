//! Modelos de petición y respuesta del compilador de consultas analíticas.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Fila cruda devuelta por el almacén: columna → valor sin tipar.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Filtro y/o petición de salida sobre un atributo propio de la entidad sujeto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilter {
    pub tag: String,
    pub attribute_name: String,
    #[serde(default)]
    pub include_in_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    pub fn parse(s: &str) -> QueryResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => Err(QueryError::InvalidRequest(format!(
                "Función de agregado no soportada: {other}"
            ))),
        }
    }

    /// Nombre de la función de agregado en Cypher.
    pub fn as_cypher(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_cypher())
    }
}

/// Agregado calculado sobre un atributo de una entidad alcanzada desde el
/// sujeto por una secuencia de etiquetas de relación.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    pub tag: String,
    #[serde(alias = "f")]
    pub function: AggregateFunction,
    pub path: Vec<String>,
    #[serde(alias = "entity")]
    pub target_entity: String,
    #[serde(alias = "attribute")]
    pub target_attribute: String,
}

/// Petición completa: entidad sujeto, filtros y agregados, en orden de declaración.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    #[serde(alias = "entity")]
    pub entity_label: String,
    #[serde(default)]
    pub filters: Vec<AttributeFilter>,
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
}

/// Describe cómo interpretar cada columna del resultado.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputManifest {
    pub attributes: BTreeMap<String, String>,
    pub aggregates: BTreeMap<String, AggregateSpec>,
}

/// Valor tipado de un punto. Las fechas se serializan en milisegundos epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PointValue {
    DateTime(#[serde(with = "chrono::serde::ts_milliseconds")] DateTime<Utc>),
    Value(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub id: serde_json::Value,
    #[serde(flatten)]
    pub values: BTreeMap<String, PointValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointsResponse {
    pub attributes: BTreeMap<String, String>,
    pub aggregates: BTreeMap<String, AggregateSpec>,
    pub points: Vec<Point>,
}

/// Extensión de un atributo dentro del resumen de una entidad.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeExtent {
    pub name: String,
    pub min: PointValue,
    pub max: PointValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub count: i64,
    pub extents: Vec<AttributeExtent>,
}

/// Arista seleccionada en el diagrama, con la orientación que ve el cliente.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEdge {
    pub source: String,
    pub relationship: String,
    pub target: String,
}

/// Nodo de una jerarquía `child` con los identificadores de sus hijos.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub id: i64,
    pub name: serde_json::Value,
    pub children: Vec<i64>,
}

/// Puntos de una misma entidad devueltos en una búsqueda por identificador.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityPoints {
    pub entity: String,
    pub attributes: Vec<String>,
    pub points: Vec<Point>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aggregate_spec_accepts_short_field_names() {
        let spec: AggregateSpec = serde_json::from_value(json!({
            "tag": "x",
            "f": "sum",
            "path": ["contains"],
            "entity": "Category",
            "attribute": "budget"
        }))
        .unwrap();
        assert_eq!(spec.function, AggregateFunction::Sum);
        assert_eq!(spec.target_entity, "Category");
        assert_eq!(spec.target_attribute, "budget");
    }

    #[test]
    fn point_flattens_values_and_dates_as_millis() {
        let mut values = BTreeMap::new();
        values.insert(
            "when".to_string(),
            PointValue::DateTime(DateTime::from_timestamp(1_000, 0).unwrap()),
        );
        values.insert("x".to_string(), PointValue::Value(json!(2.5)));
        let point = Point { id: json!(7), values };
        assert_eq!(
            serde_json::to_value(&point).unwrap(),
            json!({"id": 7, "when": 1_000_000, "x": 2.5})
        );
    }

    #[test]
    fn unknown_function_is_invalid_request() {
        assert!(matches!(
            AggregateFunction::parse("stdev"),
            Err(QueryError::InvalidRequest(_))
        ));
        assert_eq!(AggregateFunction::parse(" AVG "), Ok(AggregateFunction::Avg));
    }
}
