//! Acceso a Neo4j: conexión, carga del catálogo del esquema desde el
//! metagrafo (`:Meta`) y ejecución de sentencias compiladas.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use neo4rs::{query, BoltType, Graph, Query};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::{
    compiler::{ParamValue, Statement},
    config::AppConfig,
    executor::StoreExecutor,
    models::Row,
    schema::{Attribute, AttributeType, Entity, HierarchyRoot, RelationshipShape, SchemaCatalog},
};

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Lee entidades, atributos, formas de relación y raíces de jerarquía.
pub async fn load_schema_catalog(graph: &Graph) -> Result<SchemaCatalog> {
    // Con el recuento es bastante más lento, pero sólo ocurre al arrancar o recargar.
    let mut cursor = graph
        .execute(query(
            "MATCH (e:Meta:Entity)--(a:Meta:Attribute)
             OPTIONAL MATCH (n)
             WHERE NOT 'Meta' IN labels(n) AND e.name IN labels(n)
             RETURN e.name AS name, collect(DISTINCT a.name) AS attributes, count(DISTINCT n) AS count",
        ))
        .await?;
    let mut entities = Vec::new();
    while let Some(row) = cursor.next().await? {
        let name: String = row
            .get("name")
            .ok_or_else(|| anyhow!("Falta campo 'name' en metadatos de entidad"))?;
        let mut attributes: Vec<String> = row.get("attributes").unwrap_or_default();
        attributes.sort();
        entities.push(Entity {
            name,
            attributes,
            count: row.get("count").unwrap_or(0),
        });
    }

    let mut cursor = graph
        .execute(query(
            "MATCH (a:Meta:Attribute)
             RETURN a.name AS name, a.type AS type, a.root AS root, a.default AS default",
        ))
        .await?;
    let mut attributes = Vec::new();
    while let Some(row) = cursor.next().await? {
        let name: String = row
            .get("name")
            .ok_or_else(|| anyhow!("Falta campo 'name' en metadatos de atributo"))?;
        let raw_type: String = row.get("type").unwrap_or_default();
        let attribute_type = AttributeType::parse(&raw_type).unwrap_or_else(|| {
            warn!("Tipo de atributo desconocido '{raw_type}' para '{name}'; se trata como string");
            AttributeType::String
        });
        attributes.push(Attribute {
            name,
            attribute_type,
            root: optional_json(row.get::<BoltType>("root")),
            default: optional_json(row.get::<BoltType>("default")),
        });
    }

    let mut cursor = graph
        .execute(query(
            "MATCH (n)-[r]->(m)
             WHERE NOT 'Meta' IN labels(n) AND NOT 'Meta' IN labels(m)
             RETURN DISTINCT type(r) AS label, count(r) AS count, head(labels(n)) AS source, head(labels(m)) AS target",
        ))
        .await?;
    let mut shapes = Vec::new();
    while let Some(row) = cursor.next().await? {
        if let (Some(label), Some(source), Some(target)) = (
            row.get::<String>("label"),
            row.get::<String>("source"),
            row.get::<String>("target"),
        ) {
            shapes.push(RelationshipShape {
                label,
                source,
                target,
                count: row.get("count").unwrap_or(0),
            });
        }
    }

    // TODO: no suponer que las raíces tienen un atributo "name".
    let mut cursor = graph
        .execute(query(
            "MATCH (n)-[:child]->()
             WHERE NOT ()-[:child]->(n)
             RETURN DISTINCT labels(n) AS labels, id(n) AS id, n.name AS name",
        ))
        .await?;
    let mut roots: BTreeMap<String, Vec<HierarchyRoot>> = BTreeMap::new();
    while let Some(row) = cursor.next().await? {
        let labels: Vec<String> = row.get("labels").unwrap_or_default();
        let Some(id) = row.get::<i64>("id") else {
            continue;
        };
        let name = row.get::<BoltType>("name").map(bolt_to_json).unwrap_or(Value::Null);
        for label in labels {
            roots.entry(label).or_default().push(HierarchyRoot {
                id,
                attributes: vec!["name".to_string()],
                values: vec![name.clone()],
            });
        }
    }

    let catalog = SchemaCatalog::new(entities, attributes, shapes).with_hierarchy_roots(roots);
    info!("Catálogo del esquema cargado: {}", catalog.summary());
    Ok(catalog)
}

fn optional_json(value: Option<BoltType>) -> Option<Value> {
    value.map(bolt_to_json).filter(|v| !v.is_null())
}

/// Convierte un valor Bolt en JSON. Nodos, relaciones y tipos temporales
/// nativos no aparecen en las proyecciones compiladas y se devuelven como null.
pub fn bolt_to_json(value: BoltType) -> Value {
    match value {
        BoltType::String(s) => Value::String(s.value),
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::from(i.value),
        BoltType::Float(f) => serde_json::Number::from_f64(f.value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        BoltType::List(list) => Value::Array(list.value.into_iter().map(bolt_to_json).collect()),
        BoltType::Map(map) => Value::Object(
            map.value
                .into_iter()
                .map(|(k, v)| (k.value, bolt_to_json(v)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn bind(mut q: Query, statement: &Statement) -> Query {
    for (key, value) in &statement.params {
        q = match value {
            ParamValue::Integer(i) => q.param(key, *i),
            ParamValue::Float(f) => q.param(key, *f),
            ParamValue::Text(s) => q.param(key, s.clone()),
            ParamValue::Boolean(b) => q.param(key, *b),
            ParamValue::IntegerList(ids) => q.param(key, ids.clone()),
        };
    }
    q
}

/// Ejecutor respaldado por la conexión Neo4j compartida.
pub struct Neo4jExecutor {
    graph: Arc<Graph>,
}

impl Neo4jExecutor {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }
}

impl StoreExecutor for Neo4jExecutor {
    fn execute<'a>(&'a self, statement: &'a Statement) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let mut cursor = self
                .graph
                .execute(bind(query(&statement.text), statement))
                .await?;

            let mut rows = Vec::new();
            while let Some(row) = cursor.next().await? {
                let shaped: Row = statement
                    .columns
                    .iter()
                    .map(|column| {
                        let value = row
                            .get::<BoltType>(column)
                            .map(bolt_to_json)
                            .unwrap_or(Value::Null);
                        (column.clone(), value)
                    })
                    .collect();
                rows.push(shaped);
            }
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bolt_scalars_and_lists_map_to_json() {
        assert_eq!(bolt_to_json(BoltType::from(7_i64)), json!(7));
        assert_eq!(bolt_to_json(BoltType::from("hola")), json!("hola"));
        assert_eq!(bolt_to_json(BoltType::from(vec![1_i64, 2])), json!([1, 2]));
        assert_eq!(bolt_to_json(BoltType::from(2.5_f64)), json!(2.5));
    }
}
