//! Ejecución de consultas compiladas: compilar, ejecutar una única vez contra
//! el almacén y dar forma al resultado.

use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::{
    compiler::{self, Statement},
    error::{QueryError, QueryResult},
    models::{EntityPoints, EntitySummary, HierarchyNode, PointsResponse, QuerySpec, Row, TreeEdge},
    path_model::QueryPath,
    schema::SchemaCatalog,
    shaper,
};

/// Almacén capaz de ejecutar una sentencia en un único viaje de ida y vuelta.
pub trait StoreExecutor: Send + Sync {
    fn execute<'a>(&'a self, statement: &'a Statement) -> BoxFuture<'a, anyhow::Result<Vec<Row>>>;
}

async fn run(executor: &dyn StoreExecutor, statement: &Statement) -> QueryResult<Vec<Row>> {
    debug!("Ejecutando consulta:\n{}", statement.text);
    executor
        .execute(statement)
        .await
        .map_err(|e| QueryError::StoreExecution(e.to_string()))
}

/// Compila `spec`, la ejecuta y devuelve los puntos tipados junto al manifiesto.
/// Si la compilación falla no se llega a contactar con el almacén.
pub async fn run_points_query(
    executor: &dyn StoreExecutor,
    catalog: &SchemaCatalog,
    spec: &QuerySpec,
    limit: Option<i64>,
) -> QueryResult<PointsResponse> {
    let (query, manifest) = compiler::compile(spec, catalog)?;
    let statement = query.with_limit(limit).render();

    let rows = run(executor, &statement).await?;
    info!(
        "Consulta de puntos sobre '{}': {} filas",
        spec.entity_label,
        rows.len()
    );

    let points = shaper::shape(rows, &manifest, catalog);
    Ok(PointsResponse {
        attributes: manifest.attributes,
        aggregates: manifest.aggregates,
        points,
    })
}

pub async fn run_entity_summary(
    executor: &dyn StoreExecutor,
    catalog: &SchemaCatalog,
    label: &str,
    attributes: &[String],
) -> QueryResult<EntitySummary> {
    let statement = compiler::compile_entity_summary(catalog, label, attributes)?;
    let rows = run(executor, &statement).await?;
    Ok(shaper::shape_summary(rows, attributes, catalog))
}

/// Identificadores relacionados con la selección a través de la ruta.
pub async fn run_related_by_path(
    executor: &dyn StoreExecutor,
    catalog: &SchemaCatalog,
    path: &QueryPath,
    ids: &[i64],
) -> QueryResult<Vec<i64>> {
    let Some(statement) = compiler::compile_related_by_path(catalog, path, ids)? else {
        return Ok(Vec::new());
    };
    let rows = run(executor, &statement).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("id").and_then(serde_json::Value::as_i64))
        .collect())
}

/// Identificadores relacionados con la selección a través de un árbol de aristas.
pub async fn run_related_by_tree(
    executor: &dyn StoreExecutor,
    catalog: &SchemaCatalog,
    edges: &[TreeEdge],
    ids: &[i64],
) -> QueryResult<Vec<i64>> {
    let Some(statement) = compiler::compile_related_by_tree(catalog, edges, ids)? else {
        return Ok(Vec::new());
    };
    let rows = run(executor, &statement).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("id").and_then(serde_json::Value::as_i64))
        .collect())
}

pub async fn run_hierarchy(
    executor: &dyn StoreExecutor,
    catalog: &SchemaCatalog,
    entity: &str,
) -> QueryResult<Vec<HierarchyNode>> {
    let statement = compiler::compile_hierarchy(catalog, entity)?;
    let rows = run(executor, &statement).await?;
    Ok(shaper::shape_hierarchy(rows))
}

pub async fn run_points_by_id(
    executor: &dyn StoreExecutor,
    catalog: &SchemaCatalog,
    label: &str,
    ids: &[i64],
) -> QueryResult<PointsResponse> {
    let Some((statement, manifest)) = compiler::compile_points_by_id(catalog, label, ids)? else {
        return Ok(PointsResponse {
            attributes: Default::default(),
            aggregates: Default::default(),
            points: Vec::new(),
        });
    };
    let rows = run(executor, &statement).await?;
    let points = shaper::shape(rows, &manifest, catalog);
    Ok(PointsResponse {
        attributes: manifest.attributes,
        aggregates: manifest.aggregates,
        points,
    })
}

/// Puntos de cualquier entidad por identificador, agrupados por entidad.
pub async fn run_labelled_points_by_id(
    executor: &dyn StoreExecutor,
    catalog: &SchemaCatalog,
    ids: &[i64],
) -> QueryResult<Vec<EntityPoints>> {
    let Some(statement) = compiler::compile_labelled_points_by_id(ids) else {
        return Ok(Vec::new());
    };
    let rows = run(executor, &statement).await?;
    Ok(shaper::shape_labelled_points(rows, catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregateFunction, AggregateSpec, PointValue};
    use crate::schema::fixtures::spend_catalog;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::Mutex;

    /// Almacén en memoria que registra cada sentencia recibida.
    pub struct RecordingExecutor {
        pub rows: Vec<Row>,
        pub fail: bool,
        pub calls: Mutex<Vec<Statement>>,
    }

    impl RecordingExecutor {
        pub fn returning(rows: Vec<Row>) -> Self {
            Self {
                rows,
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl StoreExecutor for RecordingExecutor {
        fn execute<'a>(&'a self, statement: &'a Statement) -> BoxFuture<'a, anyhow::Result<Vec<Row>>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(statement.clone());
                if self.fail {
                    return Err(anyhow!("conexión rechazada"));
                }
                Ok(self.rows.clone())
            })
        }
    }

    fn spec(path: &[&str]) -> QuerySpec {
        QuerySpec {
            entity_label: "Spend".into(),
            filters: vec![],
            aggregates: vec![AggregateSpec {
                tag: "x".into(),
                function: AggregateFunction::Sum,
                path: path.iter().map(|s| s.to_string()).collect(),
                target_entity: "Category".into(),
                target_attribute: "budget".into(),
            }],
        }
    }

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn points_are_compiled_executed_once_and_shaped() {
        let executor = RecordingExecutor::returning(vec![row(&[("id", json!(1)), ("x", json!(250.0))])]);
        let response =
            tokio_test::block_on(run_points_query(&executor, &spend_catalog(), &spec(&["contains"]), None))
                .unwrap();

        assert_eq!(executor.call_count(), 1);
        assert_eq!(response.points.len(), 1);
        assert_eq!(response.points[0].values["x"], PointValue::Value(json!(250.0)));
        assert!(response.aggregates.contains_key("x"));
    }

    #[test]
    fn unresolvable_path_never_reaches_the_store() {
        let executor = RecordingExecutor::returning(vec![]);
        let err = tokio_test::block_on(run_points_query(
            &executor,
            &spend_catalog(),
            &spec(&["nowhere"]),
            None,
        ))
        .unwrap_err();

        assert!(matches!(err, QueryError::UnresolvablePath { .. }));
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn store_errors_pass_through() {
        let executor = RecordingExecutor {
            fail: true,
            ..RecordingExecutor::returning(vec![])
        };
        let err = tokio_test::block_on(run_points_query(
            &executor,
            &spend_catalog(),
            &spec(&["contains"]),
            Some(10),
        ))
        .unwrap_err();

        assert_eq!(err, QueryError::StoreExecution("conexión rechazada".into()));
        assert!(!err.is_compilation_error());
        assert_eq!(executor.call_count(), 1);
    }

    #[test]
    fn related_ids_skip_store_for_trivial_paths() {
        let executor = RecordingExecutor::returning(vec![row(&[("id", json!(9))])]);
        let catalog = spend_catalog();

        let none = tokio_test::block_on(run_related_by_path(
            &executor,
            &catalog,
            &QueryPath::from_elements(["Spend"]),
            &[1],
        ))
        .unwrap();
        assert!(none.is_empty());
        assert_eq!(executor.call_count(), 0);

        let ids = tokio_test::block_on(run_related_by_path(
            &executor,
            &catalog,
            &QueryPath::from_elements(["Category", "contains", "Spend"]),
            &[1],
        ))
        .unwrap();
        assert_eq!(ids, vec![9]);
    }

    #[test]
    fn summary_runs_single_statement() {
        let executor = RecordingExecutor::returning(vec![row(&[
            ("count", json!(3)),
            ("min_0", json!(1.0)),
            ("max_0", json!(2.0)),
        ])]);
        let summary = tokio_test::block_on(run_entity_summary(
            &executor,
            &spend_catalog(),
            "Spend",
            &["amount".into()],
        ))
        .unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(executor.call_count(), 1);
    }

    #[test]
    fn related_by_tree_rejects_edges_outside_the_schema() {
        let executor = RecordingExecutor::returning(vec![row(&[("id", json!(5))])]);
        let catalog = spend_catalog();
        let edge = |s: &str, r: &str, t: &str| TreeEdge {
            source: s.into(),
            relationship: r.into(),
            target: t.into(),
        };

        let err = tokio_test::block_on(run_related_by_tree(
            &executor,
            &catalog,
            &[edge("Vendor", "contains", "Spend")],
            &[1],
        ))
        .unwrap_err();
        assert!(err.is_compilation_error());
        assert_eq!(executor.call_count(), 0);

        let ids = tokio_test::block_on(run_related_by_tree(
            &executor,
            &catalog,
            &[edge("OrgPosition", "child", "BusinessUnit"), edge("BusinessUnit", "incur", "Spend")],
            &[1],
        ))
        .unwrap();
        assert_eq!(ids, vec![5]);
        assert_eq!(executor.call_count(), 1);
    }

    #[test]
    fn points_by_id_without_ids_skips_the_store() {
        let executor = RecordingExecutor::returning(vec![]);
        let response =
            tokio_test::block_on(run_points_by_id(&executor, &spend_catalog(), "Spend", &[])).unwrap();
        assert!(response.points.is_empty());
        assert_eq!(executor.call_count(), 0);

        let groups =
            tokio_test::block_on(run_labelled_points_by_id(&executor, &spend_catalog(), &[])).unwrap();
        assert!(groups.is_empty());
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn points_by_id_shapes_declared_attributes() {
        let executor = RecordingExecutor::returning(vec![row(&[
            ("id", json!(4)),
            ("founded", json!(3_600)),
            ("name", json!("Operaciones")),
        ])]);
        let response = tokio_test::block_on(run_points_by_id(
            &executor,
            &spend_catalog(),
            "BusinessUnit",
            &[4],
        ))
        .unwrap();

        assert_eq!(response.attributes["founded"], "founded");
        assert_eq!(
            response.points[0].values["founded"],
            PointValue::DateTime(chrono::DateTime::from_timestamp(3_600, 0).unwrap())
        );
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].columns, vec!["id", "name", "founded"]);
    }

    #[test]
    fn hierarchy_is_shaped_from_one_statement() {
        let executor = RecordingExecutor::returning(vec![row(&[
            ("id", json!(1)),
            ("name", json!("Raíz")),
            ("children", json!([2])),
        ])]);
        let nodes =
            tokio_test::block_on(run_hierarchy(&executor, &spend_catalog(), "OrgPosition")).unwrap();
        assert_eq!(nodes[0].children, vec![2]);
        assert_eq!(executor.call_count(), 1);
    }
}
