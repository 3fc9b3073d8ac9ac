//! Compilador de consultas analíticas.
//!
//! Traduce un `QuerySpec` (entidad, filtros y agregados) a una representación
//! intermedia estructurada (`CompiledQuery`) y la serializa a Cypher con un
//! único renderizador. Todo valor aportado por el usuario viaja como
//! parámetro; etiquetas y nombres de atributo sólo se aceptan si existen en
//! el catálogo y se escriben siempre entre comillas invertidas.
//!
//! Forma de la consulta generada:
//!
//! ```text
//! MATCH (s:`Spend`)
//! WHERE s.`amount` >= $p0
//! WITH s
//! MATCH (s)<-[:`contains`]-(t0:`Category`)
//! WITH s, sum(t0.`budget`) AS a0
//! RETURN id(s) AS `id`, a0 AS `x`
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    aggregates::check_function,
    error::{QueryError, QueryResult},
    models::{AggregateFunction, AggregateSpec, OutputManifest, QuerySpec, TreeEdge},
    path_model::QueryPath,
    schema::SchemaCatalog,
};

const SUBJECT: &str = "s";
const ID_TAG: &str = "id";
const HIERARCHY_RELATIONSHIP: &str = "child";
const HIERARCHY_NAME: &str = "name";

/// Valor ligado como parámetro de la consulta.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    IntegerList(Vec<i64>),
}

impl ParamValue {
    pub fn from_json(value: &serde_json::Value) -> QueryResult<Self> {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Ok(Self::Boolean(*b)),
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Ok(Self::Integer(i)),
                (None, Some(f)) => Ok(Self::Float(f)),
                _ => Err(QueryError::InvalidRequest(format!("Número fuera de rango: {n}"))),
            },
            other => Err(QueryError::InvalidRequest(format!(
                "Límite de filtro no soportado: {other}"
            ))),
        }
    }
}

/// Sentido de un salto respecto a la entidad desde la que se avanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub relationship: String,
    pub direction: Direction,
    pub entity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternClause {
    pub variable: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    AtLeast,
    AtMost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub attribute: String,
    pub comparison: Comparison,
    pub parameter: String,
}

/// Conjunción de cotas sobre atributos del sujeto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub bounds: Vec<Bound>,
}

/// Etapa que introduce un agregado nuevo. `carried` son las ligaduras
/// visibles al entrar (sujeto y agregados previos).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingStage {
    pub tag: String,
    pub variable: String,
    pub hops: Vec<Hop>,
    pub target_variable: String,
    pub function: AggregateFunction,
    pub attribute: String,
    pub carried: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionExpr {
    Identity,
    Attribute(String),
    Binding(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionItem {
    pub tag: String,
    pub expr: ProjectionExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub patterns: Vec<PatternClause>,
    pub predicate: Option<Predicate>,
    pub stages: Vec<BindingStage>,
    pub projection: Vec<ProjectionItem>,
    pub params: BTreeMap<String, ParamValue>,
    pub limit: Option<i64>,
}

/// Texto Cypher listo para ejecutar, con sus parámetros y columnas de salida.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: BTreeMap<String, ParamValue>,
    pub columns: Vec<String>,
}

fn quote(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Compila un `QuerySpec` contra el catálogo. Falla antes de producir nada si
/// alguna entidad, atributo, función o ruta no es válida.
pub fn compile(
    spec: &QuerySpec,
    catalog: &SchemaCatalog,
) -> QueryResult<(CompiledQuery, OutputManifest)> {
    catalog.entity(&spec.entity_label)?;

    let mut tags = BTreeSet::from([ID_TAG.to_string()]);
    let mut claim_tag = |tag: &str| {
        if tag.trim().is_empty() {
            return Err(QueryError::InvalidRequest("Etiqueta de salida vacía".into()));
        }
        if !tags.insert(tag.to_string()) {
            return Err(QueryError::DuplicateTag(tag.to_string()));
        }
        Ok(())
    };

    let mut manifest = OutputManifest::default();
    let mut params = BTreeMap::new();
    let mut bounds = Vec::new();
    let mut projection = vec![ProjectionItem {
        tag: ID_TAG.to_string(),
        expr: ProjectionExpr::Identity,
    }];

    for filter in &spec.filters {
        catalog.entity_attribute(&spec.entity_label, &filter.attribute_name)?;

        for (value, comparison) in [
            (&filter.min, Comparison::AtLeast),
            (&filter.max, Comparison::AtMost),
        ] {
            if let Some(value) = value {
                let parameter = format!("p{}", params.len());
                params.insert(parameter.clone(), ParamValue::from_json(value)?);
                bounds.push(Bound {
                    attribute: filter.attribute_name.clone(),
                    comparison,
                    parameter,
                });
            }
        }

        if filter.include_in_output {
            claim_tag(&filter.tag)?;
            manifest
                .attributes
                .insert(filter.tag.clone(), filter.attribute_name.clone());
            projection.push(ProjectionItem {
                tag: filter.tag.clone(),
                expr: ProjectionExpr::Attribute(filter.attribute_name.clone()),
            });
        }
    }

    let mut stages = Vec::with_capacity(spec.aggregates.len());
    let mut carried = vec![SUBJECT.to_string()];
    for (i, aggregate) in spec.aggregates.iter().enumerate() {
        claim_tag(&aggregate.tag)?;
        let stage = compile_stage(i, aggregate, &spec.entity_label, &carried, catalog)?;
        carried.push(stage.variable.clone());
        projection.push(ProjectionItem {
            tag: aggregate.tag.clone(),
            expr: ProjectionExpr::Binding(stage.variable.clone()),
        });
        manifest
            .aggregates
            .insert(aggregate.tag.clone(), aggregate.clone());
        stages.push(stage);
    }

    let query = CompiledQuery {
        patterns: vec![PatternClause {
            variable: SUBJECT.to_string(),
            label: spec.entity_label.clone(),
        }],
        predicate: (!bounds.is_empty()).then_some(Predicate { bounds }),
        stages,
        projection,
        params,
        limit: None,
    };
    Ok((query, manifest))
}

fn compile_stage(
    index: usize,
    aggregate: &AggregateSpec,
    subject: &str,
    carried: &[String],
    catalog: &SchemaCatalog,
) -> QueryResult<BindingStage> {
    catalog.entity(&aggregate.target_entity)?;
    check_function(
        catalog,
        &aggregate.target_entity,
        &aggregate.target_attribute,
        aggregate.function,
    )?;

    let unresolvable = || QueryError::UnresolvablePath {
        from: subject.to_string(),
        to: aggregate.target_entity.clone(),
        path: aggregate.path.clone(),
    };
    if aggregate.path.is_empty() {
        return Err(unresolvable());
    }
    let hops = resolve_hops(catalog, subject, &aggregate.path, &aggregate.target_entity)
        .ok_or_else(unresolvable)?;

    Ok(BindingStage {
        tag: aggregate.tag.clone(),
        variable: format!("a{index}"),
        hops,
        target_variable: format!("t{index}"),
        function: aggregate.function,
        attribute: aggregate.target_attribute.clone(),
        carried: carried.to_vec(),
    })
}

/// Saltos posibles desde `current` por `label`, uno por entidad siguiente y
/// ordenados por ella. Ese orden es el desempate cuando una etiqueta une
/// varias parejas de entidades. Si la etiqueta une la pareja en ambos
/// sentidos el salto es no dirigido.
fn hop_candidates(catalog: &SchemaCatalog, current: &str, label: &str) -> Vec<(String, Direction)> {
    let mut candidates: BTreeMap<String, Direction> = BTreeMap::new();
    for shape in catalog.relationship_shapes().iter().filter(|shape| shape.label == label) {
        let (next, direction) = match (shape.source == current, shape.target == current) {
            (true, true) => (&shape.target, Direction::Both),
            (true, false) => (&shape.target, Direction::Outgoing),
            (false, true) => (&shape.source, Direction::Incoming),
            (false, false) => continue,
        };
        candidates
            .entry(next.clone())
            .and_modify(|seen| {
                if *seen != direction {
                    *seen = Direction::Both;
                }
            })
            .or_insert(direction);
    }
    candidates.into_iter().collect()
}

/// Primera secuencia de saltos (según el desempate) que lleva de `current`
/// hasta `target` consumiendo exactamente `labels`.
fn resolve_hops(
    catalog: &SchemaCatalog,
    current: &str,
    labels: &[String],
    target: &str,
) -> Option<Vec<Hop>> {
    let Some((label, rest)) = labels.split_first() else {
        return (current == target).then(Vec::new);
    };

    hop_candidates(catalog, current, label)
        .into_iter()
        .find_map(|(next, direction)| {
            let mut tail = resolve_hops(catalog, &next, rest, target)?;
            tail.insert(
                0,
                Hop {
                    relationship: label.clone(),
                    direction,
                    entity: next,
                },
            );
            Some(tail)
        })
}

impl CompiledQuery {
    pub fn with_limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    /// Columnas de salida, en el orden de la proyección.
    pub fn columns(&self) -> Vec<String> {
        self.projection.iter().map(|p| p.tag.clone()).collect()
    }

    /// Serializa la consulta a Cypher parametrizado.
    pub fn render(&self) -> Statement {
        let mut lines = Vec::new();
        let mut params = self.params.clone();

        for pattern in &self.patterns {
            lines.push(format!("MATCH ({}:{})", pattern.variable, quote(&pattern.label)));
        }

        if let Some(predicate) = &self.predicate {
            let clauses: Vec<String> = predicate
                .bounds
                .iter()
                .map(|b| {
                    let op = match b.comparison {
                        Comparison::AtLeast => ">=",
                        Comparison::AtMost => "<=",
                    };
                    format!("{SUBJECT}.{} {op} ${}", quote(&b.attribute), b.parameter)
                })
                .collect();
            lines.push(format!("WHERE {}", clauses.join(" AND ")));
        }
        lines.push(format!("WITH {SUBJECT}"));

        for stage in &self.stages {
            let mut pattern = format!("({SUBJECT})");
            let last = stage.hops.len().saturating_sub(1);
            for (i, hop) in stage.hops.iter().enumerate() {
                let rel = format!("[:{}]", quote(&hop.relationship));
                let edge = match hop.direction {
                    Direction::Outgoing => format!("-{rel}->"),
                    Direction::Incoming => format!("<-{rel}-"),
                    Direction::Both => format!("-{rel}-"),
                };
                let variable = if i == last { stage.target_variable.as_str() } else { "" };
                pattern.push_str(&format!("{edge}({variable}:{})", quote(&hop.entity)));
            }

            let mut visible = stage.carried.clone();
            visible.push(format!(
                "{}({}.{}) AS {}",
                stage.function.as_cypher(),
                stage.target_variable,
                quote(&stage.attribute),
                stage.variable
            ));
            lines.push(format!("MATCH {pattern}"));
            lines.push(format!("WITH {}", visible.join(", ")));
        }

        let returned: Vec<String> = self
            .projection
            .iter()
            .map(|item| {
                let expr = match &item.expr {
                    ProjectionExpr::Identity => format!("id({SUBJECT})"),
                    ProjectionExpr::Attribute(name) => format!("{SUBJECT}.{}", quote(name)),
                    ProjectionExpr::Binding(variable) => variable.clone(),
                };
                format!("{expr} AS {}", quote(&item.tag))
            })
            .collect();
        lines.push(format!("RETURN {}", returned.join(", ")));

        if let Some(limit) = self.limit {
            params.insert("limit".to_string(), ParamValue::Integer(limit));
            lines.push("LIMIT $limit".to_string());
        }

        Statement {
            text: lines.join("\n"),
            params,
            columns: self.columns(),
        }
    }
}

/// Recuento y extensiones (mínimo y máximo) de los atributos de una entidad.
/// Las columnas son `count`, `min_<i>` y `max_<i>`.
pub fn compile_entity_summary(
    catalog: &SchemaCatalog,
    label: &str,
    attributes: &[String],
) -> QueryResult<Statement> {
    catalog.entity(label)?;
    let mut columns = vec!["count".to_string()];
    let mut returned = vec!["count(n) AS `count`".to_string()];
    for (i, attribute) in attributes.iter().enumerate() {
        catalog.entity_attribute(label, attribute)?;
        let name = quote(attribute);
        returned.push(format!("min(n.{name}) AS `min_{i}`"));
        returned.push(format!("max(n.{name}) AS `max_{i}`"));
        columns.push(format!("min_{i}"));
        columns.push(format!("max_{i}"));
    }

    Ok(Statement {
        text: format!("MATCH (n:{})\nRETURN {}", quote(label), returned.join(", ")),
        params: BTreeMap::new(),
        columns,
    })
}

/// Identificadores de los nodos que están en alguna instancia de `path` que
/// toque uno de los `ids` seleccionados. `None` si no hay nada que buscar.
pub fn compile_related_by_path(
    catalog: &SchemaCatalog,
    path: &QueryPath,
    ids: &[i64],
) -> QueryResult<Option<Statement>> {
    if path.len() < 3 || ids.is_empty() {
        return Ok(None);
    }
    if !path.is_valid(catalog) {
        return Err(QueryError::UnresolvablePath {
            from: path.first().unwrap_or_default().to_string(),
            to: path.last().unwrap_or_default().to_string(),
            path: path.elements().to_vec(),
        });
    }

    let pattern: String = path
        .elements()
        .iter()
        .enumerate()
        .map(|(i, element)| {
            if i % 2 == 1 {
                format!("-[:{}]-", quote(element))
            } else {
                format!("(:{})", quote(element))
            }
        })
        .collect();

    let text = format!(
        "MATCH p = {pattern}\n\
         WHERE any(n IN nodes(p) WHERE id(n) IN $ids)\n\
         UNWIND nodes(p) AS n\n\
         WITH DISTINCT n\n\
         WHERE NOT id(n) IN $ids\n\
         RETURN DISTINCT id(n) AS `id`"
    );

    Ok(Some(Statement {
        text,
        params: BTreeMap::from([("ids".to_string(), ParamValue::IntegerList(ids.to_vec()))]),
        columns: vec![ID_TAG.to_string()],
    }))
}

/// Identificadores relacionados con la selección a través de un árbol de
/// aristas `(origen, relación, destino)`. Cada entidad distinta del árbol es
/// una única variable, así que las aristas que comparten entidad comparten
/// nodo.
pub fn compile_related_by_tree(
    catalog: &SchemaCatalog,
    edges: &[TreeEdge],
    ids: &[i64],
) -> QueryResult<Option<Statement>> {
    if edges.is_empty() || ids.is_empty() {
        return Ok(None);
    }

    let mut variables: Vec<String> = Vec::new();
    let mut variable_of = |entity: &str| -> QueryResult<String> {
        catalog.entity(entity)?;
        let index = match variables.iter().position(|e| e.as_str() == entity) {
            Some(i) => i,
            None => {
                variables.push(entity.to_string());
                variables.len() - 1
            }
        };
        Ok(format!("n{index}"))
    };

    let mut joins = Vec::with_capacity(edges.len());
    for edge in edges {
        let from = variable_of(&edge.source)?;
        let to = variable_of(&edge.target)?;
        let forward = catalog.relationship_shapes().iter().any(|shape| {
            shape.label == edge.relationship && shape.source == edge.source && shape.target == edge.target
        });
        let rel = format!("[:{}]", quote(&edge.relationship));
        let join = if forward {
            format!("({from})-{rel}->({to})")
        } else if catalog.connects(&edge.source, &edge.relationship, &edge.target) {
            format!("({from})<-{rel}-({to})")
        } else {
            return Err(QueryError::UnresolvablePath {
                from: edge.source.clone(),
                to: edge.target.clone(),
                path: vec![edge.relationship.clone()],
            });
        };
        joins.push(join);
    }

    let mut clauses: Vec<String> = variables
        .iter()
        .enumerate()
        .map(|(i, entity)| format!("(n{i}:{})", quote(entity)))
        .collect();
    clauses.extend(joins);
    let nodes = (0..variables.len())
        .map(|i| format!("n{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    let text = [
        format!("MATCH {}", clauses.join(", ")),
        format!("WHERE any(n IN [{nodes}] WHERE id(n) IN $ids)"),
        format!("UNWIND [{nodes}] AS n"),
        "WITH DISTINCT n".to_string(),
        "WHERE NOT id(n) IN $ids".to_string(),
        "RETURN DISTINCT id(n) AS `id`".to_string(),
    ]
    .join("\n");

    Ok(Some(Statement {
        text,
        params: BTreeMap::from([("ids".to_string(), ParamValue::IntegerList(ids.to_vec()))]),
        columns: vec![ID_TAG.to_string()],
    }))
}

/// Hijos directos (por `child`) de cada nodo de una entidad. La columna
/// `name` es nula si la entidad no declara ese atributo.
pub fn compile_hierarchy(catalog: &SchemaCatalog, entity: &str) -> QueryResult<Statement> {
    let declared = catalog.entity(entity)?;
    let name = if declared.attributes.iter().any(|a| a == HIERARCHY_NAME) {
        format!("n.{}", quote(HIERARCHY_NAME))
    } else {
        "null".to_string()
    };

    Ok(Statement {
        text: format!(
            "MATCH (n:{})-[:{}]->(m)\n\
             RETURN id(n) AS `id`, {name} AS `name`, collect(id(m)) AS `children`",
            quote(entity),
            quote(HIERARCHY_RELATIONSHIP)
        ),
        params: BTreeMap::new(),
        columns: vec![ID_TAG.to_string(), "name".to_string(), "children".to_string()],
    })
}

/// Puntos de una entidad por identificador, con todos sus atributos
/// declarados. `None` si no hay identificadores.
pub fn compile_points_by_id(
    catalog: &SchemaCatalog,
    label: &str,
    ids: &[i64],
) -> QueryResult<Option<(Statement, OutputManifest)>> {
    let entity = catalog.entity(label)?;
    if ids.is_empty() {
        return Ok(None);
    }

    let mut manifest = OutputManifest::default();
    let mut returned = vec!["id(n) AS `id`".to_string()];
    let mut columns = vec![ID_TAG.to_string()];
    for attribute in entity.attributes.iter().filter(|a| a.as_str() != ID_TAG) {
        returned.push(format!("n.{name} AS {name}", name = quote(attribute)));
        columns.push(attribute.clone());
        manifest.attributes.insert(attribute.clone(), attribute.clone());
    }

    let statement = Statement {
        text: format!(
            "MATCH (n:{})\n\
             WHERE id(n) IN $ids\n\
             RETURN DISTINCT {}",
            quote(label),
            returned.join(", ")
        ),
        params: BTreeMap::from([("ids".to_string(), ParamValue::IntegerList(ids.to_vec()))]),
        columns,
    };
    Ok(Some((statement, manifest)))
}

/// Nodos de cualquier entidad por identificador, una fila por etiqueta con
/// sus propiedades completas.
pub fn compile_labelled_points_by_id(ids: &[i64]) -> Option<Statement> {
    if ids.is_empty() {
        return None;
    }
    Some(Statement {
        text: "MATCH (n)\n\
               WHERE id(n) IN $ids\n\
               UNWIND labels(n) AS label\n\
               RETURN label AS `entity`, id(n) AS `id`, properties(n) AS `values`"
            .to_string(),
        params: BTreeMap::from([("ids".to_string(), ParamValue::IntegerList(ids.to_vec()))]),
        columns: vec!["entity".to_string(), ID_TAG.to_string(), "values".to_string()],
    })
}
