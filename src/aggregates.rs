//! Resolución de agregados: extrae de la ruta de consulta el tramo entre el
//! sujeto y la entidad destino y lo empaqueta como `AggregateSpec`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    error::{QueryError, QueryResult},
    models::{AggregateFunction, AggregateSpec},
    path_model::QueryPath,
    schema::{Attribute, AttributeType, SchemaCatalog},
};

/// Indica si `function` tiene sentido sobre un atributo de tipo `attribute_type`.
pub fn supports(function: AggregateFunction, attribute_type: AttributeType) -> bool {
    match function {
        AggregateFunction::Sum | AggregateFunction::Avg => attribute_type.is_numeric(),
        AggregateFunction::Min | AggregateFunction::Max => {
            attribute_type == AttributeType::Datetime || attribute_type.is_numeric()
        }
        AggregateFunction::Count => true,
    }
}

/// Funciones ofrecidas al descubrir agregados. `count` no se ofrece: vale para
/// cualquier atributo y sólo se acepta si el cliente la pide.
fn offered_functions(attribute_type: AttributeType) -> &'static [AggregateFunction] {
    match attribute_type {
        AttributeType::Currency | AttributeType::Float | AttributeType::Integer => &[
            AggregateFunction::Sum,
            AggregateFunction::Avg,
            AggregateFunction::Min,
            AggregateFunction::Max,
        ],
        AttributeType::Datetime => &[AggregateFunction::Min, AggregateFunction::Max],
        AttributeType::String | AttributeType::GeoPoint | AttributeType::GeoPoly => &[],
    }
}

/// Comprueba entidad, atributo y compatibilidad de la función.
pub fn check_function<'a>(
    catalog: &'a SchemaCatalog,
    entity: &str,
    attribute: &str,
    function: AggregateFunction,
) -> QueryResult<&'a Attribute> {
    let attr = catalog.entity_attribute(entity, attribute)?;
    if !supports(function, attr.attribute_type) {
        return Err(QueryError::UnsupportedAggregateFunction {
            function,
            attribute: attribute.to_string(),
            attribute_type: attr.attribute_type.to_string(),
        });
    }
    Ok(attr)
}

/// Tramo de etiquetas de relación entre `subject` y `target` dentro de `path`,
/// en orden de recorrido desde el sujeto.
///
/// Se usa la primera aparición de cada entidad. `subject_index`, si apunta a
/// una aparición del sujeto, fija el origen; así un bucle `[A, r, A]` puede
/// resolverse de un extremo al otro.
pub fn resolve_sub_path(
    path: &QueryPath,
    subject: &str,
    subject_index: Option<usize>,
    target: &str,
) -> QueryResult<Vec<String>> {
    let elements = path.elements();
    let unresolvable = || QueryError::UnresolvablePath {
        from: subject.to_string(),
        to: target.to_string(),
        path: elements.to_vec(),
    };

    let is_entity_at = |i: usize, name: &str| i % 2 == 0 && elements.get(i).map(String::as_str) == Some(name);

    let start = subject_index
        .filter(|&i| is_entity_at(i, subject))
        .or_else(|| (0..elements.len()).find(|&i| is_entity_at(i, subject)))
        .ok_or_else(unresolvable)?;
    let end = (0..elements.len())
        .find(|&i| i != start && is_entity_at(i, target))
        .ok_or_else(unresolvable)?;

    let relationships = |from: usize, to: usize| {
        elements[from + 1..to]
            .iter()
            .step_by(2)
            .cloned()
            .collect::<Vec<_>>()
    };

    if start < end {
        Ok(relationships(start, end))
    } else {
        let mut rels = relationships(end, start);
        rels.reverse();
        Ok(rels)
    }
}

/// Construye la especificación de un agregado a partir de la ruta actual.
#[allow(clippy::too_many_arguments)]
pub fn build_aggregate_spec(
    catalog: &SchemaCatalog,
    tag: &str,
    function: AggregateFunction,
    attribute: &str,
    target_entity: &str,
    subject_entity: &str,
    subject_index: Option<usize>,
    path: &QueryPath,
) -> QueryResult<AggregateSpec> {
    catalog.entity(subject_entity)?;
    check_function(catalog, target_entity, attribute, function)?;
    let sub_path = resolve_sub_path(path, subject_entity, subject_index, target_entity)?;

    Ok(AggregateSpec {
        tag: tag.to_string(),
        function,
        path: sub_path,
        target_entity: target_entity.to_string(),
        target_attribute: attribute.to_string(),
    })
}

/// Agregado de un salto ofrecido al cliente para una entidad.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AggregateOption {
    #[serde(rename = "f")]
    pub function: AggregateFunction,
    pub entity: String,
    pub path: Vec<String>,
    pub attribute: String,
}

/// Agregados derivables del esquema para cada entidad, recorriendo cada forma
/// de relación en ambos sentidos.
pub fn discover_aggregates(catalog: &SchemaCatalog) -> BTreeMap<String, Vec<AggregateOption>> {
    let mut found: BTreeMap<String, Vec<AggregateOption>> = catalog
        .entities()
        .map(|e| (e.name.clone(), Vec::new()))
        .collect();

    for shape in catalog.relationship_shapes() {
        for (from, to) in [(&shape.source, &shape.target), (&shape.target, &shape.source)] {
            let Ok(target) = catalog.entity(to) else {
                continue;
            };
            let Some(options) = found.get_mut(from) else {
                continue;
            };
            for attribute in &target.attributes {
                let Some(attribute_type) = catalog.attribute_type(attribute) else {
                    continue;
                };
                for &function in offered_functions(attribute_type) {
                    options.push(AggregateOption {
                        function,
                        entity: to.clone(),
                        path: vec![shape.label.clone()],
                        attribute: attribute.clone(),
                    });
                }
            }
        }
    }

    for options in found.values_mut() {
        options.sort();
        options.dedup();
    }
    found
}
