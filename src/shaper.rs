//! Conversión de filas crudas del almacén en puntos tipados.
//!
//! Sólo las fechas necesitan conversión: se guardan como segundos epoch y se
//! devuelven como instantes (serializados en milisegundos). Cada fila debe
//! pasar por aquí exactamente una vez.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    models::{
        AggregateFunction, AttributeExtent, EntityPoints, EntitySummary, HierarchyNode,
        OutputManifest, Point, PointValue, Row,
    },
    schema::{AttributeType, SchemaCatalog},
};

/// Tipo subyacente de una columna según el manifiesto. `count` siempre es un
/// entero, sea cual sea el atributo contado.
fn column_type(tag: &str, manifest: &OutputManifest, catalog: &SchemaCatalog) -> Option<AttributeType> {
    if let Some(attribute) = manifest.attributes.get(tag) {
        return catalog.attribute_type(attribute);
    }
    let aggregate = manifest.aggregates.get(tag)?;
    match aggregate.function {
        AggregateFunction::Count => Some(AttributeType::Integer),
        _ => catalog.attribute_type(&aggregate.target_attribute),
    }
}

fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return DateTime::from_timestamp(secs, 0);
    }
    let secs = value.as_f64()?;
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

/// Convierte un valor según el tipo semántico de su atributo.
pub fn convert_value(value: Value, attribute_type: Option<AttributeType>) -> PointValue {
    match attribute_type {
        Some(AttributeType::Datetime) => match epoch_seconds(&value) {
            Some(instant) => PointValue::DateTime(instant),
            None => PointValue::Value(value),
        },
        Some(
            AttributeType::String
            | AttributeType::Integer
            | AttributeType::Float
            | AttributeType::Currency
            | AttributeType::GeoPoint
            | AttributeType::GeoPoly,
        )
        | None => PointValue::Value(value),
    }
}

/// Da forma a las filas de una consulta de puntos.
pub fn shape(rows: Vec<Row>, manifest: &OutputManifest, catalog: &SchemaCatalog) -> Vec<Point> {
    rows.into_iter()
        .map(|mut row| {
            let id = row.remove("id").unwrap_or(Value::Null);
            let values = row
                .into_iter()
                .map(|(tag, value)| {
                    let attribute_type = column_type(&tag, manifest, catalog);
                    (tag, convert_value(value, attribute_type))
                })
                .collect();
            Point { id, values }
        })
        .collect()
}

/// Da forma a la fila única del resumen de una entidad (`count`, `min_i`, `max_i`).
pub fn shape_summary(rows: Vec<Row>, attributes: &[String], catalog: &SchemaCatalog) -> EntitySummary {
    let mut row = rows.into_iter().next().unwrap_or_default();
    let count = row.get("count").and_then(Value::as_i64).unwrap_or(0);

    let extents = attributes
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let attribute_type = catalog.attribute_type(name);
            let min = row.remove(&format!("min_{i}")).unwrap_or(Value::Null);
            let max = row.remove(&format!("max_{i}")).unwrap_or(Value::Null);
            AttributeExtent {
                name: name.clone(),
                min: convert_value(min, attribute_type),
                max: convert_value(max, attribute_type),
            }
        })
        .collect();

    EntitySummary { count, extents }
}

/// Filas `id, name, children` de una jerarquía. Las filas sin id se descartan.
pub fn shape_hierarchy(rows: Vec<Row>) -> Vec<HierarchyNode> {
    rows.into_iter()
        .filter_map(|mut row| {
            let id = row.get("id").and_then(Value::as_i64)?;
            let children = row
                .get("children")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
                .unwrap_or_default();
            Some(HierarchyNode {
                id,
                name: row.remove("name").unwrap_or(Value::Null),
                children,
            })
        })
        .collect()
}

/// Agrupa por entidad las filas `entity, id, values`, ordenadas por entidad.
/// Las etiquetas ajenas al catálogo se ignoran.
pub fn shape_labelled_points(rows: Vec<Row>, catalog: &SchemaCatalog) -> Vec<EntityPoints> {
    let mut groups: BTreeMap<String, (BTreeSet<String>, Vec<Point>)> = BTreeMap::new();
    for mut row in rows {
        let Some(entity) = row.get("entity").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        if !catalog.has_entity(&entity) {
            continue;
        }
        let id = row.remove("id").unwrap_or(Value::Null);
        let properties = match row.remove("values") {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };

        let (attributes, points) = groups.entry(entity).or_default();
        let values = properties
            .into_iter()
            .map(|(name, value)| {
                let attribute_type = catalog.attribute_type(&name);
                attributes.insert(name.clone());
                (name, convert_value(value, attribute_type))
            })
            .collect();
        points.push(Point { id, values });
    }

    groups
        .into_iter()
        .map(|(entity, (attributes, points))| EntityPoints {
            entity,
            attributes: attributes.into_iter().collect(),
            points,
        })
        .collect()
}
