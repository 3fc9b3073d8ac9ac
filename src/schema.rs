//! Catálogo del esquema del grafo: entidades, atributos tipados y formas de
//! relación observadas en Neo4j. Se consume en modo sólo lectura.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Tipo semántico de un atributo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Currency,
    Datetime,
    GeoPoint,
    GeoPoly,
}

impl AttributeType {
    /// Interpreta el tipo guardado en los nodos `:Meta:Attribute`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "currency" => Some(Self::Currency),
            "datetime" => Some(Self::Datetime),
            "geopoint" | "geo_point" => Some(Self::GeoPoint),
            "geopoly" | "geo_poly" => Some(Self::GeoPoly),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Currency)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Currency => "currency",
            Self::Datetime => "datetime",
            Self::GeoPoint => "geo_point",
            Self::GeoPoly => "geo_poly",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    #[serde(default)]
    pub root: Option<serde_json::Value>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub attributes: Vec<String>,
    #[serde(default)]
    pub count: i64,
}

/// Una terna (etiqueta, origen, destino) observada en el grafo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipShape {
    pub label: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub count: i64,
}

impl RelationshipShape {
    /// Verdadero si la forma une `a` y `b` con `label`, en cualquier sentido.
    pub fn connects(&self, a: &str, label: &str, b: &str) -> bool {
        self.label == label
            && ((self.source == a && self.target == b) || (self.source == b && self.target == a))
    }
}

/// Raíz de una jerarquía (`child`) declarada para una entidad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyRoot {
    pub id: i64,
    pub attributes: Vec<String>,
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    entities: BTreeMap<String, Entity>,
    attributes: BTreeMap<String, Attribute>,
    shapes: Vec<RelationshipShape>,
    hierarchy_roots: BTreeMap<String, Vec<HierarchyRoot>>,
}

impl SchemaCatalog {
    pub fn new(
        entities: Vec<Entity>,
        attributes: Vec<Attribute>,
        mut shapes: Vec<RelationshipShape>,
    ) -> Self {
        // Orden estable: todos los recorridos de formas son deterministas.
        shapes.sort_by(|a, b| {
            (&a.label, &a.source, &a.target).cmp(&(&b.label, &b.source, &b.target))
        });
        shapes.dedup_by(|a, b| a.label == b.label && a.source == b.source && a.target == b.target);

        Self {
            entities: entities.into_iter().map(|e| (e.name.clone(), e)).collect(),
            attributes: attributes.into_iter().map(|a| (a.name.clone(), a)).collect(),
            shapes,
            hierarchy_roots: BTreeMap::new(),
        }
    }

    pub fn with_hierarchy_roots(mut self, roots: BTreeMap<String, Vec<HierarchyRoot>>) -> Self {
        self.hierarchy_roots = roots;
        self
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn relationship_shapes(&self) -> &[RelationshipShape] {
        &self.shapes
    }

    pub fn hierarchy_roots(&self) -> &BTreeMap<String, Vec<HierarchyRoot>> {
        &self.hierarchy_roots
    }

    pub fn entity(&self, name: &str) -> QueryResult<&Entity> {
        self.entities
            .get(name)
            .ok_or_else(|| QueryError::UnknownEntity(name.to_string()))
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Atributo de una entidad concreta; falla si la entidad no lo declara.
    pub fn entity_attribute(&self, entity: &str, attribute: &str) -> QueryResult<&Attribute> {
        let declared = self.entity(entity)?.attributes.iter().any(|a| a == attribute);
        let unknown = || QueryError::UnknownAttribute {
            entity: entity.to_string(),
            attribute: attribute.to_string(),
        };
        if !declared {
            return Err(unknown());
        }
        self.attributes.get(attribute).ok_or_else(unknown)
    }

    /// Tipo de un atributo por nombre, sin comprobar la entidad.
    pub fn attribute_type(&self, attribute: &str) -> Option<AttributeType> {
        self.attributes.get(attribute).map(|a| a.attribute_type)
    }

    /// Existe alguna forma que una `a` y `b` mediante `label` (en cualquier sentido).
    pub fn connects(&self, a: &str, label: &str, b: &str) -> bool {
        self.shapes.iter().any(|s| s.connects(a, label, b))
    }

    /// Resumen legible del catálogo para los logs.
    pub fn summary(&self) -> String {
        format!(
            "{} entidades, {} atributos, {} formas de relación",
            self.entities.len(),
            self.attributes.len(),
            self.shapes.len()
        )
    }
}

/// Catálogo de pruebas compartido por los módulos del núcleo.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    fn attr(name: &str, t: AttributeType) -> Attribute {
        Attribute {
            name: name.to_string(),
            attribute_type: t,
            root: None,
            default: None,
        }
    }

    fn entity(name: &str, attributes: &[&str]) -> Entity {
        Entity {
            name: name.to_string(),
            attributes: attributes.iter().map(|s| s.to_string()).collect(),
            count: 10,
        }
    }

    fn shape(label: &str, source: &str, target: &str) -> RelationshipShape {
        RelationshipShape {
            label: label.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            count: 5,
        }
    }

    /// Category -contains-> Spend <-charge- Vendor, BusinessUnit -incur-> Spend,
    /// OrgPosition -child-> BusinessUnit y un bucle Category -child-> Category.
    pub fn spend_catalog() -> SchemaCatalog {
        SchemaCatalog::new(
            vec![
                entity("Category", &["name", "budget"]),
                entity("Spend", &["amount", "date", "description"]),
                entity("Vendor", &["name", "rating"]),
                entity("BusinessUnit", &["name", "founded"]),
                entity("OrgPosition", &["name"]),
            ],
            vec![
                attr("name", AttributeType::String),
                attr("budget", AttributeType::Currency),
                attr("amount", AttributeType::Currency),
                attr("date", AttributeType::Datetime),
                attr("description", AttributeType::String),
                attr("rating", AttributeType::Float),
                attr("founded", AttributeType::Datetime),
            ],
            vec![
                shape("contains", "Category", "Spend"),
                shape("charge", "Vendor", "Spend"),
                shape("incur", "BusinessUnit", "Spend"),
                shape("child", "OrgPosition", "BusinessUnit"),
                shape("child", "Category", "Category"),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::spend_catalog;
    use super::*;

    #[test]
    fn shapes_are_sorted_and_deduplicated() {
        let catalog = SchemaCatalog::new(
            vec![],
            vec![],
            vec![
                RelationshipShape {
                    label: "b".into(),
                    source: "X".into(),
                    target: "Y".into(),
                    count: 1,
                },
                RelationshipShape {
                    label: "a".into(),
                    source: "X".into(),
                    target: "Y".into(),
                    count: 1,
                },
                RelationshipShape {
                    label: "a".into(),
                    source: "X".into(),
                    target: "Y".into(),
                    count: 3,
                },
            ],
        );
        let labels: Vec<_> = catalog.relationship_shapes().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn entity_attribute_checks_declaration() {
        let catalog = spend_catalog();
        assert!(catalog.entity_attribute("Category", "budget").is_ok());
        assert_eq!(
            catalog.entity_attribute("Spend", "budget"),
            Err(QueryError::UnknownAttribute {
                entity: "Spend".into(),
                attribute: "budget".into()
            })
        );
        assert_eq!(
            catalog.entity_attribute("Nope", "budget"),
            Err(QueryError::UnknownEntity("Nope".into()))
        );
    }

    #[test]
    fn connects_in_either_direction() {
        let catalog = spend_catalog();
        assert!(catalog.connects("Spend", "contains", "Category"));
        assert!(catalog.connects("Category", "contains", "Spend"));
        assert!(!catalog.connects("Vendor", "contains", "Spend"));
    }

    #[test]
    fn parses_stored_type_names() {
        assert_eq!(AttributeType::parse("geopoint"), Some(AttributeType::GeoPoint));
        assert_eq!(AttributeType::parse("Currency"), Some(AttributeType::Currency));
        assert_eq!(AttributeType::parse("blob"), None);
    }
}
