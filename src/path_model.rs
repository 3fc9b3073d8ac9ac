//! Ruta de consulta: un recorrido simple y contiguo `[E0, R0, E1, ..., En]`
//! sobre los tipos del esquema, editable sólo por sus dos extremos.
//!
//! Las operaciones son reductores puros: reciben la ruta actual y devuelven
//! la nueva. Una edición no aplicable devuelve la ruta sin cambios.

use serde::{Deserialize, Serialize};

use crate::schema::SchemaCatalog;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryPath(Vec<String>);

impl QueryPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construye una ruta sin validar; útil al recibirla del cliente.
    pub fn from_elements<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(elements.into_iter().map(Into::into).collect())
    }

    pub fn elements(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Entidades de la ruta (posiciones pares).
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.0.iter().step_by(2).map(String::as_str)
    }

    fn contains_entity(&self, name: &str) -> bool {
        self.entities().any(|e| e == name)
    }

    /// Comprueba los invariantes: longitud impar, alternancia, cada terna
    /// respaldada por una forma del esquema y ninguna entidad repetida salvo
    /// de forma adyacente (bucles).
    pub fn is_valid(&self, catalog: &SchemaCatalog) -> bool {
        if self.0.is_empty() {
            return true;
        }
        if self.0.len() % 2 == 0 {
            return false;
        }
        if !self.entities().all(|e| catalog.has_entity(e)) {
            return false;
        }
        let triples_ok = self
            .0
            .windows(3)
            .step_by(2)
            .all(|w| catalog.connects(&w[0], &w[1], &w[2]));
        if !triples_ok {
            return false;
        }

        let entities: Vec<&str> = self.entities().collect();
        entities.iter().enumerate().all(|(i, e)| {
            // Una repetición sólo es válida si todo el tramo intermedio es la misma entidad.
            match entities[..i].iter().rposition(|prev| prev == e) {
                Some(j) => entities[j..=i].iter().all(|x| x == e),
                None => true,
            }
        })
    }

    /// Alterna la selección de una entidad del esquema.
    pub fn toggle_node(&self, catalog: &SchemaCatalog, node: &str) -> QueryPath {
        let mut path = self.0.clone();

        if path.is_empty() {
            if catalog.has_entity(node) {
                return QueryPath(vec![node.to_string()]);
            }
            return self.clone();
        }

        if self.first() == Some(node) {
            drain_front(&mut path, 2);
            return QueryPath(path);
        }
        if self.last() == Some(node) {
            drain_back(&mut path, 2);
            return QueryPath(path);
        }
        if self.contains_entity(node) {
            // Nodo interior: inmutable hasta que la ruta lo exponga como extremo.
            return self.clone();
        }

        // Con una sola entidad ambos extremos coinciden: se extiende por el final.
        let start = (path.len() > 1).then(|| path[0].clone());
        let end = path[path.len() - 1].clone();
        for shape in catalog.relationship_shapes() {
            let other = if shape.source == node {
                &shape.target
            } else if shape.target == node {
                &shape.source
            } else {
                continue;
            };
            if start.as_ref() == Some(other) {
                path.insert(0, shape.label.clone());
                path.insert(0, node.to_string());
                return QueryPath(path);
            }
            if *other == end {
                path.push(shape.label.clone());
                path.push(node.to_string());
                return QueryPath(path);
            }
        }

        self.clone()
    }

    /// Alterna la selección de una arista `(source, relationship, target)`.
    pub fn toggle_edge(
        &self,
        catalog: &SchemaCatalog,
        source: &str,
        relationship: &str,
        target: &str,
    ) -> QueryPath {
        if !catalog.connects(source, relationship, target) {
            return self.clone();
        }

        let edge = [source, relationship, target];
        let reversed = [target, relationship, source];
        let path = &self.0;

        if path.is_empty() {
            return QueryPath::from_elements(edge);
        }

        let matches = |segment: &[String], triple: &[&str; 3]| {
            segment.len() == 3 && segment.iter().zip(triple).all(|(a, b)| a == b)
        };

        if matches(path.as_slice(), &edge) || matches(path.as_slice(), &reversed) {
            return QueryPath::new();
        }

        if path.len() >= 3 {
            let head = &path[..3];
            if matches(head, &edge) || matches(head, &reversed) {
                let mut next = path.clone();
                drain_front(&mut next, 2);
                return QueryPath(next);
            }
            let tail = &path[path.len() - 3..];
            if matches(tail, &edge) || matches(tail, &reversed) {
                let mut next = path.clone();
                drain_back(&mut next, 2);
                return QueryPath(next);
            }
            let interior = path
                .windows(3)
                .step_by(2)
                .any(|w| matches(w, &edge) || matches(w, &reversed));
            if interior {
                return self.clone();
            }
        }

        let start = path[0].as_str();
        let end = path[path.len() - 1].as_str();

        // El extremo nuevo no puede repetir una entidad salvo como bucle sobre el propio extremo.
        let attachable = |joint: &str, added: &str| added == joint || !self.contains_entity(added);

        for [near, rel, far] in [edge, reversed] {
            if path.len() > 1 && near == start && attachable(start, far) {
                let mut next = path.clone();
                next.insert(0, rel.to_string());
                next.insert(0, far.to_string());
                return QueryPath(next);
            }
        }
        for [near, rel, far] in [edge, reversed] {
            if near == end && attachable(end, far) {
                let mut next = path.clone();
                next.push(rel.to_string());
                next.push(far.to_string());
                return QueryPath(next);
            }
        }

        self.clone()
    }
}

fn drain_front(path: &mut Vec<String>, n: usize) {
    let n = n.min(path.len());
    path.drain(..n);
}

fn drain_back(path: &mut Vec<String>, n: usize) {
    let keep = path.len().saturating_sub(n);
    path.truncate(keep);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::spend_catalog;
    use proptest::prelude::*;

    fn path(elements: &[&str]) -> QueryPath {
        QueryPath::from_elements(elements.iter().copied())
    }

    #[test]
    fn first_node_starts_the_path() {
        let catalog = spend_catalog();
        assert_eq!(QueryPath::new().toggle_node(&catalog, "Category"), path(&["Category"]));
    }

    #[test]
    fn connected_node_extends_the_end() {
        let catalog = spend_catalog();
        let next = path(&["Category"]).toggle_node(&catalog, "Spend");
        assert_eq!(next, path(&["Category", "contains", "Spend"]));
    }

    #[test]
    fn edge_on_single_entity_appends_in_given_orientation() {
        let catalog = spend_catalog();
        let single = path(&["Category"]);
        assert_eq!(
            single.toggle_edge(&catalog, "Category", "contains", "Spend"),
            path(&["Category", "contains", "Spend"])
        );
        assert_eq!(
            single.toggle_edge(&catalog, "Spend", "contains", "Category"),
            path(&["Category", "contains", "Spend"])
        );
        assert_eq!(
            single.toggle_edge(&catalog, "Category", "child", "Category"),
            path(&["Category", "child", "Category"])
        );
    }

    #[test]
    fn node_extends_whichever_end_it_touches() {
        let catalog = spend_catalog();
        let next = path(&["Category", "contains", "Spend"]).toggle_node(&catalog, "Vendor");
        assert_eq!(next, path(&["Category", "contains", "Spend", "charge", "Vendor"]));

        let next = path(&["Spend", "incur", "BusinessUnit"]).toggle_node(&catalog, "OrgPosition");
        assert_eq!(next, path(&["Spend", "incur", "BusinessUnit", "child", "OrgPosition"]));

        let next = path(&["BusinessUnit", "incur", "Spend"]).toggle_node(&catalog, "OrgPosition");
        assert_eq!(next, path(&["OrgPosition", "child", "BusinessUnit", "incur", "Spend"]));
    }

    #[test]
    fn endpoint_nodes_retract() {
        let catalog = spend_catalog();
        let full = path(&["Category", "contains", "Spend", "charge", "Vendor"]);
        assert_eq!(full.toggle_node(&catalog, "Vendor"), path(&["Category", "contains", "Spend"]));
        assert_eq!(full.toggle_node(&catalog, "Category"), path(&["Spend", "charge", "Vendor"]));
        assert_eq!(path(&["Spend"]).toggle_node(&catalog, "Spend"), QueryPath::new());
    }

    #[test]
    fn interior_and_disconnected_nodes_are_ignored() {
        let catalog = spend_catalog();
        let full = path(&["Category", "contains", "Spend", "charge", "Vendor"]);
        assert_eq!(full.toggle_node(&catalog, "Spend"), full);
        assert_eq!(full.toggle_node(&catalog, "OrgPosition"), full);
        assert_eq!(QueryPath::new().toggle_node(&catalog, "Unknown"), QueryPath::new());
    }

    #[test]
    fn edge_on_empty_path_keeps_orientation() {
        let catalog = spend_catalog();
        let next = QueryPath::new().toggle_edge(&catalog, "Spend", "contains", "Category");
        assert_eq!(next, path(&["Spend", "contains", "Category"]));
    }

    #[test]
    fn edge_matching_whole_path_clears_it() {
        let catalog = spend_catalog();
        let current = path(&["Category", "contains", "Spend"]);
        assert_eq!(current.toggle_edge(&catalog, "Category", "contains", "Spend"), QueryPath::new());
        assert_eq!(current.toggle_edge(&catalog, "Spend", "contains", "Category"), QueryPath::new());
    }

    #[test]
    fn end_edges_retract_and_interior_edges_stay() {
        let catalog = spend_catalog();
        let full = path(&[
            "Category", "contains", "Spend", "incur", "BusinessUnit", "child", "OrgPosition",
        ]);
        assert_eq!(
            full.toggle_edge(&catalog, "Spend", "contains", "Category"),
            path(&["Spend", "incur", "BusinessUnit", "child", "OrgPosition"])
        );
        assert_eq!(
            full.toggle_edge(&catalog, "OrgPosition", "child", "BusinessUnit"),
            path(&["Category", "contains", "Spend", "incur", "BusinessUnit"])
        );
        assert_eq!(full.toggle_edge(&catalog, "BusinessUnit", "incur", "Spend"), full);
    }

    #[test]
    fn edge_extends_matching_end_in_correct_orientation() {
        let catalog = spend_catalog();
        let current = path(&["Category", "contains", "Spend"]);
        assert_eq!(
            current.toggle_edge(&catalog, "Vendor", "charge", "Spend"),
            path(&["Category", "contains", "Spend", "charge", "Vendor"])
        );
        assert_eq!(
            current.toggle_edge(&catalog, "Category", "child", "Category"),
            path(&["Category", "child", "Category", "contains", "Spend"])
        );
    }

    #[test]
    fn disconnected_or_cyclic_edges_are_ignored() {
        let catalog = spend_catalog();
        let current = path(&["Category", "contains", "Spend"]);
        assert_eq!(current.toggle_edge(&catalog, "OrgPosition", "child", "BusinessUnit"), current);
        // No existe en el esquema.
        assert_eq!(current.toggle_edge(&catalog, "Vendor", "contains", "Spend"), current);

        let long = path(&["Category", "contains", "Spend", "charge", "Vendor"]);
        let with_unit = long.toggle_edge(&catalog, "BusinessUnit", "incur", "Spend");
        assert_eq!(with_unit, long);
    }

    #[test]
    fn validity_rejects_branches_and_unknown_triples() {
        let catalog = spend_catalog();
        assert!(path(&["Category", "child", "Category", "contains", "Spend"]).is_valid(&catalog));
        assert!(!path(&["Category", "contains"]).is_valid(&catalog));
        assert!(!path(&["Vendor", "contains", "Spend"]).is_valid(&catalog));
        assert!(!path(&[
            "Spend", "contains", "Category", "contains", "Spend"
        ])
        .is_valid(&catalog));
    }

    #[derive(Debug, Clone)]
    enum Edit {
        Node(&'static str),
        Edge(&'static str, &'static str, &'static str),
    }

    const ENTITIES: [&str; 6] = ["Category", "Spend", "Vendor", "BusinessUnit", "OrgPosition", "Ghost"];
    const EDGES: [(&str, &str, &str); 7] = [
        ("Category", "contains", "Spend"),
        ("Spend", "contains", "Category"),
        ("Vendor", "charge", "Spend"),
        ("BusinessUnit", "incur", "Spend"),
        ("OrgPosition", "child", "BusinessUnit"),
        ("Category", "child", "Category"),
        ("Vendor", "incur", "Category"),
    ];

    fn arb_edit() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (0..ENTITIES.len()).prop_map(|i| Edit::Node(ENTITIES[i])),
            (0..EDGES.len()).prop_map(|i| {
                let (s, r, t) = EDGES[i];
                Edit::Edge(s, r, t)
            }),
        ]
    }

    proptest! {
        #[test]
        fn any_edit_sequence_keeps_the_path_valid(edits in prop::collection::vec(arb_edit(), 0..40)) {
            let catalog = spend_catalog();
            let mut current = QueryPath::new();
            for edit in edits {
                current = match edit {
                    Edit::Node(n) => current.toggle_node(&catalog, n),
                    Edit::Edge(s, r, t) => current.toggle_edge(&catalog, s, r, t),
                };
                prop_assert!(current.is_empty() || current.len() % 2 == 1);
                prop_assert!(current.is_valid(&catalog), "ruta inválida: {:?}", current);
            }
        }

        #[test]
        fn extending_then_toggling_again_restores(
            edits in prop::collection::vec(arb_edit(), 0..20),
            node in 0..ENTITIES.len(),
        ) {
            let catalog = spend_catalog();
            let mut current = QueryPath::new();
            for edit in edits {
                current = match edit {
                    Edit::Node(n) => current.toggle_node(&catalog, n),
                    Edit::Edge(s, r, t) => current.toggle_edge(&catalog, s, r, t),
                };
            }
            let node = ENTITIES[node];
            let extended = current.toggle_node(&catalog, node);
            if extended.len() > current.len() && !current.is_empty() {
                prop_assert_eq!(extended.toggle_node(&catalog, node), current);
            }
        }
    }
}
