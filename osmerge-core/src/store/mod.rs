//! The per-dataset entity store.
//!
//! An [`Osm`] value holds one dataset (base or patch): three columnar
//! tables plus the decoded header. Loading appends entities, then a single
//! [`Osm::finish`] freezes the tables and builds the ID indexes. After the
//! freeze the store is read-only for loading purposes, but merge
//! acceptance can still overwrite or remove entities through an overlay
//! kept apart from the frozen columns.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::buffer::BufferError;
use crate::entity::{Bbox, Entity, EntityKind, Node, Relation, Way};
use crate::index::IdIndexError;

mod tables;

pub use tables::{
    InfoColumnsParts, NodeTable, NodeTableParts, RelationTable, RelationTableParts,
    TagColumnsParts, WayTable, WayTableParts,
};

/// Errors raised by the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An append was attempted after the store was frozen.
    #[error("the {} table is frozen; appends are no longer accepted", .kind.name())]
    Frozen {
        /// Table that rejected the append.
        kind: EntityKind,
    },
    /// An operation that requires a frozen store ran too early.
    #[error("the store has not been frozen; call finish() first")]
    NotFrozen,
    /// A store with pending overlay edits cannot be transferred.
    #[error("the store has {pending} pending overlay edits and cannot be transferred")]
    DirtyOverlay {
        /// Number of overlay entries (inserts plus removals).
        pending: usize,
    },
    /// A column failed to grow.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// The ID index rejected the operation.
    #[error(transparent)]
    Index(#[from] IdIndexError),
}

/// Decoded PBF header data carried alongside the tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    /// Bounding box declared by the source file, if any.
    pub bbox: Option<Bbox>,
    /// Features a reader must understand (for example `OsmSchema-V0.6`).
    pub required_features: Vec<String>,
    /// Features the writer used but readers may ignore.
    pub optional_features: Vec<String>,
    /// Name of the program that wrote the file.
    pub writing_program: Option<String>,
}

/// Post-freeze edits: replacement values and tombstones per entity kind.
#[derive(Debug, Default)]
struct Overlay {
    nodes: BTreeMap<i64, Node>,
    ways: BTreeMap<i64, Way>,
    relations: BTreeMap<i64, Relation>,
    deleted_nodes: BTreeSet<i64>,
    deleted_ways: BTreeSet<i64>,
    deleted_relations: BTreeSet<i64>,
}

impl Overlay {
    fn pending(&self) -> usize {
        self.nodes.len()
            + self.ways.len()
            + self.relations.len()
            + self.deleted_nodes.len()
            + self.deleted_ways.len()
            + self.deleted_relations.len()
    }
}

/// A fully in-memory OSM dataset with columnar storage.
///
/// # Examples
/// ```
/// use osmerge_core::{Node, Osm};
///
/// # fn main() -> Result<(), osmerge_core::StoreError> {
/// let mut osm = Osm::new();
/// osm.add_node(&Node::new(1, 13.4, 52.5))?;
/// osm.finish()?;
/// assert_eq!(osm.nodes().by_id(1)?.map(|node| node.lat), Some(52.5));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Osm {
    /// Header data decoded from the source file.
    pub header: Header,
    nodes: NodeTable,
    ways: WayTable,
    relations: RelationTable,
    overlay: Overlay,
}

impl Osm {
    /// Create an empty, unfrozen dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The node table.
    #[must_use]
    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    /// The way table.
    #[must_use]
    pub fn ways(&self) -> &WayTable {
        &self.ways
    }

    /// The relation table.
    #[must_use]
    pub fn relations(&self) -> &RelationTable {
        &self.relations
    }

    /// Append a node during the loading phase.
    pub fn add_node(&mut self, node: &Node) -> Result<(), StoreError> {
        self.nodes.add(node)
    }

    /// Append a way during the loading phase.
    pub fn add_way(&mut self, way: &Way) -> Result<(), StoreError> {
        self.ways.add(way)
    }

    /// Append a relation during the loading phase.
    pub fn add_relation(&mut self, relation: &Relation) -> Result<(), StoreError> {
        self.relations.add(relation)
    }

    /// Append any entity during the loading phase.
    pub fn add_entity(&mut self, entity: &Entity) -> Result<(), StoreError> {
        match entity {
            Entity::Node(node) => self.add_node(node),
            Entity::Way(way) => self.add_way(way),
            Entity::Relation(relation) => self.add_relation(relation),
        }
    }

    /// Freeze the tables and build the ID indexes. One-shot.
    pub fn finish(&mut self) -> Result<(), StoreError> {
        self.nodes.finish()?;
        self.ways.finish()?;
        self.relations.finish()?;
        Ok(())
    }

    /// Whether every table has been frozen and lookups are valid.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.nodes.is_ready() && self.ways.is_ready() && self.relations.is_ready()
    }

    /// Look up a node by ID, overlay first.
    pub fn node_by_id(&self, id: i64) -> Result<Option<Node>, StoreError> {
        if self.overlay.deleted_nodes.contains(&id) {
            return Ok(None);
        }
        if let Some(node) = self.overlay.nodes.get(&id) {
            return Ok(Some(node.clone()));
        }
        self.nodes.by_id(id)
    }

    /// Look up a way by ID, overlay first.
    pub fn way_by_id(&self, id: i64) -> Result<Option<Way>, StoreError> {
        if self.overlay.deleted_ways.contains(&id) {
            return Ok(None);
        }
        if let Some(way) = self.overlay.ways.get(&id) {
            return Ok(Some(way.clone()));
        }
        self.ways.by_id(id)
    }

    /// Look up a relation by ID, overlay first.
    pub fn relation_by_id(&self, id: i64) -> Result<Option<Relation>, StoreError> {
        if self.overlay.deleted_relations.contains(&id) {
            return Ok(None);
        }
        if let Some(relation) = self.overlay.relations.get(&id) {
            return Ok(Some(relation.clone()));
        }
        self.relations.by_id(id)
    }

    /// Whether an entity of the given kind and ID exists.
    pub fn contains(&self, kind: EntityKind, id: i64) -> Result<bool, StoreError> {
        match kind {
            EntityKind::Node => Ok(self.node_by_id(id)?.is_some()),
            EntityKind::Way => Ok(self.way_by_id(id)?.is_some()),
            EntityKind::Relation => Ok(self.relation_by_id(id)?.is_some()),
        }
    }

    /// Insert or overwrite a node after the freeze. Idempotent.
    pub fn insert_node(&mut self, node: Node) -> Result<(), StoreError> {
        self.require_ready()?;
        self.overlay.deleted_nodes.remove(&node.id);
        self.overlay.nodes.insert(node.id, node);
        Ok(())
    }

    /// Insert or overwrite a way after the freeze. Idempotent.
    pub fn insert_way(&mut self, way: Way) -> Result<(), StoreError> {
        self.require_ready()?;
        self.overlay.deleted_ways.remove(&way.id);
        self.overlay.ways.insert(way.id, way);
        Ok(())
    }

    /// Insert or overwrite a relation after the freeze. Idempotent.
    pub fn insert_relation(&mut self, relation: Relation) -> Result<(), StoreError> {
        self.require_ready()?;
        self.overlay.deleted_relations.remove(&relation.id);
        self.overlay.relations.insert(relation.id, relation);
        Ok(())
    }

    /// Insert or overwrite any entity after the freeze.
    pub fn insert_entity(&mut self, entity: Entity) -> Result<(), StoreError> {
        match entity {
            Entity::Node(node) => self.insert_node(node),
            Entity::Way(way) => self.insert_way(way),
            Entity::Relation(relation) => self.insert_relation(relation),
        }
    }

    /// Remove an entity after the freeze (tombstone). Idempotent.
    pub fn remove(&mut self, kind: EntityKind, id: i64) -> Result<(), StoreError> {
        self.require_ready()?;
        match kind {
            EntityKind::Node => {
                self.overlay.nodes.remove(&id);
                self.overlay.deleted_nodes.insert(id);
            }
            EntityKind::Way => {
                self.overlay.ways.remove(&id);
                self.overlay.deleted_ways.insert(id);
            }
            EntityKind::Relation => {
                self.overlay.relations.remove(&id);
                self.overlay.deleted_relations.insert(id);
            }
        }
        Ok(())
    }

    /// Iterate nodes: frozen storage order with overlay substitutions,
    /// then overlay-only nodes in ascending ID order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = Node> + '_ {
        let table = &self.nodes;
        let overlay = &self.overlay;
        let frozen = (0..table.len()).filter_map(move |position| {
            let id = table.id_at(position)?;
            if overlay.deleted_nodes.contains(&id) {
                return None;
            }
            if let Some(node) = overlay.nodes.get(&id) {
                return Some(node.clone());
            }
            table.get(position)
        });
        let added = overlay.nodes.iter().filter_map(move |(&id, node)| {
            match table.position_of(id) {
                Ok(Some(_)) => None,
                _ => Some(node.clone()),
            }
        });
        frozen.chain(added)
    }

    /// Iterate ways with the same ordering contract as [`Self::iter_nodes`].
    pub fn iter_ways(&self) -> impl Iterator<Item = Way> + '_ {
        let table = &self.ways;
        let overlay = &self.overlay;
        let frozen = (0..table.len()).filter_map(move |position| {
            let id = table.id_at(position)?;
            if overlay.deleted_ways.contains(&id) {
                return None;
            }
            if let Some(way) = overlay.ways.get(&id) {
                return Some(way.clone());
            }
            table.get(position)
        });
        let added = overlay.ways.iter().filter_map(move |(&id, way)| {
            match table.position_of(id) {
                Ok(Some(_)) => None,
                _ => Some(way.clone()),
            }
        });
        frozen.chain(added)
    }

    /// Iterate relations with the same ordering contract as
    /// [`Self::iter_nodes`].
    pub fn iter_relations(&self) -> impl Iterator<Item = Relation> + '_ {
        let table = &self.relations;
        let overlay = &self.overlay;
        let frozen = (0..table.len()).filter_map(move |position| {
            let id = table.id_at(position)?;
            if overlay.deleted_relations.contains(&id) {
                return None;
            }
            if let Some(relation) = overlay.relations.get(&id) {
                return Some(relation.clone());
            }
            table.get(position)
        });
        let added = overlay.relations.iter().filter_map(move |(&id, relation)| {
            match table.position_of(id) {
                Ok(Some(_)) => None,
                _ => Some(relation.clone()),
            }
        });
        frozen.chain(added)
    }

    /// Effective node count, accounting for overlay additions and removals.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.iter_nodes().count()
    }

    /// Effective way count.
    #[must_use]
    pub fn way_count(&self) -> usize {
        self.iter_ways().count()
    }

    /// Effective relation count.
    #[must_use]
    pub fn relation_count(&self) -> usize {
        self.iter_relations().count()
    }

    /// The dataset's bounding box: the header's when declared, otherwise
    /// computed from node coordinates.
    #[must_use]
    pub fn bbox(&self) -> Option<Bbox> {
        if let Some(bbox) = self.header.bbox {
            return Some(bbox);
        }
        let mut bbox: Option<Bbox> = None;
        for node in self.iter_nodes() {
            match &mut bbox {
                Some(bbox) => bbox.include(node.lon, node.lat),
                None => bbox = Some(Bbox::point(node.lon, node.lat)),
            }
        }
        bbox
    }

    /// Split a frozen, overlay-free store into transferable blocks.
    pub fn into_transferables(self) -> Result<OsmParts, StoreError> {
        if !self.is_ready() {
            return Err(StoreError::NotFrozen);
        }
        let pending = self.overlay.pending();
        if pending > 0 {
            return Err(StoreError::DirtyOverlay { pending });
        }
        Ok(OsmParts {
            header: self.header,
            nodes: self.nodes.into_parts()?,
            ways: self.ways.into_parts()?,
            relations: self.relations.into_parts()?,
        })
    }

    /// Reconstruct an immediately-queryable store from transferred blocks.
    #[must_use]
    pub fn from_transferables(parts: OsmParts) -> Self {
        Self {
            header: parts.header,
            nodes: NodeTable::from_parts(parts.nodes),
            ways: WayTable::from_parts(parts.ways),
            relations: RelationTable::from_parts(parts.relations),
            overlay: Overlay::default(),
        }
    }

    fn require_ready(&self) -> Result<(), StoreError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(StoreError::NotFrozen)
        }
    }
}

/// Transferable blocks behind an [`Osm`] store.
#[derive(Debug)]
pub struct OsmParts {
    /// Decoded header data.
    pub header: Header,
    /// Node table blocks.
    pub nodes: NodeTableParts,
    /// Way table blocks.
    pub ways: WayTableParts,
    /// Relation table blocks.
    pub relations: RelationTableParts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Member, Tags};
    use rstest::{fixture, rstest};

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|&(key, value)| (key.to_owned(), value.to_owned()))
            .collect()
    }

    fn tagged_node(id: i64, lon: f64, lat: f64, name: &str) -> Node {
        Node {
            tags: tags(&[("name", name)]),
            ..Node::new(id, lon, lat)
        }
    }

    #[fixture]
    fn small_store() -> Osm {
        let mut osm = Osm::new();
        osm.add_node(&tagged_node(1, 13.40, 52.50, "alpha"))
            .expect("add node");
        osm.add_node(&tagged_node(2, 13.41, 52.51, "beta"))
            .expect("add node");
        osm.add_way(&Way {
            tags: tags(&[("highway", "residential")]),
            ..Way::new(10, vec![1, 2])
        })
        .expect("add way");
        osm.add_relation(&Relation {
            id: 20,
            members: vec![Member {
                kind: EntityKind::Way,
                member_ref: 10,
                role: "outer".to_owned(),
            }],
            tags: tags(&[("type", "multipolygon")]),
            info: None,
        })
        .expect("add relation");
        osm.finish().expect("finish");
        osm
    }

    #[rstest]
    fn round_trips_entities_through_columns(small_store: Osm) {
        let node = small_store
            .nodes()
            .by_id(2)
            .expect("frozen")
            .expect("present");
        assert_eq!(node.lon, 13.41);
        assert_eq!(node.tags.get("name"), Some(&"beta".to_owned()));

        let way = small_store
            .ways()
            .by_id(10)
            .expect("frozen")
            .expect("present");
        assert_eq!(way.refs, vec![1, 2]);
        assert_eq!(way.tags.get("highway"), Some(&"residential".to_owned()));

        let relation = small_store
            .relations()
            .by_id(20)
            .expect("frozen")
            .expect("present");
        assert_eq!(relation.members.len(), 1);
        assert_eq!(relation.members[0].role, "outer");
        assert_eq!(relation.members[0].kind, EntityKind::Way);
    }

    #[rstest]
    fn append_after_finish_is_rejected(mut small_store: Osm) {
        let error = small_store
            .add_node(&Node::new(99, 0.0, 0.0))
            .expect_err("frozen table must reject appends");
        assert!(matches!(
            error,
            StoreError::Frozen {
                kind: EntityKind::Node
            }
        ));
    }

    #[test]
    fn lookup_before_finish_is_rejected() {
        let mut osm = Osm::new();
        osm.add_node(&Node::new(1, 0.0, 0.0)).expect("add node");
        assert!(osm.node_by_id(1).is_err());
    }

    #[rstest]
    fn overlay_overwrites_and_removals(mut small_store: Osm) {
        small_store
            .insert_node(tagged_node(1, 13.40, 52.50, "renamed"))
            .expect("insert");
        small_store
            .insert_node(Node::new(3, 13.42, 52.52))
            .expect("insert new");
        small_store
            .remove(EntityKind::Node, 2)
            .expect("remove");

        let renamed = small_store.node_by_id(1).expect("frozen").expect("present");
        assert_eq!(renamed.tags.get("name"), Some(&"renamed".to_owned()));
        assert!(small_store.node_by_id(2).expect("frozen").is_none());
        assert!(small_store.node_by_id(3).expect("frozen").is_some());

        let ids: Vec<i64> = small_store.iter_nodes().map(|node| node.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(small_store.node_count(), 2);
    }

    #[rstest]
    fn repeated_insert_is_idempotent(mut small_store: Osm) {
        let node = tagged_node(1, 13.40, 52.50, "renamed");
        small_store.insert_node(node.clone()).expect("insert");
        small_store.insert_node(node).expect("insert again");
        assert_eq!(small_store.node_count(), 2);
    }

    #[rstest]
    fn transferables_round_trip(small_store: Osm) {
        let expected_nodes: Vec<Node> = small_store.iter_nodes().collect();
        let expected_ways: Vec<Way> = small_store.iter_ways().collect();

        let parts = small_store.into_transferables().expect("transfer");
        let restored = Osm::from_transferables(parts);
        assert!(restored.is_ready());

        let nodes: Vec<Node> = restored.iter_nodes().collect();
        let ways: Vec<Way> = restored.iter_ways().collect();
        assert_eq!(nodes, expected_nodes);
        assert_eq!(ways, expected_ways);
        assert_eq!(
            restored
                .relations()
                .by_id(20)
                .expect("frozen")
                .map(|relation| relation.members[0].member_ref),
            Some(10)
        );
    }

    #[rstest]
    fn dirty_overlay_blocks_transfer(mut small_store: Osm) {
        small_store
            .insert_node(Node::new(3, 0.0, 0.0))
            .expect("insert");
        assert!(matches!(
            small_store.into_transferables(),
            Err(StoreError::DirtyOverlay { pending: 1 })
        ));
    }

    #[rstest]
    fn bbox_computed_from_nodes_when_header_lacks_one(small_store: Osm) {
        let bbox = small_store.bbox().expect("nodes present");
        assert_eq!(bbox.left, 13.40);
        assert_eq!(bbox.top, 52.51);
    }
}
