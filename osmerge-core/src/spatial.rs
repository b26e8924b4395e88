//! Nearby-node queries over a frozen node table.
//!
//! The tree stores one point per node in lon/lat degree space. Radius
//! queries prefilter with a degree-space envelope sized from the metric
//! radius and then rank the survivors by Haversine great-circle distance,
//! so results are exact in metres while the tree stays planar.

use geo::{Distance, Haversine, Point};
use rstar::{AABB, RTree, RTreeObject};

use crate::store::NodeTable;

/// Rough metres per degree of latitude; used only to size the envelope
/// prefilter, never for the reported distances.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// One indexed node: identifier plus `[lon, lat]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedNode {
    /// The node's OSM identifier.
    pub id: i64,
    /// Position as `[lon, lat]` degrees.
    pub position: [f64; 2],
}

impl RTreeObject for IndexedNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

/// An R*-tree over the nodes of one dataset.
#[derive(Debug)]
pub struct NodeSpatialIndex {
    tree: RTree<IndexedNode>,
}

impl NodeSpatialIndex {
    /// Bulk-load the index from a frozen node table.
    #[must_use]
    pub fn build(nodes: &NodeTable) -> Self {
        let entries: Vec<IndexedNode> = (0..nodes.len())
            .filter_map(|position| {
                let id = nodes.id_at(position)?;
                let (lon, lat) = nodes.coordinates(position)?;
                Some(IndexedNode {
                    id,
                    position: [lon, lat],
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Node IDs within `radius_m` metres of `(lon, lat)`, ranked by
    /// ascending Haversine distance; ties break on ID for determinism.
    #[must_use]
    pub fn within_radius(&self, lon: f64, lat: f64, radius_m: f64) -> Vec<(i64, f64)> {
        if radius_m <= 0.0 {
            return Vec::new();
        }
        let dlat = radius_m / METERS_PER_DEGREE;
        let dlon = radius_m / (METERS_PER_DEGREE * lat.to_radians().cos().abs().max(0.01));
        let envelope =
            AABB::from_corners([lon - dlon, lat - dlat], [lon + dlon, lat + dlat]);

        let origin = Point::new(lon, lat);
        let mut hits: Vec<(i64, f64)> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|node| {
                let target = Point::new(node.position[0], node.position[1]);
                (node.id, Haversine.distance(origin, target))
            })
            .filter(|&(_, distance)| distance <= radius_m)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Node;
    use crate::store::Osm;

    fn store_with_nodes(nodes: &[(i64, f64, f64)]) -> Osm {
        let mut osm = Osm::new();
        for &(id, lon, lat) in nodes {
            osm.add_node(&Node::new(id, lon, lat)).expect("add node");
        }
        osm.finish().expect("finish");
        osm
    }

    #[test]
    fn ranks_nodes_by_ascending_distance() {
        // Roughly 1.1 m per 1e-5 degree of latitude.
        let osm = store_with_nodes(&[
            (1, 13.0, 52.0),
            (2, 13.0, 52.00002),
            (3, 13.0, 52.00010),
            (4, 13.0, 53.0),
        ]);
        let index = NodeSpatialIndex::build(osm.nodes());
        let hits = index.within_radius(13.0, 52.0, 15.0);

        let ids: Vec<i64> = hits.iter().map(|&(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(hits[0].1 < hits[1].1 && hits[1].1 < hits[2].1);
        assert!(hits[2].1 > 10.0 && hits[2].1 < 12.0);
    }

    #[test]
    fn excludes_nodes_beyond_the_radius() {
        let osm = store_with_nodes(&[(1, 13.0, 52.0), (2, 13.0, 52.001)]);
        let index = NodeSpatialIndex::build(osm.nodes());
        // Node 2 sits roughly 111 m north.
        assert_eq!(index.within_radius(13.0, 52.0, 50.0).len(), 1);
        assert_eq!(index.within_radius(13.0, 52.0, 150.0).len(), 2);
    }

    #[test]
    fn empty_table_yields_empty_index() {
        let osm = store_with_nodes(&[]);
        let index = NodeSpatialIndex::build(osm.nodes());
        assert!(index.is_empty());
        assert!(index.within_radius(0.0, 0.0, 100.0).is_empty());
    }

    #[test]
    fn zero_radius_returns_nothing() {
        let osm = store_with_nodes(&[(1, 13.0, 52.0)]);
        let index = NodeSpatialIndex::build(osm.nodes());
        assert!(index.within_radius(13.0, 52.0, 0.0).is_empty());
    }
}
