//! The OpenStreetMap entity model.
//!
//! Plain owned values reconstructed on demand from the columnar tables.
//! Coordinates are WGS84 degrees with `lon = x`, `lat = y`, matching the
//! axis order used throughout the crate.

use std::collections::HashMap;

/// OpenStreetMap-style free-form key/value tags.
pub type Tags = HashMap<String, String>;

/// The three entity kinds of the OSM data model.
///
/// The discriminants match the member type enum of the PBF format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A point with coordinates.
    Node = 0,
    /// An ordered sequence of node references.
    Way = 1,
    /// An ordered sequence of typed, role-carrying members.
    Relation = 2,
}

impl EntityKind {
    /// Decode the wire discriminant used by member-type columns.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Node),
            1 => Some(Self::Way),
            2 => Some(Self::Relation),
            _ => None,
        }
    }

    /// Lower-case kind name, as used in log and CLI output.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }
}

/// Authorship metadata attached to an entity when the source carries it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Info {
    /// Edit version, 0 when unknown.
    pub version: i32,
    /// Timestamp in epoch seconds.
    pub timestamp: i64,
    /// Changeset identifier.
    pub changeset: i64,
    /// Editing user's numeric ID.
    pub uid: i32,
    /// Editing user's display name.
    pub user: Option<String>,
    /// Whether the entity is visible (false only in history extracts).
    pub visible: bool,
}

/// A point entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// 64-bit OSM identifier. Not necessarily positive.
    pub id: i64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
    /// Free-form tags; empty for untagged nodes.
    pub tags: Tags,
    /// Authorship metadata, when present in the source.
    pub info: Option<Info>,
}

impl Node {
    /// Construct a bare node without tags or metadata.
    #[must_use]
    pub fn new(id: i64, lon: f64, lat: f64) -> Self {
        Self {
            id,
            lon,
            lat,
            tags: Tags::new(),
            info: None,
        }
    }
}

/// A line or area entity: an ordered list of node references.
///
/// Reference order defines the path; duplicates are allowed (closed ways
/// repeat their first node last).
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    /// 64-bit OSM identifier.
    pub id: i64,
    /// Ordered node references.
    pub refs: Vec<i64>,
    /// Free-form tags; empty for untagged ways.
    pub tags: Tags,
    /// Authorship metadata, when present in the source.
    pub info: Option<Info>,
}

impl Way {
    /// Construct a bare way without tags or metadata.
    #[must_use]
    pub fn new(id: i64, refs: Vec<i64>) -> Self {
        Self {
            id,
            refs,
            tags: Tags::new(),
            info: None,
        }
    }

    /// Whether the way is closed (first and last refs coincide).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.refs.len() > 2 && self.refs.first() == self.refs.last()
    }
}

/// One member of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Kind of the referenced entity.
    pub kind: EntityKind,
    /// Identifier of the referenced entity.
    pub member_ref: i64,
    /// Role string; empty when the member has no role.
    pub role: String,
}

/// A relation entity: an ordered list of typed members.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// 64-bit OSM identifier.
    pub id: i64,
    /// Ordered members.
    pub members: Vec<Member>,
    /// Free-form tags; empty for untagged relations.
    pub tags: Tags,
    /// Authorship metadata, when present in the source.
    pub info: Option<Info>,
}

/// Any OSM entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// A point entity.
    Node(Node),
    /// A line or area entity.
    Way(Way),
    /// A grouping entity.
    Relation(Relation),
}

impl Entity {
    /// The entity's kind.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Node(_) => EntityKind::Node,
            Self::Way(_) => EntityKind::Way,
            Self::Relation(_) => EntityKind::Relation,
        }
    }

    /// The entity's identifier.
    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            Self::Node(node) => node.id,
            Self::Way(way) => way.id,
            Self::Relation(relation) => relation.id,
        }
    }

    /// The entity's tags.
    #[must_use]
    pub fn tags(&self) -> &Tags {
        match self {
            Self::Node(node) => &node.tags,
            Self::Way(way) => &way.tags,
            Self::Relation(relation) => &relation.tags,
        }
    }
}

/// A bounding box in degrees, `[min lon, min lat, max lon, max lat]` corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    /// Minimum longitude.
    pub left: f64,
    /// Minimum latitude.
    pub bottom: f64,
    /// Maximum longitude.
    pub right: f64,
    /// Maximum latitude.
    pub top: f64,
}

impl Bbox {
    /// Extend the box to cover a coordinate.
    pub fn include(&mut self, lon: f64, lat: f64) {
        self.left = self.left.min(lon);
        self.bottom = self.bottom.min(lat);
        self.right = self.right.max(lon);
        self.top = self.top.max(lat);
    }

    /// A degenerate box covering a single coordinate.
    #[must_use]
    pub fn point(lon: f64, lat: f64) -> Self {
        Self {
            left: lon,
            bottom: lat,
            right: lon,
            top: lat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_way_detection() {
        let closed = Way::new(1, vec![10, 11, 12, 10]);
        let open = Way::new(2, vec![10, 11, 12]);
        let degenerate = Way::new(3, vec![10, 10]);
        assert!(closed.is_closed());
        assert!(!open.is_closed());
        assert!(!degenerate.is_closed());
    }

    #[test]
    fn bbox_includes_extremes() {
        let mut bbox = Bbox::point(0.0, 0.0);
        bbox.include(-1.0, 2.0);
        bbox.include(3.0, -4.0);
        assert_eq!(bbox.left, -1.0);
        assert_eq!(bbox.bottom, -4.0);
        assert_eq!(bbox.right, 3.0);
        assert_eq!(bbox.top, 2.0);
    }

    #[test]
    fn member_kind_wire_round_trip() {
        for kind in [EntityKind::Node, EntityKind::Way, EntityKind::Relation] {
            assert_eq!(EntityKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(EntityKind::from_u8(3), None);
    }
}
