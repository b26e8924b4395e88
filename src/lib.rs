//! Facade crate for the osmerge OpenStreetMap toolkit.
//!
//! This crate re-exports the columnar entity store, the streaming PBF
//! reader/writer, and the merge engine so applications can depend on a
//! single crate.

#![forbid(unsafe_code)]

pub use osmerge_core::{
    Bbox, Entity, EntityKind, GrowableBuffer, Header, IdIndex, Info, Member, Node,
    NodeSpatialIndex, Osm, Relation, StringTable, Tags, Way,
};
pub use osmerge_merge::{
    Candidate, Change, ChangeKind, Merge, MergeError, MergeOptions, WorkflowStep,
};
pub use osmerge_pbf::{BlockReader, PbfError, from_bytes, read_osm, to_bytes, write_osm};
