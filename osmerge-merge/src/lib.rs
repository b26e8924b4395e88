//! Merge/diff engine over two loaded OSM datasets.
//!
//! Given a frozen base store and a frozen patch store, the engine
//! classifies every patch entity as an addition or a replacement, attaches
//! nearby-base-node candidates for deduplication decisions, and drives a
//! reviewable accept/reject workflow whose acceptance step mutates the
//! base store with overwrite semantics.

#![forbid(unsafe_code)]

mod engine;

pub use engine::{
    Candidate, Change, ChangeKind, DEFAULT_CANDIDATE_RADIUS_M, Merge, MergeError, MergeOptions,
    WorkflowStep,
};
