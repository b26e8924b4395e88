//! Change classification, candidate search, and the review workflow.

use log::warn;
use osmerge_core::{Entity, EntityKind, Node, NodeSpatialIndex, Osm, StoreError, Way};
use thiserror::Error;

/// Default candidate search radius in metres.
///
/// Sidewalk and kerb imports typically sit within a few metres of the
/// base network, so 10 m keeps candidate lists short without missing
/// plausible duplicates.
pub const DEFAULT_CANDIDATE_RADIUS_M: f64 = 10.0;

/// Errors raised by the merge engine.
#[derive(Debug, Error)]
pub enum MergeError {
    /// An operation ran in the wrong workflow step.
    #[error("operation requires workflow step {expected:?}, but the merge is at {found:?}")]
    WrongStep {
        /// Step the operation is valid in.
        expected: WorkflowStep,
        /// Step the merge is currently at.
        found: WorkflowStep,
    },
    /// The review cannot move on while changes are still pending.
    #[error("{remaining} changes are still pending review")]
    PendingChanges {
        /// Number of unresolved changes.
        remaining: usize,
    },
    /// A change index was outside the pending list.
    #[error("change index {index} out of range for {len} pending changes")]
    OutOfRange {
        /// The requested index.
        index: usize,
        /// Number of pending changes.
        len: usize,
    },
    /// The patch store does not contain the requested node.
    #[error("patch node {id} not found")]
    UnknownPatchNode {
        /// The requested node ID.
        id: i64,
    },
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Review workflow steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    /// Both datasets are loaded; no change list exists yet.
    SelectFiles,
    /// The change list is computed and under review.
    VerifyChanges,
    /// Reviewing overlapping nodes.
    DeduplicateNodes,
    /// Reviewing ways that should share intersection nodes.
    CreateIntersections,
    /// Terminal: the base store holds the merged result.
    MergeComplete,
}

/// How a patch entity relates to the base dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// No base entity with this kind and ID exists.
    Add,
    /// A base entity with this kind and ID will be overwritten.
    Replace,
    /// A base entity absent from the patch will be removed; only
    /// produced when [`MergeOptions::classify_deletions`] is set.
    Delete,
}

/// A nearby base node for one patch node, with its great-circle distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The patch node the search originated from.
    pub patch_node: i64,
    /// A base node within the search radius.
    pub base_node: i64,
    /// Haversine distance between the two, in metres.
    pub distance_m: f64,
}

/// One pending change plus the raw material for dedup decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Classification of this change.
    pub kind: ChangeKind,
    /// The entity to apply (patch entity for add/replace, base entity
    /// for delete).
    pub entity: Entity,
    /// Nearby base nodes per involved patch node, ascending by distance.
    pub candidates: Vec<Candidate>,
}

/// Tunable merge behaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeOptions {
    /// Candidate search radius in metres.
    pub candidate_radius_m: f64,
    /// Whether base entities absent from the patch become `Delete`
    /// changes. Off by default: a patch is treated as an additive
    /// overlay, not a full snapshot.
    pub classify_deletions: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            candidate_radius_m: DEFAULT_CANDIDATE_RADIUS_M,
            classify_deletions: false,
        }
    }
}

/// The merge engine: owns both datasets and the review state.
///
/// # Examples
/// ```
/// use osmerge_core::{Node, Osm};
/// use osmerge_merge::{ChangeKind, Merge, MergeOptions};
///
/// # fn main() -> Result<(), osmerge_merge::MergeError> {
/// let mut base = Osm::new();
/// base.add_node(&Node::new(1, 13.0, 52.0))?;
/// base.finish()?;
/// let mut patch = Osm::new();
/// patch.add_node(&Node::new(2, 13.1, 52.1))?;
/// patch.finish()?;
///
/// let mut merge = Merge::new(base, patch, MergeOptions::default())?;
/// merge.begin_merge()?;
/// assert_eq!(merge.changes().len(), 1);
/// assert_eq!(merge.changes()[0].kind, ChangeKind::Add);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Merge {
    base: Osm,
    patch: Osm,
    options: MergeOptions,
    step: WorkflowStep,
    changes: Vec<Change>,
    cursor: usize,
    base_nodes: NodeSpatialIndex,
}

impl Merge {
    /// Start a merge over two frozen datasets.
    pub fn new(base: Osm, patch: Osm, options: MergeOptions) -> Result<Self, MergeError> {
        if !base.is_ready() || !patch.is_ready() {
            return Err(MergeError::Store(StoreError::NotFrozen));
        }
        let base_nodes = NodeSpatialIndex::build(base.nodes());
        Ok(Self {
            base,
            patch,
            options,
            step: WorkflowStep::SelectFiles,
            changes: Vec::new(),
            cursor: 0,
            base_nodes,
        })
    }

    /// Current workflow step.
    #[must_use]
    pub fn step(&self) -> WorkflowStep {
        self.step
    }

    /// The base dataset (mutated by accepted changes).
    #[must_use]
    pub fn base(&self) -> &Osm {
        &self.base
    }

    /// The patch dataset.
    #[must_use]
    pub fn patch(&self) -> &Osm {
        &self.patch
    }

    /// Consume the engine, yielding the (possibly merged) base store.
    #[must_use]
    pub fn into_base(self) -> Osm {
        self.base
    }

    /// Pending changes in discovery order.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// The change under the cursor, if any changes are pending.
    #[must_use]
    pub fn current(&self) -> Option<&Change> {
        self.changes.get(self.cursor)
    }

    /// Compute the change list and enter the review step.
    pub fn begin_merge(&mut self) -> Result<(), MergeError> {
        self.require_step(WorkflowStep::SelectFiles)?;
        self.changes = self.classify()?;
        self.cursor = 0;
        self.step = WorkflowStep::VerifyChanges;
        Ok(())
    }

    /// Apply every classified change without per-item review, ending at
    /// [`WorkflowStep::MergeComplete`].
    pub fn run_full_merge(&mut self) -> Result<usize, MergeError> {
        self.begin_merge()?;
        let applied = self.apply_all_changes()?;
        self.step = WorkflowStep::MergeComplete;
        Ok(applied)
    }

    /// Move the cursor to the next change, saturating at the end.
    pub fn next_change(&mut self) -> Option<&Change> {
        if self.cursor + 1 < self.changes.len() {
            self.cursor += 1;
        }
        self.current()
    }

    /// Move the cursor to the previous change, saturating at the start.
    pub fn previous_change(&mut self) -> Option<&Change> {
        self.cursor = self.cursor.saturating_sub(1);
        self.current()
    }

    /// Apply one pending change to the base store and drop it from the
    /// list. Overwrite semantics make re-application a no-op.
    pub fn apply_change(&mut self, index: usize) -> Result<(), MergeError> {
        self.require_step(WorkflowStep::VerifyChanges)?;
        if index >= self.changes.len() {
            return Err(MergeError::OutOfRange {
                index,
                len: self.changes.len(),
            });
        }
        let change = self.changes.remove(index);
        self.apply(&change)?;
        self.clamp_cursor();
        Ok(())
    }

    /// Discard one pending change without touching the base store.
    pub fn exclude_change(&mut self, index: usize) -> Result<Change, MergeError> {
        self.require_step(WorkflowStep::VerifyChanges)?;
        if index >= self.changes.len() {
            return Err(MergeError::OutOfRange {
                index,
                len: self.changes.len(),
            });
        }
        let change = self.changes.remove(index);
        self.clamp_cursor();
        Ok(change)
    }

    /// Apply every remaining change in order.
    ///
    /// Valid from the review step onward; a repeated call applies nothing
    /// and leaves the base store untouched.
    pub fn apply_all_changes(&mut self) -> Result<usize, MergeError> {
        if self.step == WorkflowStep::SelectFiles {
            return Err(MergeError::WrongStep {
                expected: WorkflowStep::VerifyChanges,
                found: self.step,
            });
        }
        let pending = std::mem::take(&mut self.changes);
        let applied = pending.len();
        for change in &pending {
            self.apply(change)?;
        }
        self.cursor = 0;
        if self.step == WorkflowStep::VerifyChanges {
            self.step = WorkflowStep::DeduplicateNodes;
        }
        Ok(applied)
    }

    /// Advance past a finished review step; fails while changes are
    /// pending. The final transition lands on
    /// [`WorkflowStep::MergeComplete`].
    pub fn advance_step(&mut self) -> Result<WorkflowStep, MergeError> {
        self.step = match self.step {
            WorkflowStep::SelectFiles => {
                return Err(MergeError::WrongStep {
                    expected: WorkflowStep::VerifyChanges,
                    found: self.step,
                });
            }
            WorkflowStep::VerifyChanges => {
                if !self.changes.is_empty() {
                    return Err(MergeError::PendingChanges {
                        remaining: self.changes.len(),
                    });
                }
                WorkflowStep::DeduplicateNodes
            }
            WorkflowStep::DeduplicateNodes => WorkflowStep::CreateIntersections,
            WorkflowStep::CreateIntersections | WorkflowStep::MergeComplete => {
                WorkflowStep::MergeComplete
            }
        };
        Ok(self.step)
    }

    /// Whether the merge reached its terminal step and may be exported.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.step == WorkflowStep::MergeComplete
    }

    /// Base nodes within `radius_m` of a patch node, ranked by distance.
    pub fn query_candidates(
        &self,
        patch_node_id: i64,
        radius_m: f64,
    ) -> Result<Vec<Candidate>, MergeError> {
        let node = self
            .patch
            .node_by_id(patch_node_id)?
            .ok_or(MergeError::UnknownPatchNode { id: patch_node_id })?;
        Ok(self.candidates_for_node(&node, radius_m))
    }

    fn require_step(&self, expected: WorkflowStep) -> Result<(), MergeError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(MergeError::WrongStep {
                expected,
                found: self.step,
            })
        }
    }

    fn clamp_cursor(&mut self) {
        if self.cursor >= self.changes.len() {
            self.cursor = self.changes.len().saturating_sub(1);
        }
    }

    fn apply(&mut self, change: &Change) -> Result<(), MergeError> {
        match change.kind {
            ChangeKind::Add | ChangeKind::Replace => {
                self.base.insert_entity(change.entity.clone())?;
            }
            ChangeKind::Delete => {
                self.base
                    .remove(change.entity.kind(), change.entity.id())?;
            }
        }
        Ok(())
    }

    /// Classify every patch entity against the base dataset, in discovery
    /// order: nodes, then ways, then relations, each in patch storage
    /// order.
    fn classify(&self) -> Result<Vec<Change>, MergeError> {
        let radius = self.options.candidate_radius_m;
        let mut changes = Vec::new();

        for node in self.patch.iter_nodes() {
            let kind = self.kind_for(EntityKind::Node, node.id)?;
            let candidates = self.candidates_for_node(&node, radius);
            changes.push(Change {
                kind,
                entity: Entity::Node(node),
                candidates,
            });
        }
        for way in self.patch.iter_ways() {
            let kind = self.kind_for(EntityKind::Way, way.id)?;
            let candidates = self.candidates_for_way(&way, radius)?;
            changes.push(Change {
                kind,
                entity: Entity::Way(way),
                candidates,
            });
        }
        for relation in self.patch.iter_relations() {
            let kind = self.kind_for(EntityKind::Relation, relation.id)?;
            changes.push(Change {
                kind,
                entity: Entity::Relation(relation),
                candidates: Vec::new(),
            });
        }

        if self.options.classify_deletions {
            self.classify_deletions(&mut changes)?;
        }
        Ok(changes)
    }

    fn kind_for(&self, kind: EntityKind, id: i64) -> Result<ChangeKind, MergeError> {
        Ok(if self.base.contains(kind, id)? {
            ChangeKind::Replace
        } else {
            ChangeKind::Add
        })
    }

    fn candidates_for_node(&self, node: &Node, radius_m: f64) -> Vec<Candidate> {
        self.base_nodes
            .within_radius(node.lon, node.lat, radius_m)
            .into_iter()
            // The base twin of a replaced node is not a dedup candidate.
            .filter(|&(base_node, _)| base_node != node.id)
            .map(|(base_node, distance_m)| Candidate {
                patch_node: node.id,
                base_node,
                distance_m,
            })
            .collect()
    }

    fn candidates_for_way(&self, way: &Way, radius_m: f64) -> Result<Vec<Candidate>, MergeError> {
        let mut candidates = Vec::new();
        for &reference in &way.refs {
            match self.patch.node_by_id(reference)? {
                Some(node) => {
                    candidates.extend(self.candidates_for_node(&node, radius_m));
                }
                None => {
                    // A dangling ref is a data-quality finding, not a crash.
                    warn!("way {} references missing patch node {}", way.id, reference);
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then(a.patch_node.cmp(&b.patch_node))
                .then(a.base_node.cmp(&b.base_node))
        });
        candidates.dedup_by(|a, b| a.patch_node == b.patch_node && a.base_node == b.base_node);
        Ok(candidates)
    }

    fn classify_deletions(&self, changes: &mut Vec<Change>) -> Result<(), MergeError> {
        for node in self.base.iter_nodes() {
            if !self.patch.contains(EntityKind::Node, node.id)? {
                changes.push(Change {
                    kind: ChangeKind::Delete,
                    entity: Entity::Node(node),
                    candidates: Vec::new(),
                });
            }
        }
        for way in self.base.iter_ways() {
            if !self.patch.contains(EntityKind::Way, way.id)? {
                changes.push(Change {
                    kind: ChangeKind::Delete,
                    entity: Entity::Way(way),
                    candidates: Vec::new(),
                });
            }
        }
        for relation in self.base.iter_relations() {
            if !self.patch.contains(EntityKind::Relation, relation.id)? {
                changes.push(Change {
                    kind: ChangeKind::Delete,
                    entity: Entity::Relation(relation),
                    candidates: Vec::new(),
                });
            }
        }
        Ok(())
    }
}
