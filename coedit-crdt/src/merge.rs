//! Three-way merge and conflict resolution.
//!
//! Two jobs: reconcile a pair of operation logs that diverged from a common
//! ancestor, and resolve individual concurrent pairs flagged during normal
//! streaming. A conflict is two operations from different peers whose
//! clocks are concurrent and whose ranges overlap; everything else merges
//! cleanly in causal order.

use crate::{CausalOrder, Operation, OperationKind, VectorClock};
use coedit_types::{HybridTimestamp, OperationId, PeerId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// How detected conflicts are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// The operation with the greater timestamp wins; greater peer id on a
    /// tie.
    LastWriteWins,
    /// The operation with the smaller timestamp wins; smaller peer id on a
    /// tie.
    FirstWriteWins,
    /// Concurrent inserts are fused into one insert carrying both contents
    /// in timestamp order. Other kind pairs fall back to last-write-wins.
    Merge,
    /// Leave the conflict open for the host to settle.
    Manual,
}

/// A pair of concurrent, overlapping operations from different peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// The operation from the local branch.
    pub local: Operation,
    /// The operation from the remote branch.
    pub remote: Operation,
    /// When the conflict was detected.
    pub detected_at: HybridTimestamp,
    /// The outcome, once settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    /// Ids of the two conflicting operations.
    #[must_use]
    pub fn source_ids(&self) -> [OperationId; 2] {
        [self.local.id, self.remote.id]
    }
}

/// The outcome of settling one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// The strategy that produced this outcome.
    pub strategy: ResolutionStrategy,
    /// The surviving (or synthesized) operation.
    pub operation: Operation,
    /// The peer that ran the resolution.
    pub resolved_by: PeerId,
    /// The conflicting operations this outcome replaces.
    pub sources: Vec<OperationId>,
}

/// The result of a three-way merge.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The merged log: the common base, then non-conflicting divergent
    /// operations in causal order, then resolution survivors.
    pub operations: Vec<Operation>,
    /// Every detected conflict, resolved or not.
    pub conflicts: Vec<Conflict>,
    /// True iff every conflict carries a resolution.
    pub resolved: bool,
}

/// Detects and resolves conflicts between divergent operation logs.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    peer: PeerId,
    strategy: ResolutionStrategy,
}

impl MergeEngine {
    /// Creates an engine resolving under `strategy` on behalf of `peer`.
    #[must_use]
    pub fn new(peer: PeerId, strategy: ResolutionStrategy) -> Self {
        Self { peer, strategy }
    }

    /// The active strategy.
    #[must_use]
    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Switches the active strategy.
    pub fn set_strategy(&mut self, strategy: ResolutionStrategy) {
        self.strategy = strategy;
    }

    /// Returns true if the two operations genuinely conflict: different
    /// authors, concurrent clocks, overlapping ranges.
    #[must_use]
    pub fn conflicts_with(a: &Operation, b: &Operation) -> bool {
        a.peer != b.peer
            && a.clock.is_concurrent(&b.clock)
            && a.range().overlaps(&b.range())
    }

    /// Reconciles `local` and `remote` logs against their common `base`.
    #[must_use]
    pub fn three_way_merge(
        &self,
        base: &[Operation],
        local: &[Operation],
        remote: &[Operation],
    ) -> MergeResult {
        let base_ids: HashSet<OperationId> = base.iter().map(|op| op.id).collect();
        let local_only: Vec<&Operation> =
            local.iter().filter(|op| !base_ids.contains(&op.id)).collect();
        let remote_only: Vec<&Operation> =
            remote.iter().filter(|op| !base_ids.contains(&op.id)).collect();

        let mut conflicts = Vec::new();
        let mut contested: HashSet<OperationId> = HashSet::new();
        for a in &local_only {
            for b in &remote_only {
                if Self::conflicts_with(a, b) {
                    contested.insert(a.id);
                    contested.insert(b.id);
                    conflicts.push(Conflict {
                        local: (*a).clone(),
                        remote: (*b).clone(),
                        detected_at: HybridTimestamp::now(),
                        resolution: None,
                    });
                }
            }
        }

        let mut merged: Vec<Operation> = local_only
            .into_iter()
            .chain(remote_only)
            .filter(|op| !contested.contains(&op.id))
            .cloned()
            .collect();
        merged.sort_by(causal_order);

        let mut operations: Vec<Operation> = base.to_vec();
        operations.append(&mut merged);

        let mut resolved = true;
        for conflict in &mut conflicts {
            match self.resolve(conflict) {
                Some(resolution) => {
                    operations.push(resolution.operation.clone());
                    conflict.resolution = Some(resolution);
                }
                None => resolved = false,
            }
        }

        MergeResult {
            operations,
            conflicts,
            resolved,
        }
    }

    /// Settles a single conflict under the active strategy. Returns `None`
    /// for [`ResolutionStrategy::Manual`], which defers to the host.
    #[must_use]
    pub fn resolve(&self, conflict: &Conflict) -> Option<ConflictResolution> {
        let sources = conflict.source_ids().to_vec();
        match self.strategy {
            ResolutionStrategy::LastWriteWins => Some(ConflictResolution {
                strategy: ResolutionStrategy::LastWriteWins,
                operation: pick_last(&conflict.local, &conflict.remote).clone(),
                resolved_by: self.peer,
                sources,
            }),
            ResolutionStrategy::FirstWriteWins => Some(ConflictResolution {
                strategy: ResolutionStrategy::FirstWriteWins,
                operation: pick_first(&conflict.local, &conflict.remote).clone(),
                resolved_by: self.peer,
                sources,
            }),
            ResolutionStrategy::Merge => {
                if conflict.local.kind == OperationKind::Insert
                    && conflict.remote.kind == OperationKind::Insert
                {
                    Some(ConflictResolution {
                        strategy: ResolutionStrategy::Merge,
                        operation: self.fuse_inserts(&conflict.local, &conflict.remote),
                        resolved_by: self.peer,
                        sources,
                    })
                } else {
                    Some(ConflictResolution {
                        strategy: ResolutionStrategy::LastWriteWins,
                        operation: pick_last(&conflict.local, &conflict.remote).clone(),
                        resolved_by: self.peer,
                        sources,
                    })
                }
            }
            ResolutionStrategy::Manual => None,
        }
    }

    /// Records a host-supplied decision on a conflict.
    pub fn resolve_manual(
        &self,
        conflict: &mut Conflict,
        selected: Operation,
    ) -> ConflictResolution {
        let resolution = ConflictResolution {
            strategy: ResolutionStrategy::Manual,
            operation: selected,
            resolved_by: self.peer,
            sources: conflict.source_ids().to_vec(),
        };
        conflict.resolution = Some(resolution.clone());
        resolution
    }

    /// Synthesizes a single insert from two concurrent inserts: contents
    /// concatenate in timestamp order at the earlier position, under the
    /// merged clock incremented for this engine's peer.
    fn fuse_inserts(&self, local: &Operation, remote: &Operation) -> Operation {
        let (first, second) = if pick_first(local, remote).id == local.id {
            (local, remote)
        } else {
            (remote, local)
        };

        let mut content = first.content.clone().unwrap_or_default();
        content.push_str(second.content.as_deref().unwrap_or(""));

        let mut clock: VectorClock = first.clock.merged(&second.clock);
        clock.increment(self.peer);

        Operation::insert(first.position, content, self.peer, clock)
            .with_timestamp(second.timestamp.tick())
            .with_metadata("merged", serde_json::Value::Bool(true))
            .with_metadata(
                "sources",
                serde_json::Value::Array(vec![
                    serde_json::Value::String(first.id.to_string()),
                    serde_json::Value::String(second.id.to_string()),
                ]),
            )
    }
}

/// Stable order for non-conflicting operations: causal order first, then
/// timestamp, then operation id.
fn causal_order(a: &Operation, b: &Operation) -> Ordering {
    match a.clock.compare(&b.clock) {
        CausalOrder::Before => Ordering::Less,
        CausalOrder::After => Ordering::Greater,
        CausalOrder::Equal | CausalOrder::Concurrent => a
            .timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id.cmp(&b.id)),
    }
}

/// The later write: greater timestamp, greater peer id on a tie.
fn pick_last<'a>(a: &'a Operation, b: &'a Operation) -> &'a Operation {
    match a.timestamp.cmp(&b.timestamp) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => {
            if a.peer > b.peer {
                a
            } else {
                b
            }
        }
    }
}

/// The earlier write: smaller timestamp, smaller peer id on a tie.
fn pick_first<'a>(a: &'a Operation, b: &'a Operation) -> &'a Operation {
    match a.timestamp.cmp(&b.timestamp) {
        Ordering::Less => a,
        Ordering::Greater => b,
        Ordering::Equal => {
            if a.peer < b.peer {
                a
            } else {
                b
            }
        }
    }
}
