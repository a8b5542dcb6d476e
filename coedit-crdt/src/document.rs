//! The collaborative text document.
//!
//! Internally a doubly linked list of per-character nodes, indexed by a
//! stable id and linked through ids rather than pointers. Deleting never
//! removes a node — it sets a tombstone — so concurrent operations that
//! reference surrounding context still resolve. A bounded history ring of
//! applied operations drives the transform-against-history path for remote
//! edits; tombstones are reclaimed later, once every peer's acknowledged
//! clock has moved past them.

use crate::{ot, CausalOrder, Operation, OperationKind, ValidationError, VectorClock};
use coedit_types::{HybridTimestamp, OperationId, PeerId, Position};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one character node: the operation that created it plus the
/// character's index within that operation's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId {
    /// The creating operation.
    pub op: OperationId,
    /// Character index within the operation's content.
    pub index: u32,
}

impl NodeId {
    #[must_use]
    pub const fn new(op: OperationId, index: u32) -> Self {
        Self { op, index }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.op, self.index)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = coedit_types::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (op, index) = s
            .rsplit_once('_')
            .ok_or_else(|| coedit_types::Error::InvalidId(format!("invalid node id: {s}")))?;
        Ok(Self {
            op: OperationId::from_str(op)?,
            index: index.parse().map_err(|_| {
                coedit_types::Error::InvalidId(format!("invalid node index: {index}"))
            })?,
        })
    }
}

/// One character of document content.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    id: NodeId,
    /// Peer that inserted the character.
    peer: PeerId,
    value: char,
    created_at: HybridTimestamp,
    /// Clock snapshot of the creating operation; gates garbage collection.
    clock: VectorClock,
    tombstone: bool,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Configuration for a [`Document`].
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// This replica's peer id. Must be unique across peers.
    pub peer: PeerId,
    /// Whether applied operations are recorded in the history ring.
    pub preserve_history: bool,
    /// Bound on the history ring; oldest entries are dropped first.
    pub max_history: usize,
    /// Whether [`Document::gc_due`] reports pressure automatically.
    pub auto_gc: bool,
}

impl DocumentConfig {
    /// Creates a configuration with the standard defaults.
    #[must_use]
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            preserve_history: true,
            max_history: 1000,
            auto_gc: true,
        }
    }
}

/// A snapshot of document state, suitable for checkpoint messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    /// The visible text.
    pub content: String,
    /// FNV-1a 32-bit hash of the visible text.
    pub checksum: u32,
    /// The document clock at snapshot time.
    pub clock: VectorClock,
}

impl DocumentState {
    /// Returns true if `checksum` matches `content`.
    #[must_use]
    pub fn verify(&self) -> bool {
        checksum32(&self.content) == self.checksum
    }
}

/// FNV-1a over the UTF-8 bytes of `text`, truncated to 32 bits.
#[must_use]
pub fn checksum32(text: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in text.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// A replicated text document.
#[derive(Debug, Clone)]
pub struct Document {
    config: DocumentConfig,
    nodes: HashMap<NodeId, Node>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    clock: VectorClock,
    stamp: HybridTimestamp,
    history: VecDeque<Operation>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new(config: DocumentConfig) -> Self {
        Self {
            config,
            nodes: HashMap::new(),
            head: None,
            tail: None,
            clock: VectorClock::new(),
            stamp: HybridTimestamp::now(),
            history: VecDeque::new(),
        }
    }

    /// Creates a document pre-seeded with shared base text.
    ///
    /// Base nodes carry a nil operation id and an empty clock, so every
    /// replica seeded with the same text starts byte-identical and the base
    /// never blocks garbage collection.
    #[must_use]
    pub fn with_text(config: DocumentConfig, text: &str) -> Self {
        let mut doc = Self::new(config);
        let base_op = OperationId::from_uuid(Uuid::nil());
        let mut prev = None;
        for (i, ch) in text.chars().enumerate() {
            let node = Node {
                id: NodeId::new(base_op, i as u32),
                peer: doc.config.peer,
                value: ch,
                created_at: HybridTimestamp::new(0, 0),
                clock: VectorClock::new(),
                tombstone: false,
                prev,
                next: None,
            };
            prev = Some(doc.link_after(prev, node));
        }
        doc
    }

    /// This replica's peer id.
    #[must_use]
    pub fn peer(&self) -> PeerId {
        self.config.peer
    }

    /// The document's current vector clock.
    #[must_use]
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// The recorded operation history, oldest first.
    #[must_use]
    pub fn history(&self) -> impl Iterator<Item = &Operation> {
        self.history.iter()
    }

    /// Number of visible characters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.walk().filter(|n| !n.tombstone).count()
    }

    /// Returns true if no characters are visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total node count, tombstones included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of tombstoned nodes awaiting collection.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.nodes.values().filter(|n| n.tombstone).count()
    }

    /// The visible text, in list order.
    #[must_use]
    pub fn as_string(&self) -> String {
        self.walk()
            .filter(|n| !n.tombstone)
            .map(|n| n.value)
            .collect()
    }

    /// Snapshot of content, checksum, and clock.
    #[must_use]
    pub fn state(&self) -> DocumentState {
        let content = self.as_string();
        let checksum = checksum32(&content);
        DocumentState {
            content,
            checksum,
            clock: self.clock.clone(),
        }
    }

    // ── Local edits ──────────────────────────────────────────────

    /// Inserts `content` at the visible `offset` (clamped to the end) and
    /// returns the operation to broadcast.
    pub fn insert(&mut self, offset: usize, content: &str) -> Result<Operation, ValidationError> {
        let op = self.stamp_local(|pos, peer, clock| {
            Operation::insert(pos, content, peer, clock)
        }, offset);
        op.validate()?;
        self.apply_to_nodes(&op);
        self.record(op.clone());
        Ok(op)
    }

    /// Tombstones `length` characters starting at `offset` and returns the
    /// operation to broadcast.
    pub fn delete(&mut self, offset: usize, length: usize) -> Result<Operation, ValidationError> {
        if length == 0 {
            return Err(ValidationError::ZeroLength {
                kind: OperationKind::Delete,
            });
        }
        let op = self.stamp_local(|pos, peer, clock| {
            Operation::delete(pos, length, peer, clock)
        }, offset);
        self.apply_to_nodes(&op);
        self.record(op.clone());
        Ok(op)
    }

    /// Replaces `length` characters at `offset` with `content`.
    pub fn replace(
        &mut self,
        offset: usize,
        length: usize,
        content: &str,
    ) -> Result<Operation, ValidationError> {
        if length == 0 {
            return Err(ValidationError::ZeroLength {
                kind: OperationKind::Replace,
            });
        }
        let op = self.stamp_local(|pos, peer, clock| {
            Operation::replace(pos, length, content, peer, clock)
        }, offset);
        self.apply_to_nodes(&op);
        self.record(op.clone());
        Ok(op)
    }

    /// Builds a local operation with a freshly incremented clock snapshot
    /// and a monotonic timestamp.
    fn stamp_local(
        &mut self,
        build: impl FnOnce(Position, PeerId, VectorClock) -> Operation,
        offset: usize,
    ) -> Operation {
        self.clock.increment(self.config.peer);
        self.stamp = self.stamp.tick();
        build(Position::at(offset), self.config.peer, self.clock.clone())
            .with_timestamp(self.stamp)
    }

    // ── Remote edits ─────────────────────────────────────────────

    /// Applies an operation received from another peer.
    ///
    /// Returns `Ok(false)` if the operation was already observed (its clock
    /// is dominated by the document clock). Otherwise the operation is
    /// transformed against every concurrent history entry — visited in
    /// (timestamp, peer, id) order — while those entries are symmetrically
    /// rebased into post-application coordinates, then spliced in.
    ///
    /// Expects the raw operation as authored. Do not pre-transform it
    /// against a pending queue; the document owns concurrency control.
    pub fn apply_remote(&mut self, op: &Operation) -> Result<bool, ValidationError> {
        op.validate()?;

        if self.clock.dominates(&op.clock) {
            return Ok(false);
        }

        let mut concurrent: Vec<usize> = (0..self.history.len())
            .filter(|&i| self.history[i].clock.is_concurrent(&op.clock))
            .collect();
        concurrent.sort_by(|&x, &y| {
            let a = &self.history[x];
            let b = &self.history[y];
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.peer.cmp(&b.peer))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut eff = op.clone();
        for i in concurrent {
            let (eff_next, entry_next) = ot::transform(&eff, &self.history[i]);
            eff = eff_next;
            self.history[i] = entry_next;
        }

        self.clock.merge(&op.clock);
        self.stamp = self.stamp.receive(&op.timestamp);
        self.apply_to_nodes(&eff);
        self.record(eff);
        Ok(true)
    }

    /// Replays every operation from `other`'s history that this document
    /// has not observed. Returns the number applied.
    pub fn merge(&mut self, other: &Self) -> Result<usize, ValidationError> {
        let mut applied = 0;
        let pending: Vec<Operation> = other
            .history
            .iter()
            .filter(|op| !self.clock.dominates(&op.clock))
            .cloned()
            .collect();
        for op in pending {
            if self.apply_remote(&op)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    // ── Node list plumbing ───────────────────────────────────────

    /// Interprets an operation against the node list.
    fn apply_to_nodes(&mut self, op: &Operation) {
        match op.kind {
            OperationKind::Insert => {
                self.splice_in(op.position.offset, op.content.as_deref().unwrap_or(""), op);
            }
            OperationKind::Delete => {
                self.tombstone_span(op.position.offset, op.delete_len());
            }
            OperationKind::Replace => {
                self.tombstone_span(op.position.offset, op.delete_len());
                self.splice_in(op.position.offset, op.content.as_deref().unwrap_or(""), op);
            }
            // Host-extension kinds do not touch the character list.
            OperationKind::Move | OperationKind::Format | OperationKind::Custom => {}
        }
    }

    /// Inserts one node per character of `content` at the visible `offset`.
    fn splice_in(&mut self, offset: usize, content: &str, op: &Operation) {
        let at = offset.min(self.len());
        let mut prev = if at == 0 {
            None
        } else {
            self.live_node_at(at - 1)
        };

        for (i, ch) in content.chars().enumerate() {
            let node = Node {
                id: NodeId::new(op.id, i as u32),
                peer: op.peer,
                value: ch,
                created_at: op.timestamp,
                clock: op.clock.clone(),
                tombstone: false,
                prev,
                next: None,
            };
            prev = Some(self.link_after(prev, node));
        }
    }

    /// Tombstones up to `length` visible characters starting at `offset`.
    fn tombstone_span(&mut self, offset: usize, length: usize) {
        let targets: Vec<NodeId> = self
            .walk()
            .filter(|n| !n.tombstone)
            .skip(offset)
            .take(length)
            .map(|n| n.id)
            .collect();
        for id in targets {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.tombstone = true;
            }
        }
    }

    /// Links `node` into the list directly after `prev` (at the head when
    /// `prev` is `None`) and returns its id.
    fn link_after(&mut self, prev: Option<NodeId>, mut node: Node) -> NodeId {
        let next = match prev {
            Some(p) => self.nodes.get(&p).and_then(|n| n.next),
            None => self.head,
        };
        node.prev = prev;
        node.next = next;
        let id = node.id;
        self.nodes.insert(id, node);

        match prev {
            Some(p) => {
                if let Some(n) = self.nodes.get_mut(&p) {
                    n.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        match next {
            Some(n) => {
                if let Some(n) = self.nodes.get_mut(&n) {
                    n.prev = Some(id);
                }
            }
            None => self.tail = Some(id),
        }
        id
    }

    /// Id of the live node at a visible index.
    fn live_node_at(&self, index: usize) -> Option<NodeId> {
        self.walk()
            .filter(|n| !n.tombstone)
            .nth(index)
            .map(|n| n.id)
    }

    /// Iterates nodes in list order.
    fn walk(&self) -> NodeWalk<'_> {
        NodeWalk {
            nodes: &self.nodes,
            cursor: self.head,
        }
    }

    /// Records an applied operation in the history ring.
    fn record(&mut self, op: Operation) {
        if !self.config.preserve_history {
            return;
        }
        self.history.push_back(op);
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }
    }

    // ── Garbage collection ───────────────────────────────────────

    /// Returns true when tombstone pressure warrants a collection pass:
    /// the history ring is full or tombstones outnumber live nodes.
    #[must_use]
    pub fn gc_due(&self) -> bool {
        if !self.config.auto_gc {
            return false;
        }
        let tombstones = self.tombstone_count();
        self.history.len() >= self.config.max_history
            || tombstones > self.nodes.len().saturating_sub(tombstones)
    }

    /// Unlinks and drops tombstoned nodes whose creation clock every peer
    /// has acknowledged. A node still concurrent with any acknowledged
    /// clock may yet be referenced by an in-flight operation and is kept.
    ///
    /// Idempotent; returns the number of nodes reclaimed. An empty `acked`
    /// slice collects nothing.
    pub fn collect_garbage(&mut self, acked: &[VectorClock]) -> usize {
        if acked.is_empty() {
            return 0;
        }
        let victims: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.tombstone && acked.iter().all(|c| c.dominates(&n.clock)))
            .map(|n| n.id)
            .collect();
        for id in &victims {
            self.unlink(*id);
        }
        victims.len()
    }

    /// Removes a node from the list and the map, stitching its neighbors.
    fn unlink(&mut self, id: NodeId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        match node.prev {
            Some(p) => {
                if let Some(prev) = self.nodes.get_mut(&p) {
                    prev.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(nx) => {
                if let Some(next) = self.nodes.get_mut(&nx) {
                    next.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
    }

    /// Causal relation between this document's clock and an operation's.
    #[must_use]
    pub fn relation_to(&self, op: &Operation) -> CausalOrder {
        self.clock.compare(&op.clock)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Iterator over nodes following `next` links.
struct NodeWalk<'a> {
    nodes: &'a HashMap<NodeId, Node>,
    cursor: Option<NodeId>,
}

impl<'a> Iterator for NodeWalk<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.nodes.get(&id)?;
        self.cursor = node.next;
        Some(node)
    }
}
