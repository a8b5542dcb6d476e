use coedit_crdt::{checksum32, Document, DocumentConfig, NodeId, ValidationError, VectorClock};
use coedit_types::{OperationId, PeerId};
use pretty_assertions::assert_eq;
use uuid::Uuid;

fn peer(n: u128) -> PeerId {
    PeerId::from_uuid(Uuid::from_u128(n))
}

fn doc(n: u128) -> Document {
    Document::new(DocumentConfig::new(peer(n)))
}

fn doc_with(n: u128, text: &str) -> Document {
    Document::with_text(DocumentConfig::new(peer(n)), text)
}

// ── Local editing ────────────────────────────────────────────────

#[test]
fn node_ids_roundtrip_through_strings() {
    let id = NodeId::new(OperationId::new(), 3);
    let text: String = id.into();
    assert_eq!(NodeId::try_from(text).unwrap(), id);

    assert!(matches!(
        NodeId::try_from("garbage".to_string()),
        Err(coedit_types::Error::InvalidId(_))
    ));
    assert!(matches!(
        NodeId::try_from("not-a-uuid_7".to_string()),
        Err(coedit_types::Error::InvalidUuid(_))
    ));
}

#[test]
fn empty_document() {
    let d = doc(1);
    assert!(d.is_empty());
    assert_eq!(d.len(), 0);
    assert_eq!(d.as_string(), "");
}

#[test]
fn with_text_seeds_content_without_history() {
    let d = doc_with(1, "hello");
    assert_eq!(d.as_string(), "hello");
    assert_eq!(d.len(), 5);
    assert_eq!(d.history().count(), 0);
    assert!(d.clock().is_empty());
}

#[test]
fn insert_builds_text_and_advances_the_clock() {
    let mut d = doc(1);
    d.insert(0, "hello").unwrap();
    d.insert(5, " world").unwrap();
    assert_eq!(d.as_string(), "hello world");
    assert_eq!(d.clock().get(&peer(1)), 2);
    assert_eq!(d.history().count(), 2);
}

#[test]
fn insert_in_the_middle() {
    let mut d = doc_with(1, "hd");
    d.insert(1, "ello worl").unwrap();
    assert_eq!(d.as_string(), "hello world");
}

#[test]
fn insert_offset_clamps_to_end() {
    let mut d = doc_with(1, "ab");
    d.insert(99, "c").unwrap();
    assert_eq!(d.as_string(), "abc");
}

#[test]
fn delete_tombstones_without_shrinking_the_node_set() {
    let mut d = doc_with(1, "abcdef");
    let before = d.node_count();
    d.delete(2, 3).unwrap();
    assert_eq!(d.as_string(), "abf");
    assert_eq!(d.node_count(), before);
    assert_eq!(d.tombstone_count(), 3);
}

#[test]
fn delete_past_end_truncates() {
    let mut d = doc_with(1, "abc");
    d.delete(1, 99).unwrap();
    assert_eq!(d.as_string(), "a");
}

#[test]
fn zero_length_delete_is_rejected() {
    let mut d = doc_with(1, "abc");
    assert!(matches!(
        d.delete(0, 0),
        Err(ValidationError::ZeroLength { .. })
    ));
    assert_eq!(d.as_string(), "abc");
}

#[test]
fn replace_swaps_a_span() {
    let mut d = doc_with(1, "abcdef");
    d.replace(1, 3, "XY").unwrap();
    assert_eq!(d.as_string(), "aXYef");
}

#[test]
fn operations_report_the_local_peer_and_clock() {
    let mut d = doc(7);
    let op = d.insert(0, "x").unwrap();
    assert_eq!(op.peer, peer(7));
    assert_eq!(op.clock.get(&peer(7)), 1);
}

// ── Remote application ───────────────────────────────────────────

#[test]
fn remote_ops_replay_to_the_same_text() {
    let mut author = doc(1);
    let ops: Vec<_> = (0..5)
        .map(|i| author.insert(i, &format!("{i}")).unwrap())
        .collect();

    let mut replica = doc(2);
    for op in &ops {
        assert!(replica.apply_remote(op).unwrap());
    }
    assert_eq!(replica.as_string(), author.as_string());
    assert!(replica.clock().dominates(author.clock()));
}

#[test]
fn duplicate_delivery_is_ignored() {
    let mut author = doc(1);
    let op = author.insert(0, "abc").unwrap();

    let mut replica = doc(2);
    assert!(replica.apply_remote(&op).unwrap());
    let state_once = replica.state();

    assert!(!replica.apply_remote(&op).unwrap());
    assert_eq!(replica.state(), state_once);
    assert_eq!(replica.as_string(), "abc");
}

#[test]
fn malformed_remote_op_is_rejected() {
    let mut author = doc(1);
    let mut op = author.insert(0, "abc").unwrap();
    op.content = None;

    let mut replica = doc(2);
    assert!(matches!(
        replica.apply_remote(&op),
        Err(ValidationError::MissingContent)
    ));
    assert_eq!(replica.as_string(), "");
}

#[test]
fn document_clock_dominates_every_applied_op() {
    let mut a = doc_with(1, "base");
    let mut b = doc_with(2, "base");
    let op_a = a.insert(0, "x").unwrap();
    let op_b = b.insert(4, "y").unwrap();

    a.apply_remote(&op_b).unwrap();
    assert!(a.clock().dominates(&op_a.clock));
    assert!(a.clock().dominates(&op_b.clock));
}

// ── Merge ────────────────────────────────────────────────────────

#[test]
fn merge_pulls_unseen_history() {
    let mut a = doc_with(1, "hello");
    let mut b = doc_with(2, "hello");
    a.insert(5, " world").unwrap();
    b.insert(5, "!").unwrap();

    let applied_a = a.merge(&b).unwrap();
    let applied_b = b.merge(&a).unwrap();
    assert_eq!(applied_a, 1);
    assert_eq!(applied_b, 1);
    assert_eq!(a.as_string(), b.as_string());
    assert_eq!(a.as_string(), "hello world!");
}

#[test]
fn merge_is_idempotent() {
    let mut a = doc_with(1, "ab");
    let mut b = doc_with(2, "ab");
    a.insert(2, "c").unwrap();

    b.merge(&a).unwrap();
    let once = b.as_string();
    let applied_again = b.merge(&a).unwrap();
    assert_eq!(applied_again, 0);
    assert_eq!(b.as_string(), once);
}

// ── State and checksum ───────────────────────────────────────────

#[test]
fn state_checksum_matches_content() {
    let mut d = doc_with(1, "abc");
    d.insert(3, "def").unwrap();
    let state = d.state();
    assert_eq!(state.content, "abcdef");
    assert_eq!(state.checksum, checksum32("abcdef"));
    assert!(state.verify());
}

#[test]
fn checksum_is_stable_and_content_sensitive() {
    assert_eq!(checksum32(""), 0x811c_9dc5);
    assert_eq!(checksum32("abc"), checksum32("abc"));
    assert_ne!(checksum32("abc"), checksum32("abd"));
}

#[test]
fn converged_replicas_share_a_checksum() {
    let mut a = doc_with(1, "abcdef");
    let mut b = doc_with(2, "abcdef");
    let del = a.delete(2, 3).unwrap();
    let ins = b.insert(3, "X").unwrap();

    a.apply_remote(&ins).unwrap();
    b.apply_remote(&del).unwrap();
    assert_eq!(a.state().checksum, b.state().checksum);
}

// ── History ring ─────────────────────────────────────────────────

#[test]
fn history_ring_is_bounded() {
    let mut config = DocumentConfig::new(peer(1));
    config.max_history = 4;
    let mut d = Document::new(config);
    for i in 0..10 {
        d.insert(i, "x").unwrap();
    }
    assert_eq!(d.history().count(), 4);
    assert_eq!(d.as_string().len(), 10);
}

#[test]
fn history_can_be_disabled() {
    let mut config = DocumentConfig::new(peer(1));
    config.preserve_history = false;
    let mut d = Document::new(config);
    d.insert(0, "abc").unwrap();
    assert_eq!(d.history().count(), 0);
    assert_eq!(d.as_string(), "abc");
}

// ── Garbage collection ───────────────────────────────────────────

#[test]
fn gc_reclaims_acknowledged_tombstones() {
    let mut a = doc_with(1, "abcdef");
    let del = a.delete(2, 3).unwrap();
    assert_eq!(a.tombstone_count(), 3);

    // Every peer has acknowledged the deleting operation's clock.
    let reclaimed = a.collect_garbage(&[del.clock.clone()]);
    assert_eq!(reclaimed, 3);
    assert_eq!(a.tombstone_count(), 0);
    assert_eq!(a.as_string(), "abf");
}

#[test]
fn gc_keeps_tombstones_still_concurrent_with_a_peer() {
    let mut a = doc_with(1, "abcdef");
    let mut b = doc_with(2, "abcdef");
    let ins = b.insert(3, "XYZ").unwrap();
    a.apply_remote(&ins).unwrap();
    a.delete(2, 4).unwrap();

    // A peer that has acknowledged nothing still covers the pristine base
    // node, but not the tombstones created by live operations.
    let reclaimed = a.collect_garbage(&[VectorClock::new()]);
    assert_eq!(reclaimed, 1);
    assert_eq!(a.tombstone_count(), 3);
    assert_eq!(a.as_string(), "abdef");
}

#[test]
fn gc_with_no_acked_clocks_is_a_noop() {
    let mut a = doc_with(1, "abc");
    a.delete(0, 3).unwrap();
    assert_eq!(a.collect_garbage(&[]), 0);
    assert_eq!(a.tombstone_count(), 3);
}

#[test]
fn gc_is_idempotent_and_invisible_to_readers() {
    let mut a = doc_with(1, "abcdef");
    let del = a.delete(1, 2).unwrap();
    let before = a.as_string();

    let first = a.collect_garbage(&[del.clock.clone()]);
    let second = a.collect_garbage(&[del.clock.clone()]);
    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(a.as_string(), before);
}

#[test]
fn gc_due_reflects_tombstone_pressure() {
    let mut d = doc_with(1, "abcdef");
    assert!(!d.gc_due());
    d.delete(0, 5).unwrap();
    assert!(d.gc_due());
}

#[test]
fn editing_continues_after_gc() {
    let mut a = doc_with(1, "abcdef");
    let del = a.delete(2, 3).unwrap();
    a.collect_garbage(&[del.clock.clone()]);
    a.insert(2, "Q").unwrap();
    assert_eq!(a.as_string(), "abQf");
}
