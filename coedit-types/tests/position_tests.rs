use coedit_types::{Position, Range};
use proptest::prelude::*;

#[test]
fn position_at_has_no_line_info() {
    let pos = Position::at(12);
    assert_eq!(pos.offset, 12);
    assert!(pos.line.is_none());
    assert!(pos.column.is_none());
}

#[test]
fn position_from_usize() {
    let pos: Position = 3usize.into();
    assert_eq!(pos.offset, 3);
}

#[test]
fn line_column_survive_serialization() {
    let pos = Position {
        offset: 4,
        line: Some(1),
        column: Some(5),
    };
    let json = serde_json::to_string(&pos).unwrap();
    let back: Position = serde_json::from_str(&json).unwrap();
    assert_eq!(pos, back);
}

#[test]
fn offset_only_position_omits_advisory_fields() {
    let json = serde_json::to_string(&Position::at(9)).unwrap();
    assert_eq!(json, r#"{"offset":9}"#);
}

#[test]
fn range_clamps_inverted_bounds() {
    let range = Range::new(5, 2);
    assert_eq!(range.start, 5);
    assert_eq!(range.end, 5);
    assert!(range.is_empty());
}

#[test]
fn overlapping_ranges() {
    assert!(Range::new(0, 3).overlaps(&Range::new(2, 5)));
    assert!(Range::new(2, 5).overlaps(&Range::new(0, 3)));
    assert!(Range::new(1, 4).overlaps(&Range::new(2, 3))); // nested
    assert!(Range::new(0, 2).overlaps(&Range::new(0, 2))); // identical
}

#[test]
fn touching_ranges_do_not_overlap() {
    assert!(!Range::new(0, 2).overlaps(&Range::new(2, 4)));
    assert!(!Range::new(2, 4).overlaps(&Range::new(0, 2)));
}

#[test]
fn empty_range_pairs() {
    // Two empty ranges can never satisfy the strict inequalities.
    assert!(!Range::new(2, 2).overlaps(&Range::new(2, 2)));
    // An empty range strictly inside a span still counts as overlapping.
    assert!(Range::new(2, 2).overlaps(&Range::new(0, 5)));
}

#[test]
fn overlap_len_counts_intersection() {
    assert_eq!(Range::new(1, 4).overlap_len(&Range::new(3, 6)), 1);
    assert_eq!(Range::new(0, 10).overlap_len(&Range::new(2, 4)), 2);
    assert_eq!(Range::new(0, 2).overlap_len(&Range::new(5, 9)), 0);
}

#[test]
fn contains_is_half_open() {
    let range = Range::new(2, 5);
    assert!(!range.contains(1));
    assert!(range.contains(2));
    assert!(range.contains(4));
    assert!(!range.contains(5));
}

proptest! {
    #[test]
    fn overlap_is_symmetric(
        a in 0usize..50, b in 0usize..50,
        c in 0usize..50, d in 0usize..50,
    ) {
        let r1 = Range::new(a, b);
        let r2 = Range::new(c, d);
        prop_assert_eq!(r1.overlaps(&r2), r2.overlaps(&r1));
        prop_assert_eq!(r1.overlap_len(&r2), r2.overlap_len(&r1));
    }

    #[test]
    fn nonempty_overlap_has_positive_length(
        a in 0usize..50, len1 in 1usize..10,
        c in 0usize..50, len2 in 1usize..10,
    ) {
        let r1 = Range::new(a, a + len1);
        let r2 = Range::new(c, c + len2);
        prop_assert_eq!(r1.overlaps(&r2), r1.overlap_len(&r2) > 0);
    }
}
