//! Pairwise operational transformation over flat character offsets.
//!
//! [`transform`] takes two operations issued concurrently against the same
//! base state and rewrites each to apply after the other, such that both
//! application orders produce the same text (TP1). [`apply`] is the pure
//! string interpretation of a single operation; [`compose`] and [`inverse`]
//! round out the algebra for history compaction and undo.
//!
//! Positions are character offsets, not byte offsets. All arithmetic
//! saturates and [`apply`] clamps out-of-bounds offsets to the end of the
//! text, so a malformed position can never panic.

use crate::{Operation, OperationKind};
use coedit_types::Position;
use thiserror::Error;

/// Errors from [`inverse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InverseError {
    /// Inverting a Delete or Replace needs the text it removed.
    #[error("inverse of {kind:?} requires the pre-image content")]
    MissingPreImage { kind: OperationKind },
    /// Move, Format, and Custom operations are host-defined.
    #[error("{kind:?} operations have no core inverse")]
    Unsupported { kind: OperationKind },
}

/// Transforms a concurrent pair.
///
/// Returns `(a', b')` where `a'` is `a` rewritten to apply after `b`, and
/// `b'` is `b` rewritten to apply after `a`. Operations from the same peer
/// are causally ordered, never concurrent, and come back unchanged.
#[must_use]
pub fn transform(a: &Operation, b: &Operation) -> (Operation, Operation) {
    if a.peer == b.peer {
        return (a.clone(), b.clone());
    }

    use OperationKind::{Delete, Insert, Replace};
    match (a.kind, b.kind) {
        (Insert, Insert) => transform_insert_insert(a, b),
        (Insert, Delete) => transform_insert_delete(a, b),
        (Delete, Insert) => {
            let (i, d) = transform_insert_delete(b, a);
            (d, i)
        }
        (Delete, Delete) => transform_delete_delete(a, b),
        (Replace, _) | (_, Replace) => (rebase(a, b), rebase(b, a)),
        // Move, Format, Custom pass through untouched.
        _ => (a.clone(), b.clone()),
    }
}

/// Insert × Insert. The earlier position wins; on a tie the peer with the
/// smaller id keeps its position and the other shifts right past it.
fn transform_insert_insert(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let (pa, pb) = (a.position.offset, b.position.offset);
    let mut a2 = a.clone();
    let mut b2 = b.clone();

    if pa < pb || (pa == pb && a.peer < b.peer) {
        b2.position = Position::at(pb + a.content_len());
    } else {
        a2.position = Position::at(pa + b.content_len());
    }
    (a2, b2)
}

/// Insert × Delete. An insert at or before the deleted span pushes the span
/// right; an insert at or past its end slides left. An insert strictly
/// inside the span is swallowed: the delete grows to cover it and the
/// cross-peer insert becomes a no-op.
fn transform_insert_delete(i: &Operation, d: &Operation) -> (Operation, Operation) {
    let q = i.position.offset;
    let k = i.content_len();
    let p = d.position.offset;
    let len = d.delete_len();

    let mut i2 = i.clone();
    let mut d2 = d.clone();

    if q <= p {
        d2.position = Position::at(p + k);
    } else if q >= p + len {
        i2.position = Position::at(q - len);
    } else {
        d2.length = Some(len + k);
        i2.content = Some(String::new());
    }
    (i2, d2)
}

/// Delete × Delete. Disjoint spans slide past each other; overlapping spans
/// each shrink by the overlap, and the later-starting one is repositioned to
/// the earlier start. A delete reduced to zero length is a no-op.
fn transform_delete_delete(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let pa = a.position.offset;
    let la = a.delete_len();
    let ea = pa + la;
    let pb = b.position.offset;
    let lb = b.delete_len();
    let eb = pb + lb;

    let mut a2 = a.clone();
    let mut b2 = b.clone();

    if ea <= pb {
        b2.position = Position::at(pb - la);
    } else if eb <= pa {
        a2.position = Position::at(pa - lb);
    } else {
        let overlap = ea.min(eb) - pa.max(pb);
        a2.length = Some(la - overlap);
        b2.length = Some(lb - overlap);
        if pa < pb {
            b2.position = Position::at(pa);
        } else if pb < pa {
            a2.position = Position::at(pb);
        }
    }
    (a2, b2)
}

/// Rewrites `x` to apply after `against`, decomposing Replace operations
/// into their delete-then-insert parts.
fn rebase(x: &Operation, against: &Operation) -> Operation {
    if against.kind == OperationKind::Replace {
        let (d, i) = replace_parts(against);
        let x1 = rebase(x, &d);
        return rebase(&x1, &i);
    }
    if x.kind == OperationKind::Replace {
        let (xd, _) = replace_parts(x);
        let xd2 = rebase(&xd, against);
        let mut out = x.clone();
        out.position = xd2.position;
        out.length = xd2.length;
        return out;
    }
    transform(x, against).0
}

/// Splits a Replace into its removal and insertion halves.
fn replace_parts(r: &Operation) -> (Operation, Operation) {
    let mut d = r.clone();
    d.kind = OperationKind::Delete;
    d.content = None;

    let mut i = r.clone();
    i.kind = OperationKind::Insert;
    i.length = None;

    (d, i)
}

/// Composes two sequential operations from the same peer into one.
///
/// Only two shapes compose: same-position inserts and same-position
/// deletes. Anything else returns `None` and the caller keeps both.
///
/// Applying `second` at the same offset lands its content in front of
/// `first`'s, so the composed insert content is `second ++ first` —
/// `apply(apply(s, first), second) == apply(s, composed)` holds.
#[must_use]
pub fn compose(first: &Operation, second: &Operation) -> Option<Operation> {
    if first.peer != second.peer || first.position.offset != second.position.offset {
        return None;
    }

    use OperationKind::{Delete, Insert};
    match (first.kind, second.kind) {
        (Insert, Insert) => {
            let mut content = second.content.clone().unwrap_or_default();
            content.push_str(first.content.as_deref().unwrap_or(""));

            let mut out = second.clone();
            out.position = first.position;
            out.content = Some(content);
            Some(out)
        }
        (Delete, Delete) => {
            let mut out = second.clone();
            out.position = first.position;
            out.length = Some(first.delete_len() + second.delete_len());
            Some(out)
        }
        _ => None,
    }
}

/// Builds the operation that undoes `op`.
///
/// Deletes and replaces need `pre_image` — the exact text they removed. The
/// inverse records the original operation id under an `inverseOf` metadata
/// key.
pub fn inverse(op: &Operation, pre_image: Option<&str>) -> Result<Operation, InverseError> {
    use OperationKind::{Delete, Insert, Replace};

    let inv = match op.kind {
        Insert => Operation::delete(
            op.position,
            op.content_len(),
            op.peer,
            op.clock.clone(),
        ),
        Delete => {
            let removed = pre_image.ok_or(InverseError::MissingPreImage { kind: op.kind })?;
            Operation::insert(op.position, removed, op.peer, op.clock.clone())
        }
        Replace => {
            let removed = pre_image.ok_or(InverseError::MissingPreImage { kind: op.kind })?;
            Operation::replace(
                op.position,
                op.content_len(),
                removed,
                op.peer,
                op.clock.clone(),
            )
        }
        kind => return Err(InverseError::Unsupported { kind }),
    };

    Ok(inv
        .with_timestamp(op.timestamp.tick())
        .with_metadata("inverseOf", serde_json::Value::String(op.id.to_string())))
}

/// Applies one operation to a string, returning the new string.
///
/// Pure and total: offsets past the end clamp to the end, deletes truncate
/// at the end, and host-extension kinds leave the text untouched.
#[must_use]
pub fn apply(text: &str, op: &Operation) -> String {
    use OperationKind::{Delete, Insert, Replace};

    match op.kind {
        Insert => splice(text, op.position.offset, 0, op.content.as_deref().unwrap_or("")),
        Delete => splice(text, op.position.offset, op.delete_len(), ""),
        Replace => splice(
            text,
            op.position.offset,
            op.delete_len(),
            op.content.as_deref().unwrap_or(""),
        ),
        _ => text.to_string(),
    }
}

/// Removes `remove` characters at `offset` and inserts `insert` in their
/// place, clamping both bounds to the text length.
fn splice(text: &str, offset: usize, remove: usize, insert: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = offset.min(chars.len());
    let end = start.saturating_add(remove).min(chars.len());

    let mut out = String::with_capacity(text.len() + insert.len());
    out.extend(&chars[..start]);
    out.push_str(insert);
    out.extend(&chars[end..]);
    out
}
