//! The sync service: outbound batching and inbound reconciliation.
//!
//! A pure state machine — it performs no I/O and owns no timers. The host
//! (or the connection driver) calls [`SyncService::tick`] with the current
//! time; the service hands back the messages to transmit and the failures
//! to surface. That keeps every scheduling decision testable without a
//! runtime.
//!
//! Delivery contract: operations stay in the pending queue until an ack
//! names them, so a batch lost to a dropped socket is re-sent after
//! reconnect with its original operation ids (at-least-once). Receivers
//! absorb the duplicates via vector-clock dominance.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{Message, SyncPayload};
use coedit_crdt::{ot, Operation, VectorClock};
use coedit_types::{OperationId, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for a [`SyncService`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between automatic flushes.
    pub sync_interval: Duration,
    /// Maximum operations per Sync message.
    pub batch_size: usize,
    /// Send attempts per batch before surfacing `SyncFailed`.
    pub retry_attempts: u32,
    /// Base retry delay; doubles per attempt.
    pub retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(1000),
            batch_size: 50,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// A host-facing snapshot of the service's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Operations awaiting acknowledgment (batched or not).
    pub pending_operations: usize,
    /// Batches sent and not yet acknowledged.
    pub in_flight_batches: usize,
    /// The last sequence number handed out.
    pub sequence_number: u64,
    /// The service's causal view.
    pub clock: VectorClock,
}

/// The outcome of processing one inbound Sync message.
#[derive(Debug)]
pub struct ProcessedSync {
    /// Fresh operations, transformed against the still-pending local queue.
    /// For hosts that apply edits to a plain buffer; a host backed by a
    /// `Document` should instead feed the raw operations to
    /// `Document::apply_remote`, which owns its own concurrency control.
    pub operations: Vec<Operation>,
    /// The ack to send back, naming every operation in the batch.
    pub ack: Message,
}

struct PendingOp {
    op: Operation,
    /// Sequence of the batch this op last went out with, if any.
    batch: Option<u64>,
}

struct BatchState {
    sequence: u64,
    attempts: u32,
    next_retry_at: u64,
}

/// Owns the pending queue, batch sequencing, and the peer's causal view.
pub struct SyncService {
    peer: PeerId,
    config: SyncConfig,
    clock: VectorClock,
    pending: Vec<PendingOp>,
    batches: Vec<BatchState>,
    sequence: u64,
    last_flush_at: u64,
    /// Per-remote-peer clocks known to be fully delivered; gates GC.
    acked: BTreeMap<PeerId, VectorClock>,
}

impl SyncService {
    /// Creates a service for `peer`.
    #[must_use]
    pub fn new(peer: PeerId, config: SyncConfig) -> Self {
        Self {
            peer,
            config,
            clock: VectorClock::new(),
            pending: Vec::new(),
            batches: Vec::new(),
            sequence: 0,
            last_flush_at: 0,
            acked: BTreeMap::new(),
        }
    }

    /// This service's peer id.
    #[must_use]
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// The service's causal view.
    #[must_use]
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Current progress snapshot.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            pending_operations: self.pending.len(),
            in_flight_batches: self.batches.len(),
            sequence_number: self.sequence,
            clock: self.clock.clone(),
        }
    }

    /// Queues a local operation for delivery and advances the local clock.
    ///
    /// Malformed operations are rejected here, before they can reach the
    /// wire.
    pub fn add_operation(&mut self, op: Operation) -> SyncResult<()> {
        op.validate()?;
        self.clock.increment(self.peer);
        self.pending.push(PendingOp { op, batch: None });
        Ok(())
    }

    /// Drains up to `batch_size` unbatched operations into a Sync message.
    /// Returns `None` when there is nothing new to send. The operations
    /// remain queued until acknowledged.
    pub fn flush(&mut self, now_ms: u64) -> Option<Message> {
        let unbatched: Vec<usize> = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.batch.is_none())
            .map(|(i, _)| i)
            .take(self.config.batch_size)
            .collect();
        if unbatched.is_empty() {
            return None;
        }

        self.sequence += 1;
        let sequence = self.sequence;
        for &i in &unbatched {
            self.pending[i].batch = Some(sequence);
        }
        self.batches.push(BatchState {
            sequence,
            attempts: 1,
            next_retry_at: now_ms.saturating_add(self.retry_delay_ms(1)),
        });
        self.last_flush_at = now_ms;

        let operations: Vec<Operation> = unbatched
            .iter()
            .map(|&i| self.pending[i].op.clone())
            .collect();
        debug!(sequence, count = operations.len(), "flushing batch");

        Some(Message::sync(
            self.peer,
            SyncPayload {
                operations,
                vector_clock: self.clock.clone(),
                sequence_number: sequence,
            },
        ))
    }

    /// Advances timers: re-sends overdue batches, fails batches that are
    /// out of attempts, and performs the periodic flush. Returns the
    /// messages to transmit and the errors to surface.
    pub fn tick(&mut self, now_ms: u64) -> (Vec<Message>, Vec<SyncError>) {
        let mut messages = Vec::new();
        let mut errors = Vec::new();

        let mut exhausted: Vec<u64> = Vec::new();
        for batch in &mut self.batches {
            if now_ms < batch.next_retry_at {
                continue;
            }
            if batch.attempts >= self.config.retry_attempts {
                errors.push(SyncError::SyncFailed {
                    sequence: batch.sequence,
                    attempts: batch.attempts,
                });
                exhausted.push(batch.sequence);
                continue;
            }
            batch.attempts += 1;
            batch.next_retry_at =
                now_ms.saturating_add(retry_backoff(self.config.retry_delay, batch.attempts));
            let sequence = batch.sequence;
            let operations: Vec<Operation> = self
                .pending
                .iter()
                .filter(|p| p.batch == Some(sequence))
                .map(|p| p.op.clone())
                .collect();
            warn!(sequence, attempt = batch.attempts, "re-sending unacked batch");
            messages.push(Message::sync(
                self.peer,
                SyncPayload {
                    operations,
                    vector_clock: self.clock.clone(),
                    sequence_number: sequence,
                },
            ));
        }

        // Exhausted batches dissolve; their operations rejoin the unbatched
        // pool and go out with a later flush.
        if !exhausted.is_empty() {
            self.batches.retain(|b| !exhausted.contains(&b.sequence));
            for p in &mut self.pending {
                if p.batch.is_some_and(|s| exhausted.contains(&s)) {
                    p.batch = None;
                }
            }
        }

        if now_ms.saturating_sub(self.last_flush_at) >= self.config.sync_interval.as_millis() as u64
        {
            if let Some(message) = self.flush(now_ms) {
                messages.push(message);
            }
        }

        (messages, errors)
    }

    /// Removes acknowledged operations from the pending queue.
    pub fn acknowledge(&mut self, ids: &[OperationId]) {
        self.pending.retain(|p| !ids.contains(&p.op.id));
        let pending = &self.pending;
        self.batches
            .retain(|b| pending.iter().any(|p| p.batch == Some(b.sequence)));
    }

    /// Handles a Nack: the named operations rejoin the unbatched pool for
    /// the next flush.
    pub fn handle_nack(&mut self, ids: &[OperationId], reason: &str) {
        warn!(count = ids.len(), reason, "operations nacked");
        let mut dissolved: Vec<u64> = Vec::new();
        for p in &mut self.pending {
            if ids.contains(&p.op.id) {
                if let Some(seq) = p.batch.take() {
                    dissolved.push(seq);
                }
            }
        }
        // A dissolved batch releases all of its operations, nacked or not.
        for p in &mut self.pending {
            if p.batch.is_some_and(|s| dissolved.contains(&s)) {
                p.batch = None;
            }
        }
        self.batches.retain(|b| !dissolved.contains(&b.sequence));
    }

    /// Processes an inbound Sync message.
    ///
    /// Already-seen operations (clock dominated by the service clock) are
    /// dropped; fresh ones are transformed against every still-pending
    /// local operation and returned, and the sender's clock is merged into
    /// the service's view.
    pub fn process_sync_message(&mut self, sender: PeerId, payload: &SyncPayload) -> ProcessedSync {
        let mut delivered = Vec::new();
        let mut ack_ids = Vec::new();

        for op in &payload.operations {
            ack_ids.push(op.id);
            if self.clock.dominates(&op.clock) {
                debug!(op = %op.id, "dropping duplicate operation");
                continue;
            }
            let mut eff = op.clone();
            for pending in &self.pending {
                if eff.clock.is_concurrent(&pending.op.clock) {
                    eff = ot::transform(&eff, &pending.op).0;
                }
            }
            self.clock.merge(&op.clock);
            delivered.push(eff);
        }

        self.acked
            .entry(sender)
            .or_default()
            .merge(&payload.vector_clock);

        ProcessedSync {
            operations: delivered,
            ack: Message::ack(self.peer, ack_ids),
        }
    }

    /// The clocks every known remote peer has confirmed delivered, for
    /// gating tombstone collection.
    #[must_use]
    pub fn acknowledged_clocks(&self) -> Vec<VectorClock> {
        self.acked.values().cloned().collect()
    }

    fn retry_delay_ms(&self, attempt: u32) -> u64 {
        retry_backoff(self.config.retry_delay, attempt)
    }
}

/// Exponential retry delay in milliseconds for a 1-based attempt number.
fn retry_backoff(base: Duration, attempt: u32) -> u64 {
    let base_ms = base.as_millis() as u64;
    base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
}
