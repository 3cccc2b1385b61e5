//! Batch executor: one request/response round trip per call.
//!
//! ```text
//! CommandBuffer ─► ServiceConnection::send ─► RawReply ─► ReplyReader ─► bind
//!                       (under timeout)                                    │
//!                                             Vec<Outcome>, BatchReport ◄──┘
//! ```
//!
//! The reply carries no operation tags. Binding walks the batch's opcodes in
//! enqueue order and pairs the Nth output-producing operation with the Nth
//! record; operations that produce no output are marked `Delivered` without
//! consuming a record. Binding is all-or-nothing.

use std::time::Duration;

use crate::command::CommandBuffer;
use crate::error::{ComposerError, Result};
use crate::protocol::{ErrorCode, Opcode, ProtocolVersion};
use crate::reply::{RawReply, ReplyReader, ReplyRecord, ReplyValue};
use crate::transport::ServiceConnection;

/// Default round-trip timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Final state of one executed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The service reported success, with the returned value.
    Succeeded(ReplyValue),
    /// Fire-and-forget operation that reached the service.
    Delivered,
    /// The service reported an error status for this operation.
    Failed(ErrorCode),
    /// The round trip did not complete; the operation may or may not have
    /// taken effect.
    Unknown,
}

impl Outcome {
    /// Whether the operation is known to have been applied.
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_) | Outcome::Delivered)
    }
}

/// Summary of one executed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Sequence number of the batch (0 for an empty batch that was not sent).
    pub batch_id: u32,
    /// Operations in the batch.
    pub operations: usize,
    /// Operations that reported success.
    pub succeeded: usize,
    /// Fire-and-forget operations.
    pub delivered: usize,
    /// Position, opcode and status of each failed operation.
    pub failures: Vec<(usize, Opcode, ErrorCode)>,
}

impl BatchReport {
    fn new(batch_id: u32, opcodes: &[Opcode], outcomes: &[Outcome]) -> Self {
        let mut report = BatchReport {
            batch_id,
            operations: opcodes.len(),
            ..Default::default()
        };
        for (position, (opcode, outcome)) in opcodes.iter().zip(outcomes).enumerate() {
            match outcome {
                Outcome::Succeeded(_) => report.succeeded += 1,
                Outcome::Delivered => report.delivered += 1,
                Outcome::Failed(code) => report.failures.push((position, *opcode, *code)),
                Outcome::Unknown => {}
            }
        }
        report
    }

    /// Number of failed operations.
    #[inline]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Whether every operation succeeded or was delivered.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The earliest failure in enqueue order.
    pub fn first_failure(&self) -> Option<(usize, Opcode, ErrorCode)> {
        self.failures.first().copied()
    }
}

/// Result of a completed round trip.
#[derive(Debug)]
pub struct ExecutedBatch {
    /// One outcome per operation, in enqueue order.
    pub outcomes: Vec<Outcome>,
    /// Summary counts.
    pub report: BatchReport,
}

/// Pair reply records with the operations of a batch.
///
/// # Errors
///
/// `MalformedReply` if the reply is corrupt, has fewer or more records than
/// the batch has output-producing operations, or a record's value does not
/// match its operation's reply kind. No outcome is returned in that case.
pub fn bind(opcodes: &[Opcode], reply: RawReply) -> Result<Vec<Outcome>> {
    let mut records = ReplyReader::new(reply);
    let mut outcomes = Vec::with_capacity(opcodes.len());

    for (position, opcode) in opcodes.iter().enumerate() {
        let kind = opcode.reply_kind();
        if !kind.produces_record() {
            outcomes.push(Outcome::Delivered);
            continue;
        }

        let record = records.next().ok_or_else(|| {
            ComposerError::MalformedReply(format!(
                "reply ended before the record for operation {} ({:?})",
                position, opcode
            ))
        })??;

        let outcome = match record {
            ReplyRecord::Failure(code) => Outcome::Failed(code),
            ReplyRecord::Success(value) if value.kind() == kind => Outcome::Succeeded(value),
            ReplyRecord::Success(value) => {
                return Err(ComposerError::MalformedReply(format!(
                    "operation {} ({:?}) expects {:?}, reply carries {:?}",
                    position,
                    opcode,
                    kind,
                    value.kind()
                )));
            }
        };
        outcomes.push(outcome);
    }

    match records.next() {
        None => Ok(outcomes),
        Some(Err(e)) => Err(e),
        Some(Ok(_)) => Err(ComposerError::MalformedReply(
            "reply carries more records than the batch has outputs".to_string(),
        )),
    }
}

/// Drives round trips over an exclusively owned connection.
pub struct BatchExecutor<C> {
    connection: C,
    timeout: Duration,
    last_batch_id: u32,
}

impl<C: ServiceConnection> BatchExecutor<C> {
    /// Create an executor over `connection`.
    pub fn new(connection: C, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
            last_batch_id: 0,
        }
    }

    /// Protocol version of the underlying connection.
    #[inline]
    pub fn version(&self) -> ProtocolVersion {
        self.connection.version()
    }

    /// Round-trip timeout.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Borrow the connection.
    #[inline]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Give back the connection.
    pub fn into_connection(self) -> C {
        self.connection
    }

    fn next_batch_id(&mut self) -> u32 {
        // 0 is kept for batches that never reach the service.
        self.last_batch_id = self.last_batch_id.checked_add(1).unwrap_or(1);
        self.last_batch_id
    }

    /// Send `batch`, wait for the reply and bind it.
    ///
    /// An empty batch completes immediately without contacting the service.
    /// There is no retry: a batch that failed in transit may already have
    /// taken effect.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the connection fails or the timeout elapses,
    /// `MalformedReply` if the reply cannot be bound to the batch.
    pub async fn execute(&mut self, mut batch: CommandBuffer) -> Result<ExecutedBatch> {
        if batch.is_empty() {
            return Ok(ExecutedBatch {
                outcomes: Vec::new(),
                report: BatchReport::default(),
            });
        }

        let batch_id = self.next_batch_id();
        let opcodes = std::mem::take(&mut batch.opcodes);
        tracing::debug!(
            "Sending batch {}: {} operations, {} bytes, {} handles",
            batch_id,
            opcodes.len(),
            batch.bytes.len(),
            batch.handles.len()
        );

        let reply = match tokio::time::timeout(self.timeout, self.connection.send(batch_id, batch))
            .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::error!("Batch {} failed: {}", batch_id, e);
                return Err(e);
            }
            Err(_) => {
                tracing::error!("Batch {} timed out after {:?}", batch_id, self.timeout);
                return Err(ComposerError::TransportFailure(format!(
                    "no reply to batch {} within {:?}",
                    batch_id, self.timeout
                )));
            }
        };

        let outcomes = bind(&opcodes, reply).inspect_err(|e| {
            tracing::error!("Discarding batch {}: {}", batch_id, e);
        })?;

        let report = BatchReport::new(batch_id, &opcodes, &outcomes);
        for (position, opcode, code) in &report.failures {
            tracing::warn!(
                "Batch {} operation {} ({:?}) failed: {}",
                batch_id,
                position,
                opcode,
                code
            );
        }

        Ok(ExecutedBatch { outcomes, report })
    }
}
