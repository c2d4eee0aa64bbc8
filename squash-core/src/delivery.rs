//! Delivery loop
//!
//! Drains the occurrence queue through a [`Transport`], one record at a
//! time, oldest first. Each outcome decides the record's fate:
//!
//! | outcome                          | log   | record  | loop     |
//! |----------------------------------|-------|---------|----------|
//! | delivered                        | info  | removed | continue |
//! | 403 Forbidden                    | warn  | kept    | abort    |
//! | no server reachable              | warn  | kept    | abort    |
//! | 422 or any other HTTP error      | warn  | removed | continue |
//! | timeout, unreadable record, etc. | warn  | removed | continue |
//!
//! Records never reached because of an abort stay queued for the next run.

use uuid::Uuid;

use crate::error::Result;
use crate::queue::OccurrenceQueue;
use crate::transport::{Transport, TransportError};

/// What one delivery pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    /// Records the collector accepted
    pub delivered: usize,
    /// Records dropped after a non-retryable failure
    pub discarded: usize,
    /// Whether the pass stopped early
    pub aborted: bool,
    /// Records still queued when the pass ended
    pub left_queued: usize,
}

/// Attempt delivery of every queued record
///
/// Only a failure to list the queue is returned as an error; everything
/// after that is logged and classified per record.
pub fn deliver_pending(
    queue: &OccurrenceQueue,
    notify_path: &str,
    transport: &dyn Transport,
) -> Result<ReportSummary> {
    let pending = queue.list_pending()?;
    let mut summary = ReportSummary::default();

    tracing::debug!(
        folder = %queue.folder().display(),
        pending = pending.len(),
        "Reporting queued occurrences"
    );

    for (index, id) in pending.iter().copied().enumerate() {
        tracing::debug!(uuid = %id, "Reporting occurrence");

        let result = match queue.read(id) {
            Ok(body) => transport.transmit(notify_path, &body),
            Err(e) => Err(TransportError::Other(format!("unreadable record: {}", e))),
        };

        match result {
            Ok(()) => {
                tracing::info!(uuid = %id, "Occurrence delivered");
                summary.delivered += 1;
            }
            Err(e) if e.aborts_batch() => {
                log_abort(&e);
                summary.aborted = true;
                summary.left_queued = pending.len() - index;
                break;
            }
            Err(e) => {
                log_discard(id, &e);
                summary.discarded += 1;
            }
        }

        if let Err(e) = queue.remove(id) {
            tracing::warn!(uuid = %id, error = %e, "Failed to remove occurrence from queue");
        }
    }

    Ok(summary)
}

fn log_abort(error: &TransportError) {
    match error {
        TransportError::Http { status: 403, .. } => {
            tracing::warn!("Error: 403 Forbidden (Server refused API key). Aborting.");
        }
        _ => {
            tracing::warn!(error = %error, "No server responded. Aborting.");
        }
    }
}

fn log_discard(id: Uuid, error: &TransportError) {
    match error {
        TransportError::Http { status: 422, .. } => {
            tracing::warn!(
                uuid = %id,
                "Error: 422 Unprocessable Entity (See Squash server error logs, exception UUID is {})",
                id
            );
        }
        TransportError::Http { status, body } => {
            tracing::warn!(uuid = %id, status, "Error: {} (UUID {})", status, id);
            tracing::warn!(uuid = %id, "Data: \n{}\n", body);
        }
        other => {
            tracing::warn!(uuid = %id, error = %other, "Failed while sending occurrence");
        }
    }
}
