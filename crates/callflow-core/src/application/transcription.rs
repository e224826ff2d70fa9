//! Transcript re-segmentation
//!
//! Carrier transcription covers the whole call. After a transfer the text has
//! to be split by time so each segment keeps only what was said while it was
//! active. Re-running overwrites the previous split.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::guard::CallGuard;
use super::settings::SharedClock;
use crate::domain::call_record::{CallId, CallRecordPatch, CallSegment, CallTranscript};
use crate::domain::flow_definition::TenantId;
use crate::domain::repository::CallRecordRepository;
use crate::{CallFlowError, CallFlowResult};

/// A call the tenant-wide pass could not re-segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResegmentError {
    /// Failing call
    pub call_id: CallId,
    /// Why it failed
    pub error: String,
}

/// Outcome of a tenant-wide pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResegmentSummary {
    /// Calls re-segmented successfully
    pub processed: usize,
    /// Calls that failed
    pub errors: Vec<ResegmentError>,
}

/// Splits full-call transcripts across call segments
pub struct TranscriptionSegmenter {
    records: Arc<dyn CallRecordRepository>,
    guard: CallGuard,
    clock: SharedClock,
}

impl TranscriptionSegmenter {
    /// Create a segmenter sharing the transfer guard
    pub fn new(records: Arc<dyn CallRecordRepository>, guard: CallGuard, clock: SharedClock) -> Self {
        Self {
            records,
            guard,
            clock,
        }
    }

    /// Re-slice one call's transcript; returns the number of segments written
    pub async fn resegment(&self, call_id: &CallId) -> CallFlowResult<usize> {
        let _lock = self.guard.lock(call_id).await;
        let record = self
            .records
            .find_by_call_id(call_id)
            .await?
            .ok_or_else(|| CallFlowError::call_not_found(call_id))?;
        let transcript = record.transcript.as_ref().ok_or_else(|| {
            CallFlowError::NotFound(format!("transcript for call {}", call_id))
        })?;
        if record.segments.is_empty() {
            return Err(CallFlowError::NotFound(format!("segments for call {}", call_id)));
        }

        let slices = slice_transcript(transcript, &record.segments);
        let updated = slices.len();
        let mut patch = CallRecordPatch::new(self.clock.now());
        patch.segment_transcripts = slices;
        self.records.update(call_id, patch).await?;
        debug!(%call_id, segments = updated, "Transcript re-segmented");
        Ok(updated)
    }

    /// Re-segment every transferred call of a tenant that has a transcript
    pub async fn resegment_all(&self, tenant_id: &TenantId) -> CallFlowResult<ResegmentSummary> {
        let records = self.records.list_for_tenant(tenant_id).await?;
        let mut summary = ResegmentSummary::default();
        for record in records {
            if record.transfer_count() == 0 || record.transcript.is_none() {
                continue;
            }
            match self.resegment(&record.call_id).await {
                Ok(_) => summary.processed += 1,
                Err(err) => {
                    warn!(call_id = %record.call_id, error = %err, "Failed to re-segment transcript");
                    summary.errors.push(ResegmentError {
                        call_id: record.call_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        self.guard.prune();
        info!(
            %tenant_id,
            processed = summary.processed,
            failed = summary.errors.len(),
            "Tenant transcripts re-segmented"
        );
        Ok(summary)
    }
}

/// Transcript text per segment number.
///
/// An entry belongs to the last segment that had started by the time it was
/// spoken; entries before the first segment go to the first one. Every
/// segment gets a value, empty when nothing was said during it.
pub fn slice_transcript(transcript: &CallTranscript, segments: &[CallSegment]) -> Vec<(u32, String)> {
    let mut ordered: Vec<&CallSegment> = segments.iter().collect();
    ordered.sort_by_key(|s| (s.started_at, s.number));

    let mut entries: Vec<_> = transcript.entries.iter().collect();
    entries.sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));

    let mut lines: Vec<Vec<String>> = vec![Vec::new(); ordered.len()];
    for entry in entries {
        let at = transcript.entry_time(entry);
        let slot = ordered
            .iter()
            .rposition(|segment| segment.started_at <= at)
            .unwrap_or(0);
        let line = match &entry.speaker {
            Some(speaker) => format!("{}: {}", speaker, entry.text.trim()),
            None => entry.text.trim().to_string(),
        };
        if let Some(bucket) = lines.get_mut(slot) {
            bucket.push(line);
        }
    }

    ordered
        .iter()
        .zip(lines)
        .map(|(segment, lines)| (segment.number, lines.join("\n")))
        .collect()
}
