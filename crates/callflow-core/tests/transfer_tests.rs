mod common;

use callflow_core::{
    CallFlowError, CallStatus, CallTranscript, ConferenceEvent, ConferenceEventKind, TenantId,
    TranscriptEntry, TransferRequest, Verb,
};
use chrono::Duration;
use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;

fn event(kind: ConferenceEventKind, conference: &str, participant: &str) -> ConferenceEvent {
    ConferenceEvent {
        kind,
        conference: conference.to_string(),
        participant: Some(call(participant)),
    }
}

fn request(target: &str) -> TransferRequest {
    TransferRequest {
        target: target.to_string(),
        initiated_by: "agent-7".to_string(),
        reason: Some("billing question".to_string()),
    }
}

/// Inbound call bridged to the front desk in segment 0
async fn bridged_call(h: &Harness, call_sid: &str) {
    h.engine.handle_inbound(&inbound(call_sid)).await;
    let conference = format!("call_{}_seg_0", call_sid);
    h.engine
        .conference()
        .handle_conference_event(event(ConferenceEventKind::Start, &conference, call_sid))
        .await
        .unwrap();
    let leg = h.carrier.dials().await.len();
    h.engine
        .conference()
        .handle_conference_event(event(
            ConferenceEventKind::ParticipantJoin,
            &conference,
            &format!("LEG{}", leg),
        ))
        .await
        .unwrap();
}

async fn front_desk(h: &Harness) {
    h.install_flow(json!([
        { "id": "desk", "type": "dial", "config": { "destination": "+15551230000" } }
    ]))
    .await;
}

#[tokio::test]
async fn test_transfer_opens_new_segment_and_moves_caller() {
    let h = Harness::new(monday(10, 0));
    front_desk(&h).await;
    bridged_call(&h, "CA1").await;

    h.clock.advance(Duration::minutes(5));
    let result = h
        .engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap();
    assert_eq!(result.previous_segment, 0);
    assert_eq!(result.segment, 1);
    assert_eq!(result.conference_name, "call_CA1_seg_1");

    let redirects = h.carrier.redirects().await;
    assert_eq!(
        redirects,
        vec![(
            call("CA1"),
            "https://cf.test/voice/transfer-join?action=transfer_join&segment=1&call=CA1".to_string()
        )]
    );

    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(record.status, CallStatus::InProgress);
    assert_eq!(record.segment, 1);
    assert_eq!(record.conference_name.as_deref(), Some("call_CA1_seg_1"));
    assert_eq!(record.segments.len(), 2);
    assert_eq!(record.segments[0].ended_at, Some(monday(10, 5)));
    assert_eq!(record.segments[1].started_at, monday(10, 5));
    assert_eq!(record.segments[1].target.as_deref(), Some("+15557777"));
    assert_eq!(record.segments[1].initiated_by.as_deref(), Some("agent-7"));
    assert_eq!(record.execution.resumption, None);

    // Caller arrives from the redirect and joins the new conference
    let doc = h
        .engine
        .handle_transfer_join(&call("CA1"), &token_from_url(&redirects[0].1))
        .await;
    let (conference, action) = conference_action(doc.verbs());
    assert_eq!(conference, "call_CA1_seg_1");
    assert_eq!(
        action,
        "https://cf.test/voice/transfer-status?action=transfer_status&segment=1"
    );

    // The old conference ending does not touch the new segment
    let conferences = h.engine.conference();
    conferences
        .handle_conference_event(event(ConferenceEventKind::End, "call_CA1_seg_0", "CA1"))
        .await
        .unwrap();
    conferences
        .handle_conference_event(event(ConferenceEventKind::Start, "call_CA1_seg_1", "CA1"))
        .await
        .unwrap();
    let dials = h.carrier.dials().await;
    assert_eq!(dials.len(), 2);
    assert_eq!(dials[1].to, "+15557777");
    assert_eq!(
        dials[1].answer_url,
        "https://cf.test/voice/join?action=join&segment=1&call=CA1"
    );

    conferences
        .handle_conference_event(event(ConferenceEventKind::ParticipantJoin, "call_CA1_seg_1", "LEG2"))
        .await
        .unwrap();
    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(record.status, CallStatus::Bridged);

    let doc = h
        .engine
        .handle_transfer_status(&call("CA1"), &token_from_url(&action), Some("completed"))
        .await;
    assert_eq!(doc.verbs(), &[Verb::Hangup]);
    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(record.status, CallStatus::Completed);
}

#[tokio::test]
async fn test_carrier_failure_leaves_call_bridged_and_retryable() {
    let h = Harness::new(monday(10, 0));
    front_desk(&h).await;
    bridged_call(&h, "CA1").await;
    let before = h.engine.call_record(&call("CA1")).await.unwrap();

    h.carrier.set_failing(true);
    let err = h
        .engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallFlowError::Carrier(_)));

    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(record.status, CallStatus::Bridged);
    assert_eq!(record.segment, 0);
    assert_eq!(record.conference_name.as_deref(), Some("call_CA1_seg_0"));
    assert_eq!(record.segments.len(), 1);
    assert_eq!(record.segments[0].ended_at, None);
    assert_eq!(record.execution.pending_target, before.execution.pending_target);
    assert_eq!(record.execution.resumption, before.execution.resumption);

    // Carrier back: the same transfer goes through
    h.carrier.set_failing(false);
    let result = h
        .engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap();
    assert_eq!(result.previous_segment, 0);
    assert_eq!(result.segment, 1);
    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(record.segments.len(), 2);
    assert_eq!(record.conference_name.as_deref(), Some("call_CA1_seg_1"));
}

#[tokio::test]
async fn test_transferred_segment_keeps_flow_recording() {
    let h = Harness::new(monday(10, 0));
    h.install_flow(json!([
        { "id": "desk", "type": "dial", "config": { "destination": "+15551230000", "record": true } }
    ]))
    .await;
    bridged_call(&h, "CA1").await;
    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    assert!(!record.record_calls);
    assert!(record.execution.pending_target.unwrap().record);

    h.engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap();
    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    let target = record.execution.pending_target.unwrap();
    assert_eq!(target.segment, 1);
    assert!(target.record);

    let redirect = h.carrier.redirects().await[0].1.clone();
    let doc = h
        .engine
        .handle_transfer_join(&call("CA1"), &token_from_url(&redirect))
        .await;
    let join = doc
        .verbs()
        .iter()
        .find_map(|verb| match verb {
            Verb::Conference(join) => Some(join.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(join.name, "call_CA1_seg_1");
    assert!(join.record);
    assert_eq!(
        join.recording_status_callback.as_deref(),
        Some("https://cf.test/voice/recording-status?action=recording_status&segment=1&call=CA1")
    );
}

#[tokio::test]
async fn test_recording_stays_with_its_segment() {
    let h = Harness::new(monday(10, 0));
    front_desk(&h).await;
    bridged_call(&h, "CA1").await;
    h.engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap();

    // Segment 0's recording finishes after the transfer
    let token = token_from_url(
        "https://cf.test/voice/recording-status?action=recording_status&segment=0&call=CA1",
    );
    h.engine
        .handle_recording_status(&token, "https://rec.test/seg0")
        .await
        .unwrap();

    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(record.segments[0].recording_url.as_deref(), Some("https://rec.test/seg0"));
    assert_eq!(record.segments[1].recording_url, None);
}

#[tokio::test]
async fn test_transfer_rejections() {
    let h = Harness::new(monday(10, 0));
    front_desk(&h).await;

    let err = h
        .engine
        .transfer_call(&call("CA404"), &request("+15557777"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    // Ringing but not bridged yet
    h.engine.handle_inbound(&inbound("CA1")).await;
    let err = h
        .engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallFlowError::InvalidState(_)));

    let err = h
        .engine
        .transfer_call(&call("CA1"), &request("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, CallFlowError::Validation(_)));

    let record = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(record.segments.len(), 1);
    assert!(h.carrier.redirects().await.is_empty());
}

#[tokio::test]
async fn test_failed_transfer_says_goodbye() {
    let h = Harness::new(monday(10, 0));
    front_desk(&h).await;
    bridged_call(&h, "CA1").await;
    h.engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap();

    let token = token_from_url("https://cf.test/voice/transfer-status?action=transfer_status&segment=1");
    let doc = h
        .engine
        .handle_transfer_status(&call("CA1"), &token, Some("no-answer"))
        .await;
    assert_eq!(
        says(doc.verbs()),
        vec!["We could not complete your transfer. Goodbye.".to_string()]
    );
    assert_eq!(doc.verbs().last(), Some(&Verb::Hangup));
}

fn entry(offset_secs: f64, speaker: &str, text: &str) -> TranscriptEntry {
    TranscriptEntry {
        offset_secs,
        speaker: Some(speaker.to_string()),
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_resegmenting_splits_transcript_by_segment_and_is_idempotent() {
    let h = Harness::new(monday(10, 0));
    front_desk(&h).await;
    bridged_call(&h, "CA1").await;
    h.clock.advance(Duration::minutes(5));
    h.engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap();

    h.engine
        .store_transcript(
            &call("CA1"),
            CallTranscript {
                started_at: monday(10, 0),
                entries: vec![
                    entry(30.0, "caller", "Hello"),
                    entry(200.0, "agent", "Let me transfer you"),
                    entry(320.0, "billing", "Billing, how can I help"),
                    entry(400.0, "caller", "About my invoice"),
                ],
            },
        )
        .await
        .unwrap();

    assert_eq!(h.engine.resegment_transcription(&call("CA1")).await.unwrap(), 2);
    let first = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(
        first.segments[0].transcript.as_deref(),
        Some("caller: Hello\nagent: Let me transfer you")
    );
    assert_eq!(
        first.segments[1].transcript.as_deref(),
        Some("billing: Billing, how can I help\ncaller: About my invoice")
    );

    h.engine.resegment_transcription(&call("CA1")).await.unwrap();
    let second = h.engine.call_record(&call("CA1")).await.unwrap();
    assert_eq!(second.segments, first.segments);
}

#[tokio::test]
async fn test_resegment_requires_a_transcript() {
    let h = Harness::new(monday(10, 0));
    front_desk(&h).await;
    h.engine.handle_inbound(&inbound("CA1")).await;

    let err = h.engine.resegment_transcription(&call("CA1")).await.unwrap_err();
    assert!(err.is_not_found());
    let err = h.engine.resegment_transcription(&call("CA404")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_resegment_all_covers_transferred_calls_with_transcripts() {
    let h = Harness::new(monday(10, 0));
    front_desk(&h).await;

    // Transferred with a transcript
    bridged_call(&h, "CA1").await;
    h.engine
        .transfer_call(&call("CA1"), &request("+15557777"))
        .await
        .unwrap();
    h.engine
        .store_transcript(
            &call("CA1"),
            CallTranscript {
                started_at: monday(10, 0),
                entries: vec![entry(1.0, "caller", "Hi")],
            },
        )
        .await
        .unwrap();

    // Transferred without a transcript
    bridged_call(&h, "CA2").await;
    h.engine
        .transfer_call(&call("CA2"), &request("+15557777"))
        .await
        .unwrap();

    // Never transferred
    h.engine.handle_inbound(&inbound("CA3")).await;

    let summary = h
        .engine
        .resegment_all_transcriptions(&TenantId(TENANT.to_string()))
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert!(summary.errors.is_empty());

    let other = h
        .engine
        .resegment_all_transcriptions(&TenantId("globex".to_string()))
        .await
        .unwrap();
    assert_eq!(other.processed, 0);
}
