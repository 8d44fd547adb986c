//! Cross-cutting dispatch properties: audit fidelity, masking, retry
//! classification edges, deadlines, and sink-failure isolation.

use std::time::Duration;

use tokio::time::Instant;

use parentline::channel::ChannelHint;
use parentline::twilio::{RejectKind, SendOutcome, TransientKind};
use parentline::{DispatchOutcome, DispatchRequest, Dispatcher};

use crate::support::{
    dual_channel_credentials, sms_credentials, BrokenSink, CaptureSink, ScriptedApi,
};

#[tokio::test]
async fn audit_record_mirrors_the_returned_outcome() {
    let api = ScriptedApi::with_script([SendOutcome::Sent {
        sid: "SM-audit".to_owned(),
    }]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api, sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+1 (415) 555-0123", "hi").with_channel(ChannelHint::Sms))
        .await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, outcome.tag());
    assert_eq!(records[0].detail, outcome.detail());
    assert_eq!(records[0].attempts, outcome.attempts());
    assert_eq!(records[0].to, "+14155550123", "recipient is normalized");
}

#[tokio::test]
async fn audit_never_contains_credential_material() {
    let api = ScriptedApi::with_script([]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api, sink.clone());

    let _ = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    let records = sink.records();
    let rendered = serde_json::to_string(&records[0]).expect("serialize record");
    // Full SID is ACfeedface0042; only the masked tail may appear.
    assert!(!rendered.contains("ACfeedface0042"));
    assert!(!rendered.contains("token-abcdef-123456"));
    assert_eq!(records[0].account, "****0042");
}

#[tokio::test(start_paused = true)]
async fn failed_auto_dispatch_audits_the_resolved_channel() {
    let rate_limited = || SendOutcome::Transient {
        kind: TransientKind::RateLimited,
        detail: "http 429".to_owned(),
    };
    let api = ScriptedApi::with_script([rate_limited(), rate_limited(), rate_limited()]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(dual_channel_credentials(), api, sink.clone());

    // Auto resolves to WhatsApp for these credentials; the audit record must
    // carry that resolved channel even though nothing was sent.
    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi"))
        .await;

    assert!(!outcome.is_sent());
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].channel, "whatsapp");
}

#[tokio::test]
async fn body_at_the_carrier_limit_is_sent() {
    let api = ScriptedApi::with_script([SendOutcome::Sent {
        sid: "SM-long".to_owned(),
    }]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api, sink);

    let body = "a".repeat(1600);
    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", body).with_channel(ChannelHint::Sms))
        .await;

    assert!(outcome.is_sent());
}

#[tokio::test]
async fn oversized_body_is_rejected_without_an_upstream_call() {
    let api = ScriptedApi::with_script([]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let body = "a".repeat(1601);
    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", body).with_channel(ChannelHint::Sms))
        .await;

    match outcome {
        DispatchOutcome::Rejected { kind, .. } => assert_eq!(kind, RejectKind::BodyTooLong),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(api.call_count(), 0);
    assert_eq!(sink.records()[0].detail, "body_too_long");
}

#[tokio::test]
async fn provider_rejection_is_never_retried() {
    let api = ScriptedApi::with_script([SendOutcome::Rejected {
        kind: RejectKind::InvalidRecipient,
        detail: "21211".to_owned(),
    }]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Rejected {
            kind: RejectKind::InvalidRecipient,
            detail: "21211".to_owned(),
        }
    );
    assert_eq!(api.call_count(), 1);
    assert_eq!(sink.records()[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_protocol_errors_become_a_rejection() {
    let protocol_error = || SendOutcome::Transient {
        kind: TransientKind::ProtocolError,
        detail: "unexpected schema".to_owned(),
    };
    let api = ScriptedApi::with_script([protocol_error(), protocol_error()]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    match outcome {
        DispatchOutcome::Rejected { kind, .. } => assert_eq!(kind, RejectKind::ProtocolError),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(api.call_count(), 2, "second protocol error is terminal");
}

#[tokio::test(start_paused = true)]
async fn one_protocol_error_then_success_is_sent() {
    let api = ScriptedApi::with_script([
        SendOutcome::Transient {
            kind: TransientKind::ProtocolError,
            detail: "unexpected schema".to_owned(),
        },
        SendOutcome::Sent {
            sid: "SM-recovered".to_owned(),
        },
    ]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    match outcome {
        DispatchOutcome::Sent { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected sent, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_provider_codes_reject_after_the_budget() {
    let unknown = || SendOutcome::Transient {
        kind: TransientKind::Unknown,
        detail: "code 63033".to_owned(),
    };
    let api = ScriptedApi::with_script([unknown(), unknown(), unknown()]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    match outcome {
        DispatchOutcome::Rejected { kind, detail } => {
            assert_eq!(kind, RejectKind::Unknown);
            assert_eq!(detail, "code 63033");
        }
        other => panic!("expected rejection after budget, got {other:?}"),
    }
    assert_eq!(api.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn expired_deadline_stops_the_retry_loop() {
    let api = ScriptedApi::with_script([SendOutcome::Transient {
        kind: TransientKind::UpstreamError,
        detail: "http 503".to_owned(),
    }]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    // Deadline already in the past: the first transient failure may not retry.
    let request = DispatchRequest::new("+14155550123", "hi")
        .with_channel(ChannelHint::Sms)
        .with_deadline(Instant::now());

    let outcome = dispatcher.dispatch(request).await;

    assert_eq!(
        outcome,
        DispatchOutcome::TransientFailure {
            kind: TransientKind::Timeout,
            detail: "deadline elapsed during backoff".to_owned(),
            attempts: 1,
        }
    );
    assert_eq!(api.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_complete_well_within_the_default_deadline() {
    let rate_limited = || SendOutcome::Transient {
        kind: TransientKind::RateLimited,
        detail: "http 429".to_owned(),
    };
    let api = ScriptedApi::with_script([
        rate_limited(),
        rate_limited(),
        SendOutcome::Sent {
            sid: "SM-slow".to_owned(),
        },
    ]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api, sink.clone());

    let started = Instant::now();
    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    assert!(outcome.is_sent());
    // Worst case backoff: 500 ms + 1000 ms of full jitter.
    assert!(started.elapsed() <= Duration::from_millis(1500));
}

#[tokio::test]
async fn broken_audit_sink_does_not_change_the_outcome() {
    let api = ScriptedApi::with_script([SendOutcome::Sent {
        sid: "SM-ok".to_owned(),
    }]);
    let dispatcher = Dispatcher::new(
        sms_credentials(),
        api,
        std::sync::Arc::new(BrokenSink),
    );

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    assert!(outcome.is_sent());
}

#[tokio::test]
async fn outcome_serializes_with_a_discriminating_tag() {
    let api = ScriptedApi::with_script([SendOutcome::Sent {
        sid: "SM-json".to_owned(),
    }]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api, sink);

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    let value: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&outcome).expect("serialize"))
            .expect("parse");
    assert_eq!(value["outcome"], "sent");
    assert_eq!(value["provider_message_id"], "SM-json");
    assert_eq!(value["channel"], "sms");
}
