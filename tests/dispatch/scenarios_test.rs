//! End-to-end dispatch scenarios against a scripted upstream.

use parentline::channel::{Channel, ChannelHint, SenderSpec};
use parentline::config::Credentials;
use parentline::twilio::{RejectKind, SendOutcome, TransientKind};
use parentline::{DispatchOutcome, DispatchRequest, Dispatcher, SkipReason};

use crate::support::{
    dual_channel_credentials, messaging_service_credentials, sms_credentials, CaptureSink,
    ScriptedApi,
};

#[tokio::test]
async fn disabled_dispatcher_skips_without_network() {
    let api = ScriptedApi::with_script([]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(Credentials::disabled(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Skipped {
            reason: SkipReason::Disabled
        }
    );
    assert_eq!(api.call_count(), 0);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, "skipped");
    assert_eq!(records[0].detail, "disabled");
    assert_eq!(records[0].attempts, 0);
}

#[tokio::test]
async fn blank_body_and_recipient_are_skipped() {
    let api = ScriptedApi::with_script([]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let blank_body = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "   "))
        .await;
    let blank_recipient = dispatcher.dispatch(DispatchRequest::new("", "hello")).await;

    assert_eq!(
        blank_body,
        DispatchOutcome::Skipped {
            reason: SkipReason::BlankBody
        }
    );
    assert_eq!(
        blank_recipient,
        DispatchOutcome::Skipped {
            reason: SkipReason::BlankRecipient
        }
    );
    assert_eq!(api.call_count(), 0);
    assert_eq!(sink.records().len(), 2);
}

#[tokio::test]
async fn auto_routes_to_whatsapp_when_sender_exists() {
    let api = ScriptedApi::with_script([SendOutcome::Sent {
        sid: "SM0001".to_owned(),
    }]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(dual_channel_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+18777804236", "hello"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Sent {
            provider_message_id: "SM0001".to_owned(),
            channel: Channel::Whatsapp,
            sender: "whatsapp:+14155238886".to_owned(),
            attempts: 1,
        }
    );

    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].channel, Channel::Whatsapp);
    assert_eq!(calls[0].to, "+18777804236");
    assert_eq!(calls[0].body, "hello");
    assert_eq!(
        calls[0].sender,
        SenderSpec::DirectFrom {
            address: "whatsapp:+14155238886".to_owned()
        }
    );

    let records = sink.records();
    assert_eq!(records[0].channel, "whatsapp");
    assert_eq!(records[0].outcome, "sent");
    assert_eq!(records[0].detail, "SM0001");
}

#[tokio::test]
async fn sms_goes_through_the_messaging_service() {
    let api = ScriptedApi::with_script([SendOutcome::Sent {
        sid: "SM0002".to_owned(),
    }]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(messaging_service_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+18777804236", "ping").with_channel(ChannelHint::Sms))
        .await;

    assert!(outcome.is_sent());
    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].channel, Channel::Sms);
    assert_eq!(
        calls[0].sender,
        SenderSpec::MessagingService {
            sid: "MG00aa11bb".to_owned()
        }
    );
}

#[tokio::test]
async fn invalid_recipient_is_rejected_without_network() {
    let api = ScriptedApi::with_script([]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("not-a-number", "x").with_channel(ChannelHint::Sms))
        .await;

    match outcome {
        DispatchOutcome::Rejected { kind, .. } => assert_eq!(kind, RejectKind::InvalidPhone),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(api.call_count(), 0);

    let records = sink.records();
    assert_eq!(records[0].outcome, "rejected");
    assert_eq!(records[0].detail, "invalid_phone");
    assert_eq!(records[0].attempts, 1);
}

#[tokio::test]
async fn whatsapp_hint_without_whatsapp_sender_is_rejected() {
    let api = ScriptedApi::with_script([]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+18777804236", "hi").with_channel(ChannelHint::Whatsapp))
        .await;

    match outcome {
        DispatchOutcome::Rejected { kind, .. } => {
            assert_eq!(kind, RejectKind::NoSenderForChannel);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(api.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_twice_then_sent() {
    let api = ScriptedApi::with_script([
        SendOutcome::Transient {
            kind: TransientKind::RateLimited,
            detail: "http 429".to_owned(),
        },
        SendOutcome::Transient {
            kind: TransientKind::RateLimited,
            detail: "http 429".to_owned(),
        },
        SendOutcome::Sent {
            sid: "SM0003".to_owned(),
        },
    ]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "retry me").with_channel(ChannelHint::Sms))
        .await;

    match outcome {
        DispatchOutcome::Sent { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected sent after retries, got {other:?}"),
    }
    assert_eq!(api.call_count(), 3);

    let records = sink.records();
    assert_eq!(records.len(), 1, "one audit record despite three attempts");
    assert_eq!(records[0].attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_exhaust_the_budget() {
    let rate_limited = || SendOutcome::Transient {
        kind: TransientKind::RateLimited,
        detail: "http 429".to_owned(),
    };
    let api = ScriptedApi::with_script([rate_limited(), rate_limited(), rate_limited()]);
    let sink = CaptureSink::new();
    let dispatcher = Dispatcher::new(sms_credentials(), api.clone(), sink.clone());

    let outcome = dispatcher
        .dispatch(DispatchRequest::new("+14155550123", "hi").with_channel(ChannelHint::Sms))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::TransientFailure {
            kind: TransientKind::RateLimited,
            detail: "http 429".to_owned(),
            attempts: 3,
        }
    );
    assert_eq!(api.call_count(), 3);
    assert_eq!(sink.records()[0].outcome, "transient");
}
