//! Dispatch orchestration.
//!
//! The [`Dispatcher`] is the single entry point callers use: it enforces the
//! enable flag, validates input, normalizes the recipient, selects channel
//! and sender, drives the retry loop around the upstream adapter, collapses
//! duplicate idempotency keys, and emits exactly one audit record per
//! terminal outcome. Every possible ending maps into a [`DispatchOutcome`];
//! no error escapes as a fault.

mod idempotency;
mod retry;

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::audit::{AuditRecord, AuditSink};
use crate::channel::{self, Channel, ChannelHint};
use crate::config::{ConfigError, Credentials};
use crate::recipient::normalize;
use crate::twilio::{MessagesApi, RejectKind, SendOutcome, TransientKind, TwilioClient};

use idempotency::IdempotencyCache;
use retry::{backoff_delay, DEFAULT_DEADLINE, MAX_ATTEMPTS};

/// Carrier limit on message body length, in characters.
const MAX_BODY_CHARS: usize = 1_600;

/// Why a dispatch was skipped without touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Notification dispatch is globally disabled.
    Disabled,
    /// The recipient contact was empty.
    BlankRecipient,
    /// The message body was empty or whitespace.
    BlankBody,
}

impl SkipReason {
    /// Stable name used in audit records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::BlankRecipient => "blank_recipient",
            Self::BlankBody => "blank_body",
        }
    }
}

/// Terminal outcome of one dispatch. Callers discriminate by tag; anything
/// that is not `Sent` is a non-success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The provider accepted the message.
    Sent {
        /// Provider-assigned message SID.
        provider_message_id: String,
        /// Channel the message went out on.
        channel: Channel,
        /// Sender identity presented to the recipient.
        sender: String,
        /// Upstream attempts made, including the successful one.
        attempts: u32,
    },
    /// Nothing was sent and nothing will be; not an error.
    Skipped {
        /// Why the dispatch was skipped.
        reason: SkipReason,
    },
    /// Permanent failure; retrying the same request cannot help.
    Rejected {
        /// Classified rejection kind.
        kind: RejectKind,
        /// Human-readable detail.
        detail: String,
    },
    /// Transient failure that survived the whole retry budget.
    #[serde(rename = "transient")]
    TransientFailure {
        /// Last observed transient kind.
        kind: TransientKind,
        /// Human-readable detail.
        detail: String,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl DispatchOutcome {
    /// `true` only for [`DispatchOutcome::Sent`].
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Audit tag: `sent`, `skipped`, `rejected` or `transient`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Skipped { .. } => "skipped",
            Self::Rejected { .. } => "rejected",
            Self::TransientFailure { .. } => "transient",
        }
    }

    /// Audit detail: the provider SID for sends, the kind otherwise.
    pub fn detail(&self) -> String {
        match self {
            Self::Sent {
                provider_message_id,
                ..
            } => provider_message_id.clone(),
            Self::Skipped { reason } => reason.as_str().to_owned(),
            Self::Rejected { kind, .. } => kind.as_str().to_owned(),
            Self::TransientFailure { kind, .. } => kind.as_str().to_owned(),
        }
    }

    /// Upstream attempts behind this outcome (0 for skips, 1 for rejections).
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Sent { attempts, .. } | Self::TransientFailure { attempts, .. } => *attempts,
            Self::Skipped { .. } => 0,
            Self::Rejected { .. } => 1,
        }
    }
}

/// One message to be handed to the carrier.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Free-form recipient contact; normalized before sending.
    pub to: String,
    /// Message body, already formatted by the caller.
    pub body: String,
    /// Requested channel; defaults to `auto`.
    pub channel: ChannelHint,
    /// Optional key collapsing duplicate dispatches into one upstream call.
    pub idempotency_key: Option<String>,
    /// Optional wall-clock bound; defaults to 15 seconds from dispatch.
    pub deadline: Option<Instant>,
}

impl DispatchRequest {
    /// A request for `to`/`body` with `auto` channel and default deadline.
    pub fn new(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            body: body.into(),
            channel: ChannelHint::Auto,
            idempotency_key: None,
            deadline: None,
        }
    }

    /// Set the requested channel.
    #[must_use]
    pub fn with_channel(mut self, channel: ChannelHint) -> Self {
        self.channel = channel;
        self
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set an explicit deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Payment-notification dispatcher.
///
/// Owns the immutable credential snapshot and the upstream adapter for its
/// lifetime; safe to share across concurrent callers behind an `Arc`.
pub struct Dispatcher {
    credentials: Credentials,
    upstream: Arc<dyn MessagesApi>,
    audit: Arc<dyn AuditSink>,
    idempotency: IdempotencyCache,
}

impl Dispatcher {
    /// Build a dispatcher from an explicit credential snapshot and adapter.
    pub fn new(
        credentials: Credentials,
        upstream: Arc<dyn MessagesApi>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            credentials,
            upstream,
            audit,
            idempotency: IdempotencyCache::default(),
        }
    }

    /// Build a dispatcher from the process environment.
    ///
    /// A switched-off enable flag yields a working dispatcher that skips
    /// (and audits) every request; incomplete credentials refuse to start.
    ///
    /// # Errors
    ///
    /// Returns the `missing_*`/`no_sender` [`ConfigError`] variants.
    pub fn from_env(audit: Arc<dyn AuditSink>) -> Result<Self, ConfigError> {
        let credentials = match Credentials::resolve() {
            Ok(credentials) => credentials,
            Err(ConfigError::Disabled) => Credentials::disabled(),
            Err(e) => return Err(e),
        };
        let upstream = Arc::new(TwilioClient::new(&credentials));
        Ok(Self::new(credentials, upstream, audit))
    }

    /// The credential snapshot this dispatcher was built with.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Dispatch one notification and return its terminal outcome.
    ///
    /// Exactly one audit record is written per call, including replays served
    /// from the idempotency cache.
    pub async fn dispatch(&self, req: DispatchRequest) -> DispatchOutcome {
        let started = Instant::now();
        let deadline = req
            .deadline
            .or_else(|| started.checked_add(DEFAULT_DEADLINE))
            .unwrap_or(started);

        let outcome = match req.idempotency_key.as_deref() {
            Some(key) => {
                let cell = self.idempotency.entry(key);
                cell.get_or_init(|| self.dispatch_uncached(&req, deadline))
                    .await
                    .clone()
            }
            None => self.dispatch_uncached(&req, deadline).await,
        };

        self.record(&req, &outcome, started);
        outcome
    }

    /// The full protocol for one request, idempotency aside.
    async fn dispatch_uncached(&self, req: &DispatchRequest, deadline: Instant) -> DispatchOutcome {
        if !self.credentials.enabled() {
            return DispatchOutcome::Skipped {
                reason: SkipReason::Disabled,
            };
        }
        if req.to.trim().is_empty() {
            return DispatchOutcome::Skipped {
                reason: SkipReason::BlankRecipient,
            };
        }
        if req.body.trim().is_empty() {
            return DispatchOutcome::Skipped {
                reason: SkipReason::BlankBody,
            };
        }
        let body_chars = req.body.chars().count();
        if body_chars > MAX_BODY_CHARS {
            return DispatchOutcome::Rejected {
                kind: RejectKind::BodyTooLong,
                detail: format!("body is {body_chars} characters, limit is {MAX_BODY_CHARS}"),
            };
        }

        let recipient = match normalize(&req.to, req.channel) {
            Ok(recipient) => recipient,
            Err(e) => {
                return DispatchOutcome::Rejected {
                    kind: RejectKind::InvalidPhone,
                    detail: e.to_string(),
                };
            }
        };

        let (resolved_channel, sender) = match channel::select(&self.credentials, &recipient) {
            Ok(selection) => selection,
            Err(e) => {
                return DispatchOutcome::Rejected {
                    kind: RejectKind::NoSenderForChannel,
                    detail: e.to_string(),
                };
            }
        };

        self.send_with_retry(resolved_channel, sender, recipient.e164(), &req.body, deadline)
            .await
    }

    /// Retry loop: transient failures back off and retry within the budget
    /// and deadline; everything else is terminal on first sight.
    async fn send_with_retry(
        &self,
        resolved: Channel,
        sender: channel::SenderSpec,
        to: &str,
        body: &str,
        deadline: Instant,
    ) -> DispatchOutcome {
        let mut attempt: u32 = 1;
        let mut prev_protocol_error = false;

        loop {
            let result = self
                .upstream
                .send_message(resolved, &sender, to, body, deadline)
                .await;

            match result {
                SendOutcome::Sent { sid } => {
                    debug!(channel = resolved.as_str(), attempt, sid = %sid, "message accepted");
                    return DispatchOutcome::Sent {
                        provider_message_id: sid,
                        channel: resolved,
                        sender: sender.describe(),
                        attempts: attempt,
                    };
                }
                SendOutcome::Rejected { kind, detail } => {
                    return DispatchOutcome::Rejected { kind, detail };
                }
                SendOutcome::Transient { kind, detail } => {
                    // A second consecutive unparseable response stops being
                    // transient: the provider is answering, just not in a
                    // shape we recognize.
                    if kind == TransientKind::ProtocolError && prev_protocol_error {
                        return DispatchOutcome::Rejected {
                            kind: RejectKind::ProtocolError,
                            detail,
                        };
                    }
                    prev_protocol_error = kind == TransientKind::ProtocolError;

                    if attempt >= MAX_ATTEMPTS {
                        // Unclassified provider codes that persisted across
                        // the whole budget surface as a rejection.
                        if kind == TransientKind::Unknown {
                            return DispatchOutcome::Rejected {
                                kind: RejectKind::Unknown,
                                detail,
                            };
                        }
                        return DispatchOutcome::TransientFailure {
                            kind,
                            detail,
                            attempts: attempt,
                        };
                    }

                    let delay = backoff_delay(attempt)
                        .min(deadline.saturating_duration_since(Instant::now()));
                    debug!(
                        attempt,
                        kind = kind.as_str(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;

                    // Deadline observed at the end of each backoff sleep.
                    if Instant::now() >= deadline {
                        return DispatchOutcome::TransientFailure {
                            kind: TransientKind::Timeout,
                            detail: "deadline elapsed during backoff".to_owned(),
                            attempts: attempt,
                        };
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Write the audit record for a terminal outcome. Sink failures are
    /// reported out-of-band and never change the outcome.
    fn record(&self, req: &DispatchRequest, outcome: &DispatchOutcome, started: Instant) {
        let (to, channel) = match normalize(&req.to, req.channel) {
            Ok(recipient) => {
                // Failed dispatches with an `auto` hint still audit the
                // channel the selector resolved, not the hint itself.
                let channel = recipient.channel().map_or_else(
                    || {
                        channel::select(&self.credentials, &recipient)
                            .map_or(req.channel.as_str(), |(selected, _)| selected.as_str())
                    },
                    Channel::as_str,
                );
                (recipient.e164().to_owned(), channel)
            }
            Err(_) => (req.to.trim().to_owned(), req.channel.as_str()),
        };
        let channel = match outcome {
            DispatchOutcome::Sent { channel, .. } => channel.as_str(),
            _ => channel,
        };

        let record = AuditRecord {
            ts: AuditRecord::now_ts(),
            account: self.credentials.masked_account_sid(),
            to,
            channel: channel.to_owned(),
            outcome: outcome.tag().to_owned(),
            detail: outcome.detail(),
            attempts: outcome.attempts(),
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if let Err(e) = self.audit.append(&record) {
            warn!(error = %e, outcome = %record.outcome, "failed to write audit record");
        }
    }
}
