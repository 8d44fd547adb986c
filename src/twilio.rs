//! Twilio Messages API adapter.
//!
//! Builds the form-encoded send request, performs the HTTP call under the
//! caller's deadline, and maps every provider response or transport error
//! into the internal outcome taxonomy. Nothing in here retries; that is the
//! dispatcher's job.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::{Channel, SenderSpec, WHATSAPP_PREFIX};
use crate::config::Credentials;

/// Twilio REST API base.
const API_BASE: &str = "https://api.twilio.com";

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Cap on error detail copied into outcomes and audit records.
const MAX_DETAIL_CHARS: usize = 200;

/// Permanent provider rejections; never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    /// The recipient could not be parsed as an E.164 phone number.
    InvalidPhone,
    /// No sender identity configured for the requested channel.
    NoSenderForChannel,
    /// The body exceeds the carrier's maximum message length.
    BodyTooLong,
    /// Provider code 21211: the `To` number is not a valid destination.
    InvalidRecipient,
    /// Provider code 21610: the recipient has opted out.
    Blacklisted,
    /// Provider code 21608: unverified number on a trial account.
    Unverified,
    /// Provider code 21408: no permission to send to this region.
    RegionForbidden,
    /// The provider kept answering with unparseable responses.
    ProtocolError,
    /// Unclassified provider error that persisted across the retry budget.
    Unknown,
}

impl RejectKind {
    /// Stable name used in audit records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPhone => "invalid_phone",
            Self::NoSenderForChannel => "no_sender_for_channel",
            Self::BodyTooLong => "body_too_long",
            Self::InvalidRecipient => "invalid_recipient",
            Self::Blacklisted => "blacklisted",
            Self::Unverified => "unverified",
            Self::RegionForbidden => "region_forbidden",
            Self::ProtocolError => "protocol_error",
            Self::Unknown => "unknown",
        }
    }
}

/// Transient failures; eligible for retry within the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// HTTP 429 or provider code 20429.
    RateLimited,
    /// HTTP 5xx from the provider.
    UpstreamError,
    /// The deadline elapsed before or during the request.
    Timeout,
    /// DNS, TLS or connection-level failure.
    Network,
    /// Malformed or unexpected response body.
    ProtocolError,
    /// Provider error code with no classification.
    Unknown,
}

impl TransientKind {
    /// Stable name used in audit records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::UpstreamError => "upstream_error",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::ProtocolError => "protocol_error",
            Self::Unknown => "unknown",
        }
    }
}

/// Result of a single upstream send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted the message and assigned it a SID.
    Sent {
        /// Provider message SID.
        sid: String,
    },
    /// Permanent rejection; retrying cannot help.
    Rejected {
        /// Classified rejection kind.
        kind: RejectKind,
        /// Provider-supplied detail, truncated.
        detail: String,
    },
    /// Transient failure; the dispatcher may retry.
    Transient {
        /// Classified transient kind.
        kind: TransientKind,
        /// Provider-supplied detail, truncated.
        detail: String,
    },
}

/// The carrier seam: one send attempt under a deadline.
///
/// The production implementation is [`TwilioClient`]; tests substitute mocks.
#[async_trait::async_trait]
pub trait MessagesApi: Send + Sync {
    /// Perform one send attempt. Never retries; every transport or provider
    /// condition is folded into the returned [`SendOutcome`].
    async fn send_message(
        &self,
        channel: Channel,
        sender: &SenderSpec,
        to: &str,
        body: &str,
        deadline: Instant,
    ) -> SendOutcome;
}

/// HTTP client for the Twilio Messages endpoint.
pub struct TwilioClient {
    http: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    /// Create a client bound to a credential snapshot.
    pub fn new(credentials: &Credentials) -> Self {
        Self::with_base_url(credentials, API_BASE.to_owned())
    }

    /// Create a client pointing at a custom API base (sandbox testing).
    pub fn with_base_url(credentials: &Credentials, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            http,
            base_url,
            account_sid: credentials.account_sid().to_owned(),
            auth_token: credentials.auth_token().to_owned(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait::async_trait]
impl MessagesApi for TwilioClient {
    async fn send_message(
        &self,
        channel: Channel,
        sender: &SenderSpec,
        to: &str,
        body: &str,
        deadline: Instant,
    ) -> SendOutcome {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return SendOutcome::Transient {
                kind: TransientKind::Timeout,
                detail: "deadline elapsed before request".to_owned(),
            };
        }

        let to_wire = wire_address(channel, to);
        let mut form: Vec<(&str, &str)> = vec![("To", &to_wire), ("Body", body)];
        // Exactly one of MessagingServiceSid / From, never both.
        match sender {
            SenderSpec::MessagingService { sid } => form.push(("MessagingServiceSid", sid)),
            SenderSpec::DirectFrom { address } => form.push(("From", address)),
        }

        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(remaining)
            .form(&form)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                let outcome = classify_response(status, &body);
                debug!(status, channel = channel.as_str(), "twilio response classified");
                outcome
            }
            Err(e) if e.is_timeout() => SendOutcome::Transient {
                kind: TransientKind::Timeout,
                detail: "request timed out".to_owned(),
            },
            Err(e) => SendOutcome::Transient {
                kind: TransientKind::Network,
                detail: truncate_detail(&e.to_string()),
            },
        }
    }
}

/// Prefix the destination for the WhatsApp channel; SMS goes out bare.
fn wire_address(channel: Channel, to: &str) -> String {
    match channel {
        Channel::Whatsapp if !to.starts_with(WHATSAPP_PREFIX) => format!("{WHATSAPP_PREFIX}{to}"),
        _ => to.to_owned(),
    }
}

/// Successful Messages API response body.
#[derive(Debug, Deserialize)]
struct MessageCreated {
    sid: Option<String>,
}

/// Error response body from the Messages API.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    message: Option<String>,
}

/// Map an HTTP status and response body into a [`SendOutcome`].
///
/// Exported for unit testing the classification table.
#[doc(hidden)]
pub fn classify_response(status: u16, body: &str) -> SendOutcome {
    if (200..300).contains(&status) {
        return match serde_json::from_str::<MessageCreated>(body) {
            Ok(MessageCreated { sid: Some(sid) }) if !sid.is_empty() => SendOutcome::Sent { sid },
            _ => SendOutcome::Transient {
                kind: TransientKind::ProtocolError,
                detail: "success response without message sid".to_owned(),
            },
        };
    }

    if status == 429 {
        return SendOutcome::Transient {
            kind: TransientKind::RateLimited,
            detail: format!("http {status}"),
        };
    }

    if status >= 500 {
        return SendOutcome::Transient {
            kind: TransientKind::UpstreamError,
            detail: format!("http {status}"),
        };
    }

    // 4xx: classify by provider error code.
    let parsed = serde_json::from_str::<ApiError>(body).ok();
    let code = parsed.as_ref().and_then(|e| e.code);
    let detail = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .map(|m| truncate_detail(&m))
        .unwrap_or_else(|| format!("http {status}"));

    match code {
        Some(21211) => SendOutcome::Rejected {
            kind: RejectKind::InvalidRecipient,
            detail,
        },
        Some(21610) => SendOutcome::Rejected {
            kind: RejectKind::Blacklisted,
            detail,
        },
        Some(21608) => SendOutcome::Rejected {
            kind: RejectKind::Unverified,
            detail,
        },
        Some(21408) => SendOutcome::Rejected {
            kind: RejectKind::RegionForbidden,
            detail,
        },
        Some(20429) => SendOutcome::Transient {
            kind: TransientKind::RateLimited,
            detail,
        },
        Some(_) => SendOutcome::Transient {
            kind: TransientKind::Unknown,
            detail,
        },
        None => SendOutcome::Transient {
            kind: TransientKind::ProtocolError,
            detail: format!("unparseable error body (http {status})"),
        },
    }
}

fn truncate_detail(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_DETAIL_CHARS {
        let shortened: String = collapsed.chars().take(MAX_DETAIL_CHARS).collect();
        return format!("{shortened}...[truncated]");
    }
    collapsed
}
