//! Channel and sender selection.
//!
//! Replaces the old chain of `or`-fallback lookups with an enumerable
//! decision table: given the credential snapshot and a (possibly `auto`)
//! channel hint, produce the concrete channel and the concrete sender
//! identity for the upstream request.

use serde::Serialize;

use crate::config::Credentials;
use crate::recipient::Recipient;

/// Address prefix marking a WhatsApp identity on the Twilio wire.
pub const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Transport used to deliver a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Plain SMS.
    Sms,
    /// WhatsApp via the Twilio sandbox or a registered sender.
    Whatsapp,
}

impl Channel {
    /// Wire name of the channel (`sms` or `whatsapp`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
        }
    }
}

/// Caller-requested channel, `Auto` deferring the choice to the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelHint {
    /// Deliver over SMS.
    Sms,
    /// Deliver over WhatsApp.
    Whatsapp,
    /// Let the selector pick: WhatsApp when a WhatsApp sender exists,
    /// otherwise SMS.
    #[default]
    Auto,
}

impl ChannelHint {
    /// Name of the hint for audit records (`sms`, `whatsapp` or `auto`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
            Self::Auto => "auto",
        }
    }
}

/// The outbound identity presented on the upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderSpec {
    /// Delegate sender choice to a provider-side pool; no `From` field.
    MessagingService {
        /// The messaging-service SID.
        sid: String,
    },
    /// A direct `From` address (E.164, `whatsapp:`-prefixed for WhatsApp).
    DirectFrom {
        /// The outbound address.
        address: String,
    },
}

impl SenderSpec {
    /// Human-readable sender identity for audit records.
    pub fn describe(&self) -> String {
        match self {
            Self::MessagingService { sid } => format!("messaging-service:{sid}"),
            Self::DirectFrom { address } => address.clone(),
        }
    }
}

/// No sender identity is configured for the channel the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no sender configured for channel {channel}")]
pub struct NoSenderForChannel {
    /// The channel that could not be served.
    pub channel: &'static str,
}

/// Resolve the concrete channel and sender for a normalized recipient.
///
/// Decision table:
/// - hint `auto`: WhatsApp when any WhatsApp-capable sender exists, else SMS;
/// - hint `whatsapp`: requires a WhatsApp-capable sender;
/// - hint `sms`: requires the messaging service or a plain direct sender.
///
/// A messaging service is used only on the SMS channel; WhatsApp always
/// carries a direct `From`.
///
/// # Errors
///
/// Returns [`NoSenderForChannel`] when the resolved channel has no usable
/// sender identity.
pub fn select(
    credentials: &Credentials,
    recipient: &Recipient,
) -> Result<(Channel, SenderSpec), NoSenderForChannel> {
    let channel = match recipient.channel() {
        Some(channel) => channel,
        None if whatsapp_sender(credentials).is_some() => Channel::Whatsapp,
        None => Channel::Sms,
    };

    let sender = match channel {
        Channel::Whatsapp => {
            let address = whatsapp_sender(credentials)
                .ok_or(NoSenderForChannel { channel: "whatsapp" })?;
            SenderSpec::DirectFrom { address }
        }
        Channel::Sms => {
            if let Some(sid) = credentials.messaging_service_sid() {
                SenderSpec::MessagingService { sid: sid.to_owned() }
            } else {
                let address = sms_sender(credentials)
                    .ok_or(NoSenderForChannel { channel: "sms" })?;
                SenderSpec::DirectFrom { address }
            }
        }
    };

    Ok((channel, sender))
}

/// The WhatsApp-capable sender: the dedicated WhatsApp address, or the
/// generic fallback when it already carries the `whatsapp:` prefix.
fn whatsapp_sender(credentials: &Credentials) -> Option<String> {
    if let Some(from) = credentials.whatsapp_from() {
        return Some(ensure_whatsapp_prefix(from));
    }
    credentials
        .generic_from()
        .filter(|from| from.starts_with(WHATSAPP_PREFIX))
        .map(str::to_owned)
}

/// The plain-SMS sender: the dedicated SMS address, or the generic fallback
/// when it is not a WhatsApp identity.
fn sms_sender(credentials: &Credentials) -> Option<String> {
    if let Some(from) = credentials.sms_from() {
        return Some(from.to_owned());
    }
    credentials
        .generic_from()
        .filter(|from| !from.starts_with(WHATSAPP_PREFIX))
        .map(str::to_owned)
}

fn ensure_whatsapp_prefix(address: &str) -> String {
    if address.starts_with(WHATSAPP_PREFIX) {
        address.to_owned()
    } else {
        format!("{WHATSAPP_PREFIX}{address}")
    }
}
