//! Contact normalization into channel-qualified E.164 addresses.
//!
//! Guardians' numbers arrive from the registration forms in every shape
//! imaginable (`(415) 555-0123`, `+1-415-555 0123`, `whatsapp:+14155550123`),
//! so everything is funneled through [`normalize`] before it reaches the
//! upstream adapter.

use std::sync::OnceLock;

use regex::Regex;

use crate::channel::{Channel, ChannelHint, WHATSAPP_PREFIX};

/// A normalized recipient: E.164 phone plus resolved channel.
///
/// `channel` is `None` when the caller asked for `auto` and no explicit
/// `whatsapp:` prefix forced a choice; the selector resolves it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    e164: String,
    channel: Option<Channel>,
}

impl Recipient {
    /// The phone number in E.164 (`+` followed by 8–15 digits).
    pub fn e164(&self) -> &str {
        &self.e164
    }

    /// The resolved channel, or `None` when still `auto`.
    pub fn channel(&self) -> Option<Channel> {
        self.channel
    }
}

/// Errors from recipient normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// The contact is not a `+`-prefixed phone number of 8–15 digits.
    #[error("invalid phone number: {0:?}")]
    InvalidPhone(String),
}

fn e164_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+[0-9]{8,15}$").expect("static E.164 pattern"))
}

/// Normalize a free-form contact into a [`Recipient`].
///
/// Whitespace, dashes and parentheses are stripped. An explicit `whatsapp:`
/// prefix on the input wins over `hint`. The remainder must be `+` followed
/// by 8–15 decimal digits.
///
/// # Errors
///
/// Returns [`NormalizeError::InvalidPhone`] when the cleaned input is not a
/// valid E.164 number.
pub fn normalize(raw: &str, hint: ChannelHint) -> Result<Recipient, NormalizeError> {
    let trimmed = raw.trim();

    let (rest, channel) = match trimmed.strip_prefix(WHATSAPP_PREFIX) {
        Some(rest) => (rest, Some(Channel::Whatsapp)),
        None => (
            trimmed,
            match hint {
                ChannelHint::Sms => Some(Channel::Sms),
                ChannelHint::Whatsapp => Some(Channel::Whatsapp),
                ChannelHint::Auto => None,
            },
        ),
    };

    let cleaned: String = rest
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();

    if !e164_pattern().is_match(&cleaned) {
        return Err(NormalizeError::InvalidPhone(raw.trim().to_owned()));
    }

    Ok(Recipient {
        e164: cleaned,
        channel,
    })
}
