//! Twilio credential resolution from the process environment.
//!
//! A [`Credentials`] value is an immutable snapshot taken once, at dispatcher
//! construction. Reloading configuration means building a new dispatcher.
//! Secrets never appear in clear text in logs or diagnostics; see
//! [`mask_tail`].

use std::fmt;

/// Master enable flag. Values `1`, `true`, `yes` (case-insensitive) enable
/// dispatch; anything else (including absence) disables it.
pub const ENV_ENABLED: &str = "PARENTLINE_NOTIFY_ENABLED";
/// Twilio account SID (expected prefix `AC`).
pub const ENV_ACCOUNT_SID: &str = "TWILIO_ACCOUNT_SID";
/// Twilio auth token.
pub const ENV_AUTH_TOKEN: &str = "TWILIO_AUTH_TOKEN";
/// Messaging-service SID; when set, Twilio picks the SMS sender from a pool.
pub const ENV_MESSAGING_SERVICE_SID: &str = "TWILIO_MESSAGING_SERVICE_SID";
/// Direct WhatsApp sender, e.g. `whatsapp:+14155238886`.
pub const ENV_WHATSAPP_FROM: &str = "TWILIO_WHATSAPP_FROM";
/// Direct SMS sender in E.164.
pub const ENV_SMS_FROM: &str = "TWILIO_SMS_FROM";
/// Generic fallback sender, used when the channel-specific sender is unset.
pub const ENV_FROM: &str = "TWILIO_FROM";

/// Errors from credential resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The master enable flag is off or unset.
    #[error("notification dispatch is disabled ({ENV_ENABLED} is not set)")]
    Disabled,

    /// No account SID configured.
    #[error("missing {ENV_ACCOUNT_SID}")]
    MissingAccount,

    /// No auth token configured.
    #[error("missing {ENV_AUTH_TOKEN}")]
    MissingToken,

    /// Dispatch enabled but no sender identity of any kind configured.
    #[error("no sender configured: set {ENV_MESSAGING_SERVICE_SID}, {ENV_WHATSAPP_FROM}, {ENV_SMS_FROM} or {ENV_FROM}")]
    NoSender,
}

/// Immutable Twilio credential snapshot.
///
/// When `enabled` is false the remaining fields are not validated; a disabled
/// snapshot exists so the dispatcher can still produce (and audit) the
/// `Skipped` outcome without touching the network.
#[derive(Clone)]
pub struct Credentials {
    enabled: bool,
    account_sid: String,
    auth_token: String,
    messaging_service_sid: Option<String>,
    whatsapp_from: Option<String>,
    sms_from: Option<String>,
    generic_from: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("enabled", &self.enabled)
            .field("account_sid", &mask_tail(&self.account_sid))
            .field("auth_token", &"[REDACTED]")
            .field("messaging_service_sid", &self.messaging_service_sid)
            .field("whatsapp_from", &self.whatsapp_from)
            .field("sms_from", &self.sms_from)
            .field("generic_from", &self.generic_from)
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Disabled`] when the enable flag is off, and the
    /// `missing_*`/`no_sender` variants when enabled but incomplete.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve credentials through a custom environment resolver.
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in
    /// tests).
    ///
    /// # Errors
    ///
    /// Same contract as [`Credentials::resolve`].
    pub fn resolve_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| env(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let enabled = lookup(ENV_ENABLED)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if !enabled {
            return Err(ConfigError::Disabled);
        }

        let account_sid = lookup(ENV_ACCOUNT_SID).ok_or(ConfigError::MissingAccount)?;
        let auth_token = lookup(ENV_AUTH_TOKEN).ok_or(ConfigError::MissingToken)?;

        let credentials = Self {
            enabled: true,
            account_sid,
            auth_token,
            messaging_service_sid: lookup(ENV_MESSAGING_SERVICE_SID),
            whatsapp_from: lookup(ENV_WHATSAPP_FROM),
            sms_from: lookup(ENV_SMS_FROM),
            generic_from: lookup(ENV_FROM),
        };

        if credentials.messaging_service_sid.is_none()
            && credentials.whatsapp_from.is_none()
            && credentials.sms_from.is_none()
            && credentials.generic_from.is_none()
        {
            return Err(ConfigError::NoSender);
        }

        Ok(credentials)
    }

    /// A disabled snapshot with no credential material.
    ///
    /// Used to construct a dispatcher that audits `Skipped` outcomes while
    /// notifications are switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            account_sid: String::new(),
            auth_token: String::new(),
            messaging_service_sid: None,
            whatsapp_from: None,
            sms_from: None,
            generic_from: None,
        }
    }

    /// Whether dispatch is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The Twilio account SID.
    pub fn account_sid(&self) -> &str {
        &self.account_sid
    }

    /// The Twilio auth token.
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// The messaging-service SID, if configured.
    pub fn messaging_service_sid(&self) -> Option<&str> {
        self.messaging_service_sid.as_deref()
    }

    /// The direct WhatsApp sender, if configured.
    pub fn whatsapp_from(&self) -> Option<&str> {
        self.whatsapp_from.as_deref()
    }

    /// The direct SMS sender, if configured.
    pub fn sms_from(&self) -> Option<&str> {
        self.sms_from.as_deref()
    }

    /// The generic fallback sender, if configured.
    pub fn generic_from(&self) -> Option<&str> {
        self.generic_from.as_deref()
    }

    /// The account SID masked for logs and audit records.
    pub fn masked_account_sid(&self) -> String {
        mask_tail(&self.account_sid)
    }

    /// Human-readable configuration report with every secret masked.
    pub fn diagnostic(&self) -> String {
        let present = |v: &Option<String>| match v {
            Some(s) => s.clone(),
            None => "(unset)".to_owned(),
        };
        format!(
            "notification dispatch: {}\n\
             account sid:           {}\n\
             auth token:            {}\n\
             messaging service sid: {}\n\
             whatsapp from:         {}\n\
             sms from:              {}\n\
             generic from:          {}",
            if self.enabled { "enabled" } else { "disabled" },
            mask_tail(&self.account_sid),
            mask_tail(&self.auth_token),
            present(&self.messaging_service_sid),
            present(&self.whatsapp_from),
            present(&self.sms_from),
            present(&self.generic_from),
        )
    }
}

/// Mask a secret down to its last four characters.
///
/// Values of four characters or fewer are fully masked. The empty string
/// renders as `(unset)`.
pub fn mask_tail(secret: &str) -> String {
    if secret.is_empty() {
        return "(unset)".to_owned();
    }
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_owned();
    }
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("****{tail}")
}
