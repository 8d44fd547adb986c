//! Parentline — payment-notification dispatch for school management platforms.
//!
//! Hands caller-formatted message bodies to Twilio over SMS or WhatsApp with
//! explicit credential resolution, channel selection, retry, idempotency and
//! an append-only audit trail. Best-effort hand-off to the carrier with
//! faithful outcome reporting; delivery to the handset is out of scope.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod recipient;
pub mod twilio;

pub use dispatch::{DispatchOutcome, DispatchRequest, Dispatcher, SkipReason};
